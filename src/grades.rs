use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::calc::{compute_grade_report, round_2_decimals, CalcContext, GoalOutcome, GradeReport};
use crate::error::{AppError, AppResult};
use crate::lessons::require_lesson;
use crate::scale::{GradingScale, ScaleBand};
use crate::time::{normalize_due_date, now_rfc3339};
use crate::users::require_user;

const GRADING_TYPES: [&str; 3] = ["points", "percentage", "letter"];
const ITEM_TYPES: [&str; 6] = [
    "assignment",
    "quiz",
    "exam",
    "project",
    "participation",
    "other",
];
const WEIGHT_EPSILON: f64 = 1e-9;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGradeConfig {
    pub lesson_id: String,
    #[serde(default)]
    pub grading_scale: Option<serde_json::Value>,
    #[serde(default)]
    pub grading_type: Option<String>,
    #[serde(default)]
    pub total_points: Option<f64>,
    #[serde(default)]
    pub passing_grade: Option<String>,
    #[serde(default)]
    pub passing_percentage: Option<f64>,
    #[serde(default)]
    pub show_letter_grade: Option<bool>,
    #[serde(default)]
    pub show_percentage: Option<bool>,
    #[serde(default)]
    pub show_points: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeConfig {
    pub id: String,
    pub lesson_id: String,
    pub grading_type: String,
    pub total_points: f64,
    pub passing_grade: Option<String>,
    pub passing_percentage: f64,
    pub show_letter_grade: bool,
    pub show_percentage: bool,
    pub show_points: bool,
    #[serde(serialize_with = "ser_scale")]
    pub scale: GradingScale,
    pub created_at: String,
}

fn ser_scale<S: serde::Serializer>(scale: &GradingScale, s: S) -> Result<S::Ok, S::Error> {
    scale.to_json().serialize(s)
}

pub fn load_config(conn: &Connection, lesson_id: &str) -> AppResult<Option<GradeConfig>> {
    let row = conn
        .query_row(
            "SELECT id, grading_type, total_points, passing_grade, passing_percentage,
                    show_letter_grade, show_percentage, show_points, created_at
             FROM grade_configs
             WHERE lesson_id = ?",
            [lesson_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, f64>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, f64>(4)?,
                    r.get::<_, i64>(5)? != 0,
                    r.get::<_, i64>(6)? != 0,
                    r.get::<_, i64>(7)? != 0,
                    r.get::<_, String>(8)?,
                ))
            },
        )
        .optional()?;
    let Some((
        id,
        grading_type,
        total_points,
        passing_grade,
        passing_percentage,
        show_letter_grade,
        show_percentage,
        show_points,
        created_at,
    )) = row
    else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT letter, min_percentage, max_percentage, gpa
         FROM grade_scale_bands
         WHERE config_id = ?
         ORDER BY position",
    )?;
    let bands = stmt
        .query_map([&id], |r| {
            Ok(ScaleBand {
                letter: r.get(0)?,
                min: r.get(1)?,
                max: r.get(2)?,
                gpa: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let scale = if bands.is_empty() {
        GradingScale::default()
    } else {
        GradingScale::new(bands)?
    };

    Ok(Some(GradeConfig {
        id,
        lesson_id: lesson_id.to_string(),
        grading_type,
        total_points,
        passing_grade,
        passing_percentage,
        show_letter_grade,
        show_percentage,
        show_points,
        scale,
        created_at,
    }))
}

pub fn create_config(conn: &Connection, input: &NewGradeConfig) -> AppResult<GradeConfig> {
    let tx = conn.unchecked_transaction()?;
    let config = insert_config(&tx, input)?;
    tx.commit()?;
    info!(lesson_id = %config.lesson_id, bands = config.scale.bands().len(), "grade config created");
    Ok(config)
}

/// Validates and writes a config with its scale bands. Callers own the transaction.
pub(crate) fn insert_config(conn: &Connection, input: &NewGradeConfig) -> AppResult<GradeConfig> {
    require_lesson(conn, &input.lesson_id)?;
    if load_config(conn, &input.lesson_id)?.is_some() {
        return Err(AppError::Conflict(
            "grade config already exists for this lesson".to_string(),
        ));
    }

    let scale = match input.grading_scale.as_ref() {
        Some(raw) if !raw.is_null() => GradingScale::from_json(raw)?,
        _ => GradingScale::default(),
    };
    let grading_type = input
        .grading_type
        .as_deref()
        .map(|t| t.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "percentage".to_string());
    if !GRADING_TYPES.contains(&grading_type.as_str()) {
        return Err(AppError::validation_with(
            "gradingType must be one of: points, percentage, letter",
            json!({ "gradingType": grading_type }),
        ));
    }
    let total_points = input.total_points.unwrap_or(100.0);
    if !(total_points > 0.0) {
        return Err(AppError::validation_with(
            "totalPoints must be > 0",
            json!({ "totalPoints": total_points }),
        ));
    }

    // passingGrade names a letter; when only the letter is given its min becomes the threshold.
    let passing_grade = input
        .passing_grade
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let letter_threshold = match passing_grade.as_deref() {
        Some(letter) => Some(
            scale
                .band(letter)
                .map(|b| b.min)
                .ok_or_else(|| {
                    AppError::validation_with(
                        "passingGrade is not a letter in the grading scale",
                        json!({ "passingGrade": letter }),
                    )
                })?,
        ),
        None => None,
    };
    let passing_percentage = input
        .passing_percentage
        .or(letter_threshold)
        .unwrap_or(60.0);
    if !(0.0..=100.0).contains(&passing_percentage) {
        return Err(AppError::validation_with(
            "passingPercentage must be between 0 and 100",
            json!({ "passingPercentage": passing_percentage }),
        ));
    }

    let config = GradeConfig {
        id: Uuid::new_v4().to_string(),
        lesson_id: input.lesson_id.clone(),
        grading_type,
        total_points,
        passing_grade,
        passing_percentage,
        show_letter_grade: input.show_letter_grade.unwrap_or(true),
        show_percentage: input.show_percentage.unwrap_or(true),
        show_points: input.show_points.unwrap_or(true),
        scale,
        created_at: now_rfc3339(),
    };

    conn.execute(
        "INSERT INTO grade_configs(
            id, lesson_id, grading_type, total_points, passing_grade, passing_percentage,
            show_letter_grade, show_percentage, show_points, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &config.id,
            &config.lesson_id,
            &config.grading_type,
            config.total_points,
            &config.passing_grade,
            config.passing_percentage,
            config.show_letter_grade as i64,
            config.show_percentage as i64,
            config.show_points as i64,
            &config.created_at,
        ),
    )?;
    for (position, band) in config.scale.bands().iter().enumerate() {
        conn.execute(
            "INSERT INTO grade_scale_bands(config_id, position, letter, min_percentage, max_percentage, gpa)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &config.id,
                position as i64,
                &band.letter,
                band.min,
                band.max,
                band.gpa,
            ),
        )?;
    }
    Ok(config)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    pub lesson_id: String,
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub total_points: Option<f64>,
    #[serde(default)]
    pub is_published: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub lesson_id: String,
    pub name: String,
    pub description: Option<String>,
    pub weight: f64,
    pub total_points: Option<f64>,
    pub is_published: bool,
    pub sort_order: i64,
    pub item_count: i64,
}

fn category_from_row(r: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: r.get(0)?,
        lesson_id: r.get(1)?,
        name: r.get(2)?,
        description: r.get(3)?,
        weight: r.get(4)?,
        total_points: r.get(5)?,
        is_published: r.get::<_, i64>(6)? != 0,
        sort_order: r.get(7)?,
        item_count: r.get(8)?,
    })
}

const CATEGORY_SELECT: &str = "SELECT c.id, c.lesson_id, c.name, c.description, c.weight,
        c.total_points, c.is_published, c.sort_order,
        (SELECT COUNT(*) FROM grade_items i WHERE i.category_id = c.id)
     FROM grade_categories c";

pub fn create_category(conn: &Connection, input: &NewCategory) -> AppResult<Category> {
    require_lesson(conn, &input.lesson_id)?;
    let name = input.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name must not be empty"));
    }
    if !input.weight.is_finite() || !(0.0..=100.0).contains(&input.weight) {
        return Err(AppError::validation_with(
            "weight must be between 0 and 100",
            json!({ "weight": input.weight }),
        ));
    }
    if let Some(tp) = input.total_points {
        if tp < 0.0 {
            return Err(AppError::validation_with(
                "totalPoints must be >= 0",
                json!({ "totalPoints": tp }),
            ));
        }
    }

    let existing: f64 = conn.query_row(
        "SELECT COALESCE(SUM(weight), 0) FROM grade_categories WHERE lesson_id = ?",
        [&input.lesson_id],
        |r| r.get(0),
    )?;
    if existing + input.weight > 100.0 + WEIGHT_EPSILON {
        return Err(AppError::validation_with(
            "total category weight would exceed 100%",
            json!({ "currentTotal": existing, "weight": input.weight }),
        ));
    }

    let sort_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM grade_categories WHERE lesson_id = ?",
        [&input.lesson_id],
        |r| r.get(0),
    )?;
    let category = Category {
        id: Uuid::new_v4().to_string(),
        lesson_id: input.lesson_id.clone(),
        name: name.to_string(),
        description: input.description.clone(),
        weight: input.weight,
        total_points: input.total_points,
        is_published: input.is_published.unwrap_or(true),
        sort_order,
        item_count: 0,
    };
    conn.execute(
        "INSERT INTO grade_categories(
            id, lesson_id, name, description, weight, total_points, is_published, sort_order, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &category.id,
            &category.lesson_id,
            &category.name,
            &category.description,
            category.weight,
            category.total_points,
            category.is_published as i64,
            category.sort_order,
            now_rfc3339(),
        ),
    )?;
    Ok(category)
}

pub fn list_categories(conn: &Connection, lesson_id: &str) -> AppResult<Vec<Category>> {
    require_lesson(conn, lesson_id)?;
    let sql = format!("{CATEGORY_SELECT} WHERE c.lesson_id = ? ORDER BY c.sort_order");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([lesson_id], category_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn get_category(conn: &Connection, category_id: &str) -> AppResult<Option<Category>> {
    let sql = format!("{CATEGORY_SELECT} WHERE c.id = ?");
    Ok(conn
        .query_row(&sql, [category_id], category_from_row)
        .optional()?)
}

pub fn delete_category(conn: &Connection, category_id: &str) -> AppResult<(Category, usize)> {
    let Some(category) = get_category(conn, category_id)? else {
        return Err(AppError::not_found("grade category"));
    };
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM grade_categories WHERE id = ?", [category_id])?;
    let refreshed = refresh_lesson_summaries(&tx, &category.lesson_id)?;
    tx.commit()?;
    Ok((category, refreshed))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGradeItem {
    pub lesson_id: String,
    pub category_id: String,
    pub name: String,
    pub points_possible: f64,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub is_published: Option<bool>,
    #[serde(default)]
    pub item_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeItem {
    pub id: String,
    pub lesson_id: String,
    pub category_id: String,
    pub name: String,
    pub description: Option<String>,
    pub item_type: String,
    pub points_possible: f64,
    pub due_date: Option<String>,
    pub is_published: bool,
    pub sort_order: i64,
}

fn item_from_row(r: &Row<'_>) -> rusqlite::Result<GradeItem> {
    Ok(GradeItem {
        id: r.get(0)?,
        lesson_id: r.get(1)?,
        category_id: r.get(2)?,
        name: r.get(3)?,
        description: r.get(4)?,
        item_type: r.get(5)?,
        points_possible: r.get(6)?,
        due_date: r.get(7)?,
        is_published: r.get::<_, i64>(8)? != 0,
        sort_order: r.get(9)?,
    })
}

const ITEM_SELECT: &str = "SELECT id, lesson_id, category_id, name, description, item_type,
        points_possible, due_date, is_published, sort_order
     FROM grade_items";

pub fn create_item(conn: &Connection, input: &NewGradeItem) -> AppResult<GradeItem> {
    let tx = conn.unchecked_transaction()?;
    let item = insert_item(&tx, input)?;
    // A published item adds remaining points to every cached summary.
    if item.is_published {
        refresh_lesson_summaries(&tx, &item.lesson_id)?;
    }
    tx.commit()?;
    Ok(item)
}

pub(crate) fn insert_item(conn: &Connection, input: &NewGradeItem) -> AppResult<GradeItem> {
    require_lesson(conn, &input.lesson_id)?;
    let Some(category) = get_category(conn, &input.category_id)? else {
        return Err(AppError::not_found("grade category"));
    };
    if category.lesson_id != input.lesson_id {
        return Err(AppError::validation_with(
            "category belongs to a different lesson",
            json!({ "categoryId": input.category_id, "lessonId": input.lesson_id }),
        ));
    }
    let name = input.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name must not be empty"));
    }
    if !input.points_possible.is_finite() || input.points_possible <= 0.0 {
        return Err(AppError::validation_with(
            "pointsPossible must be > 0",
            json!({ "pointsPossible": input.points_possible }),
        ));
    }
    let item_type = input
        .item_type
        .as_deref()
        .map(|t| t.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "assignment".to_string());
    if !ITEM_TYPES.contains(&item_type.as_str()) {
        return Err(AppError::validation_with(
            "unknown itemType",
            json!({ "itemType": item_type, "allowed": ITEM_TYPES }),
        ));
    }
    let due_date = match input.due_date.as_deref() {
        Some(d) if !d.trim().is_empty() => Some(normalize_due_date(d)?),
        _ => None,
    };

    let sort_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM grade_items WHERE lesson_id = ?",
        [&input.lesson_id],
        |r| r.get(0),
    )?;
    let item = GradeItem {
        id: Uuid::new_v4().to_string(),
        lesson_id: input.lesson_id.clone(),
        category_id: input.category_id.clone(),
        name: name.to_string(),
        description: input.description.clone(),
        item_type,
        points_possible: input.points_possible,
        due_date,
        is_published: input.is_published.unwrap_or(false),
        sort_order,
    };
    conn.execute(
        "INSERT INTO grade_items(
            id, lesson_id, category_id, name, description, item_type, points_possible,
            due_date, is_published, sort_order, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &item.id,
            &item.lesson_id,
            &item.category_id,
            &item.name,
            &item.description,
            &item.item_type,
            item.points_possible,
            &item.due_date,
            item.is_published as i64,
            item.sort_order,
            now_rfc3339(),
        ),
    )?;
    Ok(item)
}

pub fn get_item(conn: &Connection, item_id: &str) -> AppResult<Option<GradeItem>> {
    let sql = format!("{ITEM_SELECT} WHERE id = ?");
    Ok(conn.query_row(&sql, [item_id], item_from_row).optional()?)
}

pub fn list_items(
    conn: &Connection,
    lesson_id: &str,
    category_id: Option<&str>,
) -> AppResult<Vec<GradeItem>> {
    require_lesson(conn, lesson_id)?;
    let sql = format!(
        "{ITEM_SELECT} WHERE lesson_id = ?1 AND (?2 IS NULL OR category_id = ?2) ORDER BY sort_order"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((lesson_id, category_id), item_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_item_published(
    conn: &Connection,
    item_id: &str,
    is_published: bool,
) -> AppResult<(GradeItem, usize)> {
    let Some(mut item) = get_item(conn, item_id)? else {
        return Err(AppError::not_found("grade item"));
    };
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE grade_items SET is_published = ? WHERE id = ?",
        (is_published as i64, item_id),
    )?;
    item.is_published = is_published;
    let refreshed = refresh_lesson_summaries(&tx, &item.lesson_id)?;
    tx.commit()?;
    Ok((item, refreshed))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Graded,
    Excused,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Graded => "graded",
            EntryStatus::Excused => "excused",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSubmission {
    pub grade_item_id: String,
    pub user_id: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub status: Option<EntryStatus>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub graded_by: Option<String>,
    #[serde(default)]
    pub is_late: bool,
    #[serde(default)]
    pub late_penalty: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub entry_id: String,
    pub created: bool,
    pub status: EntryStatus,
    pub score: Option<f64>,
    pub raw_score: Option<f64>,
    pub summary: Option<GradeReport>,
}

/// Score after the late penalty (a percentage of the raw score).
pub fn apply_late_penalty(raw: f64, is_late: bool, late_penalty: f64) -> f64 {
    if is_late && late_penalty > 0.0 {
        raw * (100.0 - late_penalty) / 100.0
    } else {
        raw
    }
}

pub fn submit_grade(conn: &Connection, input: &GradeSubmission) -> AppResult<SubmitOutcome> {
    let Some(item) = get_item(conn, &input.grade_item_id)? else {
        return Err(AppError::not_found("grade item"));
    };
    require_user(conn, &input.user_id)?;
    if let Some(grader) = input.graded_by.as_deref() {
        require_user(conn, grader)?;
    }

    if let Some(s) = input.score {
        if !s.is_finite() || s < 0.0 {
            return Err(AppError::validation_with(
                "score must be >= 0",
                json!({ "score": s }),
            ));
        }
    }
    let late_penalty = input.late_penalty.unwrap_or(0.0);
    if !(0.0..=100.0).contains(&late_penalty) {
        return Err(AppError::validation_with(
            "latePenalty must be between 0 and 100",
            json!({ "latePenalty": late_penalty }),
        ));
    }
    let status = input.status.unwrap_or(if input.score.is_some() {
        EntryStatus::Graded
    } else {
        EntryStatus::Pending
    });
    if status == EntryStatus::Graded && input.score.is_none() {
        return Err(AppError::validation("graded status requires a score"));
    }

    let raw_score = input.score;
    let score = raw_score.map(|s| apply_late_penalty(s, input.is_late, late_penalty));
    let now = now_rfc3339();
    let graded_at = (status == EntryStatus::Graded).then(|| now.clone());

    let tx = conn.unchecked_transaction()?;
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM grade_entries WHERE grade_item_id = ? AND user_id = ?",
            (&input.grade_item_id, &input.user_id),
            |r| r.get(0),
        )
        .optional()?;
    let created = existing.is_none();
    let entry_id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());
    tx.execute(
        "INSERT INTO grade_entries(
            id, grade_item_id, user_id, score, raw_score, status, comments, graded_by,
            graded_at, is_late, late_penalty, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(grade_item_id, user_id) DO UPDATE SET
           score = excluded.score,
           raw_score = excluded.raw_score,
           status = excluded.status,
           comments = excluded.comments,
           graded_by = excluded.graded_by,
           graded_at = excluded.graded_at,
           is_late = excluded.is_late,
           late_penalty = excluded.late_penalty,
           updated_at = excluded.created_at",
        (
            &entry_id,
            &input.grade_item_id,
            &input.user_id,
            score,
            raw_score,
            status.as_str(),
            &input.comments,
            &input.graded_by,
            &graded_at,
            input.is_late as i64,
            late_penalty,
            &now,
        ),
    )?;
    let summary = refresh_summary_if_configured(&tx, &item.lesson_id, &input.user_id)?;
    tx.commit()?;

    debug!(item_id = %item.id, user_id = %input.user_id, created, "grade entry saved");
    Ok(SubmitOutcome {
        entry_id,
        created,
        status,
        score,
        raw_score,
        summary,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGrade {
    pub grade_item_id: String,
    pub item: String,
    pub item_type: String,
    pub category: String,
    pub points_possible: f64,
    pub score: Option<f64>,
    pub percentage: Option<f64>,
    pub status: String,
    pub due_date: Option<String>,
    pub is_late: bool,
    pub comments: Option<String>,
}

/// Published items for one user, ordered by due date (undated last).
pub fn student_grades(
    conn: &Connection,
    lesson_id: &str,
    user_id: &str,
) -> AppResult<Vec<StudentGrade>> {
    require_lesson(conn, lesson_id)?;
    require_user(conn, user_id)?;
    let mut stmt = conn.prepare(
        "SELECT i.id, i.name, i.item_type, c.name, i.points_possible,
                e.score, e.status, i.due_date, e.is_late, e.comments
         FROM grade_items i
         JOIN grade_categories c ON c.id = i.category_id
         LEFT JOIN grade_entries e ON e.grade_item_id = i.id AND e.user_id = ?1
         WHERE i.lesson_id = ?2 AND i.is_published = 1 AND c.is_published = 1
         ORDER BY i.due_date IS NULL, i.due_date, c.sort_order, i.sort_order",
    )?;
    let rows = stmt
        .query_map((user_id, lesson_id), |r| {
            let points_possible: f64 = r.get(4)?;
            let score: Option<f64> = r.get(5)?;
            let status: Option<String> = r.get(6)?;
            let percentage = match (score, status.as_deref()) {
                (Some(s), Some("graded")) if points_possible > 0.0 => {
                    Some(round_2_decimals(s * 100.0 / points_possible))
                }
                _ => None,
            };
            Ok(StudentGrade {
                grade_item_id: r.get(0)?,
                item: r.get(1)?,
                item_type: r.get(2)?,
                category: r.get(3)?,
                points_possible,
                score,
                percentage,
                status: status.unwrap_or_else(|| "pending".to_string()),
                due_date: r.get(7)?,
                is_late: r.get::<_, Option<i64>>(8)?.unwrap_or(0) != 0,
                comments: r.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredGoal {
    pub letter: String,
    pub target_percentage: f64,
    pub points_needed: f64,
    pub percentage_needed: Option<f64>,
    pub achievable: bool,
    pub already_achieved: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSummary {
    pub lesson_id: String,
    pub user_id: String,
    pub percentage: f64,
    pub letter_grade: String,
    pub gpa: f64,
    pub is_passing: bool,
    pub earned_points: f64,
    pub possible_points: f64,
    pub remaining_points: f64,
    pub calculated_at: String,
    pub points_to_next_grade: Vec<StoredGoal>,
}

pub fn refresh_summary(conn: &Connection, lesson_id: &str, user_id: &str) -> AppResult<GradeReport> {
    let ctx = CalcContext {
        conn,
        lesson_id,
        user_id,
    };
    let (_, report) = compute_grade_report(&ctx, None)?;
    store_summary(conn, lesson_id, user_id, &report)?;
    Ok(report)
}

fn refresh_summary_if_configured(
    conn: &Connection,
    lesson_id: &str,
    user_id: &str,
) -> AppResult<Option<GradeReport>> {
    match refresh_summary(conn, lesson_id, user_id) {
        Ok(r) => Ok(Some(r)),
        Err(AppError::NotFound(_)) => {
            debug!(lesson_id, "no grade config; summary not refreshed");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Recomputes every cached summary of the lesson. Returns how many were refreshed.
pub fn refresh_lesson_summaries(conn: &Connection, lesson_id: &str) -> AppResult<usize> {
    let mut stmt = conn.prepare("SELECT user_id FROM grade_summaries WHERE lesson_id = ?")?;
    let users = stmt
        .query_map([lesson_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut refreshed = 0;
    for user_id in &users {
        if refresh_summary_if_configured(conn, lesson_id, user_id)?.is_some() {
            refreshed += 1;
        }
    }
    Ok(refreshed)
}

fn store_summary(
    conn: &Connection,
    lesson_id: &str,
    user_id: &str,
    report: &GradeReport,
) -> AppResult<()> {
    let fresh_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grade_summaries(
            id, lesson_id, user_id, percentage, letter_grade, gpa, is_passing,
            earned_points, possible_points, remaining_points, calculated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(lesson_id, user_id) DO UPDATE SET
           percentage = excluded.percentage,
           letter_grade = excluded.letter_grade,
           gpa = excluded.gpa,
           is_passing = excluded.is_passing,
           earned_points = excluded.earned_points,
           possible_points = excluded.possible_points,
           remaining_points = excluded.remaining_points,
           calculated_at = excluded.calculated_at",
        (
            &fresh_id,
            lesson_id,
            user_id,
            report.percentage,
            &report.letter_grade,
            report.gpa,
            report.is_passing as i64,
            round_2_decimals(report.earned_points),
            round_2_decimals(report.possible_points),
            round_2_decimals(report.remaining_points),
            now_rfc3339(),
        ),
    )?;
    let summary_id: String = conn.query_row(
        "SELECT id FROM grade_summaries WHERE lesson_id = ? AND user_id = ?",
        (lesson_id, user_id),
        |r| r.get(0),
    )?;

    conn.execute(
        "DELETE FROM grade_summary_goals WHERE summary_id = ?",
        [&summary_id],
    )?;
    for (position, goal) in report.goals.iter().enumerate() {
        insert_goal(conn, &summary_id, position, goal)?;
    }
    Ok(())
}

fn insert_goal(
    conn: &Connection,
    summary_id: &str,
    position: usize,
    goal: &GoalOutcome,
) -> AppResult<()> {
    conn.execute(
        "INSERT INTO grade_summary_goals(
            summary_id, position, letter, target_percentage, points_needed,
            percentage_needed, achievable, already_achieved)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            summary_id,
            position as i64,
            &goal.letter,
            goal.target_percentage,
            round_2_decimals(goal.points_needed),
            goal.percentage_needed_on_remaining
                .map(round_2_decimals),
            goal.achievable as i64,
            goal.already_achieved as i64,
        ),
    )?;
    Ok(())
}

pub fn load_summary(
    conn: &Connection,
    lesson_id: &str,
    user_id: &str,
) -> AppResult<Option<StoredSummary>> {
    let row = conn
        .query_row(
            "SELECT id, percentage, letter_grade, gpa, is_passing, earned_points,
                    possible_points, remaining_points, calculated_at
             FROM grade_summaries
             WHERE lesson_id = ? AND user_id = ?",
            (lesson_id, user_id),
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    StoredSummary {
                        lesson_id: lesson_id.to_string(),
                        user_id: user_id.to_string(),
                        percentage: r.get(1)?,
                        letter_grade: r.get(2)?,
                        gpa: r.get(3)?,
                        is_passing: r.get::<_, i64>(4)? != 0,
                        earned_points: r.get(5)?,
                        possible_points: r.get(6)?,
                        remaining_points: r.get(7)?,
                        calculated_at: r.get(8)?,
                        points_to_next_grade: Vec::new(),
                    },
                ))
            },
        )
        .optional()?;
    let Some((summary_id, mut summary)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT letter, target_percentage, points_needed, percentage_needed, achievable, already_achieved
         FROM grade_summary_goals
         WHERE summary_id = ?
         ORDER BY position",
    )?;
    summary.points_to_next_grade = stmt
        .query_map([&summary_id], |r| {
            Ok(StoredGoal {
                letter: r.get(0)?,
                target_percentage: r.get(1)?,
                points_needed: r.get(2)?,
                percentage_needed: r.get(3)?,
                achievable: r.get::<_, i64>(4)? != 0,
                already_achieved: r.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(summary))
}
