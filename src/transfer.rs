use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use tracing::info;
use uuid::Uuid;

use crate::backup::{
    BundledBand, BundledCategory, BundledConfig, BundledEntry, BundledItem, LessonBundle,
};
use crate::error::{AppError, AppResult};
use crate::grades::{
    create_category, insert_config, insert_item, list_categories, list_items, load_config,
    NewCategory, NewGradeConfig, NewGradeItem,
};
use crate::lessons::{create_lesson, require_lesson, NewLesson};
use crate::time::now_rfc3339;

const ENTRY_STATUSES: [&str; 3] = ["pending", "graded", "excused"];

/// Reads a lesson's config, categories, items and entries into a bundle.
pub fn snapshot_lesson(conn: &Connection, lesson_id: &str) -> AppResult<LessonBundle> {
    let lesson = require_lesson(conn, lesson_id)?;
    let config = load_config(conn, lesson_id)?.map(|c| BundledConfig {
        grading_type: c.grading_type,
        total_points: c.total_points,
        passing_grade: c.passing_grade,
        passing_percentage: c.passing_percentage,
        show_letter_grade: c.show_letter_grade,
        show_percentage: c.show_percentage,
        show_points: c.show_points,
        scale: c
            .scale
            .bands()
            .iter()
            .map(|b| BundledBand {
                letter: b.letter.clone(),
                min: b.min,
                max: b.max,
                gpa: b.gpa,
            })
            .collect(),
    });
    let categories = list_categories(conn, lesson_id)?
        .into_iter()
        .map(|c| BundledCategory {
            key: c.id,
            name: c.name,
            description: c.description,
            weight: c.weight,
            total_points: c.total_points,
            is_published: c.is_published,
            sort_order: c.sort_order,
        })
        .collect();
    let items = list_items(conn, lesson_id, None)?
        .into_iter()
        .map(|i| BundledItem {
            key: i.id,
            category_key: i.category_id,
            name: i.name,
            description: i.description,
            item_type: i.item_type,
            points_possible: i.points_possible,
            due_date: i.due_date,
            is_published: i.is_published,
            sort_order: i.sort_order,
        })
        .collect();

    let mut stmt = conn.prepare(
        "SELECT e.grade_item_id, u.username, e.score, e.raw_score, e.status, e.comments,
                g.username, e.graded_at, e.is_late, e.late_penalty
         FROM grade_entries e
         JOIN grade_items i ON i.id = e.grade_item_id
         JOIN users u ON u.id = e.user_id
         LEFT JOIN users g ON g.id = e.graded_by
         WHERE i.lesson_id = ?
         ORDER BY u.username, i.sort_order",
    )?;
    let entries = stmt
        .query_map([lesson_id], |r| {
            Ok(BundledEntry {
                item_key: r.get(0)?,
                username: r.get(1)?,
                score: r.get(2)?,
                raw_score: r.get(3)?,
                status: r.get(4)?,
                comments: r.get(5)?,
                graded_by: r.get(6)?,
                graded_at: r.get(7)?,
                is_late: r.get::<_, i64>(8)? != 0,
                late_penalty: r.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(LessonBundle {
        title: lesson.title,
        description: lesson.description,
        config,
        categories,
        items,
        entries,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub lesson_id: String,
    pub categories_imported: usize,
    pub items_imported: usize,
    pub entries_imported: usize,
    pub skipped_usernames: Vec<String>,
}

fn user_id_by_username(conn: &Connection, username: &str) -> AppResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT id FROM users WHERE username = ?",
            [username],
            |r| r.get(0),
        )
        .optional()?)
}

/// Creates a new lesson owned by `owner_id` from a bundle.
///
/// All ids are fresh. Entries are matched to students by username; entries
/// for usernames this workspace does not know are skipped and reported.
/// The whole restore is one transaction.
pub fn restore_lesson(
    conn: &Connection,
    bundle: &LessonBundle,
    owner_id: &str,
    title: Option<&str>,
) -> AppResult<RestoreReport> {
    let tx = conn.unchecked_transaction()?;
    let lesson = create_lesson(
        &tx,
        &NewLesson {
            owner_id: owner_id.to_string(),
            title: title.unwrap_or(&bundle.title).to_string(),
            description: bundle.description.clone(),
        },
    )?;

    if let Some(cfg) = bundle.config.as_ref() {
        insert_config(
            &tx,
            &NewGradeConfig {
                lesson_id: lesson.id.clone(),
                grading_scale: Some(json!(cfg.scale)),
                grading_type: Some(cfg.grading_type.clone()),
                total_points: Some(cfg.total_points),
                passing_grade: cfg.passing_grade.clone(),
                passing_percentage: Some(cfg.passing_percentage),
                show_letter_grade: Some(cfg.show_letter_grade),
                show_percentage: Some(cfg.show_percentage),
                show_points: Some(cfg.show_points),
            },
        )?;
    }

    let mut categories: Vec<&BundledCategory> = bundle.categories.iter().collect();
    categories.sort_by_key(|c| c.sort_order);
    let mut category_ids: HashMap<&str, String> = HashMap::new();
    for c in categories {
        let created = create_category(
            &tx,
            &NewCategory {
                lesson_id: lesson.id.clone(),
                name: c.name.clone(),
                weight: c.weight,
                description: c.description.clone(),
                total_points: c.total_points,
                is_published: Some(c.is_published),
            },
        )?;
        category_ids.insert(c.key.as_str(), created.id);
    }

    let mut items: Vec<&BundledItem> = bundle.items.iter().collect();
    items.sort_by_key(|i| i.sort_order);
    let mut item_ids: HashMap<&str, String> = HashMap::new();
    for i in items {
        let category_id = category_ids.get(i.category_key.as_str()).ok_or_else(|| {
            AppError::validation_with(
                "bundle item refers to an unknown category",
                json!({ "item": i.name, "categoryKey": i.category_key }),
            )
        })?;
        let created = insert_item(
            &tx,
            &NewGradeItem {
                lesson_id: lesson.id.clone(),
                category_id: category_id.clone(),
                name: i.name.clone(),
                points_possible: i.points_possible,
                due_date: i.due_date.clone(),
                is_published: Some(i.is_published),
                item_type: Some(i.item_type.clone()),
                description: i.description.clone(),
            },
        )?;
        item_ids.insert(i.key.as_str(), created.id);
    }

    let mut skipped = BTreeSet::new();
    let mut entries_imported = 0;
    for e in &bundle.entries {
        let item_id = item_ids.get(e.item_key.as_str()).ok_or_else(|| {
            AppError::validation_with(
                "bundle entry refers to an unknown item",
                json!({ "itemKey": e.item_key, "username": e.username }),
            )
        })?;
        if !ENTRY_STATUSES.contains(&e.status.as_str()) {
            return Err(AppError::validation_with(
                "bundle entry has an unknown status",
                json!({ "status": e.status, "username": e.username }),
            ));
        }
        let Some(user_id) = user_id_by_username(&tx, &e.username)? else {
            skipped.insert(e.username.clone());
            continue;
        };
        let graded_by = match e.graded_by.as_deref() {
            Some(name) => user_id_by_username(&tx, name)?,
            None => None,
        };
        tx.execute(
            "INSERT INTO grade_entries(
                id, grade_item_id, user_id, score, raw_score, status, comments, graded_by,
                graded_at, is_late, late_penalty, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                item_id,
                &user_id,
                e.score,
                e.raw_score,
                &e.status,
                &e.comments,
                &graded_by,
                &e.graded_at,
                e.is_late as i64,
                e.late_penalty,
                now_rfc3339(),
            ),
        )?;
        entries_imported += 1;
    }
    tx.commit()?;

    let report = RestoreReport {
        lesson_id: lesson.id,
        categories_imported: category_ids.len(),
        items_imported: item_ids.len(),
        entries_imported,
        skipped_usernames: skipped.into_iter().collect(),
    };
    info!(
        lesson_id = %report.lesson_id,
        entries = report.entries_imported,
        skipped = report.skipped_usernames.len(),
        "lesson bundle restored"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::grades::{create_item, submit_grade, GradeSubmission};
    use crate::users::{create_user, NewUser};

    fn user(conn: &Connection, name: &str, role: &str) -> String {
        create_user(
            conn,
            &NewUser {
                username: name.into(),
                email: None,
                role: Some(role.into()),
            },
        )
        .expect("user")
        .id
    }

    fn graded_lesson(conn: &Connection) -> (String, String) {
        let teacher = user(conn, "tess", "teacher");
        let student = user(conn, "sam", "student");
        let lesson = create_lesson(
            conn,
            &NewLesson {
                owner_id: teacher.clone(),
                title: "Physics".into(),
                description: Some("Term 1".into()),
            },
        )
        .expect("lesson");
        insert_config(
            conn,
            &NewGradeConfig {
                lesson_id: lesson.id.clone(),
                grading_scale: Some(json!([
                    { "letter": "P", "min": 50.0, "max": 100.0, "gpa": 1.0 },
                    { "letter": "F", "min": 0.0, "max": 49.99, "gpa": 0.0 }
                ])),
                grading_type: None,
                total_points: None,
                passing_grade: Some("P".into()),
                passing_percentage: None,
                show_letter_grade: None,
                show_percentage: None,
                show_points: None,
            },
        )
        .expect("config");
        let labs = create_category(
            conn,
            &NewCategory {
                lesson_id: lesson.id.clone(),
                name: "Labs".into(),
                weight: 40.0,
                description: None,
                total_points: None,
                is_published: None,
            },
        )
        .expect("labs");
        let lab = create_item(
            conn,
            &NewGradeItem {
                lesson_id: lesson.id.clone(),
                category_id: labs.id,
                name: "Pendulum".into(),
                points_possible: 20.0,
                due_date: Some("2026-02-01".into()),
                is_published: Some(true),
                item_type: Some("project".into()),
                description: None,
            },
        )
        .expect("item");
        submit_grade(
            conn,
            &GradeSubmission {
                grade_item_id: lab.id,
                user_id: student,
                score: Some(18.0),
                status: None,
                comments: Some("tidy".into()),
                graded_by: Some(teacher.clone()),
                is_late: false,
                late_penalty: None,
            },
        )
        .expect("submit");
        (teacher, lesson.id)
    }

    #[test]
    fn restore_copies_the_gradebook_under_new_ids() {
        let conn = open_in_memory();
        let (teacher, lesson_id) = graded_lesson(&conn);
        let bundle = snapshot_lesson(&conn, &lesson_id).expect("snapshot");
        assert_eq!(bundle.entries.len(), 1);
        assert_eq!(bundle.entries[0].username, "sam");
        assert_eq!(bundle.entries[0].graded_by.as_deref(), Some("tess"));

        let report = restore_lesson(&conn, &bundle, &teacher, Some("Physics (copy)")).expect("restore");
        assert_ne!(report.lesson_id, lesson_id);
        assert_eq!(report.categories_imported, 1);
        assert_eq!(report.items_imported, 1);
        assert_eq!(report.entries_imported, 1);
        assert!(report.skipped_usernames.is_empty());

        let copy = snapshot_lesson(&conn, &report.lesson_id).expect("snapshot copy");
        assert_eq!(copy.title, "Physics (copy)");
        assert_eq!(copy.config, bundle.config);
        assert_eq!(copy.entries[0].score, Some(18.0));
        assert_eq!(copy.entries[0].comments.as_deref(), Some("tidy"));
        assert_ne!(copy.items[0].key, bundle.items[0].key);
        assert_eq!(copy.items[0].due_date.as_deref(), Some("2026-02-01"));
    }

    #[test]
    fn unknown_students_are_skipped_and_reported() {
        let conn = open_in_memory();
        let (teacher, lesson_id) = graded_lesson(&conn);
        let mut bundle = snapshot_lesson(&conn, &lesson_id).expect("snapshot");
        let mut stranger = bundle.entries[0].clone();
        stranger.username = "new.kid".into();
        bundle.entries.push(stranger);

        let report = restore_lesson(&conn, &bundle, &teacher, None).expect("restore");
        assert_eq!(report.entries_imported, 1);
        assert_eq!(report.skipped_usernames, vec!["new.kid".to_string()]);
    }

    #[test]
    fn dangling_item_reference_rolls_back() {
        let conn = open_in_memory();
        let (teacher, lesson_id) = graded_lesson(&conn);
        let mut bundle = snapshot_lesson(&conn, &lesson_id).expect("snapshot");
        bundle.entries[0].item_key = "missing".into();

        let err = restore_lesson(&conn, &bundle, &teacher, None);
        assert!(matches!(err, Err(AppError::Validation { .. })));
        let lessons: i64 = conn
            .query_row("SELECT COUNT(*) FROM lessons", [], |r| r.get(0))
            .expect("count");
        assert_eq!(lessons, 1);
    }
}
