use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::time::now_rfc3339;
use crate::users::require_user;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLesson {
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPatch {
    pub lesson_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

fn lesson_from_row(r: &Row<'_>) -> rusqlite::Result<Lesson> {
    Ok(Lesson {
        id: r.get(0)?,
        owner_id: r.get(1)?,
        title: r.get(2)?,
        description: r.get(3)?,
        created_at: r.get(4)?,
        updated_at: r.get(5)?,
    })
}

fn clean_title(raw: &str) -> AppResult<String> {
    let t = raw.trim();
    if t.is_empty() {
        return Err(AppError::validation("title must not be empty"));
    }
    Ok(t.to_string())
}

pub fn create_lesson(conn: &Connection, input: &NewLesson) -> AppResult<Lesson> {
    let title = clean_title(&input.title)?;
    require_user(conn, &input.owner_id)?;
    let lesson = Lesson {
        id: Uuid::new_v4().to_string(),
        owner_id: input.owner_id.clone(),
        title,
        description: input.description.clone(),
        created_at: now_rfc3339(),
        updated_at: None,
    };
    conn.execute(
        "INSERT INTO lessons(id, owner_id, title, description, created_at) VALUES(?, ?, ?, ?, ?)",
        (
            &lesson.id,
            &lesson.owner_id,
            &lesson.title,
            &lesson.description,
            &lesson.created_at,
        ),
    )?;
    Ok(lesson)
}

pub fn get_lesson(conn: &Connection, lesson_id: &str) -> AppResult<Option<Lesson>> {
    Ok(conn
        .query_row(
            "SELECT id, owner_id, title, description, created_at, updated_at
             FROM lessons WHERE id = ?",
            [lesson_id],
            lesson_from_row,
        )
        .optional()?)
}

pub fn require_lesson(conn: &Connection, lesson_id: &str) -> AppResult<Lesson> {
    get_lesson(conn, lesson_id)?.ok_or_else(|| AppError::not_found("lesson"))
}

pub fn list_lessons(conn: &Connection, owner_id: Option<&str>) -> AppResult<Vec<Lesson>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, title, description, created_at, updated_at
         FROM lessons
         WHERE (?1 IS NULL OR owner_id = ?1)
         ORDER BY created_at, title",
    )?;
    let lessons = stmt
        .query_map([owner_id], lesson_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lessons)
}

pub fn update_lesson(conn: &Connection, patch: &LessonPatch) -> AppResult<Lesson> {
    let mut lesson = require_lesson(conn, &patch.lesson_id)?;
    if let Some(title) = patch.title.as_deref() {
        lesson.title = clean_title(title)?;
    }
    if let Some(description) = patch.description.as_ref() {
        lesson.description = Some(description.clone());
    }
    lesson.updated_at = Some(now_rfc3339());
    conn.execute(
        "UPDATE lessons SET title = ?, description = ?, updated_at = ? WHERE id = ?",
        (
            &lesson.title,
            &lesson.description,
            &lesson.updated_at,
            &lesson.id,
        ),
    )?;
    Ok(lesson)
}

pub fn delete_lesson(conn: &Connection, lesson_id: &str) -> AppResult<()> {
    let changed = conn.execute("DELETE FROM lessons WHERE id = ?", [lesson_id])?;
    if changed == 0 {
        return Err(AppError::not_found("lesson"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::users::{create_user, NewUser};

    fn teacher(conn: &Connection) -> String {
        create_user(
            conn,
            &NewUser {
                username: "tess".into(),
                email: None,
                role: Some("teacher".into()),
            },
        )
        .expect("teacher")
        .id
    }

    #[test]
    fn create_requires_existing_owner() {
        let conn = open_in_memory();
        let missing = create_lesson(
            &conn,
            &NewLesson {
                owner_id: "nobody".into(),
                title: "Algebra".into(),
                description: None,
            },
        );
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[test]
    fn update_then_delete() {
        let conn = open_in_memory();
        let owner = teacher(&conn);
        let lesson = create_lesson(
            &conn,
            &NewLesson {
                owner_id: owner.clone(),
                title: "Algebra".into(),
                description: None,
            },
        )
        .expect("create");

        let updated = update_lesson(
            &conn,
            &LessonPatch {
                lesson_id: lesson.id.clone(),
                title: Some("Algebra II".into()),
                description: Some("Second term".into()),
            },
        )
        .expect("update");
        assert_eq!(updated.title, "Algebra II");
        assert!(updated.updated_at.is_some());
        assert_eq!(list_lessons(&conn, Some(&owner)).expect("list").len(), 1);

        delete_lesson(&conn, &lesson.id).expect("delete");
        assert!(get_lesson(&conn, &lesson.id).expect("get").is_none());
        assert!(matches!(
            delete_lesson(&conn, &lesson.id),
            Err(AppError::NotFound(_))
        ));
    }
}
