use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::lessons::require_lesson;
use crate::time::now_rfc3339;
use crate::users::require_user;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNote {
    pub user_id: String,
    #[serde(default)]
    pub lesson_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePatch {
    pub note_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub user_id: String,
    pub lesson_id: Option<String>,
    pub title: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: Option<String>,
}

const NOTE_SELECT: &str =
    "SELECT id, user_id, lesson_id, title, content, created_at, updated_at FROM notes";

fn note_from_row(r: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: r.get(0)?,
        user_id: r.get(1)?,
        lesson_id: r.get(2)?,
        title: r.get(3)?,
        content: r.get(4)?,
        created_at: r.get(5)?,
        updated_at: r.get(6)?,
    })
}

fn clean_title(raw: &str) -> AppResult<String> {
    let t = raw.trim();
    if t.is_empty() {
        return Err(AppError::validation("title must not be empty"));
    }
    Ok(t.to_string())
}

pub fn create_note(conn: &Connection, input: &NewNote) -> AppResult<Note> {
    let title = clean_title(&input.title)?;
    require_user(conn, &input.user_id)?;
    if let Some(lesson_id) = input.lesson_id.as_deref() {
        require_lesson(conn, lesson_id)?;
    }
    let note = Note {
        id: Uuid::new_v4().to_string(),
        user_id: input.user_id.clone(),
        lesson_id: input.lesson_id.clone(),
        title,
        content: input.content.clone().unwrap_or_default(),
        created_at: now_rfc3339(),
        updated_at: None,
    };
    conn.execute(
        "INSERT INTO notes(id, user_id, lesson_id, title, content, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &note.id,
            &note.user_id,
            &note.lesson_id,
            &note.title,
            &note.content,
            &note.created_at,
        ),
    )?;
    Ok(note)
}

pub fn require_note(conn: &Connection, note_id: &str) -> AppResult<Note> {
    let sql = format!("{NOTE_SELECT} WHERE id = ?");
    conn.query_row(&sql, [note_id], note_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("note"))
}

/// Notes of one user, newest edit first. `lesson_id` narrows to one lesson.
pub fn list_notes(
    conn: &Connection,
    user_id: &str,
    lesson_id: Option<&str>,
) -> AppResult<Vec<Note>> {
    require_user(conn, user_id)?;
    let sql = format!(
        "{NOTE_SELECT}
         WHERE user_id = ?1 AND (?2 IS NULL OR lesson_id = ?2)
         ORDER BY COALESCE(updated_at, created_at) DESC, title"
    );
    let mut stmt = conn.prepare(&sql)?;
    let notes = stmt
        .query_map((user_id, lesson_id), note_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(notes)
}

pub fn update_note(conn: &Connection, patch: &NotePatch) -> AppResult<Note> {
    let mut note = require_note(conn, &patch.note_id)?;
    if let Some(title) = patch.title.as_deref() {
        note.title = clean_title(title)?;
    }
    if let Some(content) = patch.content.as_ref() {
        note.content = content.clone();
    }
    note.updated_at = Some(now_rfc3339());
    conn.execute(
        "UPDATE notes SET title = ?, content = ?, updated_at = ? WHERE id = ?",
        (&note.title, &note.content, &note.updated_at, &note.id),
    )?;
    Ok(note)
}

pub fn delete_note(conn: &Connection, note_id: &str) -> AppResult<()> {
    let changed = conn.execute("DELETE FROM notes WHERE id = ?", [note_id])?;
    if changed == 0 {
        return Err(AppError::not_found("note"));
    }
    Ok(())
}
