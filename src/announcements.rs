use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::lessons::require_lesson;
use crate::time::now_rfc3339;
use crate::users::require_user;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnnouncement {
    pub lesson_id: String,
    pub author_id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub is_pinned: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementPatch {
    pub announcement_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_pinned: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: String,
    pub lesson_id: String,
    pub author_id: String,
    pub title: String,
    pub body: String,
    pub is_pinned: bool,
    pub created_at: String,
    pub updated_at: Option<String>,
}

const ANNOUNCEMENT_SELECT: &str =
    "SELECT id, lesson_id, author_id, title, body, is_pinned, created_at, updated_at
     FROM announcements";

fn announcement_from_row(r: &Row<'_>) -> rusqlite::Result<Announcement> {
    Ok(Announcement {
        id: r.get(0)?,
        lesson_id: r.get(1)?,
        author_id: r.get(2)?,
        title: r.get(3)?,
        body: r.get(4)?,
        is_pinned: r.get::<_, i64>(5)? != 0,
        created_at: r.get(6)?,
        updated_at: r.get(7)?,
    })
}

fn non_blank(field: &str, raw: &str) -> AppResult<String> {
    let t = raw.trim();
    if t.is_empty() {
        return Err(AppError::validation(format!("{field} must not be empty")));
    }
    Ok(t.to_string())
}

/// Posts to a lesson. The author must own the lesson or be a teacher or admin.
pub fn create_announcement(
    conn: &Connection,
    input: &NewAnnouncement,
) -> AppResult<Announcement> {
    let title = non_blank("title", &input.title)?;
    let body = non_blank("body", &input.body)?;
    let lesson = require_lesson(conn, &input.lesson_id)?;
    let author = require_user(conn, &input.author_id)?;
    if author.id != lesson.owner_id && author.role == "student" {
        return Err(AppError::validation_with(
            "students cannot post announcements to a lesson they do not own",
            json!({ "authorId": author.id, "role": author.role }),
        ));
    }

    let announcement = Announcement {
        id: Uuid::new_v4().to_string(),
        lesson_id: lesson.id,
        author_id: author.id,
        title,
        body,
        is_pinned: input.is_pinned.unwrap_or(false),
        created_at: now_rfc3339(),
        updated_at: None,
    };
    conn.execute(
        "INSERT INTO announcements(id, lesson_id, author_id, title, body, is_pinned, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &announcement.id,
            &announcement.lesson_id,
            &announcement.author_id,
            &announcement.title,
            &announcement.body,
            announcement.is_pinned as i64,
            &announcement.created_at,
        ),
    )?;
    info!(lesson_id = %announcement.lesson_id, announcement_id = %announcement.id, "announcement posted");
    Ok(announcement)
}

pub fn require_announcement(conn: &Connection, announcement_id: &str) -> AppResult<Announcement> {
    let sql = format!("{ANNOUNCEMENT_SELECT} WHERE id = ?");
    conn.query_row(&sql, [announcement_id], announcement_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("announcement"))
}

/// Pinned first, then newest first.
pub fn list_announcements(conn: &Connection, lesson_id: &str) -> AppResult<Vec<Announcement>> {
    require_lesson(conn, lesson_id)?;
    let sql = format!(
        "{ANNOUNCEMENT_SELECT} WHERE lesson_id = ? ORDER BY is_pinned DESC, created_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([lesson_id], announcement_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_announcement(
    conn: &Connection,
    patch: &AnnouncementPatch,
) -> AppResult<Announcement> {
    let mut a = require_announcement(conn, &patch.announcement_id)?;
    if let Some(title) = patch.title.as_deref() {
        a.title = non_blank("title", title)?;
    }
    if let Some(body) = patch.body.as_deref() {
        a.body = non_blank("body", body)?;
    }
    if let Some(pinned) = patch.is_pinned {
        a.is_pinned = pinned;
    }
    a.updated_at = Some(now_rfc3339());
    conn.execute(
        "UPDATE announcements SET title = ?, body = ?, is_pinned = ?, updated_at = ? WHERE id = ?",
        (&a.title, &a.body, a.is_pinned as i64, &a.updated_at, &a.id),
    )?;
    Ok(a)
}

pub fn delete_announcement(conn: &Connection, announcement_id: &str) -> AppResult<()> {
    let changed = conn.execute("DELETE FROM announcements WHERE id = ?", [announcement_id])?;
    if changed == 0 {
        return Err(AppError::not_found("announcement"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::lessons::{create_lesson, NewLesson};
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

    fn post(lesson_id: &str, author_id: &str, title: &str, pinned: bool) -> NewAnnouncement {
        NewAnnouncement {
            lesson_id: lesson_id.to_string(),
            author_id: author_id.to_string(),
            title: title.into(),
            body: "See you there".into(),
            is_pinned: Some(pinned),
        }
    }

    #[test]
    fn pinned_posts_list_first() {
        let conn = open_in_memory();
        let teacher = user(&conn, "tess", "teacher");
        let lesson = create_lesson(
            &conn,
            &NewLesson {
                owner_id: teacher.clone(),
                title: "Biology".into(),
                description: None,
            },
        )
        .expect("lesson");

        let first = create_announcement(&conn, &post(&lesson.id, &teacher, "Welcome", false))
            .expect("first");
        let second = create_announcement(&conn, &post(&lesson.id, &teacher, "Field trip", false))
            .expect("second");
        let rules = create_announcement(&conn, &post(&lesson.id, &teacher, "Lab rules", true))
            .expect("pinned");

        let ids: Vec<String> = list_announcements(&conn, &lesson.id)
            .expect("list")
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![rules.id.clone(), second.id.clone(), first.id.clone()]);

        update_announcement(
            &conn,
            &AnnouncementPatch {
                announcement_id: rules.id.clone(),
                title: None,
                body: None,
                is_pinned: Some(false),
            },
        )
        .expect("unpin");
        let top = list_announcements(&conn, &lesson.id).expect("list")[0].clone();
        assert_eq!(top.id, rules.id);
        assert!(!top.is_pinned);

        delete_announcement(&conn, &first.id).expect("delete");
        assert_eq!(list_announcements(&conn, &lesson.id).expect("list").len(), 2);
    }

    #[test]
    fn students_post_only_to_their_own_lessons() {
        let conn = open_in_memory();
        let teacher = user(&conn, "tess", "teacher");
        let student = user(&conn, "sam", "student");
        let lesson = create_lesson(
            &conn,
            &NewLesson {
                owner_id: teacher,
                title: "Biology".into(),
                description: None,
            },
        )
        .expect("lesson");
        assert!(matches!(
            create_announcement(&conn, &post(&lesson.id, &student, "Party", false)),
            Err(AppError::Validation { .. })
        ));
        assert!(matches!(
            create_announcement(&conn, &post("missing", &student, "Party", false)),
            Err(AppError::NotFound(_))
        ));
    }
}
