use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::time::now_rfc3339;

const ROLES: [&str; 3] = ["student", "teacher", "admin"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub role: String,
    pub created_at: String,
}

fn user_from_row(r: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: r.get(0)?,
        username: r.get(1)?,
        email: r.get(2)?,
        role: r.get(3)?,
        created_at: r.get(4)?,
    })
}

pub fn create_user(conn: &Connection, input: &NewUser) -> AppResult<User> {
    let username = input.username.trim();
    if username.is_empty() {
        return Err(AppError::validation("username must not be empty"));
    }
    let role = input
        .role
        .as_deref()
        .map(|r| r.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "student".to_string());
    if !ROLES.contains(&role.as_str()) {
        return Err(AppError::validation_with(
            "role must be one of: student, teacher, admin",
            json!({ "role": role }),
        ));
    }

    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE username = ?",
            [username],
            |r| r.get(0),
        )
        .optional()?;
    if taken.is_some() {
        return Err(AppError::Conflict(format!(
            "username already taken: {username}"
        )));
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        email: input
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string),
        role,
        created_at: now_rfc3339(),
    };
    conn.execute(
        "INSERT INTO users(id, username, email, role, created_at) VALUES(?, ?, ?, ?, ?)",
        (&user.id, &user.username, &user.email, &user.role, &user.created_at),
    )?;
    Ok(user)
}

pub fn get_user(conn: &Connection, user_id: &str) -> AppResult<Option<User>> {
    Ok(conn
        .query_row(
            "SELECT id, username, email, role, created_at FROM users WHERE id = ?",
            [user_id],
            user_from_row,
        )
        .optional()?)
}

pub fn require_user(conn: &Connection, user_id: &str) -> AppResult<User> {
    get_user(conn, user_id)?.ok_or_else(|| AppError::not_found("user"))
}

pub fn list_users(conn: &Connection, role: Option<&str>) -> AppResult<Vec<User>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, email, role, created_at
         FROM users
         WHERE (?1 IS NULL OR role = ?1)
         ORDER BY username",
    )?;
    let users = stmt
        .query_map([role], user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}
