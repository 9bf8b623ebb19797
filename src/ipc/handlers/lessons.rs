use serde_json::json;

use crate::error::AppResult;
use crate::ipc::helpers::{optional_str, parse_params, require_db, required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::lessons::{self, LessonPatch, NewLesson};

fn handle_lessons_create(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let input: NewLesson = parse_params(req)?;
    let lesson = lessons::create_lesson(conn, &input)?;
    Ok(json!({ "lessonId": lesson.id, "lesson": lesson }))
}

fn handle_lessons_list(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let owner_id = optional_str(req, "ownerId");
    let lessons = lessons::list_lessons(conn, owner_id.as_deref())?;
    Ok(json!({ "lessons": lessons }))
}

fn handle_lessons_get(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let lesson_id = required_str(req, "lessonId")?;
    let lesson = lessons::require_lesson(conn, &lesson_id)?;
    Ok(json!({ "lesson": lesson }))
}

fn handle_lessons_update(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let patch: LessonPatch = parse_params(req)?;
    let lesson = lessons::update_lesson(conn, &patch)?;
    Ok(json!({ "lesson": lesson }))
}

fn handle_lessons_delete(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let lesson_id = required_str(req, "lessonId")?;
    lessons::delete_lesson(conn, &lesson_id)?;
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "lessons.create" => handle_lessons_create(state, req),
        "lessons.list" => handle_lessons_list(state, req),
        "lessons.get" => handle_lessons_get(state, req),
        "lessons.update" => handle_lessons_update(state, req),
        "lessons.delete" => handle_lessons_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
