use chrono::Utc;
use serde_json::json;

use crate::announcements::{self, AnnouncementPatch, NewAnnouncement};
use crate::error::AppResult;
use crate::ipc::helpers::{optional_str, parse_params, require_db, required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::notes::{self, NewNote, NotePatch};
use crate::tasks::{self, NewTask, TaskFilter, TaskPatch};

fn handle_notes_create(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let input: NewNote = parse_params(req)?;
    let note = notes::create_note(conn, &input)?;
    Ok(json!({ "noteId": note.id, "note": note }))
}

fn handle_notes_list(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let user_id = required_str(req, "userId")?;
    let lesson_id = optional_str(req, "lessonId");
    let notes = notes::list_notes(conn, &user_id, lesson_id.as_deref())?;
    Ok(json!({ "notes": notes }))
}

fn handle_notes_get(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let note_id = required_str(req, "noteId")?;
    let note = notes::require_note(conn, &note_id)?;
    Ok(json!({ "note": note }))
}

fn handle_notes_update(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let patch: NotePatch = parse_params(req)?;
    let note = notes::update_note(conn, &patch)?;
    Ok(json!({ "note": note }))
}

fn handle_notes_delete(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let note_id = required_str(req, "noteId")?;
    notes::delete_note(conn, &note_id)?;
    Ok(json!({ "deleted": true }))
}

fn handle_tasks_create(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let input: NewTask = parse_params(req)?;
    let task = tasks::create_task(conn, &input)?;
    Ok(json!({ "taskId": task.id, "task": task }))
}

fn handle_tasks_list(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let filter: TaskFilter = parse_params(req)?;
    let tasks = tasks::list_tasks(conn, &filter)?;
    Ok(json!({ "tasks": tasks }))
}

fn handle_tasks_get(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let task_id = required_str(req, "taskId")?;
    let task = tasks::require_task(conn, &task_id)?;
    Ok(json!({ "task": task }))
}

fn handle_tasks_update(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let patch: TaskPatch = parse_params(req)?;
    let task = tasks::update_task(conn, &patch)?;
    Ok(json!({ "task": task }))
}

fn handle_tasks_delete(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let task_id = required_str(req, "taskId")?;
    tasks::delete_task(conn, &task_id)?;
    Ok(json!({ "deleted": true }))
}

fn handle_tasks_counts(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let user_id = required_str(req, "userId")?;
    let lesson_id = optional_str(req, "lessonId");
    let today = optional_str(req, "today")
        .unwrap_or_else(|| Utc::now().date_naive().format("%Y-%m-%d").to_string());
    let counts = tasks::task_counts(conn, &user_id, lesson_id.as_deref(), &today)?;
    Ok(json!({ "counts": counts, "today": today }))
}

fn handle_announcements_create(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let input: NewAnnouncement = parse_params(req)?;
    let a = announcements::create_announcement(conn, &input)?;
    Ok(json!({ "announcementId": a.id, "announcement": a }))
}

fn handle_announcements_list(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let lesson_id = required_str(req, "lessonId")?;
    let rows = announcements::list_announcements(conn, &lesson_id)?;
    Ok(json!({ "announcements": rows }))
}

fn handle_announcements_update(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let patch: AnnouncementPatch = parse_params(req)?;
    let a = announcements::update_announcement(conn, &patch)?;
    Ok(json!({ "announcement": a }))
}

fn handle_announcements_delete(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let announcement_id = required_str(req, "announcementId")?;
    announcements::delete_announcement(conn, &announcement_id)?;
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "notes.create" => handle_notes_create(state, req),
        "notes.list" => handle_notes_list(state, req),
        "notes.get" => handle_notes_get(state, req),
        "notes.update" => handle_notes_update(state, req),
        "notes.delete" => handle_notes_delete(state, req),
        "tasks.create" => handle_tasks_create(state, req),
        "tasks.list" => handle_tasks_list(state, req),
        "tasks.get" => handle_tasks_get(state, req),
        "tasks.update" => handle_tasks_update(state, req),
        "tasks.delete" => handle_tasks_delete(state, req),
        "tasks.counts" => handle_tasks_counts(state, req),
        "announcements.create" => handle_announcements_create(state, req),
        "announcements.list" => handle_announcements_list(state, req),
        "announcements.update" => handle_announcements_update(state, req),
        "announcements.delete" => handle_announcements_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
