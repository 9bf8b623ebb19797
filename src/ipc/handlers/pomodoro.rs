use serde::Deserialize;
use serde_json::json;

use crate::error::AppResult;
use crate::ipc::helpers::{optional_str, parse_params, require_db, required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::pomodoro::{self, StartSession, Transition};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionAt {
    session_id: String,
    #[serde(default)]
    at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InterruptParams {
    session_id: String,
    reason: String,
    #[serde(default)]
    at: Option<String>,
}

fn handle_start(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let input: StartSession = parse_params(req)?;
    let session = pomodoro::start_session(conn, &input)?;
    Ok(json!({ "sessionId": session.id, "session": session }))
}

fn handle_transition(
    state: &AppState,
    req: &Request,
    action: Transition,
) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let p: SessionAt = parse_params(req)?;
    let session = pomodoro::transition(conn, &p.session_id, action, p.at.as_deref())?;
    Ok(json!({ "session": session }))
}

fn handle_complete(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let p: SessionAt = parse_params(req)?;
    let (session, next) =
        pomodoro::complete_session(conn, &p.session_id, p.at.as_deref(), state.long_break_every)?;
    Ok(json!({ "session": session, "nextPhase": next }))
}

fn handle_interrupt(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let p: InterruptParams = parse_params(req)?;
    let session = pomodoro::interrupt_session(conn, &p.session_id, &p.reason, p.at.as_deref())?;
    Ok(json!({ "session": session }))
}

fn handle_get(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let session_id = required_str(req, "sessionId")?;
    let session = pomodoro::get_session(conn, &session_id)?;
    Ok(json!({ "session": session }))
}

fn handle_list(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let user_id = required_str(req, "userId")?;
    let lesson_id = optional_str(req, "lessonId");
    let sessions = pomodoro::list_sessions(conn, &user_id, lesson_id.as_deref())?;
    Ok(json!({ "sessions": sessions }))
}

fn handle_stats(state: &AppState, req: &Request) -> AppResult<pomodoro::PomodoroStats> {
    let conn = require_db(state)?;
    let user_id = required_str(req, "userId")?;
    let lesson_id = optional_str(req, "lessonId");
    pomodoro::stats(conn, &user_id, lesson_id.as_deref())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "pomodoro.start" => respond(req, handle_start(state, req)),
        "pomodoro.pause" => respond(req, handle_transition(state, req, Transition::Pause)),
        "pomodoro.resume" => respond(req, handle_transition(state, req, Transition::Resume)),
        "pomodoro.complete" => respond(req, handle_complete(state, req)),
        "pomodoro.interrupt" => respond(req, handle_interrupt(state, req)),
        "pomodoro.get" => respond(req, handle_get(state, req)),
        "pomodoro.list" => respond(req, handle_list(state, req)),
        "pomodoro.stats" => respond(req, handle_stats(state, req)),
        _ => return None,
    };
    Some(resp)
}
