use serde_json::json;

use crate::error::AppResult;
use crate::ipc::helpers::{optional_str, parse_params, require_db, required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::users::{self, NewUser};

fn handle_users_create(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let input: NewUser = parse_params(req)?;
    let user = users::create_user(conn, &input)?;
    Ok(json!({ "userId": user.id, "user": user }))
}

fn handle_users_list(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let role = optional_str(req, "role");
    let users = users::list_users(conn, role.as_deref())?;
    Ok(json!({ "users": users }))
}

fn handle_users_get(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let user_id = required_str(req, "userId")?;
    let user = users::require_user(conn, &user_id)?;
    Ok(json!({ "user": user }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "users.create" => handle_users_create(state, req),
        "users.list" => handle_users_list(state, req),
        "users.get" => handle_users_get(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
