use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::error::{app_err, ok};
use super::types::{AppState, Request};
use crate::error::{AppError, AppResult};

pub fn require_db(state: &AppState) -> AppResult<&Connection> {
    state.db.as_ref().ok_or(AppError::NoWorkspace)
}

/// Deserializes `params` into a typed request body.
pub fn parse_params<T: DeserializeOwned>(req: &Request) -> AppResult<T> {
    let raw = if req.params.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        req.params.clone()
    };
    serde_json::from_value(raw).map_err(|e| AppError::validation(format!("invalid params: {e}")))
}

pub fn required_str(req: &Request, key: &str) -> AppResult<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::validation(format!("missing {key}")))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn respond<T: Serialize>(req: &Request, result: AppResult<T>) -> serde_json::Value {
    match result.and_then(|v| serde_json::to_value(v).map_err(|e| AppError::Internal(e.into()))) {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            warn!(method = %req.method, code = e.code(), error = %e, "request failed");
            app_err(&req.id, &e)
        }
    }
}
