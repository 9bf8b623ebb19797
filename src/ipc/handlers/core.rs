use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match open_workspace(state, path) {
        Ok(path) => ok(&req.id, json!({ "workspacePath": path })),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

/// Opens (creating if needed) the workspace database and makes it current.
fn open_workspace(state: &mut AppState, path: PathBuf) -> anyhow::Result<String> {
    // Release the previous handle before opening another file.
    state.db = None;
    let conn = db::open_db(&path)?;
    info!(workspace = %path.display(), "workspace opened");
    let shown = path.to_string_lossy().to_string();
    state.workspace = Some(path);
    state.db = Some(conn);
    Ok(shown)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
