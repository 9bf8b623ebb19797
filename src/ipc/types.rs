use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub long_break_every: u32,
}

impl AppState {
    pub fn new(long_break_every: u32) -> Self {
        Self {
            workspace: None,
            db: None,
            long_break_every,
        }
    }
}
