mod announcements;
mod backup;
mod calc;
mod config;
mod db;
mod error;
mod grades;
mod ipc;
mod lessons;
mod logging;
mod notes;
mod pomodoro;
mod scale;
mod tasks;
mod time;
mod transfer;
mod users;

use clap::Parser;
use std::io::{self, BufRead, Write};
use tracing::{error, info, warn};

fn main() {
    let config = config::Config::parse();
    logging::init_tracing(&config.log_level);

    let mut state = ipc::AppState::new(config.long_break_every);
    if let Some(workspace) = config.workspace.clone() {
        match db::open_db(&workspace) {
            Ok(conn) => {
                info!(workspace = %workspace.display(), "workspace opened at startup");
                state.workspace = Some(workspace);
                state.db = Some(conn);
            }
            Err(e) => error!(workspace = %workspace.display(), error = %e, "failed to open workspace"),
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "learnhubd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                warn!(error = %e, "unparseable request line");
                // No id to echo back.
                ipc::err("", "bad_json", e.to_string(), None)
            }
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("stdin closed; exiting");
}
