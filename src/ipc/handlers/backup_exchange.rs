use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backup;
use crate::error::{AppError, AppResult};
use crate::ipc::helpers::{optional_str, require_db, required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::lessons::require_lesson;
use crate::transfer;

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_num(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn io_failed(e: anyhow::Error) -> AppError {
    AppError::Io(std::io::Error::other(format!("{e:#}")))
}

fn handle_backup_export_lesson_bundle(
    state: &AppState,
    req: &Request,
) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let lesson_id = required_str(req, "lessonId")?;
    let out_path = required_str(req, "outPath")?;

    let bundle = transfer::snapshot_lesson(conn, &lesson_id)?;
    let export = backup::write_bundle(Path::new(&out_path), &bundle).map_err(io_failed)?;
    info!(path = %out_path, lesson_id = %lesson_id, sha256 = %export.lesson_sha256, "lesson bundle exported");

    Ok(json!({
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "lessonSha256": export.lesson_sha256,
        "categories": bundle.categories.len(),
        "items": bundle.items.len(),
        "entries": bundle.entries.len()
    }))
}

fn handle_backup_import_lesson_bundle(
    state: &AppState,
    req: &Request,
) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let in_path = required_str(req, "inPath")?;
    let owner_id = required_str(req, "ownerId")?;
    let title = optional_str(req, "title");

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(AppError::NotFound(format!("bundle file not found: {in_path}")));
    }
    let bundle = backup::read_bundle(&src).map_err(|e| {
        warn!(path = %in_path, error = %e, "lesson bundle rejected");
        AppError::validation_with(format!("{e:#}"), json!({ "inPath": in_path }))
    })?;
    let report = transfer::restore_lesson(conn, &bundle, &owner_id, title.as_deref())?;
    Ok(json!({
        "lessonId": report.lesson_id,
        "bundleFormat": backup::BUNDLE_FORMAT_V1,
        "categoriesImported": report.categories_imported,
        "itemsImported": report.items_imported,
        "entriesImported": report.entries_imported,
        "skippedUsernames": report.skipped_usernames
    }))
}

fn handle_exchange_export_lesson_grades_csv(
    state: &AppState,
    req: &Request,
) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let lesson_id = required_str(req, "lessonId")?;
    let out_path = required_str(req, "outPath")?;
    require_lesson(conn, &lesson_id)?;

    let mut stmt = conn.prepare(
        "SELECT u.id, u.username, i.id, i.name, c.name, i.points_possible,
                e.status, e.score, e.raw_score, e.is_late, e.comments
         FROM grade_entries e
         JOIN grade_items i ON i.id = e.grade_item_id
         JOIN grade_categories c ON c.id = i.category_id
         JOIN users u ON u.id = e.user_id
         WHERE i.lesson_id = ?
         ORDER BY u.username, c.sort_order, i.sort_order",
    )?;
    let rows = stmt
        .query_map([&lesson_id], |r| {
            Ok(vec![
                csv_quote(&r.get::<_, String>(0)?),
                csv_quote(&r.get::<_, String>(1)?),
                csv_quote(&r.get::<_, String>(2)?),
                csv_quote(&r.get::<_, String>(3)?),
                csv_quote(&r.get::<_, String>(4)?),
                r.get::<_, f64>(5)?.to_string(),
                csv_quote(&r.get::<_, String>(6)?),
                csv_num(r.get(7)?),
                csv_num(r.get(8)?),
                r.get::<_, i64>(9)?.to_string(),
                csv_quote(&r.get::<_, Option<String>>(10)?.unwrap_or_default()),
            ]
            .join(","))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let out = PathBuf::from(&out_path);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::File::create(&out)?;
    writeln!(
        file,
        "user_id,username,grade_item_id,item,category,points_possible,status,score,raw_score,is_late,comments"
    )?;
    for line in &rows {
        writeln!(file, "{line}")?;
    }
    file.flush()?;

    Ok(json!({ "path": out_path, "rowsExported": rows.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportLessonBundle" => handle_backup_export_lesson_bundle(state, req),
        "backup.importLessonBundle" => handle_backup_import_lesson_bundle(state, req),
        "exchange.exportLessonGradesCsv" => handle_exchange_export_lesson_grades_csv(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
