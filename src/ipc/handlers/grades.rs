use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::info;

use crate::calc::{self, CalcContext};
use crate::error::{AppError, AppResult};
use crate::grades::{self, GradeSubmission, NewCategory, NewGradeConfig, NewGradeItem};
use crate::ipc::helpers::{optional_str, parse_params, require_db, required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::lessons::require_lesson;
use crate::users::require_user;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LessonUser {
    lesson_id: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoalParams {
    lesson_id: String,
    user_id: String,
    target_grade: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WhatIfParams {
    lesson_id: String,
    user_id: String,
    #[serde(default)]
    hypothetical_scores: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishParams {
    grade_item_id: String,
    is_published: bool,
}

fn handle_config_create(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let input: NewGradeConfig = parse_params(req)?;
    let config = grades::create_config(conn, &input)?;
    Ok(json!({ "configId": config.id, "config": config }))
}

fn handle_config_get(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let lesson_id = required_str(req, "lessonId")?;
    let config = grades::load_config(conn, &lesson_id)?
        .ok_or_else(|| AppError::not_found("grade config"))?;
    Ok(json!({ "config": config }))
}

fn handle_categories_create(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let input: NewCategory = parse_params(req)?;
    let category = grades::create_category(conn, &input)?;
    Ok(json!({ "categoryId": category.id, "category": category }))
}

fn handle_categories_list(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let lesson_id = required_str(req, "lessonId")?;
    let categories = grades::list_categories(conn, &lesson_id)?;
    Ok(json!({ "categories": categories }))
}

fn handle_categories_delete(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let category_id = required_str(req, "categoryId")?;
    let (category, refreshed) = grades::delete_category(conn, &category_id)?;
    info!(category_id = %category.id, refreshed, "category deleted");
    Ok(json!({ "deleted": true, "refreshedSummaries": refreshed }))
}

fn handle_items_create(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let input: NewGradeItem = parse_params(req)?;
    let item = grades::create_item(conn, &input)?;
    Ok(json!({ "gradeItemId": item.id, "item": item }))
}

fn handle_items_list(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let lesson_id = required_str(req, "lessonId")?;
    let category_id = optional_str(req, "categoryId");
    let items = grades::list_items(conn, &lesson_id, category_id.as_deref())?;
    Ok(json!({ "items": items }))
}

fn handle_items_set_published(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let p: PublishParams = parse_params(req)?;
    let (item, refreshed) = grades::set_item_published(conn, &p.grade_item_id, p.is_published)?;
    Ok(json!({ "item": item, "refreshedSummaries": refreshed }))
}

fn handle_submit(state: &AppState, req: &Request) -> AppResult<grades::SubmitOutcome> {
    let conn = require_db(state)?;
    let input: GradeSubmission = parse_params(req)?;
    grades::submit_grade(conn, &input)
}

fn handle_student_list(state: &AppState, req: &Request) -> AppResult<serde_json::Value> {
    let conn = require_db(state)?;
    let p: LessonUser = parse_params(req)?;
    let grades = grades::student_grades(conn, &p.lesson_id, &p.user_id)?;
    Ok(json!({ "grades": grades }))
}

fn handle_summary_calculate(state: &AppState, req: &Request) -> AppResult<calc::GradeReport> {
    let conn = require_db(state)?;
    let p: LessonUser = parse_params(req)?;
    require_user(conn, &p.user_id)?;
    require_lesson(conn, &p.lesson_id)?;
    grades::refresh_summary(conn, &p.lesson_id, &p.user_id)
}

fn handle_summary_get(state: &AppState, req: &Request) -> AppResult<grades::StoredSummary> {
    let conn = require_db(state)?;
    let p: LessonUser = parse_params(req)?;
    grades::load_summary(conn, &p.lesson_id, &p.user_id)?
        .ok_or_else(|| AppError::not_found("grade summary"))
}

fn handle_goal_calculate(state: &AppState, req: &Request) -> AppResult<calc::GoalOutcome> {
    let conn = require_db(state)?;
    let p: GoalParams = parse_params(req)?;
    require_user(conn, &p.user_id)?;
    let ctx = CalcContext {
        conn,
        lesson_id: &p.lesson_id,
        user_id: &p.user_id,
    };
    calc::goal_for_letter(&ctx, &p.target_grade)
}

fn handle_what_if(state: &AppState, req: &Request) -> AppResult<calc::WhatIfOutcome> {
    let conn = require_db(state)?;
    let p: WhatIfParams = parse_params(req)?;
    require_user(conn, &p.user_id)?;
    let ctx = CalcContext {
        conn,
        lesson_id: &p.lesson_id,
        user_id: &p.user_id,
    };
    calc::what_if(&ctx, &p.hypothetical_scores)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "grades.config.create" => respond(req, handle_config_create(state, req)),
        "grades.config.get" => respond(req, handle_config_get(state, req)),
        "grades.categories.create" => respond(req, handle_categories_create(state, req)),
        "grades.categories.list" => respond(req, handle_categories_list(state, req)),
        "grades.categories.delete" => respond(req, handle_categories_delete(state, req)),
        "grades.items.create" => respond(req, handle_items_create(state, req)),
        "grades.items.list" => respond(req, handle_items_list(state, req)),
        "grades.items.setPublished" => respond(req, handle_items_set_published(state, req)),
        "grades.submit" => respond(req, handle_submit(state, req)),
        "grades.student.list" => respond(req, handle_student_list(state, req)),
        "grades.summary.calculate" => respond(req, handle_summary_calculate(state, req)),
        "grades.summary.get" => respond(req, handle_summary_get(state, req)),
        "grades.goal.calculate" => respond(req, handle_goal_calculate(state, req)),
        "grades.whatIf.calculate" => respond(req, handle_what_if(state, req)),
        _ => return None,
    };
    Some(resp)
}
