use rusqlite::Connection;
use serde::{Serialize, Serializer};
use serde_json::json;
use std::collections::HashMap;

use crate::error::{AppError, AppResult};
use crate::grades::{load_config, GradeConfig};
use crate::scale::{GradingScale, ScaleBand};

/// Two-decimal rounding used for every percentage and point total on the wire.
pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn ser_round2<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(round_2_decimals(*v))
}

fn ser_round2_opt<S: Serializer>(v: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(v) => s.serialize_some(&round_2_decimals(*v)),
        None => s.serialize_none(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryState {
    Pending,
    Graded(f64),
    Excused,
}

impl EntryState {
    pub fn from_row(status: &str, score: Option<f64>) -> Self {
        match (status, score) {
            ("graded", Some(v)) => EntryState::Graded(v),
            ("excused", _) => EntryState::Excused,
            _ => EntryState::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ItemScore {
    pub item_id: String,
    pub points_possible: f64,
    pub state: EntryState,
}

#[derive(Debug, Clone)]
pub struct CategoryScores {
    pub category_id: String,
    pub name: String,
    pub weight: f64,
    pub items: Vec<ItemScore>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBreakdown {
    pub category_id: String,
    pub name: String,
    pub weight: f64,
    #[serde(serialize_with = "ser_round2")]
    pub earned_points: f64,
    #[serde(serialize_with = "ser_round2")]
    pub possible_points: f64,
    #[serde(serialize_with = "ser_round2")]
    pub percentage: f64,
    #[serde(serialize_with = "ser_round2")]
    pub weighted_score: f64,
    pub item_count: usize,
    pub graded_count: usize,
}

pub fn aggregate_category(cat: &CategoryScores) -> CategoryBreakdown {
    let mut earned = 0.0_f64;
    let mut possible = 0.0_f64;
    let mut graded_count = 0_usize;
    for item in &cat.items {
        if let EntryState::Graded(score) = item.state {
            earned += score;
            possible += item.points_possible;
            graded_count += 1;
        }
    }
    let percentage = if possible > 0.0 {
        earned * 100.0 / possible
    } else {
        0.0
    };
    CategoryBreakdown {
        category_id: cat.category_id.clone(),
        name: cat.name.clone(),
        weight: cat.weight,
        earned_points: earned,
        possible_points: possible,
        percentage,
        weighted_score: percentage * (cat.weight / 100.0),
        item_count: cat.items.len(),
        graded_count,
    }
}

/// Sum of weighted category scores. Categories with no published items are
/// skipped and their weight is not redistributed.
pub fn combine_weighted(breakdowns: &[CategoryBreakdown]) -> f64 {
    breakdowns
        .iter()
        .filter(|b| b.item_count > 0)
        .map(|b| b.weighted_score)
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalOutcome {
    pub letter: String,
    pub target_percentage: f64,
    pub gpa: f64,
    pub already_achieved: bool,
    pub achievable: bool,
    #[serde(serialize_with = "ser_round2")]
    pub points_needed: f64,
    #[serde(serialize_with = "ser_round2_opt")]
    pub percentage_needed_on_remaining: Option<f64>,
    pub message: String,
}

pub fn goal_for(band: &ScaleBand, current: f64, remaining_points: f64) -> GoalOutcome {
    let target = band.min;
    let mut out = GoalOutcome {
        letter: band.letter.clone(),
        target_percentage: target,
        gpa: band.gpa,
        already_achieved: false,
        achievable: false,
        points_needed: 0.0,
        percentage_needed_on_remaining: None,
        message: String::new(),
    };

    if current >= target {
        out.already_achieved = true;
        out.achievable = true;
        out.message = format!("Already achieved {}", band.letter);
        return out;
    }

    let points_needed = target - current;
    out.points_needed = points_needed;
    if remaining_points <= 0.0 || points_needed > remaining_points {
        out.message = format!("{} is not achievable with the remaining work", band.letter);
        return out;
    }

    let pct = points_needed / remaining_points * 100.0;
    out.achievable = true;
    out.percentage_needed_on_remaining = Some(pct);
    out.message = format!(
        "Need {:.2} more points ({:.2}% of the remaining {:.2}) for {}",
        points_needed, pct, remaining_points, band.letter
    );
    out
}

pub fn goals_for_scale(scale: &GradingScale, current: f64, remaining_points: f64) -> Vec<GoalOutcome> {
    scale
        .by_threshold_desc()
        .into_iter()
        .map(|b| goal_for(b, current, remaining_points))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeReport {
    #[serde(serialize_with = "ser_round2")]
    pub percentage: f64,
    pub letter_grade: String,
    pub gpa: f64,
    pub is_passing: bool,
    #[serde(serialize_with = "ser_round2")]
    pub earned_points: f64,
    #[serde(serialize_with = "ser_round2")]
    pub possible_points: f64,
    #[serde(serialize_with = "ser_round2")]
    pub remaining_points: f64,
    pub category_breakdown: Vec<CategoryBreakdown>,
    pub goals: Vec<GoalOutcome>,
}

/// Published categories with their published items and the user's entry state.
#[derive(Debug, Clone, Default)]
pub struct Gradebook {
    pub categories: Vec<CategoryScores>,
}

impl Gradebook {
    pub fn contains_item(&self, item_id: &str) -> bool {
        self.categories
            .iter()
            .any(|c| c.items.iter().any(|i| i.item_id == item_id))
    }

    /// Replaces entry lookups with caller-supplied scores.
    pub fn with_overrides(&self, overrides: &HashMap<String, f64>) -> Gradebook {
        let mut out = self.clone();
        for cat in &mut out.categories {
            for item in &mut cat.items {
                if let Some(score) = overrides.get(&item.item_id) {
                    item.state = EntryState::Graded(*score);
                }
            }
        }
        out
    }

    pub fn remaining_points(&self) -> f64 {
        self.categories
            .iter()
            .flat_map(|c| c.items.iter())
            .filter(|i| i.state == EntryState::Pending)
            .map(|i| i.points_possible)
            .sum()
    }

    pub fn evaluate(&self, scale: &GradingScale, passing_percentage: f64) -> GradeReport {
        let breakdown: Vec<CategoryBreakdown> = self
            .categories
            .iter()
            .filter(|c| !c.items.is_empty())
            .map(aggregate_category)
            .collect();
        let percentage = round_2_decimals(combine_weighted(&breakdown));
        let matched = scale.letter_for(percentage);
        let remaining_points = self.remaining_points();
        GradeReport {
            percentage,
            letter_grade: matched.letter.to_string(),
            gpa: matched.gpa,
            is_passing: percentage >= passing_percentage,
            earned_points: breakdown.iter().map(|b| b.earned_points).sum(),
            possible_points: breakdown.iter().map(|b| b.possible_points).sum(),
            remaining_points,
            goals: goals_for_scale(scale, percentage, remaining_points),
            category_breakdown: breakdown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub lesson_id: &'a str,
    pub user_id: &'a str,
}

pub fn load_gradebook(ctx: &CalcContext<'_>) -> AppResult<Gradebook> {
    let conn = ctx.conn;

    let mut cat_stmt = conn.prepare(
        "SELECT id, name, weight
         FROM grade_categories
         WHERE lesson_id = ? AND is_published = 1
         ORDER BY sort_order",
    )?;
    let mut categories: Vec<CategoryScores> = cat_stmt
        .query_map([ctx.lesson_id], |r| {
            Ok(CategoryScores {
                category_id: r.get(0)?,
                name: r.get(1)?,
                weight: r.get(2)?,
                items: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut item_stmt = conn.prepare(
        "SELECT i.category_id, i.id, i.points_possible, e.status, e.score
         FROM grade_items i
         LEFT JOIN grade_entries e ON e.grade_item_id = i.id AND e.user_id = ?
         WHERE i.lesson_id = ? AND i.is_published = 1
         ORDER BY i.sort_order",
    )?;
    let rows = item_stmt
        .query_map((ctx.user_id, ctx.lesson_id), |r| {
            let category_id: String = r.get(0)?;
            let item_id: String = r.get(1)?;
            let points_possible: f64 = r.get(2)?;
            let status: Option<String> = r.get(3)?;
            let score: Option<f64> = r.get(4)?;
            Ok((category_id, item_id, points_possible, status, score))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_category: HashMap<String, Vec<ItemScore>> = HashMap::new();
    for (category_id, item_id, points_possible, status, score) in rows {
        let state = status
            .as_deref()
            .map(|s| EntryState::from_row(s, score))
            .unwrap_or(EntryState::Pending);
        by_category.entry(category_id).or_default().push(ItemScore {
            item_id,
            points_possible,
            state,
        });
    }
    for cat in &mut categories {
        if let Some(items) = by_category.remove(&cat.category_id) {
            cat.items = items;
        }
    }

    Ok(Gradebook { categories })
}

/// Grade report for one user. Fails with `not_found` when the lesson has no config.
pub fn compute_grade_report(
    ctx: &CalcContext<'_>,
    overrides: Option<&HashMap<String, f64>>,
) -> AppResult<(GradeConfig, GradeReport)> {
    let Some(config) = load_config(ctx.conn, ctx.lesson_id)? else {
        return Err(AppError::NotFound(
            "grade config not found for lesson".to_string(),
        ));
    };
    let book = load_gradebook(ctx)?;
    let book = match overrides {
        Some(o) => book.with_overrides(o),
        None => book,
    };
    let report = book.evaluate(&config.scale, config.passing_percentage);
    Ok((config, report))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSnapshot {
    pub percentage: f64,
    pub letter_grade: String,
    pub gpa: f64,
}

impl From<&GradeReport> for ScoreSnapshot {
    fn from(r: &GradeReport) -> Self {
        Self {
            percentage: r.percentage,
            letter_grade: r.letter_grade.clone(),
            gpa: r.gpa,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfOutcome {
    pub current: ScoreSnapshot,
    pub hypothetical: ScoreSnapshot,
    #[serde(serialize_with = "ser_round2")]
    pub difference: f64,
    pub ignored_item_ids: Vec<String>,
}

/// Evaluates the gradebook with hypothetical scores. Nothing is written.
/// Ids that are not published items of the lesson are reported and skipped.
pub fn what_if(ctx: &CalcContext<'_>, scores: &HashMap<String, f64>) -> AppResult<WhatIfOutcome> {
    for (item_id, score) in scores {
        if !score.is_finite() || *score < 0.0 {
            return Err(AppError::validation_with(
                "hypothetical scores must be non-negative numbers",
                json!({ "itemId": item_id, "score": score }),
            ));
        }
    }
    let Some(config) = load_config(ctx.conn, ctx.lesson_id)? else {
        return Err(AppError::NotFound(
            "grade config not found for lesson".to_string(),
        ));
    };
    let book = load_gradebook(ctx)?;
    let mut ignored_item_ids: Vec<String> = scores
        .keys()
        .filter(|id| !book.contains_item(id))
        .cloned()
        .collect();
    ignored_item_ids.sort();

    let current = book.evaluate(&config.scale, config.passing_percentage);
    let hypothetical = book
        .with_overrides(scores)
        .evaluate(&config.scale, config.passing_percentage);
    Ok(WhatIfOutcome {
        difference: round_2_decimals(hypothetical.percentage - current.percentage),
        current: ScoreSnapshot::from(&current),
        hypothetical: ScoreSnapshot::from(&hypothetical),
        ignored_item_ids,
    })
}

/// Achievability of a single letter for the user's current standing.
pub fn goal_for_letter(ctx: &CalcContext<'_>, letter: &str) -> AppResult<GoalOutcome> {
    let (config, report) = compute_grade_report(ctx, None)?;
    let Some(band) = config.scale.band(letter) else {
        return Err(AppError::NotFound(format!(
            "grade {} not in scale",
            letter.trim()
        )));
    };
    Ok(goal_for(band, report.percentage, report.remaining_points))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abf() -> GradingScale {
        GradingScale::from_json(&json!({
            "A": { "min": 90, "max": 100, "gpa": 4.0 },
            "B": { "min": 80, "max": 90, "gpa": 3.0 },
            "F": { "min": 0, "max": 80, "gpa": 0.0 }
        }))
        .expect("scale")
    }

    fn item(id: &str, possible: f64, state: EntryState) -> ItemScore {
        ItemScore {
            item_id: id.to_string(),
            points_possible: possible,
            state,
        }
    }

    fn homework(states: [EntryState; 2]) -> Gradebook {
        Gradebook {
            categories: vec![CategoryScores {
                category_id: "c1".into(),
                name: "Homework".into(),
                weight: 100.0,
                items: vec![item("i1", 50.0, states[0]), item("i2", 50.0, states[1])],
            }],
        }
    }

    #[test]
    fn homework_example_yields_a() {
        let book = homework([EntryState::Graded(45.0), EntryState::Graded(48.0)]);
        let report = book.evaluate(&abf(), 60.0);
        assert_eq!(report.percentage, 93.0);
        assert_eq!(report.letter_grade, "A");
        assert_eq!(report.gpa, 4.0);
        assert!(report.is_passing);
        assert_eq!(report.category_breakdown[0].percentage, 93.0);
        assert_eq!(report.remaining_points, 0.0);
    }

    #[test]
    fn only_graded_entries_count_toward_possible() {
        let cat = CategoryScores {
            category_id: "c".into(),
            name: "Quizzes".into(),
            weight: 40.0,
            items: vec![
                item("a", 10.0, EntryState::Graded(8.0)),
                item("b", 10.0, EntryState::Pending),
                item("c", 10.0, EntryState::Excused),
            ],
        };
        let b = aggregate_category(&cat);
        assert_eq!(b.earned_points, 8.0);
        assert_eq!(b.possible_points, 10.0);
        assert_eq!(b.percentage, 80.0);
        assert!((b.weighted_score - 80.0 * 40.0 / 100.0).abs() < 0.005);
        assert_eq!(b.graded_count, 1);
    }

    #[test]
    fn empty_category_contributes_zero_and_is_not_renormalized() {
        let book = Gradebook {
            categories: vec![
                CategoryScores {
                    category_id: "hw".into(),
                    name: "Homework".into(),
                    weight: 60.0,
                    items: vec![item("h", 10.0, EntryState::Graded(10.0))],
                },
                CategoryScores {
                    category_id: "ex".into(),
                    name: "Exams".into(),
                    weight: 40.0,
                    items: vec![],
                },
            ],
        };
        let report = book.evaluate(&abf(), 60.0);
        assert_eq!(report.percentage, 60.0);
        assert_eq!(report.category_breakdown.len(), 1);
    }

    #[test]
    fn goals_run_from_highest_threshold() {
        let goals = goals_for_scale(&abf(), 85.0, 20.0);
        let letters: Vec<&str> = goals.iter().map(|g| g.letter.as_str()).collect();
        assert_eq!(letters, vec!["A", "B", "F"]);

        assert!(!goals[0].already_achieved);
        assert!(goals[0].achievable);
        assert_eq!(goals[0].points_needed, 5.0);
        assert_eq!(goals[0].percentage_needed_on_remaining, Some(25.0));

        assert!(goals[1].already_achieved);
        assert_eq!(goals[1].points_needed, 0.0);
    }

    #[test]
    fn nothing_remaining_means_not_achievable() {
        let band = abf().band("A").cloned().expect("band");
        let g = goal_for(&band, 70.0, 0.0);
        assert!(!g.achievable);
        assert!(!g.already_achieved);
        assert_eq!(g.percentage_needed_on_remaining, None);
    }

    #[test]
    fn gap_larger_than_remaining_is_not_achievable() {
        let band = abf().band("A").cloned().expect("band");
        let g = goal_for(&band, 50.0, 10.0);
        assert!(!g.achievable);
        assert_eq!(g.points_needed, 40.0);
    }

    #[test]
    fn overrides_replace_pending_and_graded_entries() {
        let book = homework([EntryState::Graded(20.0), EntryState::Pending]);
        assert_eq!(book.remaining_points(), 50.0);

        let mut o = HashMap::new();
        o.insert("i2".to_string(), 50.0);
        o.insert("i1".to_string(), 45.0);
        let hypo = book.with_overrides(&o);
        assert_eq!(hypo.remaining_points(), 0.0);
        let report = hypo.evaluate(&abf(), 60.0);
        assert_eq!(report.percentage, 95.0);
        // The source gradebook is untouched.
        assert_eq!(book.evaluate(&abf(), 60.0).percentage, 40.0);
    }

    #[test]
    fn rounding_serializes_two_decimals() {
        let cat = CategoryScores {
            category_id: "c".into(),
            name: "Labs".into(),
            weight: 33.0,
            items: vec![item("a", 3.0, EntryState::Graded(2.0))],
        };
        let v = serde_json::to_value(aggregate_category(&cat)).expect("json");
        assert_eq!(v["percentage"], json!(66.67));
        assert_eq!(v["weightedScore"], json!(22.0));
    }
}
