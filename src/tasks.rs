use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::lessons::require_lesson;
use crate::time::{normalize_due_date, now_rfc3339};
use crate::users::require_user;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "todo" => Some(TaskStatus::Todo),
            "in_progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub user_id: String,
    #[serde(default)]
    pub lesson_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub task_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilter {
    pub user_id: String,
    #[serde(default)]
    pub lesson_id: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub lesson_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl Task {
    /// Moves the task to `status`, stamping or clearing `completed_at`.
    fn set_status(&mut self, status: TaskStatus, now: &str) {
        if status == TaskStatus::Done && self.status != TaskStatus::Done {
            self.completed_at = Some(now.to_string());
        } else if status != TaskStatus::Done {
            self.completed_at = None;
        }
        self.status = status;
    }
}

const TASK_SELECT: &str = "SELECT id, user_id, lesson_id, title, description, due_date, priority,
        status, completed_at, created_at, updated_at
     FROM tasks";

fn task_from_row(r: &Row<'_>) -> rusqlite::Result<Task> {
    let priority: String = r.get(6)?;
    let status: String = r.get(7)?;
    Ok(Task {
        id: r.get(0)?,
        user_id: r.get(1)?,
        lesson_id: r.get(2)?,
        title: r.get(3)?,
        description: r.get(4)?,
        due_date: r.get(5)?,
        priority: Priority::parse(&priority).unwrap_or(Priority::Medium),
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Todo),
        completed_at: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

fn clean_title(raw: &str) -> AppResult<String> {
    let t = raw.trim();
    if t.is_empty() {
        return Err(AppError::validation("title must not be empty"));
    }
    Ok(t.to_string())
}

fn clean_due_date(raw: Option<&str>) -> AppResult<Option<String>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(d) => normalize_due_date(d).map(Some),
        None => Ok(None),
    }
}

pub fn create_task(conn: &Connection, input: &NewTask) -> AppResult<Task> {
    let title = clean_title(&input.title)?;
    require_user(conn, &input.user_id)?;
    if let Some(lesson_id) = input.lesson_id.as_deref() {
        require_lesson(conn, lesson_id)?;
    }
    let task = Task {
        id: Uuid::new_v4().to_string(),
        user_id: input.user_id.clone(),
        lesson_id: input.lesson_id.clone(),
        title,
        description: input.description.clone(),
        due_date: clean_due_date(input.due_date.as_deref())?,
        priority: input.priority.unwrap_or(Priority::Medium),
        status: TaskStatus::Todo,
        completed_at: None,
        created_at: now_rfc3339(),
        updated_at: None,
    };
    conn.execute(
        "INSERT INTO tasks(id, user_id, lesson_id, title, description, due_date, priority, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &task.id,
            &task.user_id,
            &task.lesson_id,
            &task.title,
            &task.description,
            &task.due_date,
            task.priority.as_str(),
            task.status.as_str(),
            &task.created_at,
        ),
    )?;
    Ok(task)
}

pub fn require_task(conn: &Connection, task_id: &str) -> AppResult<Task> {
    let sql = format!("{TASK_SELECT} WHERE id = ?");
    conn.query_row(&sql, [task_id], task_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("task"))
}

/// Open tasks come first, ordered by due date with undated tasks last.
pub fn list_tasks(conn: &Connection, filter: &TaskFilter) -> AppResult<Vec<Task>> {
    require_user(conn, &filter.user_id)?;
    let sql = format!(
        "{TASK_SELECT}
         WHERE user_id = ?1
           AND (?2 IS NULL OR lesson_id = ?2)
           AND (?3 IS NULL OR status = ?3)
         ORDER BY status = 'done', due_date IS NULL, due_date, created_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let tasks = stmt
        .query_map(
            (
                &filter.user_id,
                &filter.lesson_id,
                filter.status.map(TaskStatus::as_str),
            ),
            task_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tasks)
}

pub fn update_task(conn: &Connection, patch: &TaskPatch) -> AppResult<Task> {
    let mut task = require_task(conn, &patch.task_id)?;
    let now = now_rfc3339();
    if let Some(title) = patch.title.as_deref() {
        task.title = clean_title(title)?;
    }
    if let Some(description) = patch.description.as_ref() {
        task.description = Some(description.clone());
    }
    if patch.due_date.is_some() {
        task.due_date = clean_due_date(patch.due_date.as_deref())?;
    }
    if let Some(priority) = patch.priority {
        task.priority = priority;
    }
    if let Some(status) = patch.status {
        task.set_status(status, &now);
    }
    task.updated_at = Some(now);
    conn.execute(
        "UPDATE tasks
         SET title = ?, description = ?, due_date = ?, priority = ?, status = ?,
             completed_at = ?, updated_at = ?
         WHERE id = ?",
        (
            &task.title,
            &task.description,
            &task.due_date,
            task.priority.as_str(),
            task.status.as_str(),
            &task.completed_at,
            &task.updated_at,
            &task.id,
        ),
    )?;
    Ok(task)
}

pub fn delete_task(conn: &Connection, task_id: &str) -> AppResult<()> {
    let changed = conn.execute("DELETE FROM tasks WHERE id = ?", [task_id])?;
    if changed == 0 {
        return Err(AppError::not_found("task"));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounts {
    pub todo: i64,
    pub in_progress: i64,
    pub done: i64,
    pub overdue: i64,
}

/// Per-status counts. A task is overdue when it is not done and its due date is before `today`.
pub fn task_counts(
    conn: &Connection,
    user_id: &str,
    lesson_id: Option<&str>,
    today: &str,
) -> AppResult<TaskCounts> {
    require_user(conn, user_id)?;
    let day = today
        .get(..10)
        .filter(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").is_ok())
        .ok_or_else(|| {
            AppError::validation_with("today must start with YYYY-MM-DD", json!({ "today": today }))
        })?;
    let counts = conn.query_row(
        "SELECT
            COALESCE(SUM(status = 'todo'), 0),
            COALESCE(SUM(status = 'in_progress'), 0),
            COALESCE(SUM(status = 'done'), 0),
            COALESCE(SUM(status != 'done' AND due_date IS NOT NULL AND substr(due_date, 1, 10) < ?3), 0)
         FROM tasks
         WHERE user_id = ?1 AND (?2 IS NULL OR lesson_id = ?2)",
        (user_id, lesson_id, day),
        |r| {
            Ok(TaskCounts {
                todo: r.get(0)?,
                in_progress: r.get(1)?,
                done: r.get(2)?,
                overdue: r.get(3)?,
            })
        },
    )?;
    Ok(counts)
}
