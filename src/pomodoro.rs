use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::lessons::require_lesson;
use crate::time::{format_instant, parse_instant};
use crate::users::require_user;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Work,
    ShortBreak,
    LongBreak,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Work => "work",
            Phase::ShortBreak => "short_break",
            Phase::LongBreak => "long_break",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "work" => Some(Phase::Work),
            "short_break" => Some(Phase::ShortBreak),
            "long_break" => Some(Phase::LongBreak),
            _ => None,
        }
    }

    pub fn default_minutes(self) -> i64 {
        match self {
            Phase::Work => 25,
            Phase::ShortBreak => 5,
            Phase::LongBreak => 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Interrupted,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Interrupted => "interrupted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(SessionStatus::Running),
            "paused" => Some(SessionStatus::Paused),
            "completed" => Some(SessionStatus::Completed),
            "interrupted" => Some(SessionStatus::Interrupted),
            _ => None,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Paused)
    }
}

/// Timer state of one session. Elapsed time only accrues while running.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClock {
    pub status: SessionStatus,
    pub last_resumed_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: i64,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SessionClock {
    pub fn start(at: DateTime<Utc>) -> Self {
        Self {
            status: SessionStatus::Running,
            last_resumed_at: Some(at),
            paused_at: None,
            elapsed_seconds: 0,
            ended_at: None,
        }
    }

    fn invalid(&self, action: &str) -> AppError {
        AppError::Conflict(format!(
            "cannot {action} a {} session",
            self.status.as_str()
        ))
    }

    fn accrue(&mut self, at: DateTime<Utc>) -> AppResult<()> {
        if let Some(since) = self.last_resumed_at.take() {
            let delta = (at - since).num_seconds();
            if delta < 0 {
                self.last_resumed_at = Some(since);
                return Err(AppError::validation_with(
                    "timestamp is earlier than the last resume",
                    json!({ "at": format_instant(at), "lastResumedAt": format_instant(since) }),
                ));
            }
            self.elapsed_seconds += delta;
        }
        Ok(())
    }

    fn leave_pause(&mut self, at: DateTime<Utc>) -> AppResult<()> {
        if let Some(paused) = self.paused_at {
            if at < paused {
                return Err(AppError::validation_with(
                    "timestamp is earlier than the pause",
                    json!({ "at": format_instant(at), "pausedAt": format_instant(paused) }),
                ));
            }
        }
        self.paused_at = None;
        Ok(())
    }

    pub fn pause(&mut self, at: DateTime<Utc>) -> AppResult<()> {
        if self.status != SessionStatus::Running {
            return Err(self.invalid("pause"));
        }
        self.accrue(at)?;
        self.paused_at = Some(at);
        self.status = SessionStatus::Paused;
        Ok(())
    }

    pub fn resume(&mut self, at: DateTime<Utc>) -> AppResult<()> {
        if self.status != SessionStatus::Paused {
            return Err(self.invalid("resume"));
        }
        self.leave_pause(at)?;
        self.last_resumed_at = Some(at);
        self.status = SessionStatus::Running;
        Ok(())
    }

    fn finish(&mut self, at: DateTime<Utc>, status: SessionStatus, action: &str) -> AppResult<()> {
        if !self.status.is_open() {
            return Err(self.invalid(action));
        }
        self.accrue(at)?;
        self.leave_pause(at)?;
        self.status = status;
        self.ended_at = Some(at);
        Ok(())
    }

    pub fn complete(&mut self, at: DateTime<Utc>) -> AppResult<()> {
        self.finish(at, SessionStatus::Completed, "complete")
    }

    pub fn interrupt(&mut self, at: DateTime<Utc>) -> AppResult<()> {
        self.finish(at, SessionStatus::Interrupted, "interrupt")
    }
}

/// Phase that follows a completed session. `completed_work` includes the one just finished.
pub fn next_phase(finished: Phase, completed_work: i64, long_break_every: u32) -> Phase {
    match finished {
        Phase::Work => {
            let every = i64::from(long_break_every.max(1));
            if completed_work > 0 && completed_work % every == 0 {
                Phase::LongBreak
            } else {
                Phase::ShortBreak
            }
        }
        Phase::ShortBreak | Phase::LongBreak => Phase::Work,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub lesson_id: Option<String>,
    pub phase: Phase,
    pub status: SessionStatus,
    pub planned_minutes: i64,
    pub started_at: String,
    pub elapsed_seconds: i64,
    pub ended_at: Option<String>,
    pub notes: Option<String>,
    #[serde(skip)]
    pub last_resumed_at: Option<String>,
    #[serde(skip)]
    pub paused_at: Option<String>,
}

impl Session {
    fn clock(&self) -> AppResult<SessionClock> {
        let last_resumed_at = self
            .last_resumed_at
            .as_deref()
            .map(parse_instant)
            .transpose()?;
        let paused_at = self.paused_at.as_deref().map(parse_instant).transpose()?;
        let ended_at = self.ended_at.as_deref().map(parse_instant).transpose()?;
        Ok(SessionClock {
            status: self.status,
            last_resumed_at,
            paused_at,
            elapsed_seconds: self.elapsed_seconds,
            ended_at,
        })
    }

    fn apply(&mut self, clock: &SessionClock) {
        self.status = clock.status;
        self.elapsed_seconds = clock.elapsed_seconds;
        self.last_resumed_at = clock.last_resumed_at.map(format_instant);
        self.paused_at = clock.paused_at.map(format_instant);
        self.ended_at = clock.ended_at.map(format_instant);
    }
}

fn session_from_row(r: &Row<'_>) -> rusqlite::Result<Session> {
    let phase: String = r.get(3)?;
    let status: String = r.get(4)?;
    Ok(Session {
        id: r.get(0)?,
        user_id: r.get(1)?,
        lesson_id: r.get(2)?,
        phase: Phase::parse(&phase).unwrap_or(Phase::Work),
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Interrupted),
        planned_minutes: r.get(5)?,
        started_at: r.get(6)?,
        last_resumed_at: r.get(7)?,
        paused_at: r.get(8)?,
        elapsed_seconds: r.get(9)?,
        ended_at: r.get(10)?,
        notes: r.get(11)?,
    })
}

const SESSION_SELECT: &str = "SELECT id, user_id, lesson_id, phase, status, planned_minutes,
        started_at, last_resumed_at, paused_at, elapsed_seconds, ended_at, notes
     FROM pomodoro_sessions";

fn resolve_at(at: Option<&str>) -> AppResult<DateTime<Utc>> {
    match at {
        Some(raw) => parse_instant(raw),
        None => Ok(Utc::now()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSession {
    pub user_id: String,
    #[serde(default)]
    pub lesson_id: Option<String>,
    #[serde(default)]
    pub phase: Option<Phase>,
    #[serde(default)]
    pub planned_minutes: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub at: Option<String>,
}

pub fn start_session(conn: &Connection, input: &StartSession) -> AppResult<Session> {
    require_user(conn, &input.user_id)?;
    if let Some(lesson_id) = input.lesson_id.as_deref() {
        require_lesson(conn, lesson_id)?;
    }
    let phase = input.phase.unwrap_or(Phase::Work);
    let planned_minutes = input
        .planned_minutes
        .unwrap_or_else(|| phase.default_minutes());
    if !(1..=240).contains(&planned_minutes) {
        return Err(AppError::validation_with(
            "plannedMinutes must be between 1 and 240",
            json!({ "plannedMinutes": planned_minutes }),
        ));
    }

    let open: Option<String> = conn
        .query_row(
            "SELECT id FROM pomodoro_sessions
             WHERE user_id = ? AND status IN ('running', 'paused')
             LIMIT 1",
            [&input.user_id],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(open_id) = open {
        return Err(AppError::Conflict(format!(
            "user already has an open session: {open_id}"
        )));
    }

    let at = resolve_at(input.at.as_deref())?;
    let clock = SessionClock::start(at);
    let mut session = Session {
        id: Uuid::new_v4().to_string(),
        user_id: input.user_id.clone(),
        lesson_id: input.lesson_id.clone(),
        phase,
        status: clock.status,
        planned_minutes,
        started_at: format_instant(at),
        elapsed_seconds: 0,
        ended_at: None,
        notes: input.notes.clone(),
        last_resumed_at: None,
        paused_at: None,
    };
    session.apply(&clock);
    conn.execute(
        "INSERT INTO pomodoro_sessions(
            id, user_id, lesson_id, phase, status, planned_minutes, started_at,
            last_resumed_at, paused_at, elapsed_seconds, ended_at, notes)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &session.id,
            &session.user_id,
            &session.lesson_id,
            session.phase.as_str(),
            session.status.as_str(),
            session.planned_minutes,
            &session.started_at,
            &session.last_resumed_at,
            &session.paused_at,
            session.elapsed_seconds,
            &session.ended_at,
            &session.notes,
        ),
    )?;
    info!(session_id = %session.id, phase = session.phase.as_str(), "pomodoro started");
    Ok(session)
}

pub fn get_session(conn: &Connection, session_id: &str) -> AppResult<Session> {
    let sql = format!("{SESSION_SELECT} WHERE id = ?");
    conn.query_row(&sql, [session_id], session_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("pomodoro session"))
}

pub fn list_sessions(
    conn: &Connection,
    user_id: &str,
    lesson_id: Option<&str>,
) -> AppResult<Vec<Session>> {
    require_user(conn, user_id)?;
    let sql = format!(
        "{SESSION_SELECT} WHERE user_id = ?1 AND (?2 IS NULL OR lesson_id = ?2) ORDER BY started_at DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((user_id, lesson_id), session_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn save_clock(conn: &Connection, session: &Session) -> AppResult<()> {
    conn.execute(
        "UPDATE pomodoro_sessions
         SET status = ?, last_resumed_at = ?, paused_at = ?, elapsed_seconds = ?, ended_at = ?
         WHERE id = ?",
        (
            session.status.as_str(),
            &session.last_resumed_at,
            &session.paused_at,
            session.elapsed_seconds,
            &session.ended_at,
            &session.id,
        ),
    )?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub enum Transition {
    Pause,
    Resume,
    Complete,
    Interrupt,
}

/// Applies a timer transition and persists the new clock.
pub fn transition(
    conn: &Connection,
    session_id: &str,
    action: Transition,
    at: Option<&str>,
) -> AppResult<Session> {
    let mut session = get_session(conn, session_id)?;
    let mut clock = session.clock()?;
    let at = resolve_at(at)?;
    match action {
        Transition::Pause => clock.pause(at)?,
        Transition::Resume => clock.resume(at)?,
        Transition::Complete => clock.complete(at)?,
        Transition::Interrupt => clock.interrupt(at)?,
    }
    session.apply(&clock);
    save_clock(conn, &session)?;
    Ok(session)
}

pub fn complete_session(
    conn: &Connection,
    session_id: &str,
    at: Option<&str>,
    long_break_every: u32,
) -> AppResult<(Session, Phase)> {
    let session = transition(conn, session_id, Transition::Complete, at)?;
    let completed_work: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pomodoro_sessions
         WHERE user_id = ? AND phase = 'work' AND status = 'completed'",
        [&session.user_id],
        |r| r.get(0),
    )?;
    let next = next_phase(session.phase, completed_work, long_break_every);
    info!(session_id = %session.id, next = next.as_str(), "pomodoro completed");
    Ok((session, next))
}

pub fn interrupt_session(
    conn: &Connection,
    session_id: &str,
    reason: &str,
    at: Option<&str>,
) -> AppResult<Session> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::validation("reason must not be empty"));
    }
    let tx = conn.unchecked_transaction()?;
    let session = transition(&tx, session_id, Transition::Interrupt, at)?;
    tx.execute(
        "INSERT INTO pomodoro_interruptions(id, session_id, reason, occurred_at) VALUES(?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &session.id,
            reason,
            session.ended_at.as_deref().unwrap_or(session.started_at.as_str()),
        ),
    )?;
    tx.commit()?;
    Ok(session)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonCount {
    pub reason: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroStats {
    pub total_sessions: i64,
    pub completed_sessions: i64,
    pub interrupted_sessions: i64,
    pub completed_work_sessions: i64,
    pub focus_minutes: f64,
    pub interruption_reasons: Vec<ReasonCount>,
}

pub fn stats(conn: &Connection, user_id: &str, lesson_id: Option<&str>) -> AppResult<PomodoroStats> {
    require_user(conn, user_id)?;
    let (total, completed, interrupted, completed_work, focus_seconds): (i64, i64, i64, i64, i64) =
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'completed'), 0),
                    COALESCE(SUM(status = 'interrupted'), 0),
                    COALESCE(SUM(status = 'completed' AND phase = 'work'), 0),
                    COALESCE(SUM(CASE WHEN status = 'completed' AND phase = 'work'
                                      THEN elapsed_seconds ELSE 0 END), 0)
             FROM pomodoro_sessions
             WHERE user_id = ?1 AND (?2 IS NULL OR lesson_id = ?2)",
            (user_id, lesson_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )?;

    let mut stmt = conn.prepare(
        "SELECT i.reason, COUNT(*)
         FROM pomodoro_interruptions i
         JOIN pomodoro_sessions s ON s.id = i.session_id
         WHERE s.user_id = ?1 AND (?2 IS NULL OR s.lesson_id = ?2)
         GROUP BY i.reason
         ORDER BY COUNT(*) DESC, i.reason",
    )?;
    let interruption_reasons = stmt
        .query_map((user_id, lesson_id), |r| {
            Ok(ReasonCount {
                reason: r.get(0)?,
                count: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PomodoroStats {
        total_sessions: total,
        completed_sessions: completed,
        interrupted_sessions: interrupted,
        completed_work_sessions: completed_work,
        focus_minutes: crate::calc::round_2_decimals(focus_seconds as f64 / 60.0),
        interruption_reasons,
    })
}
