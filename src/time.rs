use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::error::AppError;

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| AppError::validation(format!("invalid timestamp {raw:?}: {e}")))
}

pub fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Due dates are either a calendar date or a full RFC 3339 timestamp.
pub fn normalize_due_date(raw: &str) -> Result<String, AppError> {
    let t = raw.trim();
    if NaiveDate::parse_from_str(t, "%Y-%m-%d").is_ok() {
        return Ok(t.to_string());
    }
    parse_instant(t).map(format_instant).map_err(|_| {
        AppError::validation(format!(
            "dueDate must be YYYY-MM-DD or an RFC 3339 timestamp, got {t:?}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_dates_accept_both_shapes() {
        assert_eq!(normalize_due_date(" 2026-03-01 ").expect("date"), "2026-03-01");
        assert_eq!(
            normalize_due_date("2026-03-01T10:00:00+02:00").expect("ts"),
            "2026-03-01T08:00:00Z"
        );
        assert!(normalize_due_date("next week").is_err());
    }
}
