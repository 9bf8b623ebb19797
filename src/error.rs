use serde_json::json;
use thiserror::Error;

/// Failure kinds surfaced by the service layer.
///
/// Each kind maps to a stable wire code plus the HTTP-equivalent status the
/// desktop shell uses when it needs one.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("select a workspace first")]
    NoWorkspace,

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        AppError::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{what} not found"))
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "bad_params",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::NoWorkspace => "no_workspace",
            AppError::Db(_) => "db_query_failed",
            AppError::Io(_) => "io_failed",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            AppError::Validation { .. } | AppError::NoWorkspace => 400,
            AppError::NotFound(_) => 404,
            AppError::Conflict(_) => 409,
            AppError::Db(_) | AppError::Io(_) | AppError::Internal(_) => 500,
        }
    }

    /// Error details for the wire, always carrying `status`.
    pub fn details(&self) -> serde_json::Value {
        let mut details = match self {
            AppError::Validation {
                details: Some(d), ..
            } => d.clone(),
            _ => json!({}),
        };
        if !details.is_object() {
            details = json!({ "value": details });
        }
        details["status"] = json!(self.status());
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_codes_and_statuses() {
        assert_eq!(AppError::validation("x").code(), "bad_params");
        assert_eq!(AppError::validation("x").status(), 400);
        assert_eq!(AppError::not_found("lesson").status(), 404);
        assert_eq!(AppError::not_found("lesson").to_string(), "lesson not found");
        assert_eq!(AppError::Conflict("dup".into()).code(), "conflict");
        assert_eq!(AppError::Conflict("dup".into()).status(), 409);
        let db = AppError::from(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(db.code(), "db_query_failed");
        assert_eq!(db.status(), 500);
    }

    #[test]
    fn details_keep_validation_payload() {
        let e = AppError::validation_with("weight out of range", json!({ "weight": 120.0 }));
        let d = e.details();
        assert_eq!(d["weight"], json!(120.0));
        assert_eq!(d["status"], json!(400));
    }
}
