// Core error kinds, surfaced to HTTP and socket boundaries by the
// interface_adapters layer. Plain enum with a hand-written Display, matching
// the teacher's error style (no thiserror/anyhow in this dependency graph).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    Validation(String),
    Authentication(String),
    Authorization(String),
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    RateLimit(String),
    Internal(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, message) = match self {
            CoreError::Validation(m) => ("validation", m),
            CoreError::Authentication(m) => ("authentication", m),
            CoreError::Authorization(m) => ("authorization", m),
            CoreError::NotFound(m) => ("not_found", m),
            CoreError::Conflict(m) => ("conflict", m),
            CoreError::BadRequest(m) => ("bad_request", m),
            CoreError::RateLimit(m) => ("rate_limit", m),
            CoreError::Internal(m) => ("internal", m),
        };
        write!(f, "{kind}: {message}")
    }
}

impl std::error::Error for CoreError {}

impl CoreError {
    // Generic message shown to clients in production; full detail is only
    // logged server-side via `tracing`.
    pub fn public_message(&self, dev_mode: bool) -> String {
        if dev_mode {
            self.to_string()
        } else {
            match self {
                CoreError::Internal(_) => "an unexpected error occurred".to_string(),
                other => other.to_string(),
            }
        }
    }
}
