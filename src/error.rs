use std::fmt;

use crate::utils::truncate_str;

/// Classified core error. Tells the caller *which* subsystem failed and
/// whether the condition is worth retrying, so the shell can pick a
/// recovery strategy instead of pattern-matching on strings.
#[derive(Debug)]
pub struct CoreError {
    pub kind: ErrorKind,
    /// HTTP status when the failure came off the model endpoint.
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Backing store unreachable or unwritable. Fatal to the operation;
    /// the process continues.
    Storage,
    /// Invariant violation (dangling conversation id, invalid role).
    /// Rejected at the boundary, never coerced.
    Constraint,
    /// Screen grab or capture-file write failed. Retryable; must never
    /// crash the capture scheduler.
    Capture,
    /// Model endpoint unreachable during initialize/list. Generation stays
    /// unavailable until a later initialize succeeds.
    Connection,
    /// Generation attempted before a successful initialize.
    NotReady,
    /// Transport, timeout, or malformed response during a generation call.
    /// The turn fails; prior conversation state is preserved.
    Generation,
}

impl CoreError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Storage,
            status: None,
            message: message.into(),
        }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Constraint,
            status: None,
            message: message.into(),
        }
    }

    pub fn capture(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Capture,
            status: None,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Connection,
            status: None,
            message: message.into(),
        }
    }

    pub fn not_ready() -> Self {
        Self {
            kind: ErrorKind::NotReady,
            status: None,
            message: "generation client not initialized".to_string(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Generation,
            status: None,
            message: message.into(),
        }
    }

    /// Generation failure from a non-success HTTP status, body truncated
    /// for log and envelope hygiene.
    pub fn generation_status(status: u16, body: &str) -> Self {
        Self {
            kind: ErrorKind::Generation,
            status: Some(status),
            message: truncate_str(body, 300),
        }
    }

    /// Classify a reqwest failure on the generate path.
    pub fn generation_network(err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else {
            err.to_string()
        };
        Self {
            kind: ErrorKind::Generation,
            status: None,
            message,
        }
    }

    /// Classify a reqwest failure on the initialize/list path.
    pub fn connection_network(err: &reqwest::Error) -> Self {
        Self {
            kind: ErrorKind::Connection,
            status: None,
            message: err.to_string(),
        }
    }

    /// Whether this error is worth retrying with the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Capture | ErrorKind::Connection | ErrorKind::Generation
        )
    }

    /// User-facing summary suitable for the shell envelope.
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::Storage => {
                format!("Memory store error: {}", self.message)
            }
            ErrorKind::Constraint => format!("Invalid request: {}", self.message),
            ErrorKind::Capture => {
                format!("Screen capture failed: {}", self.message)
            }
            ErrorKind::Connection => {
                "Cannot reach the local model endpoint. Is the model server running?".to_string()
            }
            ErrorKind::NotReady => {
                "The model connection is not ready yet. Try again in a moment.".to_string()
            }
            ErrorKind::Generation => {
                "The model failed to produce a reply. Your message was saved; try again."
                    .to_string()
            }
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "{:?} error ({}): {}", self.kind, status, self.message)
        } else {
            write!(f, "{:?} error: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind as SqlxKind;

        if let sqlx::Error::Database(db) = &err {
            match db.kind() {
                SqlxKind::ForeignKeyViolation
                | SqlxKind::CheckViolation
                | SqlxKind::NotNullViolation
                | SqlxKind::UniqueViolation => {
                    return CoreError::constraint(db.message().to_string());
                }
                _ => {}
            }
        }
        CoreError::storage(err.to_string())
    }
}
