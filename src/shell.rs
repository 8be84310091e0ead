//! The shell boundary: exactly two operations, each answered with a
//! determinate success-or-error envelope. Nothing here panics on a failed
//! subsystem; every fault is folded into the envelope.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::capture::CaptureStore;
use crate::error::CoreError;
use crate::orchestrator::Orchestrator;
use crate::types::{CaptureRecord, TurnOutcome, TurnRequest};

/// The response envelope handed across the shell boundary.
/// Exactly one of `data` and `error` is present.
#[derive(Debug, Serialize)]
pub struct ShellResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ShellResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(err: &CoreError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.user_message()),
        }
    }
}

#[derive(Clone)]
pub struct Shell {
    orchestrator: Arc<Orchestrator>,
    captures: Arc<CaptureStore>,
}

impl Shell {
    pub fn new(orchestrator: Arc<Orchestrator>, captures: Arc<CaptureStore>) -> Self {
        Self {
            orchestrator,
            captures,
        }
    }

    /// Take one screenshot on demand.
    pub async fn capture_now(&self) -> ShellResponse<CaptureRecord> {
        match self.captures.capture().await {
            Ok(record) => ShellResponse::ok(record),
            Err(e) => {
                warn!("capture_now failed: {}", e);
                ShellResponse::err(&e)
            }
        }
    }

    /// Run one conversation turn.
    pub async fn send_message(&self, request: TurnRequest) -> ShellResponse<TurnOutcome> {
        match self.orchestrator.handle_turn(&request).await {
            Ok(outcome) => ShellResponse::ok(outcome),
            Err(e) => {
                warn!("send_message failed: {}", e);
                ShellResponse::err(&e)
            }
        }
    }
}
