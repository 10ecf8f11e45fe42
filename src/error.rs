use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::AuditError;
use crate::state_machine::Stage;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Request must not be empty")]
    EmptyRequest,

    #[error("Job {job_id} is not in INTAKE (current stage: {stage})")]
    NotAtIntake { job_id: String, stage: Stage },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {0} stopped before reporting a result")]
    Aborted(String),

    #[error("No stage client registered for {0}")]
    MissingStage(Stage),

    #[error("Invalid transition from {from}: {reason}")]
    InvalidTransition { from: Stage, reason: String },

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Classifies a stage failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network errors, throttling, timeouts. Retryable.
    Transient,
    /// Malformed payloads, permanent auth failures, exhausted retries.
    Fatal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "TRANSIENT"),
            FailureKind::Fatal => write!(f, "FATAL"),
        }
    }
}

/// A classified failure returned by a stage call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} failure: {message}")]
pub struct StageFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StageFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}
