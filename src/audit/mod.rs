//! Durable log of every stage attempt.
//!
//! Every attempt is written twice: [`AuditRecorder::record_start`] stores an
//! incomplete record before the stage is called, and
//! [`AuditRecorder::record_complete`] fills in the response and outcome once
//! the call resolves. A crash between the two leaves a started-but-incomplete
//! record behind instead of nothing.
//!
//! Storage sits behind the [`AuditStore`] trait. [`MemoryAuditStore`] keeps
//! records in process; [`FileAuditStore`] writes one JSON file per attempt.

mod file;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{FailureKind, StageFailure};
use crate::state_machine::{Job, Stage};

pub use file::FileAuditStore;
pub use memory::MemoryAuditStore;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("attempt {attempt} of {stage} for job {job_id} was never started")]
    MissingAttempt {
        job_id: String,
        stage: Stage,
        attempt: u32,
    },

    #[error("attempt {attempt} of {stage} for job {job_id} is already recorded")]
    DuplicateAttempt {
        job_id: String,
        stage: Stage,
        attempt: u32,
    },

    #[error("invalid job id: {0:?}")]
    InvalidJobId(String),

    #[error("audit store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    FatalFailure,
}

impl From<FailureKind> for AttemptOutcome {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Transient => AttemptOutcome::TransientFailure,
            FailureKind::Fatal => AttemptOutcome::FatalFailure,
        }
    }
}

/// Identity of one attempt: `(job_id, stage_name, attempt_number)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    pub job_id: String,
    pub stage_name: Stage,
    pub attempt_number: u32,
}

/// One attempt to run one stage for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInvocationRecord {
    pub job_id: String,
    pub stage_name: Stage,
    pub attempt_number: u32,
    pub request_payload: Value,
    /// `None` until the attempt resolves.
    pub response_payload: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<AttemptOutcome>,
}

impl StageInvocationRecord {
    pub fn key(&self) -> AttemptKey {
        AttemptKey {
            job_id: self.job_id.clone(),
            stage_name: self.stage_name,
            attempt_number: self.attempt_number,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    pub(crate) fn apply(&mut self, completion: AttemptCompletion) {
        self.response_payload = Some(completion.response_payload);
        self.outcome = Some(completion.outcome);
        self.completed_at = Some(completion.completed_at);
    }
}

/// The second half of the double write.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptCompletion {
    pub response_payload: Value,
    pub outcome: AttemptOutcome,
    pub completed_at: DateTime<Utc>,
}

/// Storage backend for attempt records and job snapshots.
///
/// Writes for distinct `(job_id, stage_name, attempt_number)` keys must be
/// safe to issue concurrently.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Store a new, incomplete attempt record.
    async fn insert_attempt(&self, record: StageInvocationRecord) -> Result<(), AuditError>;

    /// Complete a previously inserted attempt record in place.
    async fn complete_attempt(
        &self,
        key: &AttemptKey,
        completion: AttemptCompletion,
    ) -> Result<StageInvocationRecord, AuditError>;

    /// All attempts of a job, oldest first.
    async fn attempts(&self, job_id: &str) -> Result<Vec<StageInvocationRecord>, AuditError>;

    async fn save_job(&self, job: &Job) -> Result<(), AuditError>;

    async fn load_job(&self, job_id: &str) -> Result<Option<Job>, AuditError>;
}

/// The controller's handle on the audit store.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Write the incomplete record for an attempt that is about to run.
    pub async fn record_start<T: Serialize>(
        &self,
        job_id: &str,
        stage_name: Stage,
        attempt_number: u32,
        request: &T,
    ) -> Result<AttemptKey, AuditError> {
        let record = StageInvocationRecord {
            job_id: job_id.to_string(),
            stage_name,
            attempt_number,
            request_payload: serde_json::to_value(request)?,
            response_payload: None,
            started_at: Utc::now(),
            completed_at: None,
            outcome: None,
        };
        let key = record.key();
        self.store.insert_attempt(record).await?;
        Ok(key)
    }

    /// Fill in the response and outcome of a started attempt.
    pub async fn record_complete<T: Serialize>(
        &self,
        key: &AttemptKey,
        result: &Result<T, StageFailure>,
    ) -> Result<StageInvocationRecord, AuditError> {
        let (response_payload, outcome) = match result {
            Ok(response) => (serde_json::to_value(response)?, AttemptOutcome::Success),
            Err(failure) => (serde_json::to_value(failure)?, failure.kind.into()),
        };
        let completion = AttemptCompletion {
            response_payload,
            outcome,
            completed_at: Utc::now(),
        };
        self.store.complete_attempt(key, completion).await
    }

    pub async fn attempts(&self, job_id: &str) -> Result<Vec<StageInvocationRecord>, AuditError> {
        self.store.attempts(job_id).await
    }

    pub async fn save_job(&self, job: &Job) -> Result<(), AuditError> {
        self.store.save_job(job).await
    }

    pub async fn load_job(&self, job_id: &str) -> Result<Option<Job>, AuditError> {
        self.store.load_job(job_id).await
    }
}
