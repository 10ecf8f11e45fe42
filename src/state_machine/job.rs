use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::state::Stage;
use crate::error::{ConductorError, FailureKind};

/// Tracks the lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
    ValidationRejected,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        self != JobStatus::Running
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Succeeded => write!(f, "SUCCEEDED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::ValidationRejected => write!(f, "VALIDATION_REJECTED"),
        }
    }
}

/// Output of one successful stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub stage: Stage,
    pub output: Value,
}

/// Why a job ended in a non-success terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalDetail {
    /// The stage that failed and the class of its last error.
    Failed {
        stage: Stage,
        kind: FailureKind,
        message: String,
    },
    /// The validation stage's own rejection details.
    Rejected { details: Value },
}

impl std::fmt::Display for TerminalDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalDetail::Failed {
                stage,
                kind,
                message,
            } => write!(f, "{stage} failed ({kind}): {message}"),
            TerminalDetail::Rejected { details } => write!(f, "validation rejected: {details}"),
        }
    }
}

/// One end-to-end run of the pipeline for a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub original_request: String,
    pub current_stage: Stage,
    /// Insertion order is execution order.
    pub stage_outputs: Vec<StageOutput>,
    pub status: JobStatus,
    pub detail: Option<TerminalDetail>,
    pub state_history: Vec<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(original_request: impl Into<String>) -> Self {
        let original_request = original_request.into();
        let id = generate_job_id(&original_request);
        Self::with_id(id, original_request)
    }

    pub fn with_id(id: impl Into<String>, original_request: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            original_request: original_request.into(),
            current_stage: Stage::Intake,
            stage_outputs: Vec::new(),
            status: JobStatus::Running,
            detail: None,
            state_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append the output of the current stage.
    ///
    /// Outputs are append-only and only the stage the job is sitting on may
    /// record one, which keeps `stage_outputs` in pipeline order with no gaps.
    pub fn record_output(&mut self, stage: Stage, output: Value) -> Result<(), ConductorError> {
        if stage != self.current_stage || !stage.is_pipeline_stage() {
            return Err(ConductorError::InvalidTransition {
                from: self.current_stage,
                reason: format!("cannot record output for {stage}"),
            });
        }
        if self.output(stage).is_some() {
            return Err(ConductorError::InvalidTransition {
                from: self.current_stage,
                reason: format!("output for {stage} already recorded"),
            });
        }
        self.stage_outputs.push(StageOutput { stage, output });
        self.touch();
        Ok(())
    }

    pub fn output(&self, stage: Stage) -> Option<&Value> {
        self.stage_outputs
            .iter()
            .find(|entry| entry.stage == stage)
            .map(|entry| &entry.output)
    }

    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.id.clone(),
            status: self.status,
            current_stage: self.current_stage,
            stage_outputs: self.stage_outputs.clone(),
            detail: self.detail.clone(),
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub current_stage: Stage,
    pub stage_outputs: Vec<StageOutput>,
    pub detail: Option<TerminalDetail>,
}

/// Final record returned by the controller when a job terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub status: JobStatus,
    pub final_stage: Stage,
    pub stage_outputs: Vec<StageOutput>,
    pub detail: Option<TerminalDetail>,
    pub state_transitions: Vec<Stage>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl JobReport {
    /// A terminal job is reported as of its last transition, so a report
    /// rebuilt later from a snapshot matches the one produced at the time.
    pub fn from_job(job: &Job) -> Self {
        let completed_at = if job.status.is_terminal() {
            job.updated_at
        } else {
            Utc::now()
        };
        let mut transitions = job.state_history.clone();
        transitions.push(job.current_stage);

        Self {
            job_id: job.id.clone(),
            status: job.status,
            final_stage: job.current_stage,
            stage_outputs: job.stage_outputs.clone(),
            detail: job.detail.clone(),
            state_transitions: transitions,
            started_at: job.created_at,
            completed_at,
            duration_ms: (completed_at - job.created_at).num_milliseconds(),
        }
    }
}

const STOP_WORDS: &[&str] = &[
    "i", "want", "need", "would", "like", "create", "build", "make", "generate", "develop",
    "design", "implement", "a", "an", "the", "to", "for", "with", "that", "can", "could",
    "should", "will", "agent", "system", "application", "app", "service", "tool",
];

const MAX_KEYWORD_LEN: usize = 20;

/// Generate a job id of the form `job-{keyword}-{YYYYMMDD-HHMMSS}-{suffix}`.
pub fn generate_job_id(request: &str) -> String {
    let keyword = extract_keyword(request);
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("job-{keyword}-{timestamp}-{}", &suffix[..8])
}

/// First meaningful word of the request, lowercased and truncated.
pub fn extract_keyword(request: &str) -> String {
    let words: Vec<String> = request
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect();

    let keyword = words
        .iter()
        .find(|w| w.len() >= 3 && !STOP_WORDS.contains(&w.as_str()))
        .or_else(|| words.first())
        .map(String::as_str)
        .unwrap_or("agent");

    keyword.chars().take(MAX_KEYWORD_LEN).collect()
}
