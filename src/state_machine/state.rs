use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::job::{Job, JobStatus, TerminalDetail};
use crate::error::{ConductorError, FailureKind};

/// The stages of the conductor pipeline.
///
/// Each job flows through:
/// INTAKE → REQUIREMENTS → CODE_GENERATION → ARCHITECTURE → VALIDATION → [gate] → DEPLOYMENT → DONE,
/// or VALIDATION → [gate] → REJECTED when the validation verdict is negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intake,
    Requirements,
    CodeGeneration,
    Architecture,
    Validation,
    Deployment,
    Done,
    Rejected,
}

impl Stage {
    /// The stages that invoke a stage client, in execution order.
    pub const PIPELINE: [Stage; 5] = [
        Stage::Requirements,
        Stage::CodeGeneration,
        Stage::Architecture,
        Stage::Validation,
        Stage::Deployment,
    ];

    /// Wire name used in stage requests, audit keys and config tables.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Requirements => "requirements",
            Stage::CodeGeneration => "code_generation",
            Stage::Architecture => "architecture",
            Stage::Validation => "validation",
            Stage::Deployment => "deployment",
            Stage::Done => "done",
            Stage::Rejected => "rejected",
        }
    }

    pub fn from_name(name: &str) -> Option<Stage> {
        [
            Stage::Intake,
            Stage::Requirements,
            Stage::CodeGeneration,
            Stage::Architecture,
            Stage::Validation,
            Stage::Deployment,
            Stage::Done,
            Stage::Rejected,
        ]
        .into_iter()
        .find(|stage| stage.name() == name)
    }

    pub fn is_pipeline_stage(self) -> bool {
        Self::PIPELINE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Rejected)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Intake => write!(f, "INTAKE"),
            Stage::Requirements => write!(f, "REQUIREMENTS"),
            Stage::CodeGeneration => write!(f, "CODE_GENERATION"),
            Stage::Architecture => write!(f, "ARCHITECTURE"),
            Stage::Validation => write!(f, "VALIDATION"),
            Stage::Deployment => write!(f, "DEPLOYMENT"),
            Stage::Done => write!(f, "DONE"),
            Stage::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// What happened at the job's current stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    /// The job was accepted at intake.
    Accepted,
    /// A non-validation stage succeeded and its output is recorded.
    Succeeded,
    /// The validation stage succeeded with a verdict.
    Validated { valid: bool, details: Value },
    /// The stage failed unrecoverably.
    Failed { kind: FailureKind, message: String },
}

/// The result of evaluating a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Advance to the next stage.
    Next(Stage),
    /// The job reached a terminal status.
    Complete(JobStatus),
}

/// Drives a `Job` through the stage transition table.
pub struct StateMachine;

impl StateMachine {
    /// Compute and apply the next transition for the given job.
    ///
    /// - `Accepted` moves INTAKE to the first pipeline stage.
    /// - `Succeeded` advances a pipeline stage whose output is already recorded;
    ///   DEPLOYMENT completes the job.
    /// - `Validated` is only legal in VALIDATION: a positive verdict opens the
    ///   gate to DEPLOYMENT, a negative one ends the job as rejected.
    /// - `Failed` ends the job at the failing stage.
    ///
    /// Anything else is an invalid transition and leaves the job untouched.
    pub fn next(job: &mut Job, event: StageEvent) -> Result<Transition, ConductorError> {
        let from = job.current_stage;
        if job.status != JobStatus::Running {
            return Err(ConductorError::InvalidTransition {
                from,
                reason: format!("job is already {}", job.status),
            });
        }

        let needs_output = matches!(
            event,
            StageEvent::Succeeded | StageEvent::Validated { .. }
        );
        if needs_output && job.output(from).is_none() {
            return Err(ConductorError::InvalidTransition {
                from,
                reason: "stage output was not recorded".into(),
            });
        }

        let (transition, detail) = match (from, event) {
            (Stage::Intake, StageEvent::Accepted) => (Transition::Next(Stage::Requirements), None),
            (Stage::Requirements, StageEvent::Succeeded) => {
                (Transition::Next(Stage::CodeGeneration), None)
            }
            (Stage::CodeGeneration, StageEvent::Succeeded) => {
                (Transition::Next(Stage::Architecture), None)
            }
            (Stage::Architecture, StageEvent::Succeeded) => {
                (Transition::Next(Stage::Validation), None)
            }
            (Stage::Validation, StageEvent::Validated { valid: true, .. }) => {
                (Transition::Next(Stage::Deployment), None)
            }
            (Stage::Validation, StageEvent::Validated { valid: false, details }) => (
                Transition::Complete(JobStatus::ValidationRejected),
                Some(TerminalDetail::Rejected { details }),
            ),
            (Stage::Deployment, StageEvent::Succeeded) => {
                (Transition::Complete(JobStatus::Succeeded), None)
            }
            (stage, StageEvent::Failed { kind, message }) if stage.is_pipeline_stage() => (
                Transition::Complete(JobStatus::Failed),
                Some(TerminalDetail::Failed {
                    stage,
                    kind,
                    message,
                }),
            ),
            (from, event) => {
                return Err(ConductorError::InvalidTransition {
                    from,
                    reason: format!("unexpected event {event:?}"),
                });
            }
        };

        job.state_history.push(from);
        match &transition {
            Transition::Next(next_stage) => {
                job.current_stage = *next_stage;
            }
            Transition::Complete(status) => {
                job.status = *status;
                job.detail = detail;
                match status {
                    JobStatus::Succeeded => job.current_stage = Stage::Done,
                    JobStatus::ValidationRejected => job.current_stage = Stage::Rejected,
                    // The failing stage stays current so status queries can name it.
                    JobStatus::Failed | JobStatus::Running => {}
                }
            }
        }
        job.touch();

        Ok(transition)
    }
}
