//! Rate-limited, audited orchestration of a five-stage agent pipeline.
//!
//! A request enters at INTAKE and moves through REQUIREMENTS,
//! CODE_GENERATION, ARCHITECTURE, VALIDATION and DEPLOYMENT. Every stage call
//! passes through a process-wide [`rate_limiter::RateLimiter`], is retried by
//! [`retry::RetryPolicy`] on transient failures, and leaves a double-written
//! record in the [`audit`] store.

pub mod audit;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod rate_limiter;
pub mod retry;
pub mod stage;
pub mod state_machine;
pub mod telemetry;

pub use error::{ConductorError, FailureKind, StageFailure};
pub use orchestrator::{Orchestrator, PipelineSettings};
