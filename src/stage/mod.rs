//! The uniform stage invocation boundary.
//!
//! Every specialist stage is reached through [`StageClient::invoke`]. The
//! orchestrator holds clients in a [`StageRegistry`] and never needs to know
//! which concrete client serves which stage.

mod http;
mod stub;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConductorError, StageFailure};
use crate::state_machine::{Job, Stage, StageOutput};

pub use http::HttpStageClient;
pub use stub::StubStage;

/// What a stage receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRequest {
    pub job_id: String,
    pub stage_name: Stage,
    pub original_request: String,
    pub prior_stage_outputs: Vec<StageOutput>,
}

impl StageRequest {
    /// Build the request for `stage` from the job's request and everything
    /// produced so far.
    pub fn for_job(job: &Job, stage: Stage) -> Self {
        Self {
            job_id: job.id.clone(),
            stage_name: stage,
            original_request: job.original_request.clone(),
            prior_stage_outputs: job.stage_outputs.clone(),
        }
    }
}

/// What a stage answers on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResponse {
    pub stage_name: Stage,
    pub output: Value,
    /// Only meaningful for the validation stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_flag: Option<bool>,
}

#[async_trait]
pub trait StageClient: Send + Sync {
    async fn invoke(&self, request: &StageRequest) -> Result<StageResponse, StageFailure>;
}

/// Maps each pipeline stage to the client that serves it.
#[derive(Clone, Default)]
pub struct StageRegistry {
    clients: HashMap<Stage, Arc<dyn StageClient>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, stage: Stage, client: Arc<dyn StageClient>) -> Self {
        self.clients.insert(stage, client);
        self
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageClient>> {
        self.clients.get(&stage).cloned()
    }

    /// Fails on the first pipeline stage without a client.
    pub fn ensure_complete(&self) -> Result<(), ConductorError> {
        match Stage::PIPELINE
            .into_iter()
            .find(|stage| !self.clients.contains_key(stage))
        {
            Some(missing) => Err(ConductorError::MissingStage(missing)),
            None => Ok(()),
        }
    }
}
