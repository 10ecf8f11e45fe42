use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{StageClient, StageRegistry, StageRequest, StageResponse};
use crate::error::StageFailure;
use crate::state_machine::Stage;

/// A local stage that answers immediately with a canned output.
///
/// Used by `conductor demo` and by tests that only care about the control flow.
pub struct StubStage {
    stage: Stage,
    valid: bool,
    output: Option<Value>,
}

impl StubStage {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            valid: true,
            output: None,
        }
    }

    /// A validation stub that returns a negative verdict.
    pub fn rejecting(stage: Stage) -> Self {
        Self {
            valid: false,
            ..Self::new(stage)
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    /// A registry with a stub for every pipeline stage.
    pub fn registry(reject: bool) -> StageRegistry {
        Stage::PIPELINE
            .into_iter()
            .fold(StageRegistry::new(), |registry, stage| {
                let stub = if reject && stage == Stage::Validation {
                    StubStage::rejecting(stage)
                } else {
                    StubStage::new(stage)
                };
                registry.register(stage, Arc::new(stub))
            })
    }

    fn canned_output(&self, request: &StageRequest) -> Value {
        let mut output = json!({
            "stage": self.stage.name(),
            "summary": format!("{} for: {}", self.stage, request.original_request),
            "inputs": request.prior_stage_outputs.len(),
        });
        if self.stage == Stage::Validation && !self.valid {
            output["issues"] = json!(["stub validator rejected the artifacts"]);
        }
        output
    }
}

#[async_trait]
impl StageClient for StubStage {
    async fn invoke(&self, request: &StageRequest) -> Result<StageResponse, StageFailure> {
        if request.stage_name != self.stage {
            return Err(StageFailure::fatal(format!(
                "stub for {} cannot serve {}",
                self.stage, request.stage_name
            )));
        }
        let output = self
            .output
            .clone()
            .unwrap_or_else(|| self.canned_output(request));
        Ok(StageResponse {
            stage_name: self.stage,
            output,
            validity_flag: (self.stage == Stage::Validation).then_some(self.valid),
        })
    }
}
