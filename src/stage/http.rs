//! Cliente HTTP para estágios remotos.
//!
//! Envia o [`StageRequest`] como JSON via POST para o endpoint configurado e
//! lê um [`StageResponse`] JSON. Erros são classificados para a política de
//! retentativa:
//! - HTTP 408, 429 e 5xx, falhas de conexão e timeouts são transitórios;
//! - demais 4xx (payload inválido, autenticação) e corpo ilegível são fatais.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::{StageClient, StageRegistry, StageRequest, StageResponse};
use crate::config::ConductorConfig;
use crate::error::{ConductorError, StageFailure};
use crate::state_machine::Stage;

pub struct HttpStageClient {
    stage: Stage,
    endpoint: String,
    token: Option<String>,
    client: Client,
}

impl HttpStageClient {
    /// `timeout` bounds the whole request; the orchestrator applies its own
    /// stage timeout on top.
    pub fn new(
        stage: Stage,
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ConductorError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            stage,
            endpoint: endpoint.into(),
            token: token.filter(|t| !t.is_empty()),
            client,
        })
    }

    /// Build a registry with one HTTP client per pipeline stage from the
    /// `[stages]` table of the config.
    pub fn registry(config: &ConductorConfig) -> Result<StageRegistry, ConductorError> {
        let token = Some(config.stage_token.clone());
        let mut registry = StageRegistry::new();
        for stage in Stage::PIPELINE {
            let endpoint = config.stage_endpoint(stage).ok_or_else(|| {
                ConductorError::Config(format!(
                    "no endpoint configured for stage `{}`",
                    stage.name()
                ))
            })?;
            let client = Self::new(stage, endpoint, token.clone(), config.stage_timeout())?;
            registry = registry.register(stage, Arc::new(client));
        }
        Ok(registry)
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }
}

#[async_trait]
impl StageClient for HttpStageClient {
    async fn invoke(&self, request: &StageRequest) -> Result<StageResponse, StageFailure> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(classify_status(status, &body, retry_after));
        }

        response
            .json::<StageResponse>()
            .await
            .map_err(|e| StageFailure::fatal(format!("unreadable stage response: {e}")))
    }
}

fn classify_status(status: StatusCode, body: &str, retry_after: Option<u64>) -> StageFailure {
    let mut message = format!("HTTP {}: {body}", status.as_u16());
    if let Some(secs) = retry_after {
        message.push_str(&format!(" (retry after {secs}s)"));
    }

    let transient = status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error();
    if transient {
        StageFailure::transient(message)
    } else {
        StageFailure::fatal(message)
    }
}

fn classify_transport(err: reqwest::Error) -> StageFailure {
    if err.is_builder() {
        StageFailure::fatal(format!("invalid stage request: {err}"))
    } else {
        StageFailure::transient(format!("network error: {err}"))
    }
}
