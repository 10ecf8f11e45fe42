use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::audit::{AuditError, AuditRecorder, AuditStore};
use crate::config::ConductorConfig;
use crate::error::{ConductorError, FailureKind, StageFailure};
use crate::rate_limiter::RateLimiter;
use crate::retry::{Classify, RetryError, RetryPolicy};
use crate::stage::{StageClient, StageRegistry, StageRequest, StageResponse};
use crate::state_machine::{
    Job, JobReport, JobStatus, JobStatusView, Stage, StageEvent, StateMachine,
};

/// Per-stage execution knobs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub retry: RetryPolicy,
    /// Bound on a single stage call. Expiry counts as a transient failure.
    pub stage_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            stage_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&ConductorConfig> for PipelineSettings {
    fn from(config: &ConductorConfig) -> Self {
        Self {
            retry: config.retry_policy(),
            stage_timeout: config.stage_timeout(),
        }
    }
}

/// Why a single attempt failed. Losing the audit trail is never retried.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Stage(#[from] StageFailure),

    #[error("audit write failed: {0}")]
    Audit(#[from] AuditError),
}

impl Classify for AttemptError {
    fn kind(&self) -> FailureKind {
        match self {
            AttemptError::Stage(failure) => failure.kind,
            AttemptError::Audit(_) => FailureKind::Fatal,
        }
    }
}

type JobHandle = JoinHandle<Result<JobReport, ConductorError>>;

/// Drives jobs through the stage pipeline.
///
/// One orchestrator serves every job of the process. Each job runs its
/// stages strictly one after another; distinct jobs run concurrently and only
/// meet at the shared [`RateLimiter`].
pub struct Orchestrator {
    stages: StageRegistry,
    limiter: Arc<RateLimiter>,
    recorder: AuditRecorder,
    settings: PipelineSettings,
    /// Latest state of the jobs still running in this process.
    jobs: RwLock<HashMap<String, JobStatusView>>,
    running: Mutex<HashMap<String, JobHandle>>,
}

impl Orchestrator {
    pub fn new(
        stages: StageRegistry,
        limiter: Arc<RateLimiter>,
        recorder: AuditRecorder,
        settings: PipelineSettings,
    ) -> Result<Self, ConductorError> {
        stages.ensure_complete()?;
        Ok(Self {
            stages,
            limiter,
            recorder,
            settings,
            jobs: RwLock::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
        })
    }

    /// Build an orchestrator with its own rate limiter from the config.
    pub fn from_config(
        config: &ConductorConfig,
        stages: StageRegistry,
        store: Arc<dyn AuditStore>,
    ) -> Result<Self, ConductorError> {
        Self::new(
            stages,
            Arc::new(RateLimiter::new(config.min_interval())),
            AuditRecorder::new(store),
            PipelineSettings::from(config),
        )
    }

    pub fn recorder(&self) -> &AuditRecorder {
        &self.recorder
    }

    /// Accept a request and start running it in the background.
    ///
    /// Returns once the job is durably recorded at intake. Completion is
    /// observable through [`get_status`](Self::get_status) and
    /// [`wait`](Self::wait).
    pub async fn submit(
        self: &Arc<Self>,
        original_request: impl Into<String>,
    ) -> Result<String, ConductorError> {
        let job = Job::new(original_request);
        self.accept(&job).await?;

        let job_id = job.id.clone();
        let span = info_span!("job", job_id = %job_id);
        let this = Arc::clone(self);
        let id = job_id.clone();

        // The task removes its own handle when it ends; holding the lock until
        // the insert keeps that removal from running first.
        let mut running = self.running.lock().await;
        let handle = tokio::spawn(
            async move {
                let report = this.drive(job).await;
                this.running.lock().await.remove(&id);
                report
            }
            .instrument(span),
        );
        running.insert(job_id.clone(), handle);
        Ok(job_id)
    }

    /// Run a job at INTAKE to a terminal status on the current task.
    ///
    /// Every terminal status (including FAILED) is an `Ok` report; `Err` means
    /// the job could not be accepted or the transition table was violated.
    pub async fn run(&self, job: Job) -> Result<JobReport, ConductorError> {
        self.accept(&job).await?;
        let span = info_span!("job", job_id = %job.id);
        self.drive(job).instrument(span).await
    }

    /// Wait for a submitted job to finish.
    ///
    /// A job whose task already ended is answered from its persisted snapshot.
    pub async fn wait(&self, job_id: &str) -> Result<JobReport, ConductorError> {
        let handle = self.running.lock().await.remove(job_id);
        if let Some(handle) = handle {
            return handle
                .await
                .map_err(|_| ConductorError::Aborted(job_id.to_string()))?;
        }

        match self.recorder.load_job(job_id).await? {
            Some(job) if job.status.is_terminal() => Ok(JobReport::from_job(&job)),
            Some(_) => Err(ConductorError::Aborted(job_id.to_string())),
            None => Err(ConductorError::JobNotFound(job_id.to_string())),
        }
    }

    /// Current status of a job. Only running jobs are held in memory; finished
    /// jobs and jobs this process never saw are read from their snapshot.
    pub async fn get_status(&self, job_id: &str) -> Result<JobStatusView, ConductorError> {
        if let Some(view) = self.jobs.read().await.get(job_id) {
            return Ok(view.clone());
        }
        self.recorder
            .load_job(job_id)
            .await?
            .map(|job| job.status_view())
            .ok_or_else(|| ConductorError::JobNotFound(job_id.to_string()))
    }

    async fn accept(&self, job: &Job) -> Result<(), ConductorError> {
        if job.original_request.trim().is_empty() {
            return Err(ConductorError::EmptyRequest);
        }
        if job.current_stage != Stage::Intake || job.status != JobStatus::Running {
            return Err(ConductorError::NotAtIntake {
                job_id: job.id.clone(),
                stage: job.current_stage,
            });
        }
        self.recorder.save_job(job).await?;
        self.publish(job).await;
        info!(job_id = %job.id, "job accepted");
        Ok(())
    }

    async fn drive(&self, mut job: Job) -> Result<JobReport, ConductorError> {
        StateMachine::next(&mut job, StageEvent::Accepted)?;
        self.checkpoint(&mut job).await?;

        while job.status == JobStatus::Running {
            let stage = job.current_stage;
            let event = match self.invoke_stage(&job, stage).await {
                Ok(response) => Self::settle(&mut job, stage, response)?,
                Err(err) => {
                    warn!(stage = %stage, error = %err, "stage failed");
                    StageEvent::Failed {
                        kind: FailureKind::Fatal,
                        message: err.to_string(),
                    }
                }
            };
            StateMachine::next(&mut job, event)?;
            self.checkpoint(&mut job).await?;
        }

        match &job.detail {
            Some(detail) => info!(status = %job.status, detail = %detail, "job finished"),
            None => info!(status = %job.status, "job finished"),
        }
        Ok(JobReport::from_job(&job))
    }

    async fn invoke_stage(
        &self,
        job: &Job,
        stage: Stage,
    ) -> Result<StageResponse, RetryError<AttemptError>> {
        let client = self.stages.get(stage).ok_or_else(|| {
            RetryError::Fatal(AttemptError::Stage(StageFailure::fatal(format!(
                "no client registered for {stage}"
            ))))
        })?;
        let request = StageRequest::for_job(job, stage);

        let client = client.as_ref();
        let request = &request;
        self.settings
            .retry
            .execute(move |attempt| self.attempt(client, request, attempt))
            .await
    }

    /// One rate-limited, audited, time-bounded stage call.
    async fn attempt(
        &self,
        client: &dyn StageClient,
        request: &StageRequest,
        attempt: u32,
    ) -> Result<StageResponse, AttemptError> {
        let stage = request.stage_name;
        let key = self
            .recorder
            .record_start(&request.job_id, stage, attempt, request)
            .await?;

        // The call follows the grant directly: grant spacing is call spacing.
        self.limiter.acquire().await;
        debug!(stage = %stage, attempt, "invoking stage");
        let limit = self.settings.stage_timeout;
        let result = match timeout(limit, client.invoke(request)).await {
            Ok(Ok(response)) if response.stage_name != stage => Err(StageFailure::fatal(format!(
                "expected a response from {stage}, got one from {}",
                response.stage_name
            ))),
            Ok(result) => result,
            Err(_) => Err(StageFailure::transient(format!(
                "stage call timed out after {limit:?}"
            ))),
        };

        self.recorder.record_complete(&key, &result).await?;
        match &result {
            Ok(_) => info!(stage = %stage, attempt, "stage attempt succeeded"),
            Err(failure) => warn!(stage = %stage, attempt, error = %failure, "stage attempt failed"),
        }
        result.map_err(AttemptError::from)
    }

    /// Record a successful stage's output and turn it into a state machine event.
    fn settle(
        job: &mut Job,
        stage: Stage,
        response: StageResponse,
    ) -> Result<StageEvent, ConductorError> {
        if stage != Stage::Validation {
            job.record_output(stage, response.output)?;
            return Ok(StageEvent::Succeeded);
        }

        let Some(valid) = verdict(&response) else {
            return Ok(StageEvent::Failed {
                kind: FailureKind::Fatal,
                message: "validation stage returned no validity flag".into(),
            });
        };
        let details = rejection_details(&response.output);
        job.record_output(stage, response.output)?;
        info!(valid, "validation gate evaluated");
        Ok(StageEvent::Validated { valid, details })
    }

    /// Publish the job's state and persist its snapshot. A snapshot that
    /// cannot be written fails a running job.
    async fn checkpoint(&self, job: &mut Job) -> Result<(), ConductorError> {
        if job.status.is_terminal() {
            self.retire(job).await;
            return Ok(());
        }

        self.publish(job).await;
        let Err(err) = self.recorder.save_job(job).await else {
            return Ok(());
        };
        error!(error = %err, "failed to persist job snapshot");
        StateMachine::next(
            job,
            StageEvent::Failed {
                kind: FailureKind::Fatal,
                message: format!("audit write failed: {err}"),
            },
        )?;
        self.retire(job).await;
        Ok(())
    }

    /// Persist a terminal job and stop tracking it in memory. Without a
    /// stored snapshot the in-memory view is the only record, so it stays.
    async fn retire(&self, job: &Job) {
        match self.recorder.save_job(job).await {
            Ok(()) => {
                self.jobs.write().await.remove(&job.id);
            }
            Err(err) => {
                error!(error = %err, "failed to persist terminal job snapshot");
                self.publish(job).await;
            }
        }
    }

    async fn publish(&self, job: &Job) {
        self.jobs
            .write()
            .await
            .insert(job.id.clone(), job.status_view());
    }
}

/// The validation verdict: the explicit flag, else an `is_valid` field in the output.
fn verdict(response: &StageResponse) -> Option<bool> {
    response
        .validity_flag
        .or_else(|| response.output.get("is_valid").and_then(Value::as_bool))
}

fn rejection_details(output: &Value) -> Value {
    output
        .get("issues")
        .cloned()
        .unwrap_or_else(|| output.clone())
}
