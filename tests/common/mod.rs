#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio::time::Instant;

use conductor::audit::{
    AttemptCompletion, AttemptKey, AuditError, AuditRecorder, AuditStore, MemoryAuditStore,
    StageInvocationRecord,
};
use conductor::rate_limiter::RateLimiter;
use conductor::retry::RetryPolicy;
use conductor::stage::{StageClient, StageRegistry, StageRequest, StageResponse};
use conductor::state_machine::{Job, Stage};
use conductor::{Orchestrator, PipelineSettings, StageFailure};

/// What a scripted stage does on one call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Succeed with this output and no validity flag.
    Ok(Value),
    /// Succeed with an explicit validity flag.
    Verdict(bool, Value),
    Fail(StageFailure),
    /// Never answer.
    Hang,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub job_id: String,
    pub stage: Stage,
    pub at: Instant,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// A stage that plays back a script, then falls back to a fixed step or to
/// a default success.
pub struct ScriptedStage {
    stage: Stage,
    script: Mutex<VecDeque<Step>>,
    fallback: Option<Step>,
    calls: AtomicU32,
    log: CallLog,
    pub entered: Arc<Notify>,
}

impl ScriptedStage {
    pub fn new(stage: Stage, log: CallLog) -> Self {
        Self {
            stage,
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: AtomicU32::new(0),
            log,
            entered: Arc::new(Notify::new()),
        }
    }

    pub fn then(self, step: Step) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    pub fn always(mut self, step: Step) -> Self {
        self.fallback = Some(step);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn respond(&self, output: Value, validity_flag: Option<bool>) -> StageResponse {
        StageResponse {
            stage_name: self.stage,
            output,
            validity_flag,
        }
    }
}

#[async_trait]
impl StageClient for ScriptedStage {
    async fn invoke(&self, request: &StageRequest) -> Result<StageResponse, StageFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(Call {
            job_id: request.job_id.clone(),
            stage: request.stage_name,
            at: Instant::now(),
        });
        self.entered.notify_one();

        let step = {
            let mut script = self.script.lock().unwrap();
            script.pop_front().or_else(|| self.fallback.clone())
        };
        match step {
            Some(Step::Ok(output)) => Ok(self.respond(output, None)),
            Some(Step::Verdict(valid, output)) => Ok(self.respond(output, Some(valid))),
            Some(Step::Fail(failure)) => Err(failure),
            Some(Step::Hang) => std::future::pending().await,
            None => {
                let output = json!({
                    "stage": self.stage.name(),
                    "inputs": request.prior_stage_outputs.len(),
                });
                let flag = (self.stage == Stage::Validation).then_some(true);
                Ok(self.respond(output, flag))
            }
        }
    }
}

/// Scripted stages for the whole pipeline sharing one call log.
pub struct Harness {
    pub log: CallLog,
    pub store: Arc<MemoryAuditStore>,
    stages: HashMap<Stage, Arc<ScriptedStage>>,
}

impl Harness {
    pub fn new() -> Self {
        let log = CallLog::default();
        let stages = Stage::PIPELINE
            .into_iter()
            .map(|stage| (stage, Arc::new(ScriptedStage::new(stage, log.clone()))))
            .collect();
        Self {
            log,
            store: Arc::new(MemoryAuditStore::new()),
            stages,
        }
    }

    /// A fresh stage wired to this harness' call log.
    pub fn scripted(&self, stage: Stage) -> ScriptedStage {
        ScriptedStage::new(stage, self.log.clone())
    }

    pub fn set(&mut self, stage: ScriptedStage) {
        self.stages.insert(stage.stage, Arc::new(stage));
    }

    pub fn stage(&self, stage: Stage) -> &ScriptedStage {
        &self.stages[&stage]
    }

    pub fn registry(&self) -> StageRegistry {
        self.stages
            .iter()
            .fold(StageRegistry::new(), |registry, (stage, client)| {
                registry.register(*stage, client.clone() as Arc<dyn StageClient>)
            })
    }

    pub fn orchestrator(&self, settings: PipelineSettings, min_interval: Duration) -> Arc<Orchestrator> {
        self.orchestrator_with_store(self.store.clone(), settings, min_interval)
    }

    pub fn orchestrator_with_store(
        &self,
        store: Arc<dyn AuditStore>,
        settings: PipelineSettings,
        min_interval: Duration,
    ) -> Arc<Orchestrator> {
        Arc::new(
            Orchestrator::new(
                self.registry(),
                Arc::new(RateLimiter::new(min_interval)),
                AuditRecorder::new(store),
                settings,
            )
            .unwrap(),
        )
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }
}

pub fn settings(max_attempts: u32) -> PipelineSettings {
    PipelineSettings {
        retry: RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        },
        stage_timeout: Duration::from_secs(5),
    }
}

pub fn job(request: &str) -> Job {
    Job::new(request)
}

/// An audit store whose attempt writes always fail.
#[derive(Default)]
pub struct BrokenAttemptStore {
    inner: MemoryAuditStore,
}

#[async_trait]
impl AuditStore for BrokenAttemptStore {
    async fn insert_attempt(&self, _record: StageInvocationRecord) -> Result<(), AuditError> {
        Err(AuditError::Unavailable("attempt table is read-only".into()))
    }

    async fn complete_attempt(
        &self,
        key: &AttemptKey,
        completion: AttemptCompletion,
    ) -> Result<StageInvocationRecord, AuditError> {
        self.inner.complete_attempt(key, completion).await
    }

    async fn attempts(&self, job_id: &str) -> Result<Vec<StageInvocationRecord>, AuditError> {
        self.inner.attempts(job_id).await
    }

    async fn save_job(&self, job: &Job) -> Result<(), AuditError> {
        self.inner.save_job(job).await
    }

    async fn load_job(&self, job_id: &str) -> Result<Option<Job>, AuditError> {
        self.inner.load_job(job_id).await
    }
}

/// An audit store whose completion writes always fail.
#[derive(Default)]
pub struct BrokenCompletionStore {
    inner: MemoryAuditStore,
}

#[async_trait]
impl AuditStore for BrokenCompletionStore {
    async fn insert_attempt(&self, record: StageInvocationRecord) -> Result<(), AuditError> {
        self.inner.insert_attempt(record).await
    }

    async fn complete_attempt(
        &self,
        _key: &AttemptKey,
        _completion: AttemptCompletion,
    ) -> Result<StageInvocationRecord, AuditError> {
        Err(AuditError::Unavailable("disk full".into()))
    }

    async fn attempts(&self, job_id: &str) -> Result<Vec<StageInvocationRecord>, AuditError> {
        self.inner.attempts(job_id).await
    }

    async fn save_job(&self, job: &Job) -> Result<(), AuditError> {
        self.inner.save_job(job).await
    }

    async fn load_job(&self, job_id: &str) -> Result<Option<Job>, AuditError> {
        self.inner.load_job(job_id).await
    }
}

/// An audit store whose first attempt insert stalls for `delay`.
pub struct SlowFirstInsertStore {
    inner: MemoryAuditStore,
    delay: Duration,
    inserts: AtomicU32,
}

impl SlowFirstInsertStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryAuditStore::new(),
            delay,
            inserts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl AuditStore for SlowFirstInsertStore {
    async fn insert_attempt(&self, record: StageInvocationRecord) -> Result<(), AuditError> {
        if self.inserts.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.insert_attempt(record).await
    }

    async fn complete_attempt(
        &self,
        key: &AttemptKey,
        completion: AttemptCompletion,
    ) -> Result<StageInvocationRecord, AuditError> {
        self.inner.complete_attempt(key, completion).await
    }

    async fn attempts(&self, job_id: &str) -> Result<Vec<StageInvocationRecord>, AuditError> {
        self.inner.attempts(job_id).await
    }

    async fn save_job(&self, job: &Job) -> Result<(), AuditError> {
        self.inner.save_job(job).await
    }

    async fn load_job(&self, job_id: &str) -> Result<Option<Job>, AuditError> {
        self.inner.load_job(job_id).await
    }
}
