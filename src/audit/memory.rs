use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AttemptCompletion, AttemptKey, AuditError, AuditStore, StageInvocationRecord};
use crate::state_machine::Job;

#[derive(Default)]
struct JobAudit {
    job: Option<Job>,
    attempts: Vec<StageInvocationRecord>,
}

/// In-process audit store. Records live as long as the store does.
#[derive(Default)]
pub struct MemoryAuditStore {
    jobs: Mutex<HashMap<String, JobAudit>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert_attempt(&self, record: StageInvocationRecord) -> Result<(), AuditError> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs.entry(record.job_id.clone()).or_default();
        if entry.attempts.iter().any(|r| r.key() == record.key()) {
            return Err(AuditError::DuplicateAttempt {
                job_id: record.job_id,
                stage: record.stage_name,
                attempt: record.attempt_number,
            });
        }
        entry.attempts.push(record);
        Ok(())
    }

    async fn complete_attempt(
        &self,
        key: &AttemptKey,
        completion: AttemptCompletion,
    ) -> Result<StageInvocationRecord, AuditError> {
        let mut jobs = self.jobs.lock().await;
        let record = jobs
            .get_mut(&key.job_id)
            .and_then(|entry| entry.attempts.iter_mut().find(|r| r.key() == *key))
            .ok_or_else(|| AuditError::MissingAttempt {
                job_id: key.job_id.clone(),
                stage: key.stage_name,
                attempt: key.attempt_number,
            })?;
        record.apply(completion);
        Ok(record.clone())
    }

    async fn attempts(&self, job_id: &str) -> Result<Vec<StageInvocationRecord>, AuditError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .get(job_id)
            .map(|entry| entry.attempts.clone())
            .unwrap_or_default())
    }

    async fn save_job(&self, job: &Job) -> Result<(), AuditError> {
        let mut jobs = self.jobs.lock().await;
        jobs.entry(job.id.clone()).or_default().job = Some(job.clone());
        Ok(())
    }

    async fn load_job(&self, job_id: &str) -> Result<Option<Job>, AuditError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.get(job_id).and_then(|entry| entry.job.clone()))
    }
}
