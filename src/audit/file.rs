//! Armazenamento de auditoria em disco, um arquivo JSON por tentativa.
//!
//! Layout sob a raiz configurada (`audit_dir`):
//!
//! ```text
//! <root>/<job_id>/job.json
//! <root>/<job_id>/attempts/<stage>-<attempt>.json
//! ```
//!
//! Cada escrita vai para um arquivo temporário e é renomeada por cima do
//! destino, então um leitor nunca vê um registro pela metade.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

use super::{AttemptCompletion, AttemptKey, AuditError, AuditStore, StageInvocationRecord};
use crate::state_machine::Job;

/// Armazenamento durável baseado em arquivos JSON.
pub struct FileAuditStore {
    root: PathBuf,
}

impl FileAuditStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    // Diretório do job; rejeita ids que escapariam da raiz.
    fn job_dir(&self, job_id: &str) -> Result<PathBuf, AuditError> {
        let valid = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(AuditError::InvalidJobId(job_id.to_string()));
        }
        Ok(self.root.join(job_id))
    }

    fn attempt_path(&self, key: &AttemptKey) -> Result<PathBuf, AuditError> {
        Ok(self.job_dir(&key.job_id)?.join("attempts").join(format!(
            "{}-{}.json",
            key.stage_name.name(),
            key.attempt_number
        )))
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AuditError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, AuditError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl AuditStore for FileAuditStore {
    async fn insert_attempt(&self, record: StageInvocationRecord) -> Result<(), AuditError> {
        let path = self.attempt_path(&record.key())?;
        if fs::try_exists(&path).await? {
            return Err(AuditError::DuplicateAttempt {
                job_id: record.job_id,
                stage: record.stage_name,
                attempt: record.attempt_number,
            });
        }
        write_json(&path, &record).await
    }

    async fn complete_attempt(
        &self,
        key: &AttemptKey,
        completion: AttemptCompletion,
    ) -> Result<StageInvocationRecord, AuditError> {
        let path = self.attempt_path(key)?;
        let mut record: StageInvocationRecord =
            read_json(&path)
                .await?
                .ok_or_else(|| AuditError::MissingAttempt {
                    job_id: key.job_id.clone(),
                    stage: key.stage_name,
                    attempt: key.attempt_number,
                })?;
        record.apply(completion);
        write_json(&path, &record).await?;
        Ok(record)
    }

    async fn attempts(&self, job_id: &str) -> Result<Vec<StageInvocationRecord>, AuditError> {
        let dir = self.job_dir(job_id)?.join("attempts");
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = read_json::<StageInvocationRecord>(&path).await? {
                records.push(record);
            }
        }
        records.sort_by_key(|r| (r.started_at, r.stage_name, r.attempt_number));
        Ok(records)
    }

    async fn save_job(&self, job: &Job) -> Result<(), AuditError> {
        let path = self.job_dir(&job.id)?.join("job.json");
        write_json(&path, job).await
    }

    async fn load_job(&self, job_id: &str) -> Result<Option<Job>, AuditError> {
        let path = self.job_dir(job_id)?.join("job.json");
        read_json(&path).await
    }
}
