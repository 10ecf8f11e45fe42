mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinSet;

use common::{Harness, Step, settings};
use conductor::audit::{AttemptOutcome, AuditRecorder, FileAuditStore};
use conductor::state_machine::{Job, JobStatus, Stage};
use conductor::{Orchestrator, StageFailure};

#[tokio::test]
async fn pipeline_leaves_a_durable_trail() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = Harness::new();
    h.set(
        h.scripted(Stage::Requirements)
            .then(Step::Fail(StageFailure::transient("throttled"))),
    );
    let orch = h.orchestrator_with_store(
        Arc::new(FileAuditStore::new(dir.path())),
        settings(3),
        Duration::ZERO,
    );

    let report = orch.run(Job::new("build a support chatbot")).await.unwrap();
    assert_eq!(report.status, JobStatus::Succeeded);

    let job_dir = dir.path().join(&report.job_id);
    assert!(job_dir.join("job.json").exists());
    assert!(job_dir.join("attempts/requirements-1.json").exists());
    assert!(job_dir.join("attempts/requirements-2.json").exists());
    assert!(job_dir.join("attempts/deployment-1.json").exists());

    // A fresh store over the same directory sees everything.
    let reopened = AuditRecorder::new(Arc::new(FileAuditStore::new(dir.path())));
    let attempts = reopened.attempts(&report.job_id).await.unwrap();
    assert_eq!(attempts.len(), 6);
    assert!(attempts.iter().all(|r| r.is_complete()));
    assert_eq!(attempts[0].stage_name, Stage::Requirements);
    assert_eq!(attempts[0].outcome, Some(AttemptOutcome::TransientFailure));
    assert_eq!(attempts[1].outcome, Some(AttemptOutcome::Success));

    let job = reopened.load_job(&report.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.current_stage, Stage::Done);
    assert_eq!(job.stage_outputs.len(), 5);
}

#[tokio::test]
async fn status_is_served_from_disk_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new();
    let first = h.orchestrator_with_store(
        Arc::new(FileAuditStore::new(dir.path())),
        settings(3),
        Duration::ZERO,
    );
    let report = first.run(Job::new("build a faq bot")).await.unwrap();
    drop(first);

    let second = Orchestrator::new(
        h.registry(),
        Arc::new(conductor::rate_limiter::RateLimiter::new(Duration::ZERO)),
        AuditRecorder::new(Arc::new(FileAuditStore::new(dir.path()))),
        settings(3),
    )
    .unwrap();
    let view = second.get_status(&report.job_id).await.unwrap();
    assert_eq!(view.status, JobStatus::Succeeded);
    assert_eq!(view.stage_outputs, report.stage_outputs);
}

#[tokio::test]
async fn concurrent_writes_for_distinct_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = AuditRecorder::new(Arc::new(FileAuditStore::new(dir.path())));

    let mut set = JoinSet::new();
    for stage in Stage::PIPELINE {
        for attempt in 1..=3 {
            let recorder = recorder.clone();
            set.spawn(async move {
                let request = json!({ "stage": stage.name(), "attempt": attempt });
                let key = recorder
                    .record_start("job-chatbot-1", stage, attempt, &request)
                    .await
                    .unwrap();
                let result: Result<serde_json::Value, StageFailure> = Ok(json!({ "ok": attempt }));
                recorder.record_complete(&key, &result).await.unwrap()
            });
        }
    }
    while let Some(done) = set.join_next().await {
        assert!(done.unwrap().is_complete());
    }

    let attempts = recorder.attempts("job-chatbot-1").await.unwrap();
    assert_eq!(attempts.len(), 15);
    for record in &attempts {
        assert_eq!(
            record.response_payload,
            Some(json!({ "ok": record.attempt_number }))
        );
        assert_eq!(record.request_payload["stage"], record.stage_name.name());
    }
}
