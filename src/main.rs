mod cli;
mod ui;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use conductor::Orchestrator;
use conductor::audit::{AuditRecorder, AuditStore, FileAuditStore};
use conductor::config::ConductorConfig;
use conductor::stage::{HttpStageClient, StageRegistry, StubStage};
use conductor::state_machine::JobStatus;
use conductor::telemetry::setup_tracing;

use cli::{Cli, Command};
use ui::JobProgress;

// Stub stages answer instantly; a short interval keeps the demo watchable.
const DEMO_MIN_INTERVAL_MS: u64 = 250;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => ConductorConfig::load_from(path)?,
        None => ConductorConfig::load()?,
    };
    if let Some(attempts) = cli.max_attempts {
        config.max_attempts = attempts;
    }

    match cli.command {
        Command::Run { request } => {
            if let Some(ms) = cli.min_interval_ms {
                config.min_interval_ms = ms;
            }
            let stages = HttpStageClient::registry(&config)?;
            run_job(&config, stages, request).await
        }
        Command::Demo { reject, request } => {
            config.min_interval_ms = cli.min_interval_ms.unwrap_or(DEMO_MIN_INTERVAL_MS);
            run_job(&config, StubStage::registry(reject), request).await
        }
        Command::Status { job_id } => {
            show_status(&config, &job_id).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_job(
    config: &ConductorConfig,
    stages: StageRegistry,
    request: String,
) -> Result<ExitCode> {
    let store: Arc<dyn AuditStore> = Arc::new(FileAuditStore::new(config.audit_dir.clone()));
    let orchestrator = Arc::new(Orchestrator::from_config(config, stages, store)?);

    let job_id = orchestrator.submit(request).await?;
    let progress = JobProgress::start(&job_id);

    let wait = orchestrator.wait(&job_id);
    tokio::pin!(wait);
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let report = loop {
        tokio::select! {
            result = &mut wait => break result?,
            _ = ticker.tick() => {
                if let Ok(view) = orchestrator.get_status(&job_id).await {
                    progress.update_stage(&job_id, view.current_stage);
                }
            }
        }
    };

    progress.complete(&report);
    progress.print_report(&report);

    Ok(if report.status == JobStatus::Succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn show_status(config: &ConductorConfig, job_id: &str) -> Result<()> {
    let recorder = AuditRecorder::new(Arc::new(FileAuditStore::new(config.audit_dir.clone())));
    let job = recorder
        .load_job(job_id)
        .await?
        .with_context(|| format!("no snapshot for job {job_id} under {}", config.audit_dir.display()))?;
    let attempts = recorder.attempts(job_id).await?;
    ui::print_status(&job, &attempts);
    Ok(())
}
