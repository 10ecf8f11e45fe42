//! Interface de terminal do conductor: spinner de progresso e saída colorida.
//!
//! Usa `indicatif` para o spinner e `console` para cores. O [`JobProgress`]
//! acompanha um job enquanto ele percorre os estágios.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use conductor::audit::{AttemptOutcome, StageInvocationRecord};
use conductor::state_machine::{Job, JobReport, JobStatus, Stage};

/// Indicador visual de progresso de um job no terminal.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl JobProgress {
    /// Inicia o spinner para o job informado.
    pub fn start(job_id: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("{job_id}: INTAKE"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow().bold(),
            dim: Style::new().dim(),
        }
    }

    /// Atualiza o spinner com o estágio corrente.
    pub fn update_stage(&self, job_id: &str, stage: Stage) {
        self.pb.set_message(format!("{job_id}: {stage}"));
    }

    /// Finaliza o spinner e imprime o resultado do job.
    pub fn complete(&self, report: &JobReport) {
        self.pb.finish_and_clear();
        let (mark, style) = match report.status {
            JobStatus::Succeeded => ("✓", &self.green),
            JobStatus::ValidationRejected => ("!", &self.yellow),
            JobStatus::Failed | JobStatus::Running => ("✗", &self.red),
        };
        println!(
            "  {} {} {} in {}ms",
            style.apply_to(mark),
            report.job_id,
            style.apply_to(report.status),
            report.duration_ms
        );
        if let Some(detail) = &report.detail {
            println!("    {detail}");
        }
        let path: Vec<String> = report
            .state_transitions
            .iter()
            .map(|stage| stage.to_string())
            .collect();
        println!("    {}", self.dim.apply_to(path.join(" → ")));
    }

    /// Imprime o relatório completo em JSON.
    pub fn print_report(&self, report: &JobReport) {
        println!();
        println!("{}", self.dim.apply_to("─── Job Report ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_default()
        );
    }
}

/// Imprime o snapshot persistido de um job e suas tentativas auditadas.
pub fn print_status(job: &Job, attempts: &[StageInvocationRecord]) {
    let bold = Style::new().bold();
    let green = Style::new().green();
    let yellow = Style::new().yellow();
    let red = Style::new().red();

    println!("{} {}", bold.apply_to("Job"), job.id);
    println!("  request: {}", job.original_request);
    println!("  status:  {} at {}", job.status, job.current_stage);
    if let Some(detail) = &job.detail {
        println!("  detail:  {detail}");
    }
    println!("  outputs: {}", job.stage_outputs.len());

    if attempts.is_empty() {
        return;
    }
    println!();
    println!("{}", bold.apply_to("Attempts"));
    for record in attempts {
        let outcome = match record.outcome {
            Some(AttemptOutcome::Success) => green.apply_to("SUCCESS").to_string(),
            Some(AttemptOutcome::TransientFailure) => {
                yellow.apply_to("TRANSIENT_FAILURE").to_string()
            }
            Some(AttemptOutcome::FatalFailure) => red.apply_to("FATAL_FAILURE").to_string(),
            None => red.apply_to("INCOMPLETE").to_string(),
        };
        println!(
            "  {:<16} #{} {} {}",
            record.stage_name.name(),
            record.attempt_number,
            record.started_at.format("%H:%M:%S%.3f"),
            outcome
        );
    }
}
