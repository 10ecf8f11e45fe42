//! Interface de linha de comando do conductor baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, demo, status)
//! e flags globais (--config, --min-interval-ms, --max-attempts, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Conductor: orquestrador de pipelines de agentes com limite de taxa e auditoria.
#[derive(Debug, Parser)]
#[command(name = "conductor", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: `conductor.toml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Intervalo mínimo entre chamadas de estágio, em milissegundos.
    #[arg(long, global = true)]
    pub min_interval_ms: Option<u64>,

    /// Número total de tentativas por estágio.
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa um job contra os endpoints HTTP configurados em `[stages]`.
    Run {
        /// Pedido original em linguagem natural.
        request: String,
    },

    /// Executa um job com estágios locais simulados.
    Demo {
        /// Faz o estágio de validação rejeitar os artefatos.
        #[arg(long, default_value_t = false)]
        reject: bool,

        /// Pedido original usado na demonstração.
        #[arg(default_value = "build a support chatbot")]
        request: String,
    },

    /// Mostra o snapshot persistido e as tentativas auditadas de um job.
    Status {
        /// Identificador do job.
        job_id: String,
    },
}
