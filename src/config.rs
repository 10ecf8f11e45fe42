//! Configuração do conductor carregada a partir de `conductor.toml`.
//!
//! A struct [`ConductorConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `CONDUCTOR_STAGE_TOKEN` e `CONDUCTOR_AUDIT_DIR`
//! têm precedência sobre o arquivo.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConductorError;
use crate::retry::RetryPolicy;
use crate::state_machine::Stage;

/// Arquivo de configuração padrão, relativo ao diretório atual.
pub const DEFAULT_CONFIG_FILE: &str = "conductor.toml";

/// Configuração de nível superior carregada de `conductor.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConductorConfig {
    /// Intervalo mínimo, em milissegundos, entre duas chamadas ao modelo.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,

    /// Número total de tentativas por estágio, incluindo a primeira.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Atraso base em milissegundos para backoff exponencial.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Teto de um único atraso de backoff, em milissegundos.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Timeout de uma chamada de estágio, em segundos.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Raiz do armazenamento de auditoria em disco.
    #[serde(default = "default_audit_dir")]
    pub audit_dir: PathBuf,

    /// Token bearer enviado aos endpoints HTTP dos estágios.
    #[serde(default)]
    pub stage_token: String,

    /// Endpoint HTTP de cada estágio, indexado pelo nome do estágio.
    #[serde(default)]
    pub stages: HashMap<String, String>,
}

// 30s entre chamadas ao modelo.
fn default_min_interval_ms() -> u64 {
    30_000
}

// Valor padrão para tentativas: 3.
fn default_max_attempts() -> u32 {
    3
}

// Valor padrão para o atraso base: 1000ms.
fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_stage_timeout_secs() -> u64 {
    300
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from(".conductor/audit")
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            stage_timeout_secs: default_stage_timeout_secs(),
            audit_dir: default_audit_dir(),
            stage_token: String::new(),
            stages: HashMap::new(),
        }
    }
}

impl ConductorConfig {
    /// Carrega a configuração de `conductor.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self, ConductorError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Carrega a configuração de um caminho explícito.
    pub fn load_from(path: &Path) -> Result<Self, ConductorError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<ConductorConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variáveis de ambiente têm precedência sobre o arquivo de configuração.
        if let Ok(token) = std::env::var("CONDUCTOR_STAGE_TOKEN")
            && !token.is_empty()
        {
            config.stage_token = token;
        }
        if let Ok(dir) = std::env::var("CONDUCTOR_AUDIT_DIR")
            && !dir.is_empty()
        {
            config.audit_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejeita nomes de estágio desconhecidos na tabela `[stages]`.
    pub fn validate(&self) -> Result<(), ConductorError> {
        for name in self.stages.keys() {
            match Stage::from_name(name) {
                Some(stage) if stage.is_pipeline_stage() => {}
                _ => {
                    return Err(ConductorError::Config(format!(
                        "unknown stage `{name}` in [stages]"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn stage_endpoint(&self, stage: Stage) -> Option<&str> {
        self.stages.get(stage.name()).map(String::as_str)
    }
}
