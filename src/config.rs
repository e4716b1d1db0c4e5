//! Configuração do batchrun carregada a partir de `batchrun.toml`.
//!
//! A struct [`EngineConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `BATCHRUN_STATUS_DIR` tem precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::FailurePolicy;
use crate::error::EngineError;
use crate::pool::PoolConfig;

pub const CONFIG_FILE: &str = "batchrun.toml";
pub const STATUS_DIR_ENV: &str = "BATCHRUN_STATUS_DIR";

/// Configuração de nível superior carregada de `batchrun.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Diretório raiz dos registros de status e definições de batch.
    #[serde(default = "default_status_dir")]
    pub status_dir: PathBuf,

    /// Máximo de jobs executando ao mesmo tempo.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Registros mais antigos que isto são removidos na abertura do store.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    /// Quantos jobs finalizados ficam no cache em memória do pool.
    #[serde(default = "default_completed_cache_capacity")]
    pub completed_cache_capacity: usize,

    /// Como um batch com falhas é resumido.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Usa locks consultivos nos arquivos de status quando o sistema suporta.
    #[serde(default = "default_file_locks")]
    pub file_locks: bool,

    /// Intervalo de polling da interface, em milissegundos.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

// Valor padrão para o diretório de status: ".batchrun".
fn default_status_dir() -> PathBuf {
    PathBuf::from(".batchrun")
}

// Valor padrão para concorrência máxima: 4.
fn default_max_concurrent() -> usize {
    4
}

// Valor padrão para retenção: 24 horas.
fn default_retention_hours() -> u64 {
    24
}

// Valor padrão para o cache de jobs finalizados: 1000 entradas.
fn default_completed_cache_capacity() -> usize {
    1000
}

fn default_file_locks() -> bool {
    true
}

// Valor padrão para o polling: 1500ms.
fn default_poll_interval_ms() -> u64 {
    1500
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            status_dir: default_status_dir(),
            max_concurrent: default_max_concurrent(),
            retention_hours: default_retention_hours(),
            completed_cache_capacity: default_completed_cache_capacity(),
            failure_policy: FailurePolicy::default(),
            file_locks: default_file_locks(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl EngineConfig {
    /// Carrega a configuração de `batchrun.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Carrega a configuração de um caminho explícito.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<EngineConfig>(&contents)
                .map_err(EngineError::from)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Ok(dir) = std::env::var(STATUS_DIR_ENV)
            && !dir.is_empty()
        {
            config.status_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_concurrent == 0 {
            return Err(EngineError::Config("max_concurrent must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(EngineError::Config("poll_interval_ms must be at least 1".into()));
        }
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(60 * 60))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_concurrent: self.max_concurrent,
            completed_cache_capacity: self.completed_cache_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = EngineConfig::default();
        assert_eq!(config.status_dir, PathBuf::from(".batchrun"));
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.retention(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.completed_cache_capacity, 1000);
        assert_eq!(config.failure_policy, FailurePolicy::AnyFailed);
        assert!(config.file_locks);
        assert_eq!(config.poll_interval(), Duration::from_millis(1500));
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            max_concurrent = 8
            failure_policy = "partial"
            file_locks = false
        "#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.failure_policy, FailurePolicy::Partial);
        assert!(!config.file_locks);
        assert_eq!(config.retention_hours, 24);
        assert_eq!(config.pool_config().max_concurrent, 8);
    }

    #[test]
    fn rejects_unknown_policy() {
        let result = toml::from_str::<EngineConfig>(r#"failure_policy = "whatever""#);
        assert!(result.is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batchrun.toml");
        std::fs::write(&path, "retention_hours = 2\ncompleted_cache_capacity = 10\n").unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.retention(), Duration::from_secs(2 * 60 * 60));
        assert_eq!(config.completed_cache_capacity, 10);
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("batchrun.toml");
        std::fs::write(&path, "max_concurrent = 0\n").unwrap();
        assert!(EngineConfig::load_from(&path).is_err());
    }

    #[test]
    fn load_falls_back_to_defaults() {
        // No ambiente de teste, tipicamente não há batchrun.toml no caminho informado.
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load_from(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.max_concurrent, 4);
    }
}
