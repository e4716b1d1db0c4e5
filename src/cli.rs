//! Interface de linha de comando do batchrun baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (demo, status, list,
//! delete, sweep) e flags globais (--config, --max-concurrent, --verbose).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// batchrun — executor concorrente de batches de jobs.
#[derive(Debug, Parser)]
#[command(name = "batchrun", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para o arquivo de configuração (padrão: ./batchrun.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Número máximo de jobs executando ao mesmo tempo.
    #[arg(long, global = true)]
    pub max_concurrent: Option<usize>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa um batch de demonstração e acompanha o progresso até o fim.
    Demo {
        /// Quantidade de jobs no batch.
        #[arg(long, default_value_t = 5)]
        jobs: usize,

        /// Quantos jobs devem falhar de propósito.
        #[arg(long, default_value_t = 0)]
        fail: usize,

        /// Quanto tempo cada job dorme, em milissegundos.
        #[arg(long, default_value_t = 500)]
        sleep_ms: u64,

        /// Intervalo de polling do status, em milissegundos.
        #[arg(long)]
        poll_ms: Option<u64>,
    },

    /// Mostra o status atual de um batch em JSON.
    Status {
        /// Identificador do batch.
        batch_id: String,
    },

    /// Lista os batches conhecidos.
    List,

    /// Remove um batch e os registros de status dos seus jobs.
    Delete {
        /// Identificador do batch.
        batch_id: String,
    },

    /// Remove registros de status mais antigos que a retenção.
    Sweep {
        /// Idade máxima em horas (padrão: retention_hours da configuração).
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
}
