//! Interface de terminal do batchrun: barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso e `console` para
//! estilização com cores. O [`BatchProgress`] acompanha visualmente um batch
//! a partir dos snapshots que o consumidor obtém por polling.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::batch::{Batch, BatchStatus};
use crate::lifecycle::JobStatus;

/// Indicador visual de progresso de um batch no terminal.
pub struct BatchProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl BatchProgress {
    /// Inicia a barra com o total de jobs do batch.
    pub fn start(name: &str, total: usize) -> Self {
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.set_message(name.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    /// Atualiza a barra a partir de um snapshot novo.
    pub fn update(&self, batch: &Batch) {
        let c = &batch.counts;
        self.pb.set_position(c.finished() as u64);
        self.pb.set_message(format!(
            "{} running={} pending={} ok={} failed={} cancelled={}",
            batch.status, c.running, c.pending, c.completed, c.failed, c.cancelled
        ));
    }

    /// Finaliza a barra e imprime o resultado de cada job.
    pub fn finish(&self, batch: &Batch) {
        self.pb.finish_and_clear();
        for job in &batch.jobs {
            match job.status {
                JobStatus::Completed => println!(
                    "  {} {} {}",
                    self.green.apply_to("✓"),
                    job.name,
                    self.dim.apply_to(
                        job.result
                            .as_ref()
                            .map(|r| r.to_string())
                            .unwrap_or_default()
                    )
                ),
                JobStatus::Failed => println!(
                    "  {} {}: {}",
                    self.red.apply_to("✗"),
                    job.name,
                    job.error_message.as_deref().unwrap_or("unknown error")
                ),
                JobStatus::Cancelled => {
                    println!("  {} {} (cancelled)", self.yellow.apply_to("–"), job.name)
                }
                JobStatus::Pending | JobStatus::Running => {
                    println!("  {} {} ({})", self.dim.apply_to("…"), job.name, job.status)
                }
            }
        }

        let status_style = match batch.status {
            BatchStatus::Completed => &self.green,
            BatchStatus::Failed => &self.red,
            _ => &self.yellow,
        };
        println!();
        println!(
            "{}",
            status_style.apply_to(format!("─── Batch {} ({}) ───", batch.name, batch.status))
        );
    }
}
