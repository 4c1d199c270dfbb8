//! xlit utilities
//!
//! Post-processing of decoder output and offline model selection from
//! training logs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use xlit_core::data::convert_output_format;
use xlit_core::logscan::{early_stop_min, early_stop_patience, read_validation_losses};
use xlit_core::nbest::transfer_pivot_translate;

#[derive(Parser)]
#[command(name = "xlit-utils")]
#[command(about = "Corpus, n-best and training-log utilities")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Strip GO/EOW markers from a tokenized output corpus
    ConvertOutputFormat { input: PathBuf, output: PathBuf },
    /// Compose source->bridge and bridge->target n-best lists
    TransferPivotTranslate {
        s_b: PathBuf,
        b_t: PathBuf,
        output: PathBuf,
        /// Candidates kept per source sentence
        #[arg(long, default_value_t = 10)]
        n: usize,
    },
    /// Print the epoch with the lowest validation loss
    EarlyStopMin { log: PathBuf },
    /// Print the epoch chosen by a patience-window walk
    EarlyStopPatience { log: PathBuf, patience: usize },
}

fn losses(log: &Path) -> Result<Vec<f64>> {
    let losses = read_validation_losses(log)
        .with_context(|| format!("Failed to scan {}", log.display()))?;
    if losses.is_empty() {
        bail!("No validation losses found in {}", log.display());
    }
    info!("Read {} validation losses", losses.len());
    Ok(losses)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    match Cli::parse().command {
        Commands::ConvertOutputFormat { input, output } => {
            convert_output_format(&input, &output)
                .with_context(|| format!("Failed to convert {}", input.display()))?;
        }
        Commands::TransferPivotTranslate { s_b, b_t, output, n } => {
            let written = transfer_pivot_translate(&s_b, &b_t, &output, n)
                .context("Pivot composition failed")?;
            info!("Wrote {} candidates to {}", written, output.display());
        }
        Commands::EarlyStopMin { log } => {
            let losses = losses(&log)?;
            if let Some(epoch) = early_stop_min(&losses) {
                println!("{epoch}");
            }
        }
        Commands::EarlyStopPatience { log, patience } => {
            if patience == 0 {
                bail!("patience must be positive");
            }
            let losses = losses(&log)?;
            if let Some(epoch) = early_stop_patience(&losses, patience) {
                println!("{epoch}");
            }
        }
    }
    Ok(())
}
