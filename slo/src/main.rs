mod cli;
mod report;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cli::ReportOptions;
use crate::report::Thresholds;

#[derive(Parser)]
#[command(name = "slo", version, about = "SLO report for the resolver event stream")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Aggregate `pnplog/events.jsonl` into `pnplog/slo_report.json`.
    Report {
        #[arg(long)]
        events: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = 0.20)]
        max_unknown_rate: f64,
        #[arg(long, default_value_t = 30.0)]
        max_mean_diagnosis_secs: f64,
        #[arg(long, default_value_t = 0.50)]
        min_remediation_success: f64,
        #[arg(long, default_value_t = 0.90)]
        min_rollback_verification: f64,
        /// Exit 1 when any objective is breached.
        #[arg(long)]
        fail_on_thresholds: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .compact()
        .init();
    let cli = Cli::parse();
    let repo_root = std::env::current_dir()?;
    match cli.command {
        Command::Report {
            events,
            output,
            max_unknown_rate,
            max_mean_diagnosis_secs,
            min_remediation_success,
            min_rollback_verification,
            fail_on_thresholds,
        } => {
            let opts = ReportOptions {
                events,
                output,
                thresholds: Thresholds {
                    max_unknown_rate,
                    max_mean_time_to_diagnosis_seconds: max_mean_diagnosis_secs,
                    min_remediation_success_rate: min_remediation_success,
                    min_rollback_verification_rate: min_rollback_verification,
                },
            };
            let passed = cli::report(&repo_root, &opts)?;
            if fail_on_thresholds && !passed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
