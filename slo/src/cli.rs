//! CLI command implementations.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info};

use resolver::core::alias::AliasMap;
use resolver::io::event_log::{load_events, now_rfc3339};
use resolver::io::init::PnpPaths;

use crate::report::{Thresholds, build_report, write_report};

#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    /// Defaults to `pnplog/events.jsonl` under the repository root.
    pub events: Option<PathBuf>,
    /// Defaults to `pnplog/slo_report.json` under the repository root.
    pub output: Option<PathBuf>,
    pub thresholds: Thresholds,
}

/// Aggregate the event stream, write the report and print a summary.
///
/// Returns whether every objective was met.
pub fn report(repo_root: &Path, opts: &ReportOptions) -> Result<bool> {
    let paths = PnpPaths::new(repo_root);
    let events_path = opts.events.clone().unwrap_or(paths.events_path);
    let output = opts.output.clone().unwrap_or(paths.slo_report_path);

    let events = load_events(&events_path)?;
    debug!(events = events.len(), path = %events_path.display(), "events loaded");
    let aliases = AliasMap::builtin()?;
    let report = build_report(&events, &aliases, opts.thresholds.clone(), now_rfc3339());
    write_report(&output, &report)?;
    info!(path = %output.display(), "slo report written");

    let metrics = &report.metrics;
    println!("report: events={}", report.event_count);
    println!("report: unknown_rate={}", fmt_metric(metrics.unknown_rate.value));
    println!(
        "report: mean_time_to_diagnosis_seconds={}",
        fmt_metric(metrics.mean_time_to_diagnosis_seconds.value)
    );
    println!(
        "report: remediation_success_rate={}",
        fmt_metric(metrics.remediation_success_rate.value)
    );
    println!(
        "report: rollback_verification_rate={}",
        fmt_metric(metrics.rollback_verification_rate.value)
    );
    for breach in &report.breaches {
        eprintln!("breach: {breach}");
    }
    println!("report: written {}", output.display());
    Ok(report.passed())
}

fn fmt_metric(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}"))
}
