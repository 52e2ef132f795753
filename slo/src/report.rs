//! SLO report over `pnplog/events.jsonl`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use resolver::core::alias::AliasMap;
use resolver::core::event::Event;
use resolver::core::slo::{SloMetrics, aggregate};

pub const SLO_REPORT_SCHEMA: &str = "pnp.slo_report.v1";

/// Objectives a healthy event stream stays within.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub max_unknown_rate: f64,
    pub max_mean_time_to_diagnosis_seconds: f64,
    pub min_remediation_success_rate: f64,
    pub min_rollback_verification_rate: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_unknown_rate: 0.20,
            max_mean_time_to_diagnosis_seconds: 30.0,
            min_remediation_success_rate: 0.50,
            min_rollback_verification_rate: 0.90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloReport {
    pub schema: String,
    pub generated_at: String,
    pub event_count: usize,
    pub metrics: SloMetrics,
    pub thresholds: Thresholds,
    pub breaches: Vec<String>,
}

impl SloReport {
    pub fn passed(&self) -> bool {
        self.breaches.is_empty()
    }
}

pub fn build_report(
    events: &[Event],
    aliases: &AliasMap,
    thresholds: Thresholds,
    generated_at: impl Into<String>,
) -> SloReport {
    let metrics = aggregate(events, aliases);
    let breaches = breaches(&metrics, &thresholds);
    SloReport {
        schema: SLO_REPORT_SCHEMA.to_string(),
        generated_at: generated_at.into(),
        event_count: events.len(),
        metrics,
        thresholds,
        breaches,
    }
}

/// Metrics outside their objective. Undefined metrics never breach.
pub fn breaches(metrics: &SloMetrics, thresholds: &Thresholds) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(rate) = metrics.unknown_rate.value
        && rate > thresholds.max_unknown_rate
    {
        out.push(format!(
            "unknown_rate {rate:.3} > {:.3}",
            thresholds.max_unknown_rate
        ));
    }
    if let Some(mean) = metrics.mean_time_to_diagnosis_seconds.value
        && mean > thresholds.max_mean_time_to_diagnosis_seconds
    {
        out.push(format!(
            "mean_time_to_diagnosis_seconds {mean:.3} > {:.3}",
            thresholds.max_mean_time_to_diagnosis_seconds
        ));
    }
    if let Some(rate) = metrics.remediation_success_rate.value
        && rate < thresholds.min_remediation_success_rate
    {
        out.push(format!(
            "remediation_success_rate {rate:.3} < {:.3}",
            thresholds.min_remediation_success_rate
        ));
    }
    if let Some(rate) = metrics.rollback_verification_rate.value
        && rate < thresholds.min_rollback_verification_rate
    {
        out.push(format!(
            "rollback_verification_rate {rate:.3} < {:.3}",
            thresholds.min_rollback_verification_rate
        ));
    }
    out
}

pub fn write_report(path: &Path, report: &SloReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(report).context("serialize slo report")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolver::core::event::EventType;
    use serde_json::json;
    use tempfile::tempdir;

    fn event(run_id: &str, ts: &str, event_type: EventType, payload: serde_json::Value) -> Event {
        Event {
            ts: ts.to_string(),
            run_id: run_id.to_string(),
            step_id: "push".to_string(),
            event_type,
            payload,
        }
    }

    fn aliases() -> AliasMap {
        AliasMap::builtin().expect("aliases")
    }

    #[test]
    fn healthy_stream_has_no_breaches() {
        let events = vec![
            event("r1", "2026-01-01T00:00:00Z", EventType::ErrorSignal, json!({})),
            event(
                "r1",
                "2026-01-01T00:00:01Z",
                EventType::ResolverDecision,
                json!({"code": "PNP_NET_CONNECTIVITY"}),
            ),
            event(
                "r1",
                "2026-01-01T00:00:02Z",
                EventType::Remediation,
                json!({"outcome": "success"}),
            ),
            event("r1", "2026-01-01T00:00:03Z", EventType::ActionableDiagnosis, json!({})),
        ];
        let report = build_report(&events, &aliases(), Thresholds::default(), "now");
        assert!(report.passed(), "{:?}", report.breaches);
        assert_eq!(report.event_count, 4);
        assert_eq!(report.metrics.mean_time_to_diagnosis_seconds.value, Some(3.0));
    }

    #[test]
    fn each_objective_can_breach() {
        let events = vec![
            event("r1", "2026-01-01T00:00:00Z", EventType::ErrorSignal, json!({})),
            event(
                "r1",
                "2026-01-01T00:00:01Z",
                EventType::ResolverDecision,
                json!({"code": "PNP_GIT_UNCLASSIFIED"}),
            ),
            event(
                "r1",
                "2026-01-01T00:00:02Z",
                EventType::Remediation,
                json!({"outcome": "failed"}),
            ),
            event(
                "r1",
                "2026-01-01T00:00:03Z",
                EventType::RollbackVerification,
                json!({"verified": false}),
            ),
            event("r1", "2026-01-01T00:01:00Z", EventType::ActionableDiagnosis, json!({})),
        ];
        let report = build_report(&events, &aliases(), Thresholds::default(), "now");
        assert_eq!(report.breaches.len(), 4);
        assert!(report.breaches[0].starts_with("unknown_rate"));
        assert!(report.breaches[1].starts_with("mean_time_to_diagnosis_seconds"));
    }

    #[test]
    fn empty_stream_passes_and_serializes_nulls() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("pnplog").join("slo_report.json");
        let report = build_report(&[], &aliases(), Thresholds::default(), "now");
        assert!(report.passed());
        write_report(&path, &report).expect("write");

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["schema"], SLO_REPORT_SCHEMA);
        assert!(value["metrics"]["unknown_rate"]["value"].is_null());
    }
}
