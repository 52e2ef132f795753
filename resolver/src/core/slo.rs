//! SLO aggregation over the persisted event stream.
//!
//! Pure and re-runnable: the same slice of events always yields the same
//! metrics. Metrics with no relevant events report `value = None`.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::core::alias::AliasMap;
use crate::core::codes::UNCLASSIFIED;
use crate::core::event::{Event, EventType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioMetric {
    pub value: Option<f64>,
    pub numerator: u64,
    pub denominator: u64,
}

impl RatioMetric {
    fn new(numerator: u64, denominator: u64) -> Self {
        let value = (denominator > 0).then(|| numerator as f64 / denominator as f64);
        Self {
            value,
            numerator,
            denominator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanMetric {
    pub value: Option<f64>,
    pub samples: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SloMetrics {
    pub unknown_rate: RatioMetric,
    pub mean_time_to_diagnosis_seconds: MeanMetric,
    pub remediation_success_rate: RatioMetric,
    pub rollback_verification_rate: RatioMetric,
}

#[derive(Default)]
struct RunTimes {
    first_error: Option<DateTime<FixedOffset>>,
    first_diagnosis: Option<DateTime<FixedOffset>>,
}

pub fn aggregate(events: &[Event], aliases: &AliasMap) -> SloMetrics {
    let mut decisions = 0u64;
    let mut unknown = 0u64;
    let mut remediation_success = 0u64;
    let mut remediation_failed = 0u64;
    let mut rollbacks = 0u64;
    let mut rollbacks_verified = 0u64;
    let mut runs: BTreeMap<&str, RunTimes> = BTreeMap::new();

    for event in events {
        match event.event_type {
            EventType::ResolverDecision => {
                decisions += 1;
                if event
                    .payload_str("code")
                    .is_some_and(|code| aliases.canonicalize(code) == UNCLASSIFIED)
                {
                    unknown += 1;
                }
            }
            EventType::Remediation => match event.payload_str("outcome") {
                Some("success") => remediation_success += 1,
                Some("failed") => remediation_failed += 1,
                _ => {}
            },
            EventType::RollbackVerification => {
                if let Some(verified) = event.payload_bool("verified") {
                    rollbacks += 1;
                    if verified {
                        rollbacks_verified += 1;
                    }
                }
            }
            EventType::ErrorSignal | EventType::ActionableDiagnosis => {
                let Ok(ts) = DateTime::parse_from_rfc3339(&event.ts) else {
                    continue;
                };
                let times = runs.entry(event.run_id.as_str()).or_default();
                let slot = if event.event_type == EventType::ErrorSignal {
                    &mut times.first_error
                } else {
                    &mut times.first_diagnosis
                };
                if slot.is_none_or(|current| ts < current) {
                    *slot = Some(ts);
                }
            }
            EventType::Retry | EventType::Other => {}
        }
    }

    let deltas: Vec<f64> = runs
        .values()
        .filter_map(|times| {
            let delta = times.first_diagnosis? - times.first_error?;
            let seconds = delta.num_milliseconds() as f64 / 1_000.0;
            (seconds >= 0.0).then_some(seconds)
        })
        .collect();
    let mean = (!deltas.is_empty()).then(|| deltas.iter().sum::<f64>() / deltas.len() as f64);

    SloMetrics {
        unknown_rate: RatioMetric::new(unknown, decisions),
        mean_time_to_diagnosis_seconds: MeanMetric {
            value: mean,
            samples: deltas.len() as u64,
        },
        remediation_success_rate: RatioMetric::new(
            remediation_success,
            remediation_success + remediation_failed,
        ),
        rollback_verification_rate: RatioMetric::new(rollbacks_verified, rollbacks),
    }
}
