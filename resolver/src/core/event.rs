//! Append-only event records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ResolverDecision,
    Remediation,
    RollbackVerification,
    ErrorSignal,
    ActionableDiagnosis,
    Retry,
    /// Event types written by other tools; kept so old streams still load.
    #[serde(other)]
    Other,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::ResolverDecision => "resolver_decision",
            EventType::Remediation => "remediation",
            EventType::RollbackVerification => "rollback_verification",
            EventType::ErrorSignal => "error_signal",
            EventType::ActionableDiagnosis => "actionable_diagnosis",
            EventType::Retry => "retry",
            EventType::Other => "other",
        }
    }
}

/// One line of `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// RFC 3339 UTC timestamp.
    pub ts: String,
    pub run_id: String,
    #[serde(default)]
    pub step_id: String,
    pub event_type: EventType,
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn payload_bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_event_types_deserialize_as_other() {
        let event: Event = serde_json::from_str(
            r#"{"ts":"2026-01-01T00:00:00Z","run_id":"r","step_id":"push","event_type":"custom","payload":{}}"#,
        )
        .expect("parse");
        assert_eq!(event.event_type, EventType::Other);
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let event: Event =
            serde_json::from_str(r#"{"ts":"t","run_id":"r","event_type":"retry"}"#).expect("parse");
        assert_eq!(event.event_type, EventType::Retry);
        assert!(event.payload.is_null());
        assert_eq!(event.payload_str("code"), None);
    }
}
