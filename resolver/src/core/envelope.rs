//! Versioned error envelope: the one record a terminal failure produces.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::alias::AliasMap;
use crate::core::codes::{self, EMPTY_STDERR, UNCLASSIFIED};
use crate::core::normalize::{redact, truncate_chars};
use crate::core::policy::PolicyDecision;
use crate::core::remediation::{RemediationOutcome, RollbackReport};
use crate::core::types::{Category, Classification, RunContext, Severity};

pub const ENVELOPE_SCHEMA: &str = "pnp.error_envelope.v1";
pub const ENVELOPE_SCHEMA_VERSION: u32 = 1;
pub const STDERR_EXCERPT_CHARS: usize = 300;
pub const EVENTS_FILE_NAME: &str = "events.jsonl";

/// Run context plus the decision trail behind the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeContext {
    pub path: String,
    pub repo: String,
    pub branch: String,
    pub remote: String,
    pub ci_mode: bool,
    pub dry_run: bool,
    pub run_id: String,
    pub step_id: String,
    pub matched_rule_id: String,
    pub decision: PolicyDecision,
    pub remediation: Option<RemediationOutcome>,
    pub rollback: Option<RollbackReport>,
    /// Read-only probe output attached by advisory handlers.
    pub diagnostic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub schema: String,
    pub schema_version: u32,
    pub generated_at: String,
    pub code: String,
    pub severity: Severity,
    pub category: Category,
    pub actionable: bool,
    pub message: String,
    pub operation: String,
    pub step: String,
    pub stderr_excerpt: String,
    pub raw_ref: String,
    pub retryable: bool,
    pub user_action_required: bool,
    pub suggested_fix: String,
    pub context: EnvelopeContext,
}

/// Assemble an envelope. Pure: timestamps and remediation details are attached
/// by the caller through the `with_*` builders.
pub fn build(
    classification: &Classification,
    decision: &PolicyDecision,
    ctx: &RunContext,
    raw_message: &str,
    operation: &str,
) -> ErrorEnvelope {
    let code = classification.code.as_str();
    let info = codes::metadata(code);
    let operation = if operation.trim().is_empty() {
        ctx.step_id.clone()
    } else {
        operation.trim().to_string()
    };
    ErrorEnvelope {
        schema: ENVELOPE_SCHEMA.to_string(),
        schema_version: ENVELOPE_SCHEMA_VERSION,
        generated_at: String::new(),
        code: code.to_string(),
        severity: classification.severity,
        category: Category::from_code(code).unwrap_or(Category::Internal),
        actionable: code != UNCLASSIFIED && code != EMPTY_STDERR,
        message: format!("{operation} failed: {}", info.summary),
        operation,
        step: ctx.step_id.clone(),
        stderr_excerpt: truncate_chars(redact(raw_message).trim(), STDERR_EXCERPT_CHARS),
        raw_ref: format!("{EVENTS_FILE_NAME}#run={}&step={}", ctx.run_id, ctx.step_id),
        retryable: info.retry.is_some() && !codes::is_denylisted(code),
        user_action_required: info.user_action_required,
        suggested_fix: info.hint.to_string(),
        context: EnvelopeContext {
            path: ctx.path.display().to_string(),
            repo: ctx.repo.clone(),
            branch: ctx.branch.clone(),
            remote: ctx.remote.clone(),
            ci_mode: ctx.ci_mode,
            dry_run: ctx.dry_run,
            run_id: ctx.run_id.clone(),
            step_id: ctx.step_id.clone(),
            matched_rule_id: classification.matched_rule_id.clone(),
            decision: decision.clone(),
            remediation: None,
            rollback: None,
            diagnostic: None,
        },
    }
}

impl ErrorEnvelope {
    pub fn with_generated_at(mut self, generated_at: impl Into<String>) -> Self {
        self.generated_at = generated_at.into();
        self
    }

    pub fn with_remediation(mut self, outcome: Option<RemediationOutcome>, rollback: Option<RollbackReport>) -> Self {
        self.context.remediation = outcome;
        self.context.rollback = rollback;
        self
    }

    pub fn with_diagnostic(mut self, diagnostic: Option<String>) -> Self {
        self.context.diagnostic = diagnostic.map(|d| redact(&d));
        self
    }

    /// Default one-line rendering for terminals.
    pub fn summary_line(&self) -> String {
        format!("[{}] {}. Fix: {}", self.code, self.message, self.suggested_fix)
    }
}

/// Rewrite a persisted envelope's deprecated code in place.
///
/// Works on raw JSON so envelopes written by older versions, whose context
/// shape may differ, can still be read.
pub fn migrate_envelope_value(value: &mut Value, aliases: &AliasMap) -> bool {
    let Some(code) = value.get("code").and_then(Value::as_str) else {
        return false;
    };
    let canonical = aliases.canonicalize(code);
    if canonical == code {
        return false;
    }
    value["code"] = Value::String(canonical);
    true
}
