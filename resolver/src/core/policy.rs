//! Retry / remediate / abort decisions.
//!
//! The engine is stateless; all per-run mutable state lives in the
//! [`AttemptCounter`] the caller owns and passes in. Given the same counter
//! history, context and elapsed time, decisions are identical (backoff jitter
//! is seeded from the run/step/code/attempt tuple).

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::budget::{backoff_delay, jitter_seed};
use crate::core::codes::{self, DEFAULT_STEP_TIMEOUT_SECS, RetryPolicy};
use crate::core::remediation::{Gate, RemediationOutcome, gate, remediation_rule};
use crate::core::types::{Category, Classification, HandlerName, RunContext, Severity};

/// Tunables shared by every code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Failures of one `(step, code)` tolerated before the circuit opens.
    pub circuit_trip_threshold: u32,

    /// Default per-step time budget when a code has none of its own.
    pub step_timeout_secs: u64,

    /// Jitter upper bound as a fraction of the exponential delay, in `[0, 1]`.
    pub jitter_fraction: f64,

    pub allow_destructive_in_ci: bool,

    /// Interactive remediations at or above this severity ask first.
    pub confirm_severity_threshold: Severity,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            circuit_trip_threshold: 3,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            jitter_fraction: 0.4,
            allow_destructive_in_ci: false,
            confirm_severity_threshold: Severity::Warn,
        }
    }
}

/// Per-code override of the catalog retry policy. Unset fields keep the
/// catalog value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    NotRetryable,
    AttemptsExhausted,
    CircuitOpen,
    TimeoutExceeded,
    AlreadyRemediated,
    RemediationBlocked,
    RemediationFailed,
    RemediationDeclined,
    DryRunSimulated,
    Cancelled,
    InternalFault,
}

impl AbortReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AbortReason::NotRetryable => "not_retryable",
            AbortReason::AttemptsExhausted => "attempts_exhausted",
            AbortReason::CircuitOpen => "circuit_open",
            AbortReason::TimeoutExceeded => "timeout_exceeded",
            AbortReason::AlreadyRemediated => "already_remediated",
            AbortReason::RemediationBlocked => "remediation_blocked",
            AbortReason::RemediationFailed => "remediation_failed",
            AbortReason::RemediationDeclined => "remediation_declined",
            AbortReason::DryRunSimulated => "dry_run_simulated",
            AbortReason::Cancelled => "cancelled",
            AbortReason::InternalFault => "internal_fault",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyAction {
    Retry { delay_ms: u64 },
    Remediate { handler: HandlerName, confirm: bool },
    Abort { reason: AbortReason, detail: String },
}

impl PolicyAction {
    pub fn label(&self) -> &'static str {
        match self {
            PolicyAction::Retry { .. } => "retry",
            PolicyAction::Remediate { .. } => "remediate",
            PolicyAction::Abort { .. } => "abort",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub action: PolicyAction,
    /// Retry slots consumed for this `(step, code)` including this decision.
    pub attempts_used: u32,
    pub handler: Option<HandlerName>,
    pub circuit_open: bool,
    pub dry_run: bool,
}

impl PolicyDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self.action, PolicyAction::Retry { .. })
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        match &self.action {
            PolicyAction::Abort { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationState {
    #[default]
    NotAttempted,
    Succeeded,
    Failed,
    Simulated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptEntry {
    pub failures: u32,
    pub retries_granted: u32,
    pub remediation: RemediationState,
}

/// Per-run attempt bookkeeping keyed by `(step_id, code)`.
#[derive(Debug, Default)]
pub struct AttemptCounter {
    entries: HashMap<(String, String), AttemptEntry>,
}

impl AttemptCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, step_id: &str, code: &str) -> AttemptEntry {
        self.entries
            .get(&(step_id.to_string(), code.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn entry_mut(&mut self, step_id: &str, code: &str) -> &mut AttemptEntry {
        self.entries
            .entry((step_id.to_string(), code.to_string()))
            .or_default()
    }
}

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    config: PolicyConfig,
    overrides: BTreeMap<String, RetryOverride>,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig, overrides: BTreeMap<String, RetryOverride>) -> Self {
        Self { config, overrides }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Effective retry policy, `None` when the code is never retried.
    pub fn retry_policy(&self, code: &str) -> Option<RetryPolicy> {
        if codes::is_denylisted(code) {
            return None;
        }
        let catalog = codes::lookup(code).and_then(|info| info.retry);
        let policy = match self.overrides.get(code) {
            None => catalog?,
            Some(o) => {
                let base = catalog.unwrap_or(RetryPolicy {
                    max_attempts: 0,
                    base_delay_ms: 250,
                    max_delay_ms: 2_000,
                    timeout_secs: self.config.step_timeout_secs,
                });
                RetryPolicy {
                    max_attempts: o.max_attempts.unwrap_or(base.max_attempts),
                    base_delay_ms: o.base_delay_ms.unwrap_or(base.base_delay_ms),
                    max_delay_ms: o.max_delay_ms.unwrap_or(base.max_delay_ms),
                    timeout_secs: o.timeout_secs.unwrap_or(base.timeout_secs),
                }
            }
        };
        (policy.max_attempts > 0).then_some(policy)
    }

    /// Total wall-clock budget for one step failing with `code`.
    pub fn step_budget(&self, code: &str) -> Duration {
        let secs = self
            .overrides
            .get(code)
            .and_then(|o| o.timeout_secs)
            .or_else(|| codes::lookup(code).and_then(|info| info.retry).map(|p| p.timeout_secs))
            .unwrap_or(self.config.step_timeout_secs);
        Duration::from_secs(secs)
    }

    /// Decide what to do about one observed failure.
    pub fn decide(
        &self,
        classification: &Classification,
        ctx: &RunContext,
        counter: &mut AttemptCounter,
        elapsed: Duration,
    ) -> PolicyDecision {
        let code = classification.code.as_str();
        let entry = counter.entry_mut(&ctx.step_id, code);
        entry.failures += 1;

        if Category::from_code(code) == Some(Category::Internal) {
            return self.abort(classification, ctx, entry, AbortReason::InternalFault, "internal failures are never retried");
        }
        if entry.failures > self.config.circuit_trip_threshold {
            let detail = format!(
                "{} failures for {code} exceed the circuit threshold of {}",
                entry.failures, self.config.circuit_trip_threshold
            );
            let mut decision = self.abort(classification, ctx, entry, AbortReason::CircuitOpen, &detail);
            decision.circuit_open = true;
            return decision;
        }
        let budget = self.step_budget(code);
        if elapsed >= budget {
            let detail = format!("step exceeded its {}s budget", budget.as_secs());
            return self.abort(classification, ctx, entry, AbortReason::TimeoutExceeded, &detail);
        }

        let rule = remediation_rule(classification.handler);
        if rule.mutating {
            match entry.remediation {
                RemediationState::Succeeded | RemediationState::Simulated => {
                    let detail = format!("{} already ran for this step", classification.handler);
                    return self.abort(classification, ctx, entry, AbortReason::AlreadyRemediated, &detail);
                }
                RemediationState::Failed => {}
                RemediationState::NotAttempted => {
                    return match gate(rule, ctx, self.config.allow_destructive_in_ci) {
                        Gate::Blocked(reason) => {
                            self.abort(classification, ctx, entry, AbortReason::RemediationBlocked, &reason)
                        }
                        Gate::Allowed => {
                            let confirm = ctx.interactive()
                                && rule.requires_confirmation
                                && classification.severity >= self.config.confirm_severity_threshold;
                            entry.retries_granted += 1;
                            self.decision(
                                classification,
                                ctx,
                                entry,
                                PolicyAction::Remediate {
                                    handler: classification.handler,
                                    confirm,
                                },
                            )
                        }
                    };
                }
            }
        }

        self.retry_or(classification, ctx, entry, None)
    }

    /// Fold a remediation outcome back into the counter and pick the follow-up.
    ///
    /// Success re-runs the operation immediately; a failed remediation falls
    /// back to ordinary retry eligibility.
    pub fn after_remediation(
        &self,
        classification: &Classification,
        ctx: &RunContext,
        counter: &mut AttemptCounter,
        outcome: &RemediationOutcome,
        elapsed: Duration,
    ) -> PolicyDecision {
        let code = classification.code.as_str();
        let entry = counter.entry_mut(&ctx.step_id, code);
        match outcome {
            RemediationOutcome::Simulated { .. } => {
                entry.remediation = RemediationState::Simulated;
                self.abort(
                    classification,
                    ctx,
                    entry,
                    AbortReason::DryRunSimulated,
                    "dry run: remediation simulated, nothing executed",
                )
            }
            RemediationOutcome::Success { .. } => {
                entry.remediation = RemediationState::Succeeded;
                self.decision(classification, ctx, entry, PolicyAction::Retry { delay_ms: 0 })
            }
            RemediationOutcome::Failed { detail } => {
                entry.remediation = RemediationState::Failed;
                let budget = self.step_budget(code);
                if elapsed >= budget {
                    let detail = format!("step exceeded its {}s budget", budget.as_secs());
                    return self.abort(classification, ctx, entry, AbortReason::TimeoutExceeded, &detail);
                }
                self.retry_or(classification, ctx, entry, Some(detail.as_str()))
            }
        }
    }

    /// Abort because the user declined a confirmation prompt.
    pub fn declined(&self, classification: &Classification, ctx: &RunContext, counter: &AttemptCounter) -> PolicyDecision {
        let entry = counter.get(&ctx.step_id, &classification.code);
        self.abort(
            classification,
            ctx,
            &entry,
            AbortReason::RemediationDeclined,
            "remediation declined by user",
        )
    }

    /// Abort because a backoff wait was cancelled.
    pub fn cancelled(&self, classification: &Classification, ctx: &RunContext, counter: &AttemptCounter) -> PolicyDecision {
        let entry = counter.get(&ctx.step_id, &classification.code);
        self.abort(classification, ctx, &entry, AbortReason::Cancelled, "cancelled by user")
    }

    fn retry_or(
        &self,
        classification: &Classification,
        ctx: &RunContext,
        entry: &mut AttemptEntry,
        remediation_failure: Option<&str>,
    ) -> PolicyDecision {
        let code = classification.code.as_str();
        let Some(policy) = self.retry_policy(code) else {
            return match remediation_failure {
                Some(detail) => self.abort(classification, ctx, entry, AbortReason::RemediationFailed, detail),
                None => self.abort(classification, ctx, entry, AbortReason::NotRetryable, "code is not retryable"),
            };
        };
        if entry.retries_granted >= policy.max_attempts {
            let reason = if remediation_failure.is_some() {
                AbortReason::RemediationFailed
            } else {
                AbortReason::AttemptsExhausted
            };
            let detail = format!("{} of {} retries used", entry.retries_granted, policy.max_attempts);
            return self.abort(classification, ctx, entry, reason, &detail);
        }
        let attempt = entry.retries_granted;
        entry.retries_granted += 1;
        let seed = jitter_seed(&ctx.run_id, &ctx.step_id, code, attempt);
        let delay = backoff_delay(
            policy.base_delay_ms,
            policy.max_delay_ms,
            attempt,
            self.config.jitter_fraction,
            seed,
        );
        self.decision(
            classification,
            ctx,
            entry,
            PolicyAction::Retry {
                delay_ms: delay.as_millis() as u64,
            },
        )
    }

    fn abort(
        &self,
        classification: &Classification,
        ctx: &RunContext,
        entry: &AttemptEntry,
        reason: AbortReason,
        detail: &str,
    ) -> PolicyDecision {
        self.decision(
            classification,
            ctx,
            entry,
            PolicyAction::Abort {
                reason,
                detail: detail.to_string(),
            },
        )
    }

    fn decision(
        &self,
        classification: &Classification,
        ctx: &RunContext,
        entry: &AttemptEntry,
        action: PolicyAction,
    ) -> PolicyDecision {
        PolicyDecision {
            action,
            attempts_used: entry.retries_granted,
            handler: (classification.handler != HandlerName::Fallback).then_some(classification.handler),
            circuit_open: false,
            dry_run: ctx.dry_run,
        }
    }
}
