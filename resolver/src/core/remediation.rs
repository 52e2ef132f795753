//! Remediation outcomes and the per-handler execution matrix.
//!
//! The matrix decides *whether* a handler may run in a given context; the
//! handlers themselves live in `io::remediation`.

use serde::{Deserialize, Serialize};

use crate::core::types::{HandlerName, RunContext};

/// Result of one remediation invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemediationOutcome {
    Success { detail: String },
    Failed { detail: String },
    /// Dry run: nothing executed, `planned` lists what would have run.
    Simulated { detail: String, planned: Vec<String> },
}

impl RemediationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RemediationOutcome::Success { .. } => "success",
            RemediationOutcome::Failed { .. } => "failed",
            RemediationOutcome::Simulated { .. } => "simulated",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            RemediationOutcome::Success { detail }
            | RemediationOutcome::Failed { detail }
            | RemediationOutcome::Simulated { detail, .. } => detail,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, RemediationOutcome::Success { .. })
    }
}

/// Post-rollback verification result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub attempted: bool,
    pub verified: bool,
    pub detail: String,
}

/// Execution policy for one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemediationRule {
    /// Handler changes repository or user state. Advisory handlers never run
    /// from the policy engine.
    pub mutating: bool,
    pub destructive: bool,
    pub allow_ci: bool,
    pub requires_confirmation: bool,
}

const ADVISORY: RemediationRule = RemediationRule {
    mutating: false,
    destructive: false,
    allow_ci: true,
    requires_confirmation: false,
};

const fn mutating(destructive: bool, allow_ci: bool, requires_confirmation: bool) -> RemediationRule {
    RemediationRule {
        mutating: true,
        destructive,
        allow_ci,
        requires_confirmation,
    }
}

pub fn remediation_rule(handler: HandlerName) -> RemediationRule {
    match handler {
        HandlerName::DubiousOwnership => mutating(false, true, true),
        HandlerName::InvalidObject => mutating(true, false, true),
        HandlerName::MissingRemote => mutating(false, true, true),
        HandlerName::LockContention => mutating(false, true, false),
        HandlerName::UpstreamMissing => mutating(false, true, false),
        HandlerName::DivergedBranch => mutating(false, true, false),
        HandlerName::RefConflict => mutating(true, false, true),
        HandlerName::Fallback
        | HandlerName::InternetConErr
        | HandlerName::AuthFailure
        | HandlerName::LargeFileRejection
        | HandlerName::HookDeclined
        | HandlerName::SubmoduleInconsistent
        | HandlerName::ProtectedBranch
        | HandlerName::DirtyWorktree
        | HandlerName::LineEndings
        | HandlerName::DetachedHead
        | HandlerName::ConfigInvalid => ADVISORY,
    }
}

/// Whether a handler may run in this context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Allowed,
    Blocked(String),
}

pub fn gate(rule: RemediationRule, ctx: &RunContext, allow_destructive_in_ci: bool) -> Gate {
    if rule.destructive {
        if ctx.ci_mode && !allow_destructive_in_ci {
            return Gate::Blocked("destructive remediation disabled in CI mode".to_string());
        }
        return Gate::Allowed;
    }
    if ctx.ci_mode && !rule.allow_ci {
        return Gate::Blocked("action disabled in CI mode".to_string());
    }
    Gate::Allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ctx(ci_mode: bool) -> RunContext {
        RunContext {
            path: PathBuf::from("/repo"),
            repo: "repo".to_string(),
            branch: "main".to_string(),
            remote: "origin".to_string(),
            ci_mode,
            dry_run: false,
            run_id: "run".to_string(),
            step_id: "push".to_string(),
        }
    }

    #[test]
    fn destructive_handlers_blocked_in_ci_without_opt_in() {
        let rule = remediation_rule(HandlerName::RefConflict);
        assert!(matches!(gate(rule, &ctx(true), false), Gate::Blocked(_)));
        assert_eq!(gate(rule, &ctx(true), true), Gate::Allowed);
        assert_eq!(gate(rule, &ctx(false), false), Gate::Allowed);
    }

    #[test]
    fn non_destructive_handlers_follow_allow_ci() {
        let rule = remediation_rule(HandlerName::LockContention);
        assert_eq!(gate(rule, &ctx(true), false), Gate::Allowed);
        let ci_only_off = RemediationRule {
            allow_ci: false,
            ..rule
        };
        assert_eq!(
            gate(ci_only_off, &ctx(true), false),
            Gate::Blocked("action disabled in CI mode".to_string())
        );
    }

    #[test]
    fn advisory_handlers_are_not_mutating() {
        for handler in [HandlerName::Fallback, HandlerName::InternetConErr, HandlerName::AuthFailure] {
            assert!(!remediation_rule(handler).mutating);
        }
    }

    #[test]
    fn outcome_serializes_with_outcome_tag() {
        let outcome = RemediationOutcome::Simulated {
            detail: "dry run".to_string(),
            planned: vec!["git fetch origin".to_string()],
        };
        let json = serde_json::to_value(&outcome).expect("json");
        assert_eq!(json["outcome"], "simulated");
        assert_eq!(json["planned"][0], "git fetch origin");
    }
}
