//! Shared deterministic types for the resolver core.
//!
//! These types define stable contracts between the classifier, the policy
//! engine, remediation handlers and the envelope builder. They carry no I/O.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Ordered severity of a classified failure.
///
/// Ordering is meaningful: confirmation thresholds compare with `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error-code family, derived from the segment after `PNP_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Git,
    Config,
    Network,
    Release,
    Internal,
}

impl Category {
    /// Derive the category from a code such as `PNP_NET_TIMEOUT`.
    pub fn from_code(code: &str) -> Option<Category> {
        let rest = code.strip_prefix("PNP_")?;
        let (family, _) = rest.split_once('_')?;
        match family {
            "GIT" => Some(Category::Git),
            "CFG" => Some(Category::Config),
            "NET" => Some(Category::Network),
            "REL" => Some(Category::Release),
            "INT" => Some(Category::Internal),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Git => "git",
            Category::Config => "config",
            Category::Network => "network",
            Category::Release => "release",
            Category::Internal => "internal",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of a remediation handler referenced by a classification rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerName {
    Fallback,
    InternetConErr,
    DubiousOwnership,
    InvalidObject,
    MissingRemote,
    UpstreamMissing,
    AuthFailure,
    LargeFileRejection,
    HookDeclined,
    SubmoduleInconsistent,
    ProtectedBranch,
    DivergedBranch,
    DirtyWorktree,
    LineEndings,
    DetachedHead,
    RefConflict,
    LockContention,
    ConfigInvalid,
}

impl HandlerName {
    pub const ALL: [HandlerName; 18] = [
        HandlerName::Fallback,
        HandlerName::InternetConErr,
        HandlerName::DubiousOwnership,
        HandlerName::InvalidObject,
        HandlerName::MissingRemote,
        HandlerName::UpstreamMissing,
        HandlerName::AuthFailure,
        HandlerName::LargeFileRejection,
        HandlerName::HookDeclined,
        HandlerName::SubmoduleInconsistent,
        HandlerName::ProtectedBranch,
        HandlerName::DivergedBranch,
        HandlerName::DirtyWorktree,
        HandlerName::LineEndings,
        HandlerName::DetachedHead,
        HandlerName::RefConflict,
        HandlerName::LockContention,
        HandlerName::ConfigInvalid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HandlerName::Fallback => "fallback",
            HandlerName::InternetConErr => "internet_con_err",
            HandlerName::DubiousOwnership => "dubious_ownership",
            HandlerName::InvalidObject => "invalid_object",
            HandlerName::MissingRemote => "missing_remote",
            HandlerName::UpstreamMissing => "upstream_missing",
            HandlerName::AuthFailure => "auth_failure",
            HandlerName::LargeFileRejection => "large_file_rejection",
            HandlerName::HookDeclined => "hook_declined",
            HandlerName::SubmoduleInconsistent => "submodule_inconsistent",
            HandlerName::ProtectedBranch => "protected_branch",
            HandlerName::DivergedBranch => "diverged_branch",
            HandlerName::DirtyWorktree => "dirty_worktree",
            HandlerName::LineEndings => "line_endings",
            HandlerName::DetachedHead => "detached_head",
            HandlerName::RefConflict => "ref_conflict",
            HandlerName::LockContention => "lock_contention",
            HandlerName::ConfigInvalid => "config_invalid",
        }
    }
}

impl fmt::Display for HandlerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one normalized diagnostic.
///
/// `code` is always canonical once it leaves the resolver pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub code: String,
    pub severity: Severity,
    pub handler: HandlerName,
    pub matched_rule_id: String,
}

/// Ambient facts about the invocation a failure happened in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub path: PathBuf,
    pub repo: String,
    pub branch: String,
    pub remote: String,
    pub ci_mode: bool,
    pub dry_run: bool,
    pub run_id: String,
    pub step_id: String,
}

impl RunContext {
    /// Copy of this context bound to another step.
    pub fn for_step(&self, step_id: &str) -> RunContext {
        RunContext {
            step_id: step_id.to_string(),
            ..self.clone()
        }
    }

    /// Interactive sessions may confirm destructive actions.
    pub fn interactive(&self) -> bool {
        !self.ci_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_follows_code_family() {
        assert_eq!(Category::from_code("PNP_NET_TIMEOUT"), Some(Category::Network));
        assert_eq!(
            Category::from_code("PNP_CFG_IDENTITY_MISSING"),
            Some(Category::Config)
        );
        assert_eq!(Category::from_code("PNP_INT_HANDLER_FAULT"), Some(Category::Internal));
        assert_eq!(Category::from_code("PNP_XYZ_THING"), None);
        assert_eq!(Category::from_code("NET_TIMEOUT"), None);
    }

    #[test]
    fn severity_orders_from_info_to_critical() {
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn handler_names_serialize_snake_case() {
        for handler in HandlerName::ALL {
            let json = serde_json::to_string(&handler).expect("serialize");
            assert_eq!(json, format!("\"{}\"", handler.as_str()));
        }
    }
}
