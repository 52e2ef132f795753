//! Static catalog of stable error codes.
//!
//! Every code the resolver can emit has one entry: severity, default retry
//! policy (absent for non-retryable codes), whether a human has to act, and
//! the one-line summary/hint pair used in envelopes.

use crate::core::types::Severity;

/// Default total time budget for one step when no per-code budget exists.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 45;

pub const UNCLASSIFIED: &str = "PNP_GIT_UNCLASSIFIED";
pub const EMPTY_STDERR: &str = "PNP_GIT_EMPTY_STDERR";
pub const WORKFLOW_EXIT_NONZERO: &str = "PNP_INT_WORKFLOW_EXIT_NONZERO";
pub const UNHANDLED_EXCEPTION: &str = "PNP_INT_UNHANDLED_EXCEPTION";
pub const KEYBOARD_INTERRUPT: &str = "PNP_INT_KEYBOARD_INTERRUPT";
pub const RULE_TABLE_INVALID: &str = "PNP_INT_RULE_TABLE_INVALID";
pub const HANDLER_FAULT: &str = "PNP_INT_HANDLER_FAULT";

/// Codes that are never retried, whatever the configuration says.
pub const RETRY_DENYLIST: [&str; 5] = [
    "PNP_GIT_INVALID_OBJECT",
    EMPTY_STDERR,
    UNCLASSIFIED,
    WORKFLOW_EXIT_NONZERO,
    UNHANDLED_EXCEPTION,
];

/// Backoff and budget parameters for one retryable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_secs: u64,
}

const fn retry(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64, timeout_secs: u64) -> Option<RetryPolicy> {
    Some(RetryPolicy {
        max_attempts,
        base_delay_ms,
        max_delay_ms,
        timeout_secs,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeInfo {
    pub code: &'static str,
    pub severity: Severity,
    pub retry: Option<RetryPolicy>,
    pub user_action_required: bool,
    pub summary: &'static str,
    pub hint: &'static str,
}

const fn info(
    code: &'static str,
    severity: Severity,
    retry: Option<RetryPolicy>,
    user_action_required: bool,
    summary: &'static str,
    hint: &'static str,
) -> CodeInfo {
    CodeInfo {
        code,
        severity,
        retry,
        user_action_required,
        summary,
        hint,
    }
}

pub const CATALOG: &[CodeInfo] = &[
    // internal
    info(
        UNHANDLED_EXCEPTION,
        Severity::Error,
        None,
        true,
        "unexpected internal failure",
        "Re-run with RUST_LOG=resolver=debug and attach the debug bundle to a bug report",
    ),
    info(
        KEYBOARD_INTERRUPT,
        Severity::Warn,
        None,
        false,
        "cancelled by user",
        "Re-run the step when ready",
    ),
    info(
        "PNP_INT_EOF_INTERRUPT",
        Severity::Warn,
        None,
        false,
        "input closed before the step finished",
        "Re-run the step from an interactive terminal or pass --ci",
    ),
    info(
        WORKFLOW_EXIT_NONZERO,
        Severity::Error,
        None,
        true,
        "workflow step exited with a nonzero status",
        "Inspect the step output above and re-run once fixed",
    ),
    info(
        RULE_TABLE_INVALID,
        Severity::Critical,
        None,
        true,
        "classification rule table failed validation",
        "Run `resolver rules` to list the violations",
    ),
    info(
        HANDLER_FAULT,
        Severity::Error,
        None,
        true,
        "remediation handler failed unexpectedly",
        "Apply the fix manually and attach the debug bundle to a bug report",
    ),
    // git
    info(
        "PNP_GIT_REPOSITORY_FAIL",
        Severity::Error,
        None,
        true,
        "repository checks failed",
        "Make sure the path is a git repository with at least one commit",
    ),
    info(
        "PNP_GIT_MACHETE_FAIL",
        Severity::Error,
        None,
        true,
        "branch layout sync failed",
        "Run `git machete status` and fix the reported branch layout",
    ),
    info(
        "PNP_GIT_COMMIT_FAIL",
        Severity::Error,
        None,
        true,
        "commit failed",
        "Inspect `git status` and commit manually",
    ),
    info(
        "PNP_GIT_DUBIOUS_OWNERSHIP",
        Severity::Warn,
        retry(1, 50, 200, 12),
        false,
        "repository owned by another user",
        "Run `git config --global --add safe.directory <path>`",
    ),
    info(
        "PNP_GIT_INVALID_OBJECT",
        Severity::Error,
        None,
        true,
        "repository object database is corrupt",
        "Run `git fsck --full`, then `git reset` to rebuild the index",
    ),
    info(
        "PNP_GIT_HOOK_DECLINED",
        Severity::Error,
        None,
        true,
        "a git hook rejected the operation",
        "Fix the issues reported by the hook, then retry",
    ),
    info(
        "PNP_GIT_SUBMODULE_INCONSISTENT",
        Severity::Error,
        None,
        true,
        "submodule state is inconsistent",
        "Run `git submodule sync --recursive && git submodule update --init --recursive`",
    ),
    info(
        "PNP_GIT_NON_FAST_FORWARD",
        Severity::Error,
        retry(1, 100, 300, 20),
        true,
        "remote branch has commits the local branch lacks",
        "Run `git pull --rebase` and push again",
    ),
    info(
        "PNP_GIT_PROTECTED_BRANCH",
        Severity::Error,
        None,
        true,
        "push to a protected branch was rejected",
        "Push to a feature branch and open a pull request",
    ),
    info(
        "PNP_GIT_DIRTY_WORKTREE",
        Severity::Error,
        None,
        true,
        "local changes block the operation",
        "Commit or stash your changes, then retry",
    ),
    info(
        "PNP_GIT_LINE_ENDING_NORMALIZATION",
        Severity::Warn,
        retry(3, 50, 200, 20),
        false,
        "line endings are being normalized",
        "Add a .gitattributes file or set core.autocrlf consistently",
    ),
    info(
        "PNP_GIT_INDEX_WORKTREE_MISMATCH",
        Severity::Error,
        retry(3, 50, 200, 20),
        false,
        "index and worktree disagree",
        "Run `git update-index --refresh`, then retry",
    ),
    info(
        "PNP_GIT_DETACHED_HEAD",
        Severity::Error,
        None,
        true,
        "HEAD is detached",
        "Run `git switch <branch>` before retrying",
    ),
    info(
        "PNP_GIT_REF_CONFLICT",
        Severity::Error,
        None,
        true,
        "a ref or tag already exists",
        "Delete or rename the conflicting tag, then retry",
    ),
    info(
        "PNP_GIT_LOCK_CONTENTION",
        Severity::Error,
        retry(1, 50, 200, 12),
        false,
        "another git process holds the repository lock",
        "Wait for other git processes to finish or remove a stale .git/index.lock",
    ),
    info(
        "PNP_GIT_UPSTREAM_MISSING",
        Severity::Error,
        retry(1, 50, 200, 12),
        false,
        "current branch has no upstream",
        "Run `git push --set-upstream <remote> <branch>`",
    ),
    info(
        UNCLASSIFIED,
        Severity::Warn,
        None,
        true,
        "failure did not match any known pattern",
        "Inspect the stderr excerpt and the debug bundle",
    ),
    info(
        EMPTY_STDERR,
        Severity::Warn,
        None,
        true,
        "command failed without diagnostic output",
        "Re-run the command manually to see its output",
    ),
    // network
    info(
        "PNP_NET_PUSH_FAIL",
        Severity::Error,
        retry(2, 200, 1_000, 20),
        false,
        "push failed",
        "Check the remote and your network, then retry",
    ),
    info(
        "PNP_NET_CONNECTIVITY",
        Severity::Error,
        retry(3, 250, 2_000, 30),
        false,
        "cannot reach the remote host",
        "Check your network connection and DNS, then retry",
    ),
    info(
        "PNP_NET_REMOTE_URL_INVALID",
        Severity::Error,
        None,
        true,
        "remote URL is unreachable or invalid",
        "Check `git remote -v` and fix the remote URL",
    ),
    info(
        "PNP_NET_REMOTE_UNREADABLE",
        Severity::Error,
        retry(1, 100, 500, 15),
        true,
        "could not read from the remote",
        "Run `git remote add origin <url>` or fix the existing remote",
    ),
    info(
        "PNP_NET_AUTH_FAIL",
        Severity::Error,
        None,
        true,
        "authentication with the remote failed",
        "Refresh your credentials or SSH key and retry",
    ),
    info(
        "PNP_NET_LARGE_FILE_REJECTED",
        Severity::Error,
        None,
        true,
        "the remote rejected a file over its size limit",
        "Remove the large file from history or track it with Git LFS",
    ),
    info(
        "PNP_NET_TLS_FAIL",
        Severity::Error,
        None,
        true,
        "TLS handshake or certificate validation failed",
        "Check system certificates and proxy settings",
    ),
    info(
        "PNP_NET_TIMEOUT",
        Severity::Error,
        retry(2, 250, 1_000, 20),
        false,
        "network operation timed out",
        "Retry on a stable connection",
    ),
    // release
    info(
        "PNP_REL_HOOKS_FAIL",
        Severity::Error,
        None,
        true,
        "pre-release hooks failed",
        "Fix the failing hook command, then retry",
    ),
    info(
        "PNP_REL_PUBLISH_FAIL",
        Severity::Error,
        None,
        true,
        "publishing the tag failed",
        "Check the tag and remote, then retry the publish step",
    ),
    info(
        "PNP_REL_RELEASE_FAIL",
        Severity::Error,
        None,
        true,
        "creating the release failed",
        "Check the release API response and your token scopes",
    ),
    info(
        "PNP_REL_GH_AUTH_REQUIRED",
        Severity::Error,
        None,
        true,
        "GitHub CLI is not authenticated",
        "Run `gh auth login` or export GITHUB_TOKEN",
    ),
    info(
        "PNP_REL_RELEASE_EXISTS",
        Severity::Warn,
        None,
        true,
        "a release for this tag already exists",
        "Bump the version or delete the existing release",
    ),
    // config
    info(
        "PNP_CFG_IDENTITY_MISSING",
        Severity::Error,
        None,
        true,
        "git author identity is not configured",
        "Run `git config user.name` and `git config user.email`",
    ),
    info(
        "PNP_CFG_GIT_CONFIG_INVALID",
        Severity::Error,
        None,
        true,
        "a git config file is malformed",
        "Fix the reported line in the git config file",
    ),
];

/// Look up catalog metadata for a canonical code.
pub fn lookup(code: &str) -> Option<&'static CodeInfo> {
    CATALOG.iter().find(|entry| entry.code == code)
}

pub fn is_denylisted(code: &str) -> bool {
    RETRY_DENYLIST.contains(&code)
}

/// Static metadata, falling back to the unclassified entry for unknown codes.
pub fn metadata(code: &str) -> &'static CodeInfo {
    lookup(code)
        .or_else(|| lookup(UNCLASSIFIED))
        .unwrap_or(&CATALOG[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Category;
    use std::collections::HashSet;

    #[test]
    fn catalog_codes_are_unique_and_namespaced() {
        let mut seen = HashSet::new();
        for entry in CATALOG {
            assert!(seen.insert(entry.code), "duplicate {}", entry.code);
            assert!(
                Category::from_code(entry.code).is_some(),
                "{} has no known family",
                entry.code
            );
            assert!(!entry.hint.is_empty());
        }
    }

    #[test]
    fn denylisted_codes_have_no_retry_policy() {
        for code in RETRY_DENYLIST {
            let entry = lookup(code).expect("denylisted code in catalog");
            assert!(entry.retry.is_none(), "{code} must not be retryable");
        }
    }

    #[test]
    fn retry_policies_are_bounded() {
        for entry in CATALOG {
            if let Some(policy) = entry.retry {
                assert!(policy.max_attempts > 0);
                assert!(policy.base_delay_ms <= policy.max_delay_ms);
                assert!(policy.timeout_secs > 0);
            }
        }
    }

    #[test]
    fn unknown_code_falls_back_to_unclassified() {
        assert_eq!(metadata("PNP_GIT_NOPE").code, UNCLASSIFIED);
    }
}
