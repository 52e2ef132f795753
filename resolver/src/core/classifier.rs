//! Single-pass classification of normalized diagnostics.

use crate::core::codes::{self, EMPTY_STDERR, UNCLASSIFIED};
use crate::core::rules::RuleTable;
use crate::core::types::{Classification, HandlerName};

pub const EMPTY_RULE_ID: &str = "fallback.empty_stderr";
pub const UNCLASSIFIED_RULE_ID: &str = "fallback.unclassified";

/// Classify already-normalized text. Pure: equal input, equal output.
pub fn classify(table: &RuleTable, normalized: &str) -> Classification {
    if normalized.trim().is_empty() {
        return synthetic(EMPTY_STDERR, EMPTY_RULE_ID);
    }
    table
        .rules()
        .iter()
        .find(|rule| rule.pattern.matches(normalized))
        .map_or_else(
            || synthetic(UNCLASSIFIED, UNCLASSIFIED_RULE_ID),
            |rule| Classification {
                code: rule.code.clone(),
                severity: rule.severity,
                handler: rule.handler,
                matched_rule_id: rule.id.clone(),
            },
        )
}

/// Classification that did not come from a rule (fallbacks, internal faults).
pub fn synthetic(code: &str, rule_id: &str) -> Classification {
    Classification {
        code: code.to_string(),
        severity: codes::metadata(code).severity,
        handler: HandlerName::Fallback,
        matched_rule_id: rule_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::normalize::normalize;
    use crate::core::types::Severity;

    fn table() -> RuleTable {
        RuleTable::builtin().expect("builtin table")
    }

    fn classify_raw(raw: &str) -> Classification {
        classify(&table(), &normalize(raw))
    }

    #[test]
    fn could_not_resolve_host_is_connectivity() {
        let got = classify_raw(
            "fatal: unable to access 'https://example.com/r.git': Could not resolve host",
        );
        assert_eq!(got.code, "PNP_NET_CONNECTIVITY");
        assert_eq!(got.severity, Severity::Error);
        assert_eq!(got.handler, HandlerName::InternetConErr);
        assert_eq!(got.matched_rule_id, "net.connectivity");
    }

    #[test]
    fn empty_stderr_is_fallback_warn() {
        let got = classify(&table(), "");
        assert_eq!(got.code, "PNP_GIT_EMPTY_STDERR");
        assert_eq!(got.severity, Severity::Warn);
        assert_eq!(got.handler, HandlerName::Fallback);
        assert!(!got.code.starts_with("PNP_INT_"));
    }

    #[test]
    fn unmatched_text_is_unclassified() {
        let got = classify_raw("something completely novel happened");
        assert_eq!(got.code, UNCLASSIFIED);
        assert_eq!(got.severity, Severity::Warn);
        assert_eq!(got.matched_rule_id, UNCLASSIFIED_RULE_ID);
    }

    #[test]
    fn classify_is_pure() {
        let table = table();
        let input = normalize("error: failed to push some refs to 'https://github.com/o/r.git'");
        let first = classify(&table, &input);
        let second = classify(&table, &input);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).expect("json"),
            serde_json::to_string(&second).expect("json")
        );
    }

    #[test]
    fn remote_read_failure_splits_on_url_presence() {
        let with_url = classify_raw(
            "fatal: 'https://example.invalid/o/r.git' does not appear to be a git repository\nfatal: Could not read from remote repository.",
        );
        assert_eq!(with_url.code, "PNP_NET_REMOTE_URL_INVALID");
        assert_eq!(with_url.handler, HandlerName::InternetConErr);

        let without_url = classify_raw(
            "fatal: 'origin' does not appear to be a git repository\nfatal: Could not read from remote repository.",
        );
        assert_eq!(without_url.code, "PNP_NET_REMOTE_UNREADABLE");
        assert_eq!(without_url.handler, HandlerName::MissingRemote);
    }

    #[test]
    fn golden_corpus() {
        let cases = [
            (
                "fatal: The current branch feature has no upstream branch.",
                "PNP_GIT_UPSTREAM_MISSING",
            ),
            (
                "remote: Invalid username or password.\nfatal: Authentication failed for 'https://github.com/o/r.git/'",
                "PNP_NET_AUTH_FAIL",
            ),
            (
                "remote: error: File big.bin is 120.00 MB; this exceeds GitHub's file size limit of 100.00 MB",
                "PNP_NET_LARGE_FILE_REJECTED",
            ),
            (
                "error: failed to push some refs to 'origin'\npre-push hook declined",
                "PNP_GIT_HOOK_DECLINED",
            ),
            (
                "remote: error: GH006: Protected branch update failed for refs/heads/main.",
                "PNP_GIT_PROTECTED_BRANCH",
            ),
            (
                " ! [rejected]        main -> main (fetch first)",
                "PNP_GIT_NON_FAST_FORWARD",
            ),
            (
                "error: Your local changes to the following files would be overwritten by merge:",
                "PNP_GIT_DIRTY_WORKTREE",
            ),
            (
                "warning: LF will be replaced by CRLF in README.md.",
                "PNP_GIT_LINE_ENDING_NORMALIZATION",
            ),
            (
                "fatal: You are not currently on a branch.",
                "PNP_GIT_DETACHED_HEAD",
            ),
            (
                "! [rejected]        v1.2.0 -> v1.2.0 (already exists)\nerror: tag already exists",
                "PNP_GIT_REF_CONFLICT",
            ),
            (
                "fatal: Unable to create '/repo/.git/index.lock': File exists.\nAnother git process seems to be running",
                "PNP_GIT_LOCK_CONTENTION",
            ),
            (
                "fatal: unable to access 'https://github.com/o/r.git/': SSL certificate problem: unable to get local issuer certificate",
                "PNP_NET_TLS_FAIL",
            ),
            (
                "ssh: connect to host github.com port 22: Connection timed out",
                "PNP_NET_TIMEOUT",
            ),
            (
                "fatal: detected dubious ownership in repository at '/srv/repo'",
                "PNP_GIT_DUBIOUS_OWNERSHIP",
            ),
            (
                "error: invalid object 100644 abc for 'file.txt'",
                "PNP_GIT_INVALID_OBJECT",
            ),
            (
                "*** Please tell me who you are.\n\nRun\n  git config --global user.email",
                "PNP_CFG_IDENTITY_MISSING",
            ),
            (
                "fatal: bad config line 3 in file .git/config",
                "PNP_CFG_GIT_CONFIG_INVALID",
            ),
            (
                "To get started with GitHub CLI, please run:  gh auth login",
                "PNP_REL_GH_AUTH_REQUIRED",
            ),
            (
                "HTTP 422: Validation Failed (https://api.github.com/repos/o/r/releases)\nRelease.tag_name already_exists",
                "PNP_REL_RELEASE_EXISTS",
            ),
        ];
        let table = table();
        for (raw, expected) in cases {
            let got = classify(&table, &normalize(raw));
            assert_eq!(got.code, expected, "input: {raw:?}");
        }
    }

    #[test]
    fn precedence_resolves_overlaps() {
        let got = classify_raw("fatal: could not resolve host github.com and invalid object deadbeef");
        assert_eq!(got.code, "PNP_NET_CONNECTIVITY");
    }
}
