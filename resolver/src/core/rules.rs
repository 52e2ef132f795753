//! Declarative classification rule table.
//!
//! Rules are evaluated against normalized text in ascending precedence; the
//! first match wins. Precedence values are unique, so ordering never depends
//! on declaration order or tie-breaking.

use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::{Context, Result, bail};
use regex::Regex;

use crate::core::codes::{self, RULE_TABLE_INVALID};
use crate::core::normalize::normalize;
use crate::core::types::{Category, HandlerName, Severity};

/// Matcher evaluated against normalized text.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Any needle is a substring.
    Any(Vec<String>),
    /// Every needle is a substring.
    All(Vec<String>),
    Regex(Regex),
}

impl Pattern {
    pub fn matches(&self, normalized: &str) -> bool {
        match self {
            Pattern::Any(needles) => needles.iter().any(|n| normalized.contains(n.as_str())),
            Pattern::All(needles) => needles.iter().all(|n| normalized.contains(n.as_str())),
            Pattern::Regex(re) => re.is_match(normalized),
        }
    }

    fn needles(&self) -> Option<&[String]> {
        match self {
            Pattern::Any(needles) | Pattern::All(needles) => Some(needles),
            Pattern::Regex(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub pattern: Pattern,
    pub precedence: i32,
    pub code: String,
    pub severity: Severity,
    pub handler: HandlerName,
}

impl Rule {
    /// Build a rule whose severity comes from the code catalog.
    pub fn new(id: &str, precedence: i32, code: &str, handler: HandlerName, pattern: Pattern) -> Rule {
        let severity = codes::lookup(code).map_or(Severity::Error, |info| info.severity);
        Rule {
            id: id.to_string(),
            pattern,
            precedence,
            code: code.to_string(),
            severity,
            handler,
        }
    }
}

/// Validated, precedence-sorted rule set. Built once per process.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn new(mut rules: Vec<Rule>) -> Result<RuleTable> {
        let errors = RuleTable::validate(&rules);
        if !errors.is_empty() {
            bail!("{RULE_TABLE_INVALID}: rule table invalid:\n- {}", errors.join("\n- "));
        }
        rules.sort_by_key(|rule| rule.precedence);
        Ok(RuleTable { rules })
    }

    pub fn builtin() -> Result<RuleTable> {
        RuleTable::new(builtin_rules()?)
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// List every structural violation in a candidate rule set.
    pub fn validate(rules: &[Rule]) -> Vec<String> {
        let mut errors = Vec::new();
        let mut ids = HashSet::new();
        let mut precedences: HashMap<i32, &str> = HashMap::new();
        for rule in rules {
            if rule.id.trim().is_empty() {
                errors.push(format!("rule with code {} has an empty id", rule.code));
            }
            if !ids.insert(rule.id.as_str()) {
                errors.push(format!("{}: duplicate rule id", rule.id));
            }
            if let Some(other) = precedences.insert(rule.precedence, rule.id.as_str()) {
                errors.push(format!(
                    "{}: precedence {} already used by {}",
                    rule.id, rule.precedence, other
                ));
            }
            if Category::from_code(&rule.code).is_none() {
                errors.push(format!("{}: code {} has no known family", rule.id, rule.code));
            }
            match codes::lookup(&rule.code) {
                None => errors.push(format!("{}: code {} has no policy metadata", rule.id, rule.code)),
                Some(info) if info.severity != rule.severity => errors.push(format!(
                    "{}: severity {} disagrees with catalog severity {}",
                    rule.id, rule.severity, info.severity
                )),
                Some(_) => {}
            }
            if let Some(needles) = rule.pattern.needles() {
                if needles.is_empty() {
                    errors.push(format!("{}: pattern has no needles", rule.id));
                }
                for needle in needles {
                    if needle.is_empty() || normalize(needle) != *needle {
                        errors.push(format!("{}: needle {needle:?} is not normalized", rule.id));
                    }
                }
            }
        }
        errors
    }

    /// Report samples that more than one code's rules would claim.
    ///
    /// Precedence still resolves these deterministically; the report exists so
    /// overlapping needles can be tuned.
    pub fn conflicts(&self, samples: &[&str]) -> Vec<String> {
        let mut report = Vec::new();
        for sample in samples {
            let normalized = normalize(sample);
            let matched: Vec<&Rule> = self
                .rules
                .iter()
                .filter(|rule| rule.pattern.matches(&normalized))
                .collect();
            let matched_codes: BTreeSet<&str> =
                matched.iter().map(|rule| rule.code.as_str()).collect();
            if matched_codes.len() > 1
                && let Some(winner) = matched.first()
            {
                let ids: Vec<&str> = matched.iter().map(|rule| rule.id.as_str()).collect();
                report.push(format!(
                    "{normalized:?} matched [{}]; {} wins by precedence",
                    ids.join(", "),
                    winner.id
                ));
            }
        }
        report
    }
}

fn any(needles: &[&str]) -> Pattern {
    Pattern::Any(needles.iter().map(|n| n.to_string()).collect())
}

fn all(needles: &[&str]) -> Pattern {
    Pattern::All(needles.iter().map(|n| n.to_string()).collect())
}

fn regex(pattern: &str) -> Result<Pattern> {
    let re = Regex::new(pattern).with_context(|| format!("compile rule regex {pattern}"))?;
    Ok(Pattern::Regex(re))
}

/// Built-in rules, in precedence order.
pub fn builtin_rules() -> Result<Vec<Rule>> {
    use HandlerName as H;
    Ok(vec![
        Rule::new(
            "git.upstream_missing",
            10,
            "PNP_GIT_UPSTREAM_MISSING",
            H::UpstreamMissing,
            any(&["has no upstream branch", "no upstream configured", "set-upstream"]),
        ),
        Rule::new(
            "net.auth_failure",
            20,
            "PNP_NET_AUTH_FAIL",
            H::AuthFailure,
            any(&[
                "authentication failed",
                "permission denied (publickey)",
                "could not read username",
                "repository not found",
            ]),
        ),
        Rule::new(
            "net.large_file_rejected",
            30,
            "PNP_NET_LARGE_FILE_REJECTED",
            H::LargeFileRejection,
            any(&[
                "exceeds github's file size limit",
                "exceeds gitlab's file size limit",
                "file size limit of",
            ]),
        ),
        Rule::new(
            "git.hook_declined",
            40,
            "PNP_GIT_HOOK_DECLINED",
            H::HookDeclined,
            any(&["pre-push hook declined", "pre-commit hook declined", "hook declined"]),
        ),
        Rule::new(
            "git.submodule_inconsistent",
            50,
            "PNP_GIT_SUBMODULE_INCONSISTENT",
            H::SubmoduleInconsistent,
            any(&[
                "upload-pack: not our ref",
                "not our ref",
                "in a submodule path",
                "no submodule mapping found in .gitmodules",
            ]),
        ),
        Rule::new(
            "git.protected_branch",
            60,
            "PNP_GIT_PROTECTED_BRANCH",
            H::ProtectedBranch,
            any(&[
                "protected branch update failed",
                "gh006",
                "required status check",
                "approving review is required",
            ]),
        ),
        Rule::new(
            "git.non_fast_forward",
            70,
            "PNP_GIT_NON_FAST_FORWARD",
            H::DivergedBranch,
            any(&[
                "non-fast-forward",
                "fetch first",
                "tip of your current branch is behind",
            ]),
        ),
        Rule::new(
            "git.dirty_worktree",
            80,
            "PNP_GIT_DIRTY_WORKTREE",
            H::DirtyWorktree,
            any(&[
                "would be overwritten by merge",
                "please commit your changes or stash them before you merge",
                "please commit your changes or stash them before you rebase",
                "your local changes to the following files would be overwritten",
            ]),
        ),
        Rule::new(
            "git.line_endings",
            90,
            "PNP_GIT_LINE_ENDING_NORMALIZATION",
            H::LineEndings,
            any(&["lf will be replaced by crlf", "crlf will be replaced by lf"]),
        ),
        Rule::new(
            "git.index_worktree_mismatch",
            95,
            "PNP_GIT_INDEX_WORKTREE_MISMATCH",
            H::DirtyWorktree,
            any(&["needs update", "index file smaller than expected", "cache entry has null sha1"]),
        ),
        Rule::new(
            "git.detached_head",
            100,
            "PNP_GIT_DETACHED_HEAD",
            H::DetachedHead,
            any(&[
                "you are not currently on a branch",
                "you are in 'detached head' state",
                "detached head",
            ]),
        ),
        Rule::new(
            "git.ref_conflict",
            110,
            "PNP_GIT_REF_CONFLICT",
            H::RefConflict,
            regex(
                r"cannot lock ref|tag already exists|tag '[^']+' already exists|would clobber existing tag|failed to update ref|\(already exists\)",
            )?,
        ),
        Rule::new(
            "git.lock_contention",
            120,
            "PNP_GIT_LOCK_CONTENTION",
            H::LockContention,
            any(&[
                "another git process seems to be running",
                "unable to create '.git/index.lock'",
                "unable to create '.git/shallow.lock'",
                "index.lock",
            ]),
        ),
        Rule::new(
            "net.tls_failure",
            130,
            "PNP_NET_TLS_FAIL",
            H::InternetConErr,
            any(&[
                "ssl certificate problem",
                "server certificate verification failed",
                "tls handshake timeout",
                "gnutls_handshake()",
                "ssl connect error",
            ]),
        ),
        Rule::new(
            "net.timeout",
            140,
            "PNP_NET_TIMEOUT",
            H::InternetConErr,
            any(&["operation timed out", "connection timed out", "timed out"]),
        ),
        Rule::new(
            "net.connectivity",
            150,
            "PNP_NET_CONNECTIVITY",
            H::InternetConErr,
            any(&[
                "no address associated with hostname",
                "could not resolve host",
                "software caused connection abort",
                "failed to connect",
                "connect to",
            ]),
        ),
        Rule::new(
            "git.dubious_ownership",
            160,
            "PNP_GIT_DUBIOUS_OWNERSHIP",
            H::DubiousOwnership,
            all(&["dubious ownership"]),
        ),
        Rule::new(
            "git.invalid_object",
            170,
            "PNP_GIT_INVALID_OBJECT",
            H::InvalidObject,
            any(&[
                "invalid object",
                "broken pipe",
                "has null sha1",
                "object corrupt",
                "unexpected diff status a",
                "is empty fatal:",
            ]),
        ),
        Rule::new(
            "net.remote_url_invalid",
            180,
            "PNP_NET_REMOTE_URL_INVALID",
            H::InternetConErr,
            all(&["could not read from remote", "<url>"]),
        ),
        Rule::new(
            "net.remote_unreadable",
            190,
            "PNP_NET_REMOTE_UNREADABLE",
            H::MissingRemote,
            any(&["could not read from remote", "does not appear to be a git repository"]),
        ),
        Rule::new(
            "cfg.identity_missing",
            200,
            "PNP_CFG_IDENTITY_MISSING",
            H::ConfigInvalid,
            any(&[
                "please tell me who you are",
                "author identity unknown",
                "unable to auto-detect email address",
            ]),
        ),
        Rule::new(
            "cfg.git_config_invalid",
            210,
            "PNP_CFG_GIT_CONFIG_INVALID",
            H::ConfigInvalid,
            regex(r"bad config (line \d+|variable|value)|bad numeric config value")?,
        ),
        Rule::new(
            "rel.gh_auth_required",
            220,
            "PNP_REL_GH_AUTH_REQUIRED",
            H::AuthFailure,
            any(&["gh auth login", "gh_token environment variable", "http 401: bad credentials"]),
        ),
        Rule::new(
            "rel.release_exists",
            230,
            "PNP_REL_RELEASE_EXISTS",
            H::Fallback,
            regex(r"already_exists|release with (this|the same) tag|release .*already exists")?,
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RuleTable {
        RuleTable::builtin().expect("builtin table")
    }

    #[test]
    fn builtin_table_is_valid() {
        let rules = builtin_rules().expect("rules");
        assert_eq!(RuleTable::validate(&rules), Vec::<String>::new());
    }

    #[test]
    fn precedences_are_unique_and_sorted() {
        let table = table();
        let mut seen = HashSet::new();
        for rule in table.rules() {
            assert!(seen.insert(rule.precedence), "duplicate precedence {}", rule.precedence);
        }
        assert!(table.rules().windows(2).all(|pair| pair[0].precedence < pair[1].precedence));
    }

    #[test]
    fn duplicate_precedence_is_fatal() {
        let rules = vec![
            Rule::new("a", 10, "PNP_NET_TIMEOUT", HandlerName::InternetConErr, any(&["x"])),
            Rule::new("b", 10, "PNP_NET_TLS_FAIL", HandlerName::InternetConErr, any(&["y"])),
        ];
        let err = RuleTable::new(rules).expect_err("duplicate precedence");
        let msg = err.to_string();
        assert!(msg.contains("PNP_INT_RULE_TABLE_INVALID"));
        assert!(msg.contains("precedence 10 already used by a"));
    }

    #[test]
    fn validate_reports_unknown_codes_and_bad_needles() {
        let rules = vec![
            Rule::new("a", 10, "PNP_NET_NOPE", HandlerName::Fallback, any(&["x"])),
            Rule::new("a", 20, "TIMEOUT", HandlerName::Fallback, any(&["Upper Case"])),
            Rule::new("c", 30, "PNP_NET_TIMEOUT", HandlerName::Fallback, any(&[])),
        ];
        let errors = RuleTable::validate(&rules);
        assert!(errors.iter().any(|e| e.contains("PNP_NET_NOPE has no policy metadata")));
        assert!(errors.iter().any(|e| e.contains("duplicate rule id")));
        assert!(errors.iter().any(|e| e.contains("TIMEOUT has no known family")));
        assert!(errors.iter().any(|e| e.contains("not normalized")));
        assert!(errors.iter().any(|e| e.contains("c: pattern has no needles")));
    }

    #[test]
    fn tag_rejections_are_ref_conflicts() {
        let table = table();
        for raw in [
            " ! [rejected]        v1.0.0 -> v1.0.0 (already exists)\nerror: failed to push some refs to 'origin'",
            "fatal: tag 'v1.0.0' already exists",
        ] {
            let code = crate::core::classifier::classify(&table, &normalize(raw)).code;
            assert_eq!(code, "PNP_GIT_REF_CONFLICT", "{raw}");
        }
    }

    #[test]
    fn all_pattern_needs_every_needle() {
        let pattern = all(&["could not read from remote", "<url>"]);
        assert!(pattern.matches("fatal: '<url>' could not read from remote repository"));
        assert!(!pattern.matches("fatal: could not read from remote repository"));
    }

    #[test]
    fn conflicts_report_overlapping_codes() {
        let table = table();
        let report = table.conflicts(&[
            "fatal: could not resolve host github.com and invalid object deadbeef",
            "fatal: could not resolve host: github.com",
        ]);
        assert_eq!(report.len(), 1);
        assert!(report[0].contains("net.connectivity wins by precedence"));
        assert!(report[0].contains("git.invalid_object"));
    }
}
