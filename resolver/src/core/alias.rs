//! Deprecated-code alias map and workflow step code table.
//!
//! Mapping is one-directional (deprecated -> canonical) and applied once, right
//! after classification, so nothing downstream ever sees a deprecated code.

use std::collections::BTreeMap;

use anyhow::{Result, bail};

use crate::core::codes;

/// Stable failure code per workflow step.
pub const WORKFLOW_STEP_CODES: [(&str, &str); 7] = [
    ("repository", "PNP_GIT_REPOSITORY_FAIL"),
    ("hooks", "PNP_REL_HOOKS_FAIL"),
    ("machete", "PNP_GIT_MACHETE_FAIL"),
    ("commit", "PNP_GIT_COMMIT_FAIL"),
    ("push", "PNP_NET_PUSH_FAIL"),
    ("publish", "PNP_REL_PUBLISH_FAIL"),
    ("release", "PNP_REL_RELEASE_FAIL"),
];

pub const DEPRECATED_ALIASES: [(&str, &str); 30] = [
    ("PNP_WORKFLOW_EXIT_NONZERO", "PNP_INT_WORKFLOW_EXIT_NONZERO"),
    ("PNP_WORKFLOW_REPOSITORY_FAIL", "PNP_GIT_REPOSITORY_FAIL"),
    ("PNP_WORKFLOW_HOOKS_FAIL", "PNP_REL_HOOKS_FAIL"),
    ("PNP_WORKFLOW_MACHETE_FAIL", "PNP_GIT_MACHETE_FAIL"),
    ("PNP_WORKFLOW_COMMIT_FAIL", "PNP_GIT_COMMIT_FAIL"),
    ("PNP_WORKFLOW_PUSH_FAIL", "PNP_NET_PUSH_FAIL"),
    ("PNP_WORKFLOW_PUBLISH_FAIL", "PNP_REL_PUBLISH_FAIL"),
    ("PNP_WORKFLOW_RELEASE_FAIL", "PNP_REL_RELEASE_FAIL"),
    ("PNP_RES_NETWORK_CONNECTIVITY", "PNP_NET_CONNECTIVITY"),
    ("PNP_RES_DUBIOUS_OWNERSHIP", "PNP_GIT_DUBIOUS_OWNERSHIP"),
    ("PNP_RES_INVALID_OBJECT", "PNP_GIT_INVALID_OBJECT"),
    ("PNP_RES_REMOTE_URL_INVALID", "PNP_NET_REMOTE_URL_INVALID"),
    ("PNP_RES_REMOTE_UNREADABLE", "PNP_NET_REMOTE_UNREADABLE"),
    ("PNP_RES_UNCLASSIFIED", "PNP_GIT_UNCLASSIFIED"),
    ("PNP_RES_EMPTY_STDERR", "PNP_GIT_EMPTY_STDERR"),
    ("PNP_RES_AUTH_FAIL", "PNP_NET_AUTH_FAIL"),
    ("PNP_RES_LARGE_FILE_REJECTED", "PNP_NET_LARGE_FILE_REJECTED"),
    ("PNP_RES_HOOK_DECLINED", "PNP_GIT_HOOK_DECLINED"),
    ("PNP_RES_SUBMODULE_INCONSISTENT", "PNP_GIT_SUBMODULE_INCONSISTENT"),
    ("PNP_RES_NON_FAST_FORWARD", "PNP_GIT_NON_FAST_FORWARD"),
    ("PNP_RES_PROTECTED_BRANCH", "PNP_GIT_PROTECTED_BRANCH"),
    ("PNP_RES_DIRTY_WORKTREE", "PNP_GIT_DIRTY_WORKTREE"),
    ("PNP_RES_LINE_ENDING_NORMALIZATION", "PNP_GIT_LINE_ENDING_NORMALIZATION"),
    ("PNP_RES_DETACHED_HEAD", "PNP_GIT_DETACHED_HEAD"),
    ("PNP_RES_REF_CONFLICT", "PNP_GIT_REF_CONFLICT"),
    ("PNP_RES_LOCK_CONTENTION", "PNP_GIT_LOCK_CONTENTION"),
    ("PNP_RES_UPSTREAM_MISSING", "PNP_GIT_UPSTREAM_MISSING"),
    ("PNP_RES_TLS_FAIL", "PNP_NET_TLS_FAIL"),
    ("PNP_RES_TIMEOUT", "PNP_NET_TIMEOUT"),
    ("PNP_RES_INDEX_WORKTREE_MISMATCH", "PNP_GIT_INDEX_WORKTREE_MISMATCH"),
];

/// Validated deprecated -> canonical map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasMap {
    aliases: BTreeMap<String, String>,
}

impl AliasMap {
    pub fn builtin() -> Result<AliasMap> {
        AliasMap::new(
            DEPRECATED_ALIASES
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
        )
    }

    /// Build a map, rejecting chains, cycles and unknown targets.
    pub fn new(aliases: BTreeMap<String, String>) -> Result<AliasMap> {
        let errors = validate_aliases(&aliases);
        if !errors.is_empty() {
            bail!("alias map invalid:\n- {}", errors.join("\n- "));
        }
        Ok(AliasMap { aliases })
    }

    /// Map a possibly deprecated code to its canonical form.
    pub fn canonicalize(&self, code: &str) -> String {
        let token = code.trim();
        match self.aliases.get(token) {
            Some(target) => target.clone(),
            None => token.to_string(),
        }
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    /// Stable code for a failed workflow step, preferring an explicit code.
    pub fn resolve_failure_code(&self, step: &str, preferred: Option<&str>) -> String {
        if let Some(code) = preferred.map(str::trim)
            && !code.is_empty()
        {
            return self.canonicalize(code);
        }
        let step = step.trim();
        let resolved = WORKFLOW_STEP_CODES
            .iter()
            .find(|(name, _)| *name == step)
            .map_or(codes::WORKFLOW_EXIT_NONZERO, |(_, code)| *code);
        self.canonicalize(resolved)
    }
}

/// List every violation in an alias map.
pub fn validate_aliases(aliases: &BTreeMap<String, String>) -> Vec<String> {
    let mut errors = Vec::new();
    for (from, to) in aliases {
        if from == to {
            errors.push(format!("{from}: aliases itself"));
            continue;
        }
        if aliases.contains_key(to) {
            errors.push(format!("{from}: target {to} is itself deprecated"));
        }
        if codes::lookup(to).is_none() {
            errors.push(format!("{from}: target {to} is not a known canonical code"));
        }
        if codes::lookup(from).is_some() {
            errors.push(format!("{from}: deprecated code is still in the catalog"));
        }
    }
    errors
}
