//! Validation for `resolver rules`: rule table, alias map and config.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;

use crate::core::alias::{DEPRECATED_ALIASES, validate_aliases};
use crate::core::codes::CATALOG;
use crate::core::rules::{RuleTable, builtin_rules};
use crate::io::config::load_config;

/// Representative diagnostics used to surface overlapping rules.
const SAMPLE_DIAGNOSTICS: &[&str] = &[
    "fatal: The current branch feature has no upstream branch.",
    "fatal: Authentication failed for 'https://github.com/o/r.git/'",
    "remote: error: File big.bin is 120.00 MB; this exceeds GitHub's file size limit of 100.00 MB",
    "! [remote rejected] main -> main (pre-receive hook declined)",
    "! [rejected] main -> main (non-fast-forward)",
    "error: Your local changes to the following files would be overwritten by checkout",
    "! [rejected] v1.0.0 -> v1.0.0 (already exists)",
    "fatal: Unable to create '/r/.git/index.lock': File exists.",
    "fatal: unable to access 'https://github.com/o/r.git/': Could not resolve host: github.com",
    "fatal: unable to access 'https://github.com/o/r.git/': SSL certificate problem",
    "fatal: detected dubious ownership in repository at '/r'",
    "error: object file .git/objects/ab/cdef is empty\nfatal: loose object abcdef is corrupt",
    "fatal: 'origin' does not appear to be a git repository",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub rule_count: usize,
    pub alias_count: usize,
    /// Violations; any entry fails the command.
    pub issues: Vec<String>,
    /// Overlaps resolved by precedence; informational.
    pub overlaps: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Validate the compiled-in tables plus the config at `config_path`.
pub fn validate_tables(config_path: &Path) -> Result<ValidationReport> {
    let rules = builtin_rules()?;
    let mut issues = RuleTable::validate(&rules);

    let aliases: BTreeMap<String, String> = DEPRECATED_ALIASES
        .iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();
    issues.extend(validate_aliases(&aliases));

    for info in CATALOG {
        if info.hint.trim().is_empty() {
            issues.push(format!("{}: missing suggested fix", info.code));
        }
        if let Some(retry) = info.retry
            && retry.base_delay_ms > retry.max_delay_ms
        {
            issues.push(format!("{}: base delay exceeds max delay", info.code));
        }
    }

    if let Err(err) = load_config(config_path) {
        issues.push(format!("{}: {err:#}", config_path.display()));
    }

    let overlaps = if issues.is_empty() {
        RuleTable::new(rules.clone())?.conflicts(SAMPLE_DIAGNOSTICS)
    } else {
        Vec::new()
    };

    Ok(ValidationReport {
        rule_count: rules.len(),
        alias_count: aliases.len(),
        issues,
        overlaps,
    })
}
