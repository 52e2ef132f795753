//! Stable error-code contract and its compatibility diff.
//!
//! Removing or changing a step mapping, alias, or per-code severity/category
//! is breaking. Additions are reported but never fail the gate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::alias::{DEPRECATED_ALIASES, WORKFLOW_STEP_CODES};
use crate::core::codes::CATALOG;
use crate::core::types::{Category, Severity};

pub const CONTRACT_SCHEMA: &str = "pnp.error_codes.v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodePolicy {
    pub severity: Severity,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCodeContract {
    pub schema: String,
    pub schema_version: u32,
    #[serde(default)]
    pub workflow_step_codes: BTreeMap<String, String>,
    #[serde(default)]
    pub deprecated_aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub error_code_policy: BTreeMap<String, CodePolicy>,
}

/// Contract derived from the compiled-in tables.
pub fn current_contract() -> ErrorCodeContract {
    ErrorCodeContract {
        schema: CONTRACT_SCHEMA.to_string(),
        schema_version: 1,
        workflow_step_codes: WORKFLOW_STEP_CODES
            .iter()
            .map(|(step, code)| (step.to_string(), code.to_string()))
            .collect(),
        deprecated_aliases: DEPRECATED_ALIASES
            .iter()
            .map(|(old, new)| (old.to_string(), new.to_string()))
            .collect(),
        error_code_policy: CATALOG
            .iter()
            .filter_map(|info| {
                let category = Category::from_code(info.code)?;
                Some((
                    info.code.to_string(),
                    CodePolicy {
                        severity: info.severity,
                        category,
                    },
                ))
            })
            .collect(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractDiff {
    /// Breaking changes.
    pub issues: Vec<String>,
    /// Additive changes.
    pub notes: Vec<String>,
}

pub fn compare_contracts(lock: &ErrorCodeContract, current: &ErrorCodeContract) -> ContractDiff {
    let mut diff = ContractDiff::default();
    compare_maps(
        &lock.workflow_step_codes,
        &current.workflow_step_codes,
        "workflow step",
        &mut diff,
        |v| v.clone(),
    );
    compare_maps(
        &lock.deprecated_aliases,
        &current.deprecated_aliases,
        "deprecated alias",
        &mut diff,
        |v| v.clone(),
    );
    compare_maps(
        &lock.error_code_policy,
        &current.error_code_policy,
        "stable error code",
        &mut diff,
        |p| format!("{}/{}", p.severity, p.category),
    );
    diff
}

fn compare_maps<V: PartialEq>(
    lock: &BTreeMap<String, V>,
    current: &BTreeMap<String, V>,
    label: &str,
    diff: &mut ContractDiff,
    render: impl Fn(&V) -> String,
) {
    for (key, locked) in lock {
        match current.get(key) {
            None => diff.issues.push(format!("{label} removed: {key}")),
            Some(now) if now != locked => diff.issues.push(format!(
                "{label} changed: {key} {} -> {}",
                render(locked),
                render(now)
            )),
            Some(_) => {}
        }
    }
    for (key, now) in current {
        if !lock.contains_key(key) {
            diff.notes.push(format!("{label} added: {key} -> {}", render(now)));
        }
    }
}
