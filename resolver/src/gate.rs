//! Error-code compatibility gate for `resolver gate`.
//!
//! Compares the compiled-in contract against the committed lock file.
//! Breaking changes fail unless explicitly approved through the
//! `PNP_ALLOW_ERROR_CODE_BREAK` environment variable or the approval marker.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, instrument};

use crate::core::contract::{CONTRACT_SCHEMA, ContractDiff, ErrorCodeContract, compare_contracts, current_contract};
use crate::io::init::PnpPaths;

pub const OVERRIDE_ENV: &str = "PNP_ALLOW_ERROR_CODE_BREAK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideSource {
    Env,
    Marker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateReport {
    pub diff: ContractDiff,
    /// Set only when there are breaking changes and an override applied.
    pub overridden_by: Option<OverrideSource>,
}

impl GateReport {
    pub fn passed(&self) -> bool {
        self.diff.issues.is_empty() || self.overridden_by.is_some()
    }
}

/// Whether an environment value approves breaking changes.
pub fn env_allows_break(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

pub fn load_lock(path: &Path) -> Result<ErrorCodeContract> {
    if !path.exists() {
        bail!(
            "missing error code lock {} (run `resolver gate --write` to create it)",
            path.display()
        );
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let lock: ErrorCodeContract =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    if lock.schema != CONTRACT_SCHEMA {
        return Err(anyhow!(
            "{}: unexpected schema {:?}, expected {CONTRACT_SCHEMA:?}",
            path.display(),
            lock.schema
        ));
    }
    Ok(lock)
}

pub fn write_lock(path: &Path, contract: &ErrorCodeContract) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(contract).context("serialize error code lock")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Run the gate for `paths.root` against `lock_path`.
///
/// `env_override` is the raw value of [`OVERRIDE_ENV`], passed in by the
/// caller.
#[instrument(skip_all, fields(lock = %lock_path.display()))]
pub fn check_gate(paths: &PnpPaths, lock_path: &Path, env_override: Option<&str>) -> Result<GateReport> {
    let lock = load_lock(lock_path)?;
    let diff = compare_contracts(&lock, &current_contract());
    let overridden_by = if diff.issues.is_empty() {
        None
    } else if env_allows_break(env_override) {
        Some(OverrideSource::Env)
    } else if paths.approval_marker_path.is_file() {
        Some(OverrideSource::Marker)
    } else {
        None
    };
    info!(
        issues = diff.issues.len(),
        notes = diff.notes.len(),
        overridden = overridden_by.is_some(),
        "gate evaluated"
    );
    Ok(GateReport { diff, overridden_by })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, PnpPaths) {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = PnpPaths::new(temp.path());
        (temp, paths)
    }

    #[test]
    fn fresh_lock_passes_without_changes() {
        let (_temp, paths) = setup();
        write_lock(&paths.lock_path, &current_contract()).expect("write");
        let report = check_gate(&paths, &paths.lock_path, None).expect("gate");
        assert!(report.passed());
        assert!(report.diff.issues.is_empty());
        assert!(report.diff.notes.is_empty());
    }

    #[test]
    fn removed_alias_and_changed_severity_are_breaking() {
        let (_temp, paths) = setup();
        let mut lock = current_contract();
        lock.deprecated_aliases
            .insert("PNP_OLD_RETIRED".to_string(), "PNP_NET_TIMEOUT".to_string());
        let policy = lock
            .error_code_policy
            .get_mut("PNP_NET_TIMEOUT")
            .expect("timeout policy");
        policy.severity = crate::core::types::Severity::Critical;
        write_lock(&paths.lock_path, &lock).expect("write");

        let report = check_gate(&paths, &paths.lock_path, None).expect("gate");
        assert!(!report.passed());
        assert!(report.diff.issues.iter().any(|i| i.contains("deprecated alias removed: PNP_OLD_RETIRED")));
        assert!(report.diff.issues.iter().any(|i| i.contains("PNP_NET_TIMEOUT")));
    }

    #[test]
    fn additions_are_notes_only() {
        let (_temp, paths) = setup();
        let mut lock = current_contract();
        lock.error_code_policy.remove("PNP_INT_HANDLER_FAULT");
        write_lock(&paths.lock_path, &lock).expect("write");

        let report = check_gate(&paths, &paths.lock_path, None).expect("gate");
        assert!(report.passed());
        assert_eq!(report.diff.notes.len(), 1);
    }

    #[test]
    fn overrides_accept_breaking_changes() {
        let (_temp, paths) = setup();
        let mut lock = current_contract();
        lock.workflow_step_codes
            .insert("deploy".to_string(), "PNP_INT_WORKFLOW_EXIT_NONZERO".to_string());
        write_lock(&paths.lock_path, &lock).expect("write");

        let report = check_gate(&paths, &paths.lock_path, Some("no")).expect("gate");
        assert!(!report.passed());

        let report = check_gate(&paths, &paths.lock_path, Some("TRUE")).expect("gate");
        assert_eq!(report.overridden_by, Some(OverrideSource::Env));

        fs::write(&paths.approval_marker_path, "").expect("marker");
        let report = check_gate(&paths, &paths.lock_path, None).expect("gate");
        assert_eq!(report.overridden_by, Some(OverrideSource::Marker));
        assert!(report.passed());
    }

    #[test]
    fn missing_or_foreign_lock_is_an_error() {
        let (_temp, paths) = setup();
        let err = check_gate(&paths, &paths.lock_path, None).expect_err("missing");
        assert!(err.to_string().contains("gate --write"));

        let mut lock = current_contract();
        lock.schema = "other".to_string();
        write_lock(&paths.lock_path, &lock).expect("write");
        let err = load_lock(&paths.lock_path).expect_err("schema");
        assert!(err.to_string().contains("unexpected schema"));
    }

    #[test]
    fn env_values() {
        assert!(env_allows_break(Some("1")));
        assert!(env_allows_break(Some(" yes ")));
        assert!(!env_allows_break(Some("0")));
        assert!(!env_allows_break(None));
    }
}
