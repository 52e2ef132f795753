//! Sanitized support bundle for one run (`pnplog/debug-report-<run>.json`).
//!
//! Only allowlisted environment variables and read-only git facts are
//! captured. The whole document is passed through redaction before it is
//! written.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::alias::AliasMap;
use crate::core::event::{Event, EventType};
use crate::core::normalize::redact_value;
use crate::io::envelope_store::load_envelope;
use crate::io::event_log::{load_events, now_rfc3339};
use crate::io::git::Git;
use crate::io::init::PnpPaths;

pub const DEBUG_REPORT_SCHEMA: &str = "pnp.debug_report.v1";

/// Environment variables safe to copy into a bundle.
pub const ENV_ALLOWLIST: [&str; 10] = [
    "CI",
    "GITHUB_ACTIONS",
    "GITHUB_REF_NAME",
    "GITHUB_REPOSITORY",
    "GITHUB_RUN_ID",
    "RUNNER_OS",
    "TERM",
    "SHELL",
    "LANG",
    "RUST_LOG",
];

/// Number of trailing events of the run kept verbatim.
pub const EVENTS_TAIL: usize = 50;

#[derive(Debug, Clone, Default, Serialize)]
pub struct GitSnapshot {
    pub version: Option<String>,
    pub branch: Option<String>,
    pub head: Option<String>,
    pub upstream: Option<String>,
    pub remotes: BTreeMap<String, String>,
    pub dirty_entries: Option<usize>,
    pub tags_at_head: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugBundle {
    pub schema: String,
    pub generated_at: String,
    pub run_id: String,
    pub environment: BTreeMap<String, String>,
    pub git: GitSnapshot,
    pub last_envelope: Option<Value>,
    pub decisions: Vec<Event>,
    pub retries: Vec<Event>,
    pub remediations: Vec<Event>,
    pub rollback_verifications: Vec<Event>,
    pub diagnoses: Vec<Event>,
    pub events_tail: Vec<Event>,
}

/// Copy the allowlisted variables that `lookup` knows about.
pub fn collect_env(lookup: impl Fn(&str) -> Option<String>) -> BTreeMap<String, String> {
    ENV_ALLOWLIST
        .iter()
        .filter_map(|name| lookup(name).map(|value| (name.to_string(), value)))
        .collect()
}

/// Best-effort snapshot; a failing query leaves its field empty.
pub fn git_snapshot(git: &Git) -> GitSnapshot {
    if !git.is_repository() {
        return GitSnapshot {
            version: git.version().ok(),
            ..GitSnapshot::default()
        };
    }
    let branch = git.current_branch().ok().flatten();
    let upstream = branch
        .as_deref()
        .and_then(|name| git.upstream(name).ok().flatten());
    let remotes = git
        .remotes()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|name| {
            let url = git.remote_url(&name).ok().flatten()?;
            Some((name, url))
        })
        .collect();
    GitSnapshot {
        version: git.version().ok(),
        branch,
        head: git.head_short_sha(12).ok(),
        upstream,
        remotes,
        dirty_entries: git.status_porcelain().ok().map(|entries| entries.len()),
        tags_at_head: git.tags_at_head().unwrap_or_default(),
    }
}

/// Assemble the bundle for `run_id`, or for the run of the last envelope
/// (falling back to the newest event) when none is given.
#[instrument(skip_all, fields(run_id = ?run_id))]
pub fn build_bundle(
    paths: &PnpPaths,
    run_id: Option<&str>,
    environment: BTreeMap<String, String>,
    aliases: &AliasMap,
) -> Result<DebugBundle> {
    let events = load_events(&paths.events_path)?;
    let last_envelope = load_envelope(&paths.envelope_path, aliases)?;

    let run_id = match run_id {
        Some(id) => id.to_string(),
        None => {
            let from_envelope = last_envelope
                .as_ref()
                .and_then(|env| env.pointer("/context/run_id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            match from_envelope.or_else(|| events.last().map(|e| e.run_id.clone())) {
                Some(id) => id,
                None => bail!("no run to report: {} is empty", paths.events_path.display()),
            }
        }
    };

    let run_events: Vec<Event> = events.into_iter().filter(|e| e.run_id == run_id).collect();
    let of_type = |ty: EventType| -> Vec<Event> {
        run_events
            .iter()
            .filter(|e| e.event_type == ty)
            .cloned()
            .collect()
    };
    let decisions = of_type(EventType::ResolverDecision);
    let retries = of_type(EventType::Retry);
    let remediations = of_type(EventType::Remediation);
    let rollback_verifications = of_type(EventType::RollbackVerification);
    let diagnoses = of_type(EventType::ActionableDiagnosis);
    let skip = run_events.len().saturating_sub(EVENTS_TAIL);
    let events_tail = run_events[skip..].to_vec();

    // Only keep the envelope when it belongs to this run.
    let last_envelope = last_envelope.filter(|env| {
        env.pointer("/context/run_id").and_then(Value::as_str) == Some(run_id.as_str())
    });

    debug!(events = run_events.len(), "bundle assembled");
    Ok(DebugBundle {
        schema: DEBUG_REPORT_SCHEMA.to_string(),
        generated_at: now_rfc3339(),
        run_id,
        environment,
        git: git_snapshot(&Git::new(&paths.root)),
        last_envelope,
        decisions,
        retries,
        remediations,
        rollback_verifications,
        diagnoses,
        events_tail,
    })
}

/// Redact and write the bundle; returns the report path.
pub fn write_bundle(paths: &PnpPaths, bundle: &DebugBundle) -> Result<PathBuf> {
    let value = serde_json::to_value(bundle).context("serialize debug bundle")?;
    let sanitized = redact_value(&value);
    let path = paths.debug_report_path(&bundle.run_id);
    fs::create_dir_all(&paths.log_dir)
        .with_context(|| format!("create directory {}", paths.log_dir.display()))?;
    let mut buf = serde_json::to_string_pretty(&sanitized).context("serialize debug bundle json")?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::event_log::EventLogger;
    use crate::test_support::TestRepo;
    use serde_json::json;

    #[test]
    fn env_collection_is_allowlisted() {
        let env = collect_env(|name| match name {
            "CI" => Some("true".to_string()),
            "HOME" => Some("/root".to_string()),
            _ => None,
        });
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("CI").map(String::as_str), Some("true"));
    }

    #[test]
    fn bundle_covers_one_run_and_is_redacted() {
        let repo = TestRepo::new();
        let paths = PnpPaths::new(repo.path());
        let ours = EventLogger::new(&paths.events_path, "run-a");
        let theirs = EventLogger::new(&paths.events_path, "run-b");
        ours.emit(
            EventType::ErrorSignal,
            "push",
            json!({"stderr_excerpt": "token=abc123 rejected"}),
        )
        .expect("emit");
        theirs
            .emit(EventType::ResolverDecision, "push", json!({"code": "PNP_NET_TIMEOUT"}))
            .expect("emit");
        ours.emit(
            EventType::ResolverDecision,
            "push",
            json!({"code": "PNP_NET_CONNECTIVITY"}),
        )
        .expect("emit");
        ours.emit(EventType::Retry, "push", json!({"attempt": 1}))
            .expect("emit");

        let env = collect_env(|name| (name == "TERM").then(|| "xterm".to_string()));
        let aliases = AliasMap::builtin().expect("aliases");
        let bundle = build_bundle(&paths, Some("run-a"), env, &aliases).expect("bundle");
        assert_eq!(bundle.decisions.len(), 1);
        assert_eq!(bundle.retries.len(), 1);
        assert_eq!(bundle.events_tail.len(), 3);
        assert_eq!(bundle.git.branch.as_deref(), Some("main"));
        assert!(bundle.git.remotes.contains_key("origin"));
        assert!(bundle.last_envelope.is_none());

        let path = write_bundle(&paths, &bundle).expect("write");
        assert_eq!(path, paths.debug_report_path("run-a"));
        let written = fs::read_to_string(&path).expect("read");
        assert!(!written.contains("abc123"));
        assert!(written.contains("pnp.debug_report.v1"));
        assert!(written.contains("xterm"));
    }

    #[test]
    fn early_resolver_events_survive_a_long_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = PnpPaths::new(temp.path());
        let logger = EventLogger::new(&paths.events_path, "run-a");
        logger
            .emit(EventType::Remediation, "push", json!({"outcome": "success"}))
            .expect("emit");
        logger
            .emit(EventType::RollbackVerification, "release", json!({"verified": true}))
            .expect("emit");
        for attempt in 0..EVENTS_TAIL + 10 {
            logger
                .emit(EventType::ErrorSignal, "push", json!({"attempt": attempt}))
                .expect("emit");
        }
        logger
            .emit(EventType::ActionableDiagnosis, "push", json!({"code": "PNP_NET_TIMEOUT"}))
            .expect("emit");

        let aliases = AliasMap::builtin().expect("aliases");
        let bundle = build_bundle(&paths, Some("run-a"), BTreeMap::new(), &aliases).expect("bundle");
        assert_eq!(bundle.events_tail.len(), EVENTS_TAIL);
        assert!(
            bundle
                .events_tail
                .iter()
                .all(|e| e.event_type != EventType::Remediation)
        );
        assert_eq!(bundle.remediations.len(), 1);
        assert_eq!(bundle.remediations[0].payload_str("outcome"), Some("success"));
        assert_eq!(bundle.rollback_verifications.len(), 1);
        assert_eq!(bundle.diagnoses.len(), 1);
    }

    #[test]
    fn defaults_to_newest_run_and_fails_on_empty_stream() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = PnpPaths::new(temp.path());
        let aliases = AliasMap::builtin().expect("aliases");
        let err = build_bundle(&paths, None, BTreeMap::new(), &aliases).expect_err("empty");
        assert!(err.to_string().contains("no run to report"));

        EventLogger::new(&paths.events_path, "old")
            .emit(EventType::Retry, "push", json!({}))
            .expect("emit");
        EventLogger::new(&paths.events_path, "new")
            .emit(EventType::Retry, "push", json!({}))
            .expect("emit");
        let bundle = build_bundle(&paths, None, BTreeMap::new(), &aliases).expect("bundle");
        assert_eq!(bundle.run_id, "new");
        assert!(bundle.git.branch.is_none());
    }
}
