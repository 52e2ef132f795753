//! Canonical artifact paths and `resolver init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{ResolverConfig, write_config};

/// All well-known paths for a repository root.
#[derive(Debug, Clone)]
pub struct PnpPaths {
    pub root: PathBuf,
    pub log_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub events_path: PathBuf,
    pub envelope_path: PathBuf,
    pub slo_report_path: PathBuf,
    pub config_path: PathBuf,
    pub lock_path: PathBuf,
    pub approval_marker_path: PathBuf,
}

impl PnpPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let log_dir = root.join("pnplog");
        Self {
            root: root.clone(),
            log_dir: log_dir.clone(),
            gitignore_path: log_dir.join(".gitignore"),
            events_path: log_dir.join("events.jsonl"),
            envelope_path: log_dir.join("last_error_envelope.json"),
            slo_report_path: log_dir.join("slo_report.json"),
            config_path: root.join("pnp.toml"),
            lock_path: root.join("docs").join("error_code_lock.json"),
            approval_marker_path: root.join(".error_code_breaking_change_approved"),
        }
    }

    pub fn debug_report_path(&self, run_id: &str) -> PathBuf {
        self.log_dir.join(format!("debug-report-{run_id}.json"))
    }
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing `pnp.toml`.
    pub force: bool,
}

/// Create `pnplog/` and a default `pnp.toml` in `root`.
pub fn init_repo(root: &Path, options: &InitOptions) -> Result<PnpPaths> {
    let paths = PnpPaths::new(root);
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "resolver init: pnp.toml already exists (use --force to overwrite)"
        ));
    }
    if paths.log_dir.exists() && !paths.log_dir.is_dir() {
        return Err(anyhow!("resolver init: pnplog exists but is not a directory"));
    }
    fs::create_dir_all(&paths.log_dir)
        .with_context(|| format!("create directory {}", paths.log_dir.display()))?;
    fs::write(&paths.gitignore_path, LOG_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &ResolverConfig::default())?;
    Ok(paths)
}

const LOG_GITIGNORE: &str = "*\n";
