//! Resolver configuration stored in `pnp.toml` at the repository root.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::codes;
use crate::core::policy::{PolicyConfig, RetryOverride};

/// Resolver configuration (TOML).
///
/// Edited by humans; every field has a default so a missing or partial file
/// is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolverConfig {
    pub policy: PolicyConfig,

    /// Per-code retry overrides keyed by canonical code.
    pub retry: BTreeMap<String, RetryOverride>,

    pub remediation: RemediationConfig,

    pub process: ProcessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemediationConfig {
    /// URL the `missing_remote` handler adds when the remote is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_remote_url: Option<String>,

    /// Minimum age before an `index.lock` is treated as stale.
    pub stale_lock_secs: u64,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            fallback_remote_url: None,
            stale_lock_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessConfig {
    /// Upper bound for one child process (operation or handler git call).
    pub command_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 120,
            output_limit_bytes: 100_000,
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.policy.circuit_trip_threshold == 0 {
            return Err(anyhow!("policy.circuit_trip_threshold must be > 0"));
        }
        if self.policy.step_timeout_secs == 0 {
            return Err(anyhow!("policy.step_timeout_secs must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.policy.jitter_fraction) {
            return Err(anyhow!("policy.jitter_fraction must be within [0, 1]"));
        }
        if self.process.command_timeout_secs == 0 {
            return Err(anyhow!("process.command_timeout_secs must be > 0"));
        }
        if self.process.output_limit_bytes == 0 {
            return Err(anyhow!("process.output_limit_bytes must be > 0"));
        }
        for (code, retry) in &self.retry {
            if codes::lookup(code).is_none() {
                return Err(anyhow!("retry.{code}: unknown error code"));
            }
            if codes::is_denylisted(code) && retry.max_attempts.unwrap_or(0) > 0 {
                return Err(anyhow!("retry.{code}: code is never retried"));
            }
            if let (Some(base), Some(max)) = (retry.base_delay_ms, retry.max_delay_ms)
                && base > max
            {
                return Err(anyhow!("retry.{code}: base_delay_ms exceeds max_delay_ms"));
            }
            if retry.timeout_secs == Some(0) {
                return Err(anyhow!("retry.{code}: timeout_secs must be > 0"));
            }
        }
        if let Some(url) = &self.remediation.fallback_remote_url
            && url.trim().is_empty()
        {
            return Err(anyhow!("remediation.fallback_remote_url must not be empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ResolverConfig::default()`.
pub fn load_config(path: &Path) -> Result<ResolverConfig> {
    if !path.exists() {
        let cfg = ResolverConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ResolverConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ResolverConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
