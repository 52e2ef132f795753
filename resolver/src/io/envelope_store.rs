//! Persistence for `pnplog/last_error_envelope.json`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::alias::AliasMap;
use crate::core::envelope::{ErrorEnvelope, migrate_envelope_value};

pub const ENVELOPE_SCHEMA_JSON: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/error_envelope/v1.schema.json"
));

/// Validate an envelope against the v1 JSON schema.
pub fn validate_envelope(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(ENVELOPE_SCHEMA_JSON).context("parse envelope schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "envelope schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Validate and atomically replace the last-error envelope.
pub fn write_envelope(path: &Path, envelope: &ErrorEnvelope) -> Result<()> {
    let value = serde_json::to_value(envelope).context("serialize envelope")?;
    validate_envelope(&value)?;
    let parent = path
        .parent()
        .with_context(|| format!("envelope path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = serde_json::to_string_pretty(&value).context("serialize envelope json")?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    debug!(code = %envelope.code, path = %path.display(), "envelope written");
    Ok(())
}

/// Read a persisted envelope, rewriting a deprecated `code` to its canonical
/// form. Older envelopes are returned as raw JSON since their shape may
/// predate the current schema.
pub fn load_envelope(path: &Path, aliases: &AliasMap) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    if migrate_envelope_value(&mut value, aliases) {
        debug!(path = %path.display(), "migrated deprecated envelope code");
    }
    Ok(Some(value))
}
