//! Remediation handlers.
//!
//! Handlers change repository state only through [`CommandRunner`], and a dry
//! run returns before the runner is touched. Whether a handler may run at all
//! is decided earlier by `core::remediation::gate`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::core::normalize::redact;
use crate::core::remediation::{RemediationOutcome, RollbackReport};
use crate::core::types::{Classification, HandlerName, RunContext};
use crate::io::config::RemediationConfig;
use crate::io::process::run_command_with_timeout;

/// Result of one external command issued by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    fn first_stderr_line(&self) -> String {
        let line = self.stderr.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        redact(line.trim())
    }
}

/// Side-effect seam for handlers.
pub trait CommandRunner {
    fn git(&self, workdir: &Path, args: &[&str]) -> Result<CommandResult>;
    fn remove_file(&self, path: &Path) -> Result<()>;
}

/// Runs real `git` subprocesses with a timeout.
#[derive(Debug, Clone)]
pub struct GitCommandRunner {
    timeout: Duration,
    output_limit_bytes: usize,
}

impl GitCommandRunner {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            timeout,
            output_limit_bytes,
        }
    }
}

impl CommandRunner for GitCommandRunner {
    #[instrument(skip_all, fields(args = %args.join(" ")))]
    fn git(&self, workdir: &Path, args: &[&str]) -> Result<CommandResult> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(workdir);
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run git {}", args.join(" ")))?;
        Ok(CommandResult {
            success: output.success(),
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
        })
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path).with_context(|| format!("remove {}", path.display()))
    }
}

/// The failure a handler is asked to fix.
#[derive(Debug, Clone, Copy)]
pub struct RemediationRequest<'a> {
    pub classification: &'a Classification,
    pub ctx: &'a RunContext,
    /// Raw diagnostic text; some handlers parse names out of it.
    pub raw_stderr: &'a str,
}

pub trait Handler {
    /// Human-readable steps this handler would run.
    fn plan(&self, req: &RemediationRequest<'_>, settings: &RemediationConfig) -> Vec<String>;

    fn apply(
        &self,
        req: &RemediationRequest<'_>,
        settings: &RemediationConfig,
        runner: &dyn CommandRunner,
    ) -> Result<RemediationOutcome>;

    /// Rollback handlers re-check the state they undid.
    fn verify(&self, _req: &RemediationRequest<'_>, _runner: &dyn CommandRunner) -> Option<Result<RollbackReport>> {
        None
    }
}

/// What one remediation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationReport {
    pub outcome: RemediationOutcome,
    pub rollback: Option<RollbackReport>,
    /// Set when the handler errored or panicked instead of reporting an outcome.
    pub fault: Option<String>,
}

pub struct Remediator<'a> {
    runner: &'a dyn CommandRunner,
    settings: RemediationConfig,
}

impl<'a> Remediator<'a> {
    pub fn new(runner: &'a dyn CommandRunner, settings: RemediationConfig) -> Self {
        Self { runner, settings }
    }

    #[instrument(skip_all, fields(handler = %handler, dry_run = req.ctx.dry_run))]
    pub fn remediate(&self, handler: HandlerName, req: &RemediationRequest<'_>) -> RemediationReport {
        let imp = handler_for(handler);
        if req.ctx.dry_run {
            let planned = imp.plan(req, &self.settings);
            debug!(steps = planned.len(), "dry run: remediation simulated");
            return RemediationReport {
                outcome: RemediationOutcome::Simulated {
                    detail: format!("dry run: {handler} planned {} step(s)", planned.len()),
                    planned,
                },
                rollback: None,
                fault: None,
            };
        }

        let applied = catch_unwind(AssertUnwindSafe(|| imp.apply(req, &self.settings, self.runner)));
        let outcome = match applied {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => return fault(handler, format!("{err:#}")),
            Err(_) => return fault(handler, "handler panicked".to_string()),
        };

        let rollback = if outcome.succeeded() {
            imp.verify(req, self.runner).map(|verified| {
                verified.unwrap_or_else(|err| RollbackReport {
                    attempted: true,
                    verified: false,
                    detail: format!("verification failed: {err:#}"),
                })
            })
        } else {
            None
        };
        debug!(outcome = outcome.label(), "remediation finished");
        RemediationReport {
            outcome,
            rollback,
            fault: None,
        }
    }

    /// Read-only probe output for advisory handlers, attached to envelopes.
    pub fn diagnose(&self, handler: HandlerName, ctx: &RunContext) -> Option<String> {
        if handler != HandlerName::InternetConErr {
            return None;
        }
        let remote = remote_or_origin(ctx);
        if ctx.dry_run {
            return Some(format!("dry run: would probe git ls-remote --heads {remote}"));
        }
        match self.runner.git(&ctx.path, &["ls-remote", "--heads", remote]) {
            Ok(result) if result.success => Some(format!("remote {remote} reachable via ls-remote")),
            Ok(result) => Some(format!(
                "remote {remote} unreachable: {}",
                result.first_stderr_line()
            )),
            Err(err) => {
                warn!(err = %err, "connectivity probe failed to start");
                Some(format!("connectivity probe failed: {err}"))
            }
        }
    }
}

fn fault(handler: HandlerName, detail: String) -> RemediationReport {
    warn!(%handler, detail = %detail, "remediation handler fault");
    RemediationReport {
        outcome: RemediationOutcome::Failed {
            detail: format!("{handler} handler fault: {}", redact(&detail)),
        },
        rollback: None,
        fault: Some(redact(&detail)),
    }
}

pub fn handler_for(name: HandlerName) -> &'static dyn Handler {
    match name {
        HandlerName::DubiousOwnership => &DubiousOwnership,
        HandlerName::InvalidObject => &InvalidObject,
        HandlerName::MissingRemote => &MissingRemote,
        HandlerName::LockContention => &LockContention,
        HandlerName::UpstreamMissing => &UpstreamMissing,
        HandlerName::DivergedBranch => &DivergedBranch,
        HandlerName::RefConflict => &RefConflict,
        HandlerName::InternetConErr => &ConnectivityProbe,
        HandlerName::Fallback
        | HandlerName::AuthFailure
        | HandlerName::LargeFileRejection
        | HandlerName::HookDeclined
        | HandlerName::SubmoduleInconsistent
        | HandlerName::ProtectedBranch
        | HandlerName::DirtyWorktree
        | HandlerName::LineEndings
        | HandlerName::DetachedHead
        | HandlerName::ConfigInvalid => &Advisory,
    }
}

fn remote_or_origin(ctx: &RunContext) -> &str {
    if ctx.remote.trim().is_empty() { "origin" } else { ctx.remote.as_str() }
}

fn outcome_of(result: &CommandResult, ok: String) -> RemediationOutcome {
    if result.success {
        RemediationOutcome::Success { detail: ok }
    } else {
        RemediationOutcome::Failed {
            detail: result.first_stderr_line(),
        }
    }
}

/// No automatic fix; the envelope hint tells the user what to do.
struct Advisory;

impl Handler for Advisory {
    fn plan(&self, _req: &RemediationRequest<'_>, _settings: &RemediationConfig) -> Vec<String> {
        Vec::new()
    }

    fn apply(
        &self,
        req: &RemediationRequest<'_>,
        _settings: &RemediationConfig,
        _runner: &dyn CommandRunner,
    ) -> Result<RemediationOutcome> {
        Ok(RemediationOutcome::Failed {
            detail: format!("{} is advisory; manual action required", req.classification.handler),
        })
    }
}

struct ConnectivityProbe;

impl Handler for ConnectivityProbe {
    fn plan(&self, req: &RemediationRequest<'_>, _settings: &RemediationConfig) -> Vec<String> {
        vec![format!("git ls-remote --heads {}", remote_or_origin(req.ctx))]
    }

    fn apply(
        &self,
        req: &RemediationRequest<'_>,
        _settings: &RemediationConfig,
        runner: &dyn CommandRunner,
    ) -> Result<RemediationOutcome> {
        let remote = remote_or_origin(req.ctx);
        let result = runner.git(&req.ctx.path, &["ls-remote", "--heads", remote])?;
        Ok(outcome_of(&result, format!("remote {remote} is reachable")))
    }
}

struct DubiousOwnership;

impl Handler for DubiousOwnership {
    fn plan(&self, req: &RemediationRequest<'_>, _settings: &RemediationConfig) -> Vec<String> {
        vec![format!(
            "git config --global --add safe.directory {}",
            req.ctx.path.display()
        )]
    }

    fn apply(
        &self,
        req: &RemediationRequest<'_>,
        _settings: &RemediationConfig,
        runner: &dyn CommandRunner,
    ) -> Result<RemediationOutcome> {
        let path = req.ctx.path.display().to_string();
        let existing = runner.git(&req.ctx.path, &["config", "--global", "--get-all", "safe.directory"])?;
        if existing.success && existing.stdout.lines().any(|l| l.trim() == path) {
            return Ok(RemediationOutcome::Success {
                detail: format!("{path} already listed in safe.directory"),
            });
        }
        let result = runner.git(&req.ctx.path, &["config", "--global", "--add", "safe.directory", &path])?;
        Ok(outcome_of(&result, format!("added {path} to safe.directory")))
    }
}

struct InvalidObject;

impl Handler for InvalidObject {
    fn plan(&self, _req: &RemediationRequest<'_>, _settings: &RemediationConfig) -> Vec<String> {
        vec!["git fsck --full".to_string(), "git reset --mixed HEAD".to_string()]
    }

    fn apply(
        &self,
        req: &RemediationRequest<'_>,
        _settings: &RemediationConfig,
        runner: &dyn CommandRunner,
    ) -> Result<RemediationOutcome> {
        // fsck output is diagnostic only; a nonzero exit is expected here.
        let fsck = runner.git(&req.ctx.path, &["fsck", "--full"])?;
        let problems = fsck
            .stdout
            .lines()
            .chain(fsck.stderr.lines())
            .filter(|l| !l.trim().is_empty())
            .count();
        let reset = runner.git(&req.ctx.path, &["reset", "--mixed", "HEAD"])?;
        Ok(outcome_of(
            &reset,
            format!("index rebuilt from HEAD; fsck reported {problems} line(s)"),
        ))
    }
}

struct MissingRemote;

impl Handler for MissingRemote {
    fn plan(&self, req: &RemediationRequest<'_>, settings: &RemediationConfig) -> Vec<String> {
        match &settings.fallback_remote_url {
            Some(url) => vec![format!("git remote add {} {}", remote_or_origin(req.ctx), redact(url))],
            None => Vec::new(),
        }
    }

    fn apply(
        &self,
        req: &RemediationRequest<'_>,
        settings: &RemediationConfig,
        runner: &dyn CommandRunner,
    ) -> Result<RemediationOutcome> {
        let Some(url) = settings.fallback_remote_url.as_deref() else {
            return Ok(RemediationOutcome::Failed {
                detail: "no remediation.fallback_remote_url configured".to_string(),
            });
        };
        let remote = remote_or_origin(req.ctx);
        let current = runner.git(&req.ctx.path, &["remote", "get-url", remote])?;
        let args: [&str; 4] = if current.success {
            ["remote", "set-url", remote, url]
        } else {
            ["remote", "add", remote, url]
        };
        let result = runner.git(&req.ctx.path, &args)?;
        Ok(outcome_of(
            &result,
            format!("remote {remote} now points at {}", redact(url)),
        ))
    }
}

struct LockContention;

impl LockContention {
    fn lock_path(req: &RemediationRequest<'_>, runner: &dyn CommandRunner) -> Result<PathBuf> {
        let result = runner.git(&req.ctx.path, &["rev-parse", "--absolute-git-dir"])?;
        if !result.success {
            return Err(anyhow!("locate git dir: {}", result.first_stderr_line()));
        }
        Ok(PathBuf::from(result.stdout.trim()).join("index.lock"))
    }
}

impl Handler for LockContention {
    fn plan(&self, req: &RemediationRequest<'_>, settings: &RemediationConfig) -> Vec<String> {
        vec![format!(
            "remove {} if older than {}s",
            req.ctx.path.join(".git").join("index.lock").display(),
            settings.stale_lock_secs
        )]
    }

    fn apply(
        &self,
        req: &RemediationRequest<'_>,
        settings: &RemediationConfig,
        runner: &dyn CommandRunner,
    ) -> Result<RemediationOutcome> {
        let lock = Self::lock_path(req, runner)?;
        let Ok(meta) = std::fs::metadata(&lock) else {
            return Ok(RemediationOutcome::Success {
                detail: "index.lock already gone".to_string(),
            });
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or_default();
        if age < Duration::from_secs(settings.stale_lock_secs) {
            return Ok(RemediationOutcome::Failed {
                detail: format!(
                    "index.lock is {}s old (< {}s); another git process may still hold it",
                    age.as_secs(),
                    settings.stale_lock_secs
                ),
            });
        }
        runner.remove_file(&lock)?;
        Ok(RemediationOutcome::Success {
            detail: format!("removed stale {}", lock.display()),
        })
    }
}

struct UpstreamMissing;

impl Handler for UpstreamMissing {
    fn plan(&self, req: &RemediationRequest<'_>, _settings: &RemediationConfig) -> Vec<String> {
        vec![format!(
            "git push --set-upstream {} {}",
            remote_or_origin(req.ctx),
            req.ctx.branch
        )]
    }

    fn apply(
        &self,
        req: &RemediationRequest<'_>,
        _settings: &RemediationConfig,
        runner: &dyn CommandRunner,
    ) -> Result<RemediationOutcome> {
        let branch = req.ctx.branch.trim();
        if branch.is_empty() || branch == "HEAD" {
            return Ok(RemediationOutcome::Failed {
                detail: "detached HEAD; no branch to publish".to_string(),
            });
        }
        let remote = remote_or_origin(req.ctx);
        let result = runner.git(&req.ctx.path, &["push", "--set-upstream", remote, branch])?;
        Ok(outcome_of(&result, format!("{branch} now tracks {remote}/{branch}")))
    }
}

struct DivergedBranch;

impl Handler for DivergedBranch {
    fn plan(&self, req: &RemediationRequest<'_>, _settings: &RemediationConfig) -> Vec<String> {
        vec![format!("git fetch {}", remote_or_origin(req.ctx))]
    }

    fn apply(
        &self,
        req: &RemediationRequest<'_>,
        _settings: &RemediationConfig,
        runner: &dyn CommandRunner,
    ) -> Result<RemediationOutcome> {
        let remote = remote_or_origin(req.ctx);
        let result = runner.git(&req.ctx.path, &["fetch", remote])?;
        Ok(outcome_of(
            &result,
            format!("fetched {remote}; integrate upstream before pushing again"),
        ))
    }
}

static TAG_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"refs/tags/([^\s'\x22:]+)").expect("tag ref regex"),
        Regex::new(r"tag '([^']+)' already exists").expect("tag exists regex"),
        Regex::new(r"\[rejected\]\s+(\S+)\s+->\s+\S+\s+\(already exists\)").expect("tag rejected regex"),
    ]
});

/// Name of the tag a ref-conflict diagnostic refers to.
pub fn conflicting_tag(raw: &str) -> Option<String> {
    TAG_PATTERNS
        .iter()
        .find_map(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Rollback: delete the conflicting tag locally and on the remote.
struct RefConflict;

impl Handler for RefConflict {
    fn plan(&self, req: &RemediationRequest<'_>, _settings: &RemediationConfig) -> Vec<String> {
        let Some(tag) = conflicting_tag(req.raw_stderr) else {
            return Vec::new();
        };
        vec![
            format!("git tag -d {tag}"),
            format!("git push {} :refs/tags/{tag}", remote_or_origin(req.ctx)),
        ]
    }

    fn apply(
        &self,
        req: &RemediationRequest<'_>,
        _settings: &RemediationConfig,
        runner: &dyn CommandRunner,
    ) -> Result<RemediationOutcome> {
        let Some(tag) = conflicting_tag(req.raw_stderr) else {
            return Ok(RemediationOutcome::Failed {
                detail: "could not determine the conflicting tag".to_string(),
            });
        };
        let remote = remote_or_origin(req.ctx);
        let local = runner.git(&req.ctx.path, &["tag", "-d", &tag])?;
        if !local.success && !local.stderr.contains("not found") {
            return Ok(outcome_of(&local, String::new()));
        }
        let refspec = format!(":refs/tags/{tag}");
        let remote_delete = runner.git(&req.ctx.path, &["push", remote, &refspec])?;
        if !remote_delete.success && !remote_delete.stderr.contains("remote ref does not exist") {
            return Ok(outcome_of(&remote_delete, String::new()));
        }
        Ok(RemediationOutcome::Success {
            detail: format!("deleted tag {tag} locally and on {remote}"),
        })
    }

    fn verify(&self, req: &RemediationRequest<'_>, runner: &dyn CommandRunner) -> Option<Result<RollbackReport>> {
        let tag = conflicting_tag(req.raw_stderr)?;
        Some(verify_tag_removed(req.ctx, runner, &tag))
    }
}

fn verify_tag_removed(ctx: &RunContext, runner: &dyn CommandRunner, tag: &str) -> Result<RollbackReport> {
    let remote = remote_or_origin(ctx);
    let local = runner.git(&ctx.path, &["tag", "-l", tag])?;
    let reference = format!("refs/tags/{tag}");
    let remote_tags = runner.git(&ctx.path, &["ls-remote", "--tags", remote, &reference])?;
    if !local.success || !remote_tags.success {
        return Ok(RollbackReport {
            attempted: true,
            verified: false,
            detail: "could not re-read tags".to_string(),
        });
    }
    let local_gone = local.stdout.trim().is_empty();
    let remote_gone = remote_tags.stdout.trim().is_empty();
    let detail = match (local_gone, remote_gone) {
        (true, true) => format!("tag {tag} absent locally and on {remote}"),
        (false, _) => format!("tag {tag} still present locally"),
        (true, false) => format!("tag {tag} still present on {remote}"),
    };
    Ok(RollbackReport {
        attempted: true,
        verified: local_gone && remote_gone,
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codes;
    use crate::test_support::{RecordingRunner, run_context};

    fn classification(code: &str, handler: HandlerName) -> Classification {
        Classification {
            code: code.to_string(),
            severity: codes::metadata(code).severity,
            handler,
            matched_rule_id: "test".to_string(),
        }
    }

    fn request<'a>(cls: &'a Classification, ctx: &'a RunContext, raw: &'a str) -> RemediationRequest<'a> {
        RemediationRequest {
            classification: cls,
            ctx,
            raw_stderr: raw,
        }
    }

    #[test]
    fn extracts_tag_from_common_diagnostics() {
        assert_eq!(
            conflicting_tag(" ! [rejected]        v1.2.0 -> v1.2.0 (already exists)").as_deref(),
            Some("v1.2.0")
        );
        assert_eq!(
            conflicting_tag("fatal: tag 'v2.0.0' already exists").as_deref(),
            Some("v2.0.0")
        );
        assert_eq!(
            conflicting_tag("error: cannot lock ref 'refs/tags/v3': reference already exists").as_deref(),
            Some("v3")
        );
        assert_eq!(conflicting_tag("nothing to see"), None);
    }

    #[test]
    fn dry_run_never_touches_the_runner() {
        let runner = RecordingRunner::new();
        let remediator = Remediator::new(&runner, RemediationConfig::default());
        let mut ctx = run_context("/repo", "push");
        ctx.dry_run = true;
        for handler in HandlerName::ALL {
            let cls = classification("PNP_GIT_REF_CONFLICT", handler);
            let report = remediator.remediate(
                handler,
                &request(&cls, &ctx, "fatal: tag 'v1' already exists"),
            );
            assert_eq!(report.outcome.label(), "simulated");
            assert!(report.rollback.is_none());
        }
        assert!(runner.calls().is_empty());
        assert!(remediator.diagnose(HandlerName::InternetConErr, &ctx).is_some());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn simulated_outcome_lists_planned_commands() {
        let runner = RecordingRunner::new();
        let remediator = Remediator::new(&runner, RemediationConfig::default());
        let mut ctx = run_context("/repo", "push");
        ctx.dry_run = true;
        let cls = classification("PNP_GIT_UPSTREAM_MISSING", HandlerName::UpstreamMissing);
        let report = remediator.remediate(HandlerName::UpstreamMissing, &request(&cls, &ctx, ""));
        match report.outcome {
            RemediationOutcome::Simulated { planned, .. } => {
                assert_eq!(planned, vec!["git push --set-upstream origin main".to_string()]);
            }
            other => panic!("expected simulated, got {other:?}"),
        }
    }

    #[test]
    fn upstream_missing_pushes_with_set_upstream() {
        let runner = RecordingRunner::new();
        let remediator = Remediator::new(&runner, RemediationConfig::default());
        let ctx = run_context("/repo", "push");
        let cls = classification("PNP_GIT_UPSTREAM_MISSING", HandlerName::UpstreamMissing);
        let report = remediator.remediate(HandlerName::UpstreamMissing, &request(&cls, &ctx, ""));
        assert!(report.outcome.succeeded());
        assert_eq!(runner.calls(), vec!["git push --set-upstream origin main".to_string()]);
    }

    #[test]
    fn failed_command_becomes_failed_outcome() {
        let runner = RecordingRunner::new().fail_on("fetch", "fatal: could not read from remote");
        let remediator = Remediator::new(&runner, RemediationConfig::default());
        let ctx = run_context("/repo", "push");
        let cls = classification("PNP_GIT_NON_FAST_FORWARD", HandlerName::DivergedBranch);
        let report = remediator.remediate(HandlerName::DivergedBranch, &request(&cls, &ctx, ""));
        assert_eq!(
            report.outcome,
            RemediationOutcome::Failed {
                detail: "fatal: could not read from remote".to_string()
            }
        );
        assert!(report.fault.is_none());
    }

    #[test]
    fn runner_errors_are_reported_as_faults() {
        let runner = RecordingRunner::new().error_on("fetch");
        let remediator = Remediator::new(&runner, RemediationConfig::default());
        let ctx = run_context("/repo", "push");
        let cls = classification("PNP_GIT_NON_FAST_FORWARD", HandlerName::DivergedBranch);
        let report = remediator.remediate(HandlerName::DivergedBranch, &request(&cls, &ctx, ""));
        assert_eq!(report.outcome.label(), "failed");
        assert!(report.fault.is_some());
    }

    #[test]
    fn missing_remote_requires_configured_url() {
        let runner = RecordingRunner::new();
        let ctx = run_context("/repo", "push");
        let cls = classification("PNP_NET_REMOTE_URL_INVALID", HandlerName::MissingRemote);

        let without = Remediator::new(&runner, RemediationConfig::default());
        let report = without.remediate(HandlerName::MissingRemote, &request(&cls, &ctx, ""));
        assert_eq!(report.outcome.label(), "failed");
        assert!(runner.calls().is_empty());

        let runner = RecordingRunner::new().fail_on("remote get-url", "error: No such remote 'origin'");
        let with = Remediator::new(
            &runner,
            RemediationConfig {
                fallback_remote_url: Some("git@github.com:o/r.git".to_string()),
                ..RemediationConfig::default()
            },
        );
        let report = with.remediate(HandlerName::MissingRemote, &request(&cls, &ctx, ""));
        assert!(report.outcome.succeeded());
        assert_eq!(
            runner.calls().last().map(String::as_str),
            Some("git remote add origin git@github.com:o/r.git")
        );
    }

    #[test]
    fn ref_conflict_rollback_is_verified() {
        let runner = RecordingRunner::new();
        let remediator = Remediator::new(&runner, RemediationConfig::default());
        let ctx = run_context("/repo", "release");
        let cls = classification("PNP_GIT_REF_CONFLICT", HandlerName::RefConflict);
        let raw = " ! [rejected]        v1.0.0 -> v1.0.0 (already exists)";
        let report = remediator.remediate(HandlerName::RefConflict, &request(&cls, &ctx, raw));
        assert!(report.outcome.succeeded());
        let rollback = report.rollback.expect("rollback report");
        assert!(rollback.attempted);
        assert!(rollback.verified);
        assert_eq!(
            runner.calls(),
            vec![
                "git tag -d v1.0.0".to_string(),
                "git push origin :refs/tags/v1.0.0".to_string(),
                "git tag -l v1.0.0".to_string(),
                "git ls-remote --tags origin refs/tags/v1.0.0".to_string(),
            ]
        );
    }

    #[test]
    fn rollback_not_verified_when_tag_survives() {
        let runner = RecordingRunner::new().respond("ls-remote --tags", "abc123\trefs/tags/v1.0.0\n");
        let remediator = Remediator::new(&runner, RemediationConfig::default());
        let ctx = run_context("/repo", "release");
        let cls = classification("PNP_GIT_REF_CONFLICT", HandlerName::RefConflict);
        let report = remediator.remediate(
            HandlerName::RefConflict,
            &request(&cls, &ctx, "fatal: tag 'v1.0.0' already exists"),
        );
        let rollback = report.rollback.expect("rollback report");
        assert!(!rollback.verified);
        assert!(rollback.detail.contains("still present on origin"));
    }

    #[test]
    fn stale_lock_is_removed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git_dir = temp.path().join(".git");
        std::fs::create_dir_all(&git_dir).expect("git dir");
        let lock = git_dir.join("index.lock");
        std::fs::write(&lock, "").expect("lock");

        let runner = RecordingRunner::new().respond("rev-parse --absolute-git-dir", &format!("{}\n", git_dir.display()));
        let remediator = Remediator::new(
            &runner,
            RemediationConfig {
                stale_lock_secs: 0,
                ..RemediationConfig::default()
            },
        );
        let ctx = run_context(temp.path().to_str().expect("utf8"), "commit");
        let cls = classification("PNP_GIT_LOCK_CONTENTION", HandlerName::LockContention);
        let report = remediator.remediate(HandlerName::LockContention, &request(&cls, &ctx, ""));
        assert!(report.outcome.succeeded(), "{:?}", report.outcome);
        assert!(runner.removed().contains(&lock));
    }

    #[test]
    fn fresh_lock_is_left_alone() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git_dir = temp.path().join(".git");
        std::fs::create_dir_all(&git_dir).expect("git dir");
        std::fs::write(git_dir.join("index.lock"), "").expect("lock");

        let runner = RecordingRunner::new().respond("rev-parse --absolute-git-dir", &format!("{}\n", git_dir.display()));
        let remediator = Remediator::new(
            &runner,
            RemediationConfig {
                stale_lock_secs: 3_600,
                ..RemediationConfig::default()
            },
        );
        let ctx = run_context(temp.path().to_str().expect("utf8"), "commit");
        let cls = classification("PNP_GIT_LOCK_CONTENTION", HandlerName::LockContention);
        let report = remediator.remediate(HandlerName::LockContention, &request(&cls, &ctx, ""));
        assert_eq!(report.outcome.label(), "failed");
        assert!(runner.removed().is_empty());
    }

    #[test]
    fn connectivity_probe_reports_unreachable_remote() {
        let runner = RecordingRunner::new().fail_on("ls-remote", "fatal: unable to access 'https://x/': Could not resolve host");
        let remediator = Remediator::new(&runner, RemediationConfig::default());
        let ctx = run_context("/repo", "push");
        let diagnostic = remediator
            .diagnose(HandlerName::InternetConErr, &ctx)
            .expect("diagnostic");
        assert!(diagnostic.starts_with("remote origin unreachable"));
        assert_eq!(remediator.diagnose(HandlerName::AuthFailure, &ctx), None);
    }
}
