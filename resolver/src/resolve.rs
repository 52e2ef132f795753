//! Resolution loop: run an operation, and on failure classify, decide, back
//! off or remediate, and re-run until it succeeds or a terminal envelope is
//! produced.
//!
//! Every observed failure yields exactly one `resolver_decision` event. The
//! terminal envelope is persisted and announced with `actionable_diagnosis`.
//! A [`Resolver`] lives for one run: its attempt counter spans every step it
//! resolves, so a mutating remediation runs at most once per `(step, code)`.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::core::alias::AliasMap;
use crate::core::budget::remaining_budget;
use crate::core::classifier::{classify, synthetic};
use crate::core::codes::{HANDLER_FAULT, KEYBOARD_INTERRUPT, UNHANDLED_EXCEPTION};
use crate::core::envelope::{self, ErrorEnvelope, STDERR_EXCERPT_CHARS};
use crate::core::event::EventType;
use crate::core::normalize::{normalize, redact, truncate_chars};
use crate::core::policy::{AttemptCounter, PolicyAction, PolicyDecision, PolicyEngine};
use crate::core::rules::RuleTable;
use crate::core::types::{Classification, RunContext};
use crate::io::cancel::{CancelToken, Wait, sleep_cancellable};
use crate::io::config::ResolverConfig;
use crate::io::confirm::Confirmer;
use crate::io::envelope_store::write_envelope;
use crate::io::event_log::{EventLogger, now_rfc3339};
use crate::io::process::run_command_with_timeout;
use crate::io::remediation::{CommandRunner, RemediationReport, RemediationRequest, Remediator};

/// Output of one operation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Something that can fail with diagnostic text and be re-run.
pub trait Operation {
    fn describe(&self) -> String;
    fn run(&mut self) -> Result<OperationOutput>;
}

/// External command operation.
#[derive(Debug, Clone)]
pub struct CommandOperation {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    label: Option<String>,
}

impl CommandOperation {
    pub fn new(argv: &[String], workdir: &Path, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        let (program, args) = argv.split_first().context("operation command is empty")?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            workdir: workdir.to_path_buf(),
            timeout,
            output_limit_bytes,
            label: None,
        })
    }

    /// Name reported as the envelope `operation` instead of the command line.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl Operation for CommandOperation {
    fn describe(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        redact(&parts.join(" "))
    }

    fn run(&mut self) -> Result<OperationOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {}", self.describe()))?;
        Ok(OperationOutput {
            success: output.success(),
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResolution {
    Succeeded { attempts: u32 },
    Failed(Box<ErrorEnvelope>),
}

pub struct Resolver<'a> {
    rules: RuleTable,
    aliases: AliasMap,
    engine: PolicyEngine,
    counter: RefCell<AttemptCounter>,
    remediator: Remediator<'a>,
    logger: &'a EventLogger,
    confirmer: &'a dyn Confirmer,
    cancel: CancelToken,
    envelope_path: Option<PathBuf>,
}

impl<'a> Resolver<'a> {
    /// Build a resolver with the compiled-in rule table and alias map.
    pub fn new(
        config: &ResolverConfig,
        runner: &'a dyn CommandRunner,
        logger: &'a EventLogger,
        confirmer: &'a dyn Confirmer,
    ) -> Result<Self> {
        config.validate().context("resolver config")?;
        Ok(Self {
            rules: RuleTable::builtin()?,
            aliases: AliasMap::builtin()?,
            engine: PolicyEngine::new(config.policy.clone(), config.retry.clone()),
            counter: RefCell::new(AttemptCounter::new()),
            remediator: Remediator::new(runner, config.remediation.clone()),
            logger,
            confirmer,
            cancel: CancelToken::new(),
            envelope_path: None,
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Persist terminal envelopes here.
    pub fn with_envelope_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.envelope_path = Some(path.into());
        self
    }

    /// Normalize, classify and canonicalize one diagnostic.
    pub fn classify(&self, raw: &str) -> Classification {
        let mut classification = classify(&self.rules, &normalize(raw));
        classification.code = self.aliases.canonicalize(&classification.code);
        classification
    }

    #[instrument(skip_all, fields(run_id = %ctx.run_id, step_id = %ctx.step_id))]
    pub fn run_step(&self, ctx: &RunContext, operation: &mut dyn Operation) -> Result<StepResolution> {
        let started = Instant::now();
        let mut counter = self.counter.borrow_mut();
        let mut remediation: Option<RemediationReport> = None;
        let describe = operation.describe();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return self.cancelled(ctx, &counter, None, "", &describe, remediation);
            }
            let (raw, classification) = match operation.run() {
                Ok(output) if output.success => {
                    debug!(attempt, "operation succeeded");
                    return Ok(StepResolution::Succeeded { attempts: attempt });
                }
                Ok(output) => {
                    let classification = self.classify(&output.stderr);
                    (output.stderr, classification)
                }
                Err(err) => {
                    warn!(err = %err, "operation could not run");
                    let raw = format!("{err:#}");
                    (raw, synthetic(UNHANDLED_EXCEPTION, "internal.unhandled_exception"))
                }
            };
            self.logger.emit(
                EventType::ErrorSignal,
                &ctx.step_id,
                json!({
                    "attempt": attempt,
                    "operation": describe,
                    "stderr_excerpt": truncate_chars(raw.trim(), STDERR_EXCERPT_CHARS),
                }),
            )?;

            let decision = self.engine.decide(&classification, ctx, &mut counter, started.elapsed());
            self.emit_decision(ctx, &classification, &decision, attempt)?;

            match decision.action.clone() {
                PolicyAction::Retry { delay_ms } => {
                    if self.backoff(ctx, &classification, started, delay_ms, attempt)? == Wait::Cancelled {
                        return self.cancelled(ctx, &counter, Some(&classification), &raw, &describe, remediation);
                    }
                }
                PolicyAction::Abort { .. } => {
                    return self.terminal(ctx, &classification, &decision, &raw, &describe, remediation);
                }
                PolicyAction::Remediate { handler, confirm } => {
                    if confirm {
                        let prompt = format!(
                            "[{}] run {handler} remediation in {}?",
                            classification.code,
                            ctx.path.display()
                        );
                        if !self.confirmer.confirm(&prompt)? {
                            info!(%handler, "remediation declined");
                            let declined = self.engine.declined(&classification, ctx, &counter);
                            return self.terminal(ctx, &classification, &declined, &raw, &describe, remediation);
                        }
                    }
                    let request = RemediationRequest {
                        classification: &classification,
                        ctx,
                        raw_stderr: &raw,
                    };
                    let report = self.remediator.remediate(handler, &request);
                    self.emit_remediation(ctx, &classification, handler.as_str(), &report)?;

                    // The failure already has its decision event; the fault only
                    // shapes the terminal envelope.
                    if report.fault.is_some() {
                        let fault = synthetic(HANDLER_FAULT, "internal.handler_fault");
                        let decision = self.engine.decide(&fault, ctx, &mut counter, started.elapsed());
                        return self.terminal(ctx, &fault, &decision, &raw, &describe, Some(report));
                    }

                    let follow = self.engine.after_remediation(
                        &classification,
                        ctx,
                        &mut counter,
                        &report.outcome,
                        started.elapsed(),
                    );
                    remediation = Some(report);
                    match follow.action {
                        PolicyAction::Retry { delay_ms } => {
                            if self.backoff(ctx, &classification, started, delay_ms, attempt)? == Wait::Cancelled {
                                return self.cancelled(
                                    ctx,
                                    &counter,
                                    Some(&classification),
                                    &raw,
                                    &describe,
                                    remediation,
                                );
                            }
                        }
                        PolicyAction::Abort { .. } | PolicyAction::Remediate { .. } => {
                            return self.terminal(ctx, &classification, &follow, &raw, &describe, remediation);
                        }
                    }
                }
            }
        }
    }

    fn backoff(
        &self,
        ctx: &RunContext,
        classification: &Classification,
        started: Instant,
        delay_ms: u64,
        attempt: u32,
    ) -> Result<Wait> {
        let deadline = started + self.engine.step_budget(&classification.code);
        // An exhausted budget skips the wait; the next decision aborts.
        let delay = remaining_budget(deadline)
            .map(|remaining| Duration::from_millis(delay_ms).min(remaining))
            .unwrap_or(Duration::ZERO);
        self.logger.emit(
            EventType::Retry,
            &ctx.step_id,
            json!({
                "code": classification.code,
                "attempt": attempt,
                "delay_ms": delay.as_millis() as u64,
            }),
        )?;
        debug!(delay_ms = delay.as_millis() as u64, "backing off");
        Ok(sleep_cancellable(&self.cancel, delay))
    }

    fn cancelled(
        &self,
        ctx: &RunContext,
        counter: &AttemptCounter,
        interrupted: Option<&Classification>,
        raw: &str,
        describe: &str,
        remediation: Option<RemediationReport>,
    ) -> Result<StepResolution> {
        let cancel = synthetic(KEYBOARD_INTERRUPT, "internal.cancelled");
        let decision = self.engine.cancelled(interrupted.unwrap_or(&cancel), ctx, counter);
        self.terminal(ctx, &cancel, &decision, raw, describe, remediation)
    }

    fn terminal(
        &self,
        ctx: &RunContext,
        classification: &Classification,
        decision: &PolicyDecision,
        raw: &str,
        describe: &str,
        remediation: Option<RemediationReport>,
    ) -> Result<StepResolution> {
        let (outcome, rollback) = match remediation {
            Some(report) => (Some(report.outcome), report.rollback),
            None => (None, None),
        };
        let diagnostic = self.remediator.diagnose(classification.handler, ctx);
        let envelope = envelope::build(classification, decision, ctx, raw, describe)
            .with_generated_at(now_rfc3339())
            .with_remediation(outcome, rollback)
            .with_diagnostic(diagnostic);

        self.logger.emit(
            EventType::ActionableDiagnosis,
            &ctx.step_id,
            json!({
                "code": envelope.code,
                "actionable": envelope.actionable,
                "reason": decision.abort_reason().map(|r| r.as_str()),
                "summary": envelope.summary_line(),
            }),
        )?;
        if let Some(path) = &self.envelope_path {
            write_envelope(path, &envelope)?;
        }
        info!(code = %envelope.code, "step failed");
        Ok(StepResolution::Failed(Box::new(envelope)))
    }

    fn emit_decision(
        &self,
        ctx: &RunContext,
        classification: &Classification,
        decision: &PolicyDecision,
        attempt: u32,
    ) -> Result<()> {
        self.logger.emit(
            EventType::ResolverDecision,
            &ctx.step_id,
            json!({
                "code": classification.code,
                "severity": classification.severity,
                "handler": classification.handler,
                "matched_rule_id": classification.matched_rule_id,
                "attempt": attempt,
                "action": decision.action.label(),
                "decision": decision,
            }),
        )?;
        Ok(())
    }

    fn emit_remediation(
        &self,
        ctx: &RunContext,
        classification: &Classification,
        handler: &str,
        report: &RemediationReport,
    ) -> Result<()> {
        self.logger.emit(
            EventType::Remediation,
            &ctx.step_id,
            json!({
                "code": classification.code,
                "handler": handler,
                "outcome": report.outcome.label(),
                "detail": report.outcome.detail(),
                "dry_run": ctx.dry_run,
                "fault": report.fault,
            }),
        )?;
        if let Some(rollback) = &report.rollback {
            self.logger.emit(
                EventType::RollbackVerification,
                &ctx.step_id,
                json!({
                    "code": classification.code,
                    "handler": handler,
                    "attempted": rollback.attempted,
                    "verified": rollback.verified,
                    "detail": rollback.detail,
                }),
            )?;
        }
        Ok(())
    }
}
