//! Failure resolver for git push/publish/release workflows.
//!
//! Turns an opaque git or GitHub CLI failure into a stable error code, a
//! retry/remediate/abort decision and a versioned error envelope under
//! `pnplog/`.

use std::fs;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::warn;

use resolver::core::alias::AliasMap;
use resolver::core::classifier::classify;
use resolver::core::codes::{self, KEYBOARD_INTERRUPT};
use resolver::core::contract::current_contract;
use resolver::core::normalize::normalize;
use resolver::core::rules::RuleTable;
use resolver::core::types::{Category, RunContext};
use resolver::exit_codes;
use resolver::gate::{OVERRIDE_ENV, check_gate, write_lock};
use resolver::io::config::load_config;
use resolver::io::cancel::CancelToken;
use resolver::io::confirm::{AssumeYes, Confirmer, DenyConfirmer, StdinConfirmer};
use resolver::io::debug_bundle::{build_bundle, collect_env, write_bundle};
use resolver::io::event_log::{EventLogger, new_run_id};
use resolver::io::git::Git;
use resolver::io::init::{InitOptions, PnpPaths, init_repo};
use resolver::io::remediation::GitCommandRunner;
use resolver::logging;
use resolver::resolve::{CommandOperation, Resolver, StepResolution};
use resolver::validate::validate_tables;

#[derive(Parser)]
#[command(
    name = "resolver",
    version,
    about = "Classify, retry and remediate git workflow failures"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `pnplog/` and a default `pnp.toml`.
    Init {
        /// Overwrite an existing `pnp.toml`.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the classification of a diagnostic read from stdin or a file.
    Classify {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Map a possibly deprecated error code to its canonical form.
    Canonicalize { code: String },
    /// Validate the rule table, alias map and config.
    Rules {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run a command, resolving failures until it succeeds or gives up.
    Exec {
        /// Workflow step id (e.g. `push`).
        #[arg(long)]
        step: String,
        /// Operation name for the envelope; defaults to the command line.
        #[arg(long)]
        operation: Option<String>,
        #[arg(long, default_value = "origin")]
        remote: String,
        /// Simulate remediations instead of running them.
        #[arg(long)]
        dry_run: bool,
        /// Non-interactive CI mode (also enabled by `CI=true`).
        #[arg(long)]
        ci: bool,
        /// Answer yes to remediation prompts.
        #[arg(short, long)]
        yes: bool,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the terminal envelope as JSON on stdout.
        #[arg(long)]
        json: bool,
        /// Share one run id across the steps of a workflow.
        #[arg(long, env = "PNP_RUN_ID")]
        run_id: Option<String>,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Check the error-code contract against the committed lock.
    Gate {
        #[arg(long)]
        lock: Option<PathBuf>,
        /// Rewrite the lock from the current contract.
        #[arg(long)]
        write: bool,
    },
    /// Write a sanitized debug bundle for a run.
    Bundle {
        /// Defaults to the run of the last envelope.
        #[arg(long)]
        run_id: Option<String>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("read current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&cwd, force),
        Command::Classify { file } => cmd_classify(file.as_deref()),
        Command::Canonicalize { code } => {
            println!("{}", AliasMap::builtin()?.canonicalize(&code));
            Ok(exit_codes::OK)
        }
        Command::Rules { config } => {
            let paths = PnpPaths::new(&cwd);
            cmd_rules(config.as_deref().unwrap_or(&paths.config_path))
        }
        Command::Exec {
            step,
            operation,
            remote,
            dry_run,
            ci,
            yes,
            config,
            json,
            run_id,
            command,
        } => {
            let ci = ci || ci_from_env(std::env::var("CI").ok().as_deref());
            let opts = ExecOptions {
                step,
                operation,
                remote,
                dry_run,
                ci,
                yes,
                config,
                json,
                run_id,
            };
            cmd_exec(&cwd, &opts, &command)
        }
        Command::Gate { lock, write } => cmd_gate(&cwd, lock, write),
        Command::Bundle { run_id } => cmd_bundle(&cwd, run_id.as_deref()),
    }
}

fn cmd_init(cwd: &Path, force: bool) -> Result<i32> {
    let paths = init_repo(cwd, &InitOptions { force })?;
    println!("initialized {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_classify(file: Option<&Path>) -> Result<i32> {
    let raw = match file {
        Some(path) => fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read stdin")?;
            buf
        }
    };
    let table = RuleTable::builtin()?;
    let aliases = AliasMap::builtin()?;
    let mut classification = classify(&table, &normalize(&raw));
    classification.code = aliases.canonicalize(&classification.code);
    let info = codes::metadata(&classification.code);
    let out = json!({
        "code": classification.code,
        "severity": classification.severity,
        "category": Category::from_code(&classification.code),
        "handler": classification.handler,
        "matched_rule_id": classification.matched_rule_id,
        "suggested_fix": info.hint,
    });
    println!("{}", serde_json::to_string_pretty(&out).context("serialize classification")?);
    Ok(exit_codes::OK)
}

fn cmd_rules(config_path: &Path) -> Result<i32> {
    let report = validate_tables(config_path)?;
    for overlap in &report.overlaps {
        eprintln!("note: {overlap}");
    }
    if !report.is_valid() {
        eprintln!("invalid:\n- {}", report.issues.join("\n- "));
        return Ok(exit_codes::INVALID);
    }
    println!(
        "ok: {} rules, {} aliases",
        report.rule_count, report.alias_count
    );
    Ok(exit_codes::OK)
}

struct ExecOptions {
    step: String,
    operation: Option<String>,
    remote: String,
    dry_run: bool,
    ci: bool,
    yes: bool,
    config: Option<PathBuf>,
    json: bool,
    run_id: Option<String>,
}

fn cmd_exec(cwd: &Path, opts: &ExecOptions, command: &[String]) -> Result<i32> {
    let git = Git::new(cwd);
    let root = if git.is_repository() {
        git.top_level()?
    } else {
        cwd.to_path_buf()
    };
    let paths = PnpPaths::new(&root);
    let config = load_config(opts.config.as_deref().unwrap_or(&paths.config_path))?;

    let ctx = RunContext {
        path: root.clone(),
        repo: root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        branch: git
            .current_branch()
            .ok()
            .flatten()
            .unwrap_or_else(|| "HEAD".to_string()),
        remote: opts.remote.clone(),
        ci_mode: opts.ci,
        dry_run: opts.dry_run,
        run_id: opts
            .run_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(new_run_id, str::to_string),
        step_id: opts.step.clone(),
    };

    let timeout = Duration::from_secs(config.process.command_timeout_secs);
    let limit = config.process.output_limit_bytes;
    let runner = GitCommandRunner::new(timeout, limit);
    let logger = EventLogger::new(&paths.events_path, ctx.run_id.clone());
    let confirmer: Box<dyn Confirmer> = if opts.yes {
        Box::new(AssumeYes)
    } else if ctx.ci_mode || !std::io::stdin().is_terminal() {
        Box::new(DenyConfirmer)
    } else {
        Box::new(StdinConfirmer)
    };
    let cancel = CancelToken::new();
    let interrupted = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || interrupted.cancel()) {
        warn!(err = %err, "failed to install Ctrl+C handler");
    }
    let resolver = Resolver::new(&config, &runner, &logger, confirmer.as_ref())?
        .with_envelope_path(&paths.envelope_path)
        .with_cancel(cancel);

    let mut operation = CommandOperation::new(command, cwd, timeout, limit)?;
    if let Some(label) = &opts.operation {
        operation = operation.with_label(label);
    }

    match resolver.run_step(&ctx, &mut operation)? {
        StepResolution::Succeeded { attempts } => {
            if attempts > 1 {
                eprintln!("{}: succeeded after {attempts} attempts", ctx.step_id);
            }
            Ok(exit_codes::OK)
        }
        StepResolution::Failed(envelope) => {
            if opts.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&envelope).context("serialize envelope")?
                );
            }
            eprintln!("{}", envelope.summary_line());
            eprintln!("run id: {} (resolver bundle --run-id {})", ctx.run_id, ctx.run_id);
            if envelope.code == KEYBOARD_INTERRUPT {
                Ok(exit_codes::CANCELLED)
            } else {
                Ok(exit_codes::ABORTED)
            }
        }
    }
}

fn cmd_gate(cwd: &Path, lock: Option<PathBuf>, write: bool) -> Result<i32> {
    let paths = PnpPaths::new(cwd);
    let lock_path = lock.unwrap_or_else(|| paths.lock_path.clone());
    if write {
        write_lock(&lock_path, &current_contract())?;
        println!("wrote {}", lock_path.display());
        return Ok(exit_codes::OK);
    }
    let report = check_gate(&paths, &lock_path, std::env::var(OVERRIDE_ENV).ok().as_deref())?;
    for note in &report.diff.notes {
        println!("note: {note}");
    }
    for issue in &report.diff.issues {
        eprintln!("breaking: {issue}");
    }
    if let Some(source) = report.overridden_by {
        eprintln!("breaking changes approved via {source:?}");
    }
    if report.passed() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::BREAKING)
    }
}

fn cmd_bundle(cwd: &Path, run_id: Option<&str>) -> Result<i32> {
    let paths = PnpPaths::new(cwd);
    let aliases = AliasMap::builtin()?;
    let env = collect_env(|name| std::env::var(name).ok());
    let bundle = build_bundle(&paths, run_id, env, &aliases)?;
    let path = write_bundle(&paths, &bundle)?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn ci_from_env(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}
