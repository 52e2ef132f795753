//! Test-only fixtures: scratch git repositories, a recording command runner
//! and scripted operations.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::RunContext;
use crate::io::remediation::{CommandResult, CommandRunner};
use crate::resolve::{Operation, OperationOutput};

/// Deterministic interactive context on branch `main` of remote `origin`.
pub fn run_context(path: &str, step_id: &str) -> RunContext {
    RunContext {
        path: PathBuf::from(path),
        repo: "repo".to_string(),
        branch: "main".to_string(),
        remote: "origin".to_string(),
        ci_mode: false,
        dry_run: false,
        run_id: "run-1".to_string(),
        step_id: step_id.to_string(),
    }
}

/// Work tree on `main` with one commit, pushed to a local bare `origin`.
pub struct TestRepo {
    _temp: TempDir,
    work: PathBuf,
    remote: PathBuf,
}

impl TestRepo {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let remote = temp.path().join("origin.git");
        let work = temp.path().join("work");
        fs::create_dir_all(&remote).expect("remote dir");
        fs::create_dir_all(&work).expect("work dir");

        run_git(&remote, &["init", "--bare", "--quiet"]);
        run_git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        run_git(&work, &["init", "--quiet"]);
        run_git(&work, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        run_git(&work, &["config", "user.name", "Test User"]);
        run_git(&work, &["config", "user.email", "test@example.com"]);
        run_git(&work, &["config", "commit.gpgsign", "false"]);
        run_git(&work, &["config", "tag.gpgsign", "false"]);
        let remote_url = remote.display().to_string();
        run_git(&work, &["remote", "add", "origin", &remote_url]);

        let repo = Self {
            _temp: temp,
            work,
            remote,
        };
        repo.commit_file("README.md", "scratch\n", "initial commit");
        repo.git(&["push", "--quiet", "-u", "origin", "main"]);
        repo
    }

    pub fn path(&self) -> &Path {
        &self.work
    }

    pub fn remote_path(&self) -> &Path {
        &self.remote
    }

    /// Run git in the work tree, panicking on failure. Returns stdout.
    pub fn git(&self, args: &[&str]) -> String {
        run_git(&self.work, args)
    }

    pub fn commit_file(&self, name: &str, contents: &str, message: &str) {
        fs::write(self.work.join(name), contents).expect("write file");
        self.git(&["add", name]);
        self.git(&["commit", "--quiet", "-m", message]);
    }

    /// Context for this repository, as the CLI would build it.
    pub fn context(&self, step_id: &str) -> RunContext {
        RunContext {
            path: self.work.clone(),
            repo: "work".to_string(),
            ..run_context("", step_id)
        }
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[derive(Debug, Clone)]
enum Reply {
    Fail(String),
    Error,
    Stdout(String),
}

/// Records every command; succeeds unless a scripted reply matches.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: RefCell<Vec<String>>,
    removed: RefCell<Vec<PathBuf>>,
    replies: Vec<(String, Reply)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `pattern` exit nonzero with `stderr`.
    pub fn fail_on(mut self, pattern: &str, stderr: &str) -> Self {
        self.replies.push((pattern.to_string(), Reply::Fail(stderr.to_string())));
        self
    }

    /// Commands containing `pattern` cannot be started.
    pub fn error_on(mut self, pattern: &str) -> Self {
        self.replies.push((pattern.to_string(), Reply::Error));
        self
    }

    /// Commands containing `pattern` succeed with `stdout`.
    pub fn respond(mut self, pattern: &str, stdout: &str) -> Self {
        self.replies.push((pattern.to_string(), Reply::Stdout(stdout.to_string())));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn removed(&self) -> Vec<PathBuf> {
        self.removed.borrow().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn git(&self, _workdir: &Path, args: &[&str]) -> Result<CommandResult> {
        let line = format!("git {}", args.join(" "));
        self.calls.borrow_mut().push(line.clone());
        let reply = self
            .replies
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone());
        match reply {
            None => Ok(CommandResult {
                success: true,
                stdout: String::new(),
                stderr: String::new(),
            }),
            Some(Reply::Stdout(stdout)) => Ok(CommandResult {
                success: true,
                stdout,
                stderr: String::new(),
            }),
            Some(Reply::Fail(stderr)) => Ok(CommandResult {
                success: false,
                stdout: String::new(),
                stderr,
            }),
            Some(Reply::Error) => Err(anyhow!("spawn {line}: no such file or directory")),
        }
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.removed.borrow_mut().push(path.to_path_buf());
        Ok(())
    }
}

/// Operation that follows a script of outcomes, then repeats `fallback`.
#[derive(Debug, Clone)]
pub struct ScriptedOperation {
    script: Vec<Result<(), String>>,
    fallback: Option<String>,
    runs: u32,
}

impl ScriptedOperation {
    /// `Err(stderr)` fails with that text; after the script runs out the
    /// operation succeeds.
    pub fn new(script: Vec<Result<(), &str>>) -> Self {
        Self {
            script: script.into_iter().map(|step| step.map_err(str::to_string)).collect(),
            fallback: None,
            runs: 0,
        }
    }

    pub fn always_failing(stderr: &str) -> Self {
        Self {
            script: Vec::new(),
            fallback: Some(stderr.to_string()),
            runs: 0,
        }
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }
}

impl Operation for ScriptedOperation {
    fn describe(&self) -> String {
        "scripted operation".to_string()
    }

    fn run(&mut self) -> Result<OperationOutput> {
        let idx = self.runs as usize;
        self.runs += 1;
        let step = match self.script.get(idx) {
            Some(step) => step.clone(),
            None => self.fallback.clone().map_or(Ok(()), Err),
        };
        Ok(match step {
            Ok(()) => OperationOutput {
                success: true,
                stdout: String::new(),
                stderr: String::new(),
            },
            Err(stderr) => OperationOutput {
                success: false,
                stdout: String::new(),
                stderr,
            },
        })
    }
}
