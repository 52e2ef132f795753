//! Interactive confirmation for remediations that ask before running.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};

pub trait Confirmer {
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Non-interactive default: every prompt is declined.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyConfirmer;

impl Confirmer for DenyConfirmer {
    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Answers every prompt with `yes` (`--yes`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirmer for AssumeYes {
    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Prompts on stderr and reads one line from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{prompt} [y/N] ").context("write prompt")?;
        stderr.flush().context("flush prompt")?;
        let mut answer = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("read confirmation")?;
        Ok(parse_answer(&answer))
    }
}

fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_yes_confirms() {
        assert!(parse_answer("y\n"));
        assert!(parse_answer(" YES "));
        assert!(!parse_answer(""));
        assert!(!parse_answer("n"));
        assert!(!parse_answer("yep"));
    }

    #[test]
    fn fixed_confirmers() {
        assert!(!DenyConfirmer.confirm("go?").expect("deny"));
        assert!(AssumeYes.confirm("go?").expect("yes"));
    }
}
