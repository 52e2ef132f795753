//! Time budget and backoff helpers for deterministic orchestration.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use rand::{Rng, SeedableRng, rngs::StdRng};
use sha2::{Digest, Sha256};

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("step timed out"));
    }
    Ok(remaining)
}

/// Seed for the jitter PRNG of one `(run, step, code, attempt)` tuple.
pub fn jitter_seed(run_id: &str, step_id: &str, code: &str, attempt: u32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(format!("{run_id}|{step_id}|{code}|{attempt}").as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Exponential backoff with bounded jitter.
///
/// `min(base * 2^attempt + jitter, max)` where jitter is uniform in
/// `[0, jitter_fraction * base * 2^attempt]`.
pub fn backoff_delay(
    base_delay_ms: u64,
    max_delay_ms: u64,
    attempt: u32,
    jitter_fraction: f64,
    seed: u64,
) -> Duration {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(20));
    let jitter_cap = (exponential as f64 * jitter_fraction.clamp(0.0, 1.0)) as u64;
    let jitter = if jitter_cap == 0 {
        0
    } else {
        StdRng::seed_from_u64(seed).gen_range(0..=jitter_cap)
    };
    Duration::from_millis(exponential.saturating_add(jitter).min(max_delay_ms))
}
