//! Cooperative cancellation for backoff waits.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Shared flag that interrupts [`sleep_cancellable`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Elapsed,
    Cancelled,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut flag = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *flag = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Sleep for `delay` unless `token` is cancelled first.
pub fn sleep_cancellable(token: &CancelToken, delay: Duration) -> Wait {
    let (lock, cvar) = &*token.inner;
    let deadline = Instant::now() + delay;
    let mut cancelled = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    loop {
        if *cancelled {
            return Wait::Cancelled;
        }
        let now = Instant::now();
        if now >= deadline {
            return Wait::Elapsed;
        }
        let (guard, _) = cvar
            .wait_timeout(cancelled, deadline - now)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cancelled = guard;
    }
}
