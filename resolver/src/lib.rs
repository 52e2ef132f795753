//! Failure resolution for git push/publish/release workflows.
//!
//! A failed external operation (git, GitHub CLI) goes in; a stable error
//! code, a retry/remediate/abort decision and a versioned error envelope come
//! out. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (normalization, classification,
//!   policy, envelopes, SLO aggregation). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process execution,
//!   prompts). Behind traits where tests need fakes.
//!
//! Orchestration modules ([`resolve`], [`gate`], [`validate`]) coordinate core
//! logic with I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod gate;
pub mod io;
pub mod logging;
pub mod resolve;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
