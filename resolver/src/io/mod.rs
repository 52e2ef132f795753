//! Side-effecting helpers: filesystem, git, processes and prompts.

pub mod cancel;
pub mod config;
pub mod confirm;
pub mod debug_bundle;
pub mod envelope_store;
pub mod event_log;
pub mod git;
pub mod init;
pub mod process;
pub mod remediation;
