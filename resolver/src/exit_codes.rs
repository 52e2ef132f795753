//! Stable exit codes for resolver CLI commands.

/// Command succeeded, or the operation eventually succeeded.
pub const OK: i32 = 0;
/// Invalid input, config, rule table or other errors.
pub const INVALID: i32 = 1;
/// `resolver exec` gave up and wrote a terminal envelope.
pub const ABORTED: i32 = 2;
/// `resolver gate` found a breaking error-code change without an override.
pub const BREAKING: i32 = 3;
/// `resolver exec` was interrupted.
pub const CANCELLED: i32 = 130;
