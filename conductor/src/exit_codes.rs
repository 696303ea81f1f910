//! Stable exit codes for `conductor` commands.

/// Command succeeded, or had nothing to do.
pub const OK: i32 = 0;
/// Precondition violation, invalid transition or any other error.
pub const INVALID: i32 = 1;
