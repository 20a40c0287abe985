//! Stable exit codes for healer CLI commands.

/// Request succeeded.
pub const OK: i32 = 0;
/// Invalid usage, config, or an infrastructure error (spawn, I/O, model setup).
pub const INVALID: i32 = 1;
/// The request ended in a terminal failure other than a timeout.
pub const FAILED: i32 = 2;
/// The final execution exceeded its wall-clock bound.
pub const TIMEOUT: i32 = 3;
