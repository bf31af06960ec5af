//! Stable exit codes for the aide CLI.

/// The workflow reached a terminal state, including rejection and exhaustion.
pub const OK: i32 = 0;
/// A required artifact could not be produced, or setup failed before the workflow ran.
pub const FAILED: i32 = 1;
