//! Deterministic, pure logic shared by the workflow.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod feedback;
pub mod slug;
pub mod state;
pub mod transitions;
pub mod types;
