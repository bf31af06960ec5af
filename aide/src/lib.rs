//! Iterative multi-role software-construction loop.
//!
//! A request is classified, specified, planned, approved by the operator and
//! then implemented, tested and reviewed until the reviewer has nothing left
//! to address or the iteration budget runs out. The architecture enforces a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (run state, routing table,
//!   feedback selection). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, processes, operator,
//!   reasoning engine, approval store). Isolated behind traits for tests.
//!
//! [`workflow`] drives the steps of [`steps`] through the routing table;
//! [`run`] wires everything together for the CLI.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
pub mod steps;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
pub mod workflow;
