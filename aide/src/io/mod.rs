//! Side-effecting collaborators: filesystem, processes, operator, engine.

pub mod approvals;
pub mod code_map;
pub mod config;
pub mod engine;
pub mod event_log;
pub mod fs_atomic;
pub mod operator;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod run_state;
