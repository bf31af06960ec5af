//! Agents: a prompt identity driven through the turn loop.

pub mod invocation;
pub mod turn_loop;
