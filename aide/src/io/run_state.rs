//! Run state checkpoint (`.aide/run_state.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::state::RunState;
use crate::io::fs_atomic::write_json_atomic;

/// Load a checkpointed run state.
pub fn load_run_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    let state: RunState = serde_json::from_str(&contents)
        .with_context(|| format!("parse run state {}", path.display()))?;
    Ok(state)
}

/// Atomically write the run state.
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(
        path = %path.display(),
        iteration = state.iteration_count,
        "writing run state"
    );
    write_json_atomic(path, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FeedbackItem, Policy, Severity};
    use serde_json::json;

    /// Verifies write then read preserves every field, including absent artifacts.
    #[test]
    fn run_state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".aide").join("run_state.json");

        let mut state = RunState::new("add two numbers", temp.path(), 3, true);
        state.policy = Some(Policy::Implement);
        state.spec = Some(json!({"project_name": "adder"}));
        state.critic_feedback = Some(vec![FeedbackItem::new("x", Severity::Major)]);
        state.user_feedback_queue.push("use floats".to_string());
        state.iteration_count = 2;

        write_run_state(&path, &state).expect("write");
        let loaded = load_run_state(&path).expect("load");
        assert_eq!(loaded, state);
    }

    #[test]
    fn checkpoint_uses_stable_field_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run_state.json");
        write_run_state(&path, &RunState::new("r", "/w", 10, false)).expect("write");
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(raw["user_request"], json!("r"));
        assert_eq!(raw["critic_feedback"], json!(null));
        assert_eq!(raw["user_feedback_queue"], json!([]));
        assert_eq!(raw["max_iterations"], json!(10));
    }
}
