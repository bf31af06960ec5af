//! Workflow engine: runs steps, applies their patches, and follows the
//! transition table until a terminal target is reached.
//!
//! Steps run one at a time. The only concurrency is a fan-out target, whose
//! branches run on scoped threads against one snapshot of the state. Branch
//! patches are merged in declared branch order before the join step runs.

use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::state::{RunState, StatePatch};
use crate::core::transitions::{StepId, Target, Termination, TransitionTable};
use crate::io::run_state::write_run_state;

/// Executes a single named step against the current state.
pub trait StepHandler: Sync {
    fn run(&self, step: StepId, state: &RunState) -> Result<StatePatch>;
}

/// Progress reported while a workflow runs.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    StepStarted(StepId),
    StepFinished {
        step: StepId,
        touched: Vec<&'static str>,
    },
    FanOut {
        branches: Vec<StepId>,
        join: StepId,
    },
    Finished {
        reason: Termination,
        summary: String,
    },
}

pub struct Workflow {
    table: TransitionTable,
    checkpoint: Option<PathBuf>,
}

impl Workflow {
    pub fn new(table: TransitionTable) -> Self {
        Self {
            table,
            checkpoint: None,
        }
    }

    /// Workflow over the standard transition table.
    pub fn standard() -> Result<Self> {
        let table = TransitionTable::standard().context("build transition table")?;
        Ok(Self::new(table))
    }

    /// Write the run state to `path` after every step.
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some(path.into());
        self
    }

    /// Run from the start step until a terminal target.
    ///
    /// On return `state.final_summary` is always set. Errors are step failures
    /// that could not be expressed as state, such as a missing required artifact.
    #[instrument(skip_all, fields(request = %state.user_request))]
    pub fn run<H, F>(&self, handler: &H, state: &mut RunState, mut on_event: F) -> Result<Termination>
    where
        H: StepHandler,
        F: FnMut(&WorkflowEvent),
    {
        let mut current = self.table.start();
        loop {
            on_event(&WorkflowEvent::StepStarted(current));
            let patch = handler
                .run(current, state)
                .with_context(|| format!("step '{current}'"))?;
            let touched = patch.touched_fields();
            state.apply(patch);
            self.write_checkpoint(state);
            debug!(step = %current, ?touched, "step applied");
            on_event(&WorkflowEvent::StepFinished {
                step: current,
                touched,
            });

            let edge = self
                .table
                .next(current, state)
                .ok_or_else(|| anyhow!("step '{current}' has no outgoing edge"))?;
            debug!(step = %current, edge = edge.label, "edge selected");

            let target = match &edge.target {
                Target::Terminate(_) => edge.target.clone(),
                _ if state.final_summary.is_some() => Target::Terminate(Termination::Halted),
                other => other.clone(),
            };

            match target {
                Target::Step(next) => current = next,
                Target::FanOut { branches, join } => {
                    on_event(&WorkflowEvent::FanOut {
                        branches: branches.clone(),
                        join,
                    });
                    let merged = self.fan_out(handler, state, &branches, &mut on_event)?;
                    state.apply(merged);
                    self.write_checkpoint(state);
                    if state.final_summary.is_some() {
                        return Ok(self.finish(Termination::Halted, state, &mut on_event));
                    }
                    current = join;
                }
                Target::Terminate(reason) => {
                    return Ok(self.finish(reason, state, &mut on_event));
                }
            }
        }
    }

    fn fan_out<H, F>(
        &self,
        handler: &H,
        state: &RunState,
        branches: &[StepId],
        on_event: &mut F,
    ) -> Result<StatePatch>
    where
        H: StepHandler,
        F: FnMut(&WorkflowEvent),
    {
        for &branch in branches {
            on_event(&WorkflowEvent::StepStarted(branch));
        }
        let snapshot = state.clone();
        let results: Vec<Result<StatePatch>> = thread::scope(|scope| {
            let handles: Vec<_> = branches
                .iter()
                .map(|&branch| {
                    let snapshot = &snapshot;
                    scope.spawn(move || handler.run(branch, snapshot))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("branch thread panicked")))
                })
                .collect()
        });

        let mut merged = StatePatch::default();
        for (&branch, result) in branches.iter().zip(results) {
            let patch = result.with_context(|| format!("step '{branch}'"))?;
            on_event(&WorkflowEvent::StepFinished {
                step: branch,
                touched: patch.touched_fields(),
            });
            merged = merged.merge_preferring(patch);
        }
        info!(branches = branches.len(), "fan-out joined");
        Ok(merged)
    }

    fn finish<F>(&self, reason: Termination, state: &mut RunState, on_event: &mut F) -> Termination
    where
        F: FnMut(&WorkflowEvent),
    {
        if state.final_summary.is_none() {
            state.final_summary = Some(reason.summary(state));
        }
        let summary = state.final_summary.clone().unwrap_or_default();
        self.write_checkpoint(state);
        info!(?reason, summary = %summary, "workflow finished");
        on_event(&WorkflowEvent::Finished { reason, summary });
        reason
    }

    fn write_checkpoint(&self, state: &RunState) {
        if let Some(path) = &self.checkpoint
            && let Err(err) = write_run_state(path, state)
        {
            warn!(path = %path.display(), err = %format!("{err:#}"), "failed to checkpoint run state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::Slot;
    use crate::core::types::{FeedbackItem, Policy, Severity};
    use crate::test_support::ScriptedSteps;
    use serde_json::json;

    fn state(max_iterations: u32) -> RunState {
        RunState::new("add two numbers", "/tmp/aide", max_iterations, false)
    }

    fn happy_steps() -> ScriptedSteps {
        ScriptedSteps::new()
            .on(StepId::Router, |_| StatePatch {
                policy: Some(Policy::Implement),
                iteration_count: Some(0),
                ..StatePatch::default()
            })
            .on(StepId::Implementer, |state| StatePatch {
                iteration_count: Some(state.iteration_count + 1),
                ..StatePatch::default()
            })
            .on(StepId::Critic, |_| StatePatch {
                critic_feedback: Slot::Set(Vec::new()),
                ..StatePatch::default()
            })
    }

    #[test]
    fn happy_path_converges_without_user_input() {
        let steps = happy_steps();
        let mut state = state(3);
        let workflow = Workflow::standard().expect("workflow");
        let reason = workflow.run(&steps, &mut state, |_| {}).expect("run");

        assert_eq!(reason, Termination::Converged);
        assert_eq!(
            state.final_summary.as_deref(),
            Some("Implementation complete after 1 iteration(s).")
        );
        assert!(!steps.visited().contains(&StepId::UserInput));
        assert_eq!(steps.visited().first(), Some(&StepId::Router));
        assert_eq!(steps.visited().last(), Some(&StepId::Critic));
    }

    #[test]
    fn converged_with_performance_runs_performance_step() {
        let steps = happy_steps();
        let mut state = state(3);
        state.run_performance_test = true;
        let reason = Workflow::standard()
            .expect("workflow")
            .run(&steps, &mut state, |_| {})
            .expect("run");
        assert_eq!(reason, Termination::PerformanceReviewed);
        assert_eq!(steps.visited().last(), Some(&StepId::Performance));
    }

    #[test]
    fn exit_policy_terminates_after_router() {
        let steps = ScriptedSteps::new().on(StepId::Router, |_| StatePatch {
            policy: Some(Policy::Exit),
            ..StatePatch::default()
        });
        let mut state = state(3);
        let reason = Workflow::standard()
            .expect("workflow")
            .run(&steps, &mut state, |_| {})
            .expect("run");
        assert_eq!(reason, Termination::PolicyExit);
        assert_eq!(steps.visited(), vec![StepId::Router]);
        assert!(state.final_summary.expect("summary").contains("exit"));
    }

    #[test]
    fn step_setting_summary_halts_the_run() {
        let steps = ScriptedSteps::new().on(StepId::Spec, |_| StatePatch {
            final_summary: Some("stop here".to_string()),
            ..StatePatch::default()
        });
        let mut state = state(3);
        let reason = Workflow::standard()
            .expect("workflow")
            .run(&steps, &mut state, |_| {})
            .expect("run");
        assert_eq!(reason, Termination::Halted);
        assert_eq!(state.final_summary.as_deref(), Some("stop here"));
        assert_eq!(steps.visited(), vec![StepId::Router, StepId::Spec]);
    }

    #[test]
    fn rejected_plan_terminates_with_operator_summary() {
        let steps = ScriptedSteps::new().on(StepId::PlanApproval, |_| StatePatch {
            final_summary: Some("Plan rejected by user.".to_string()),
            ..StatePatch::default()
        });
        let mut state = state(3);
        let reason = Workflow::standard()
            .expect("workflow")
            .run(&steps, &mut state, |_| {})
            .expect("run");
        assert_eq!(reason, Termination::PlanRejected);
        assert_eq!(state.final_summary.as_deref(), Some("Plan rejected by user."));
        assert!(!steps.visited().contains(&StepId::CodeMap));
    }

    #[test]
    fn user_input_loops_back_to_implementer() {
        let steps = ScriptedSteps::new()
            .on(StepId::Implementer, |state| StatePatch {
                iteration_count: Some(state.iteration_count + 1),
                ..StatePatch::default()
            })
            .on(StepId::Critic, |_| StatePatch {
                critic_feedback: Slot::Set(vec![FeedbackItem::new("x", Severity::Major)]),
                ..StatePatch::default()
            })
            .on(StepId::UserInput, |state| {
                // Accept the implementation on the second round.
                let cleared = state.iteration_count >= 2;
                StatePatch {
                    critic_feedback: Slot::Set(if cleared {
                        Vec::new()
                    } else {
                        state.critic_feedback.clone().unwrap_or_default()
                    }),
                    ..StatePatch::default()
                }
            });
        let mut state = state(5);
        let reason = Workflow::standard()
            .expect("workflow")
            .run(&steps, &mut state, |_| {})
            .expect("run");
        assert_eq!(reason, Termination::Converged);
        assert_eq!(state.iteration_count, 2);
        let implementer_runs = steps
            .visited()
            .iter()
            .filter(|step| **step == StepId::Implementer)
            .count();
        assert_eq!(implementer_runs, 2);
    }

    #[test]
    fn step_errors_propagate_with_step_name() {
        let steps = ScriptedSteps::new().failing(StepId::Plan, "no plan");
        let mut state = state(3);
        let err = Workflow::standard()
            .expect("workflow")
            .run(&steps, &mut state, |_| {})
            .expect_err("plan fails");
        assert!(format!("{err:#}").contains("step 'plan'"));
    }

    #[test]
    fn events_report_fan_out_and_finish() {
        let steps = happy_steps()
            .on(StepId::CodeMap, |_| StatePatch {
                code_map: Slot::Set(json!({})),
                ..StatePatch::default()
            });
        let mut state = state(3);
        let mut events = Vec::new();
        Workflow::standard()
            .expect("workflow")
            .run(&steps, &mut state, |event| events.push(event.clone()))
            .expect("run");
        assert!(events.contains(&WorkflowEvent::FanOut {
            branches: vec![StepId::CodeMap, StepId::SchemaLoad],
            join: StepId::ResetState,
        }));
        assert!(events.contains(&WorkflowEvent::StepFinished {
            step: StepId::CodeMap,
            touched: vec!["code_map"],
        }));
        assert!(matches!(
            events.last(),
            Some(WorkflowEvent::Finished {
                reason: Termination::Converged,
                ..
            })
        ));
    }

    #[test]
    fn checkpoint_is_written() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".aide").join("run_state.json");
        let steps = happy_steps();
        let mut state = state(3);
        Workflow::standard()
            .expect("workflow")
            .with_checkpoint(&path)
            .run(&steps, &mut state, |_| {})
            .expect("run");
        let saved = crate::io::run_state::load_run_state(&path).expect("load");
        assert_eq!(saved, state);
    }
}
