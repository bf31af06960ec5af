//! Routing properties of the standard workflow, driven by scripted steps.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aide::core::state::{RunState, Slot, StatePatch};
use aide::core::transitions::{StepId, Termination};
use aide::core::types::{FeedbackItem, Policy, Severity};
use aide::test_support::ScriptedSteps;
use aide::workflow::Workflow;
use serde_json::json;

fn state(max_iterations: u32) -> RunState {
    RunState::new("fix the failing test", "/tmp/aide", max_iterations, false)
}

fn routed(policy: Policy) -> ScriptedSteps {
    ScriptedSteps::new()
        .on(StepId::Router, move |_| StatePatch {
            policy: Some(policy),
            iteration_count: Some(0),
            ..StatePatch::default()
        })
        .on(StepId::Critic, |_| StatePatch {
            critic_feedback: Slot::Set(Vec::new()),
            ..StatePatch::default()
        })
}

/// Verifies the debug policy goes router -> spec -> tester and never plans.
#[test]
fn debug_policy_skips_planning() {
    let steps = routed(Policy::Debug);
    let mut state = state(3);
    let reason = Workflow::standard()
        .expect("workflow")
        .run(&steps, &mut state, |_| {})
        .expect("run");

    assert_eq!(reason, Termination::Converged);
    assert_eq!(
        steps.visited(),
        vec![StepId::Router, StepId::Spec, StepId::Tester, StepId::Critic]
    );
}

#[test]
fn research_policy_plans_before_researching() {
    let steps = routed(Policy::Research);
    let mut state = state(3);
    Workflow::standard()
        .expect("workflow")
        .run(&steps, &mut state, |_| {})
        .expect("run");

    let visited = steps.visited();
    assert_eq!(
        &visited[..4],
        &[
            StepId::Router,
            StepId::Plan,
            StepId::Research,
            StepId::PlanApproval
        ]
    );
    assert!(!visited.contains(&StepId::Spec));
}

#[test]
fn refactor_policy_replans_after_spec() {
    let steps = routed(Policy::Refactor);
    let mut state = state(3);
    Workflow::standard()
        .expect("workflow")
        .run(&steps, &mut state, |_| {})
        .expect("run");

    let visited = steps.visited();
    assert_eq!(
        &visited[..4],
        &[
            StepId::Router,
            StepId::Spec,
            StepId::Refactor,
            StepId::PlanApproval
        ]
    );
    assert!(!visited.contains(&StepId::Plan));
    assert!(!visited.contains(&StepId::Debug));
}

/// Verifies feedback that never clears stops after exactly one critic
/// evaluation when the budget is a single iteration.
#[test]
fn iteration_bound_stops_after_one_review() {
    let steps = ScriptedSteps::new()
        .on(StepId::Implementer, |state| StatePatch {
            iteration_count: Some(state.iteration_count + 1),
            ..StatePatch::default()
        })
        .on(StepId::Critic, |_| StatePatch {
            critic_feedback: Slot::Set(vec![FeedbackItem::new("still wrong", Severity::Critical)]),
            ..StatePatch::default()
        });
    let mut state = state(1);
    let reason = Workflow::standard()
        .expect("workflow")
        .run(&steps, &mut state, |_| {})
        .expect("run");

    assert_eq!(reason, Termination::IterationsExhausted);
    let critic_runs = steps
        .visited()
        .iter()
        .filter(|step| **step == StepId::Critic)
        .count();
    assert_eq!(critic_runs, 1);
    assert!(!steps.visited().contains(&StepId::UserInput));
    assert_eq!(
        state.final_summary.as_deref(),
        Some("Failed to converge after 1 iterations.")
    );
}

/// Verifies both fan-out results are visible at the join regardless of
/// which branch finishes first.
#[test]
fn fan_out_join_sees_both_branches() {
    for slow in [StepId::CodeMap, StepId::SchemaLoad] {
        let observed = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&observed);
        let steps = routed(Policy::Implement)
            .on(StepId::CodeMap, |_| StatePatch {
                code_map: Slot::Set(json!({"adder.py": {"functions": ["add"]}})),
                ..StatePatch::default()
            })
            .on(StepId::SchemaLoad, |_| StatePatch {
                api_schema: Slot::Set(json!({})),
                ..StatePatch::default()
            })
            .on(StepId::ResetState, move |state| {
                *seen.lock().expect("lock") =
                    Some((state.code_map.is_some(), state.api_schema.is_some()));
                StatePatch::default()
            })
            .delayed(slow, Duration::from_millis(50));

        let mut state = state(3);
        Workflow::standard()
            .expect("workflow")
            .run(&steps, &mut state, |_| {})
            .expect("run");

        assert_eq!(*observed.lock().expect("lock"), Some((true, true)), "slow branch {slow}");
    }
}

#[test]
fn selected_feedback_loops_until_operator_accepts() {
    let steps = ScriptedSteps::new()
        .on(StepId::Implementer, |state| StatePatch {
            iteration_count: Some(state.iteration_count + 1),
            ..StatePatch::default()
        })
        .on(StepId::Critic, |_| StatePatch {
            critic_feedback: Slot::Set(vec![FeedbackItem::new("rename", Severity::Minor)]),
            ..StatePatch::default()
        })
        .on(StepId::UserInput, |_| StatePatch {
            critic_feedback: Slot::Set(Vec::new()),
            ..StatePatch::default()
        });
    let mut state = state(5);
    let reason = Workflow::standard()
        .expect("workflow")
        .run(&steps, &mut state, |_| {})
        .expect("run");

    assert_eq!(reason, Termination::Converged);
    assert_eq!(state.iteration_count, 1);
    assert_eq!(steps.visited().last(), Some(&StepId::UserInput));
}
