//! Explicit transition table for the workflow graph.
//!
//! Each step owns an ordered list of edges. An edge has an optional guard over
//! [`RunState`] and a [`Target`]; the first edge whose guard holds wins, and
//! every list must end with an unconditional edge. The table is validated when
//! it is built so that routing can never reach an undeclared step.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use serde::Serialize;

use crate::core::state::RunState;
use crate::core::types::Policy;

/// Named steps of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepId {
    Router,
    Spec,
    Plan,
    Research,
    Refactor,
    Debug,
    PlanApproval,
    CodeMap,
    SchemaLoad,
    ResetState,
    Implementer,
    Tester,
    Critic,
    UserInput,
    Performance,
}

impl StepId {
    pub fn as_str(self) -> &'static str {
        match self {
            StepId::Router => "router",
            StepId::Spec => "spec",
            StepId::Plan => "plan",
            StepId::Research => "research",
            StepId::Refactor => "refactor",
            StepId::Debug => "debug",
            StepId::PlanApproval => "plan-approval",
            StepId::CodeMap => "code-map",
            StepId::SchemaLoad => "schema-load",
            StepId::ResetState => "reset-state",
            StepId::Implementer => "implementer",
            StepId::Tester => "tester",
            StepId::Critic => "critic",
            StepId::UserInput => "user-input",
            StepId::Performance => "performance",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The router classified the request as `exit` or `clarify`.
    PolicyExit,
    /// The operator rejected the plan.
    PlanRejected,
    /// The critic had nothing left to address.
    Converged,
    /// `iteration_count` reached `max_iterations`.
    IterationsExhausted,
    /// Converged and the performance step ran.
    PerformanceReviewed,
    /// A step set `final_summary` while routing pointed elsewhere.
    Halted,
}

impl Termination {
    /// Summary recorded when no step has set `final_summary` yet.
    pub fn summary(self, state: &RunState) -> String {
        match self {
            Termination::PolicyExit => format!(
                "Request classified as '{}'; nothing to build.",
                state.policy()
            ),
            Termination::PlanRejected => "Plan rejected by user.".to_string(),
            Termination::Converged => format!(
                "Implementation complete after {} iteration(s).",
                state.iteration_count
            ),
            Termination::IterationsExhausted => format!(
                "Failed to converge after {} iterations.",
                state.iteration_count
            ),
            Termination::PerformanceReviewed => format!(
                "Implementation complete after {} iteration(s); performance review recorded.",
                state.iteration_count
            ),
            Termination::Halted => "Run halted.".to_string(),
        }
    }
}

/// Where routing goes after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Step(StepId),
    /// Run `branches` against one snapshot, merge in declared order, then run `join`.
    FanOut { branches: Vec<StepId>, join: StepId },
    Terminate(Termination),
}

pub type Guard = fn(&RunState) -> bool;

/// One routing rule of a step.
#[derive(Clone)]
pub struct Edge {
    pub label: &'static str,
    pub guard: Option<Guard>,
    pub target: Target,
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("label", &self.label)
            .field("conditional", &self.guard.is_some())
            .field("target", &self.target)
            .finish()
    }
}

/// Construction-time violations of the transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionTableError {
    /// A step routes to a step that declares no edges and is not a fan-out branch.
    Dangling { from: StepId, to: StepId },
    /// A step's edge list does not end with an unconditional edge.
    NoFallback(StepId),
    /// An edge follows an unconditional edge and can never be taken.
    Shadowed { from: StepId, label: &'static str },
    /// A fan-out branch declares its own edges; branches always continue at the join.
    BranchWithEdges(StepId),
    /// A fan-out has no branches.
    EmptyFanOut(StepId),
    /// A declared step cannot be reached from the start step and is not dormant.
    Unreachable(StepId),
    /// The start step declares no edges.
    MissingStart(StepId),
}

impl fmt::Display for TransitionTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionTableError::Dangling { from, to } => {
                write!(f, "step '{from}' routes to undeclared step '{to}'")
            }
            TransitionTableError::NoFallback(step) => {
                write!(f, "step '{step}' has no unconditional edge")
            }
            TransitionTableError::Shadowed { from, label } => {
                write!(f, "edge '{label}' of step '{from}' follows an unconditional edge")
            }
            TransitionTableError::BranchWithEdges(step) => {
                write!(f, "fan-out branch '{step}' must not declare edges")
            }
            TransitionTableError::EmptyFanOut(step) => {
                write!(f, "step '{step}' fans out to no branches")
            }
            TransitionTableError::Unreachable(step) => {
                write!(f, "step '{step}' is unreachable and not declared dormant")
            }
            TransitionTableError::MissingStart(step) => {
                write!(f, "start step '{step}' declares no edges")
            }
        }
    }
}

impl std::error::Error for TransitionTableError {}

/// Builder for [`TransitionTable`].
#[derive(Debug)]
pub struct TableBuilder {
    start: StepId,
    edges: BTreeMap<StepId, Vec<Edge>>,
    dormant: BTreeSet<StepId>,
}

impl TableBuilder {
    pub fn new(start: StepId) -> Self {
        Self {
            start,
            edges: BTreeMap::new(),
            dormant: BTreeSet::new(),
        }
    }

    /// Add a guarded edge. Edges are evaluated in insertion order.
    pub fn when(mut self, from: StepId, label: &'static str, guard: Guard, target: Target) -> Self {
        self.edges.entry(from).or_default().push(Edge {
            label,
            guard: Some(guard),
            target,
        });
        self
    }

    /// Add the unconditional edge that closes a step's edge list.
    pub fn otherwise(mut self, from: StepId, target: Target) -> Self {
        self.edges.entry(from).or_default().push(Edge {
            label: "otherwise",
            guard: None,
            target,
        });
        self
    }

    /// Declare a step that has edges but no inbound route.
    pub fn dormant(mut self, step: StepId) -> Self {
        self.dormant.insert(step);
        self
    }

    pub fn build(self) -> Result<TransitionTable, TransitionTableError> {
        let table = TransitionTable {
            start: self.start,
            edges: self.edges,
            dormant: self.dormant,
        };
        table.validate()?;
        Ok(table)
    }
}

/// Validated routing table.
#[derive(Debug)]
pub struct TransitionTable {
    start: StepId,
    edges: BTreeMap<StepId, Vec<Edge>>,
    dormant: BTreeSet<StepId>,
}

impl TransitionTable {
    /// The routing table of the aide workflow.
    pub fn standard() -> Result<Self, TransitionTableError> {
        use StepId as S;
        use Target::{FanOut, Step, Terminate};

        TableBuilder::new(S::Router)
            .when(S::Router, "research", is_research, Step(S::Plan))
            .when(S::Router, "debug", is_debug, Step(S::Spec))
            .when(S::Router, "refactor", is_refactor, Step(S::Spec))
            .when(
                S::Router,
                "exit|clarify",
                is_exit_or_clarify,
                Terminate(Termination::PolicyExit),
            )
            .otherwise(S::Router, Step(S::Spec))
            .when(S::Spec, "debug", is_debug, Step(S::Tester))
            .when(S::Spec, "refactor", is_refactor, Step(S::Refactor))
            .otherwise(S::Spec, Step(S::Plan))
            .when(S::Plan, "research", is_research, Step(S::Research))
            .otherwise(S::Plan, Step(S::PlanApproval))
            .when(
                S::PlanApproval,
                "rejected",
                has_final_summary,
                Terminate(Termination::PlanRejected),
            )
            .otherwise(
                S::PlanApproval,
                FanOut {
                    branches: vec![S::CodeMap, S::SchemaLoad],
                    join: S::ResetState,
                },
            )
            .otherwise(S::ResetState, Step(S::Implementer))
            .otherwise(S::Implementer, Step(S::Tester))
            .otherwise(S::Tester, Step(S::Critic))
            .when(
                S::Critic,
                "exhausted",
                RunState::iterations_exhausted,
                Terminate(Termination::IterationsExhausted),
            )
            .when(S::Critic, "converged+perf", converged_with_performance, Step(S::Performance))
            .when(
                S::Critic,
                "converged",
                RunState::feedback_converged,
                Terminate(Termination::Converged),
            )
            .otherwise(S::Critic, Step(S::UserInput))
            .when(
                S::UserInput,
                "converged+perf",
                converged_with_performance,
                Step(S::Performance),
            )
            .when(
                S::UserInput,
                "converged",
                RunState::feedback_converged,
                Terminate(Termination::Converged),
            )
            .otherwise(S::UserInput, Step(S::Implementer))
            .otherwise(S::Research, Step(S::PlanApproval))
            .otherwise(S::Refactor, Step(S::PlanApproval))
            .otherwise(S::Debug, Step(S::ResetState))
            .otherwise(S::Performance, Terminate(Termination::PerformanceReviewed))
            .dormant(S::Debug)
            .build()
    }

    pub fn start(&self) -> StepId {
        self.start
    }

    /// Evaluate the routing rules of `from` against `state`.
    ///
    /// Returns `None` for steps without edges (fan-out branches).
    pub fn next(&self, from: StepId, state: &RunState) -> Option<&Edge> {
        self.edges
            .get(&from)?
            .iter()
            .find(|edge| edge.guard.is_none_or(|guard| guard(state)))
    }

    pub fn edges(&self, from: StepId) -> &[Edge] {
        self.edges.get(&from).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Steps that are declared but intentionally unreachable.
    pub fn dormant_steps(&self) -> impl Iterator<Item = StepId> + '_ {
        self.dormant.iter().copied()
    }

    fn validate(&self) -> Result<(), TransitionTableError> {
        if !self.edges.contains_key(&self.start) {
            return Err(TransitionTableError::MissingStart(self.start));
        }

        let branches: BTreeSet<StepId> = self
            .edges
            .values()
            .flatten()
            .filter_map(|edge| match &edge.target {
                Target::FanOut { branches, .. } => Some(branches.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect();

        for (&from, edges) in &self.edges {
            if branches.contains(&from) {
                return Err(TransitionTableError::BranchWithEdges(from));
            }
            match edges.iter().position(|edge| edge.guard.is_none()) {
                None => return Err(TransitionTableError::NoFallback(from)),
                Some(idx) if idx + 1 < edges.len() => {
                    return Err(TransitionTableError::Shadowed {
                        from,
                        label: edges[idx + 1].label,
                    });
                }
                Some(_) => {}
            }
            for edge in edges {
                for to in edge_steps(&edge.target) {
                    let declared = self.edges.contains_key(&to) || branches.contains(&to);
                    if !declared {
                        return Err(TransitionTableError::Dangling { from, to });
                    }
                }
                if let Target::FanOut { branches, join } = &edge.target {
                    if branches.is_empty() {
                        return Err(TransitionTableError::EmptyFanOut(from));
                    }
                    if !self.edges.contains_key(join) {
                        return Err(TransitionTableError::Dangling { from, to: *join });
                    }
                }
            }
        }

        let reachable = self.reachable();
        for &step in self.edges.keys() {
            if !reachable.contains(&step) && !self.dormant.contains(&step) {
                return Err(TransitionTableError::Unreachable(step));
            }
        }
        Ok(())
    }

    fn reachable(&self) -> BTreeSet<StepId> {
        let mut seen = BTreeSet::from([self.start]);
        let mut queue = VecDeque::from([self.start]);
        while let Some(step) = queue.pop_front() {
            for edge in self.edges(step) {
                for next in edge_steps(&edge.target) {
                    if seen.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }
        seen
    }
}

fn edge_steps(target: &Target) -> Vec<StepId> {
    match target {
        Target::Step(step) => vec![*step],
        Target::FanOut { branches, join } => {
            let mut steps = branches.clone();
            steps.push(*join);
            steps
        }
        Target::Terminate(_) => Vec::new(),
    }
}

fn is_research(state: &RunState) -> bool {
    state.policy() == Policy::Research
}

fn is_debug(state: &RunState) -> bool {
    state.policy() == Policy::Debug
}

fn is_refactor(state: &RunState) -> bool {
    state.policy() == Policy::Refactor
}

fn is_exit_or_clarify(state: &RunState) -> bool {
    matches!(state.policy(), Policy::Exit | Policy::Clarify)
}

fn has_final_summary(state: &RunState) -> bool {
    state.final_summary.is_some()
}

fn converged_with_performance(state: &RunState) -> bool {
    state.feedback_converged() && state.run_performance_test
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FeedbackItem, Severity};

    fn table() -> TransitionTable {
        TransitionTable::standard().expect("standard table")
    }

    fn state_with(policy: Policy) -> RunState {
        let mut state = RunState::new("req", "/tmp/root", 3, false);
        state.policy = Some(policy);
        state
    }

    fn target(table: &TransitionTable, from: StepId, state: &RunState) -> Target {
        table.next(from, state).expect("edge").target.clone()
    }

    #[test]
    fn router_routes_by_policy() {
        let table = table();
        let cases = [
            (Policy::Research, Target::Step(StepId::Plan)),
            (Policy::Debug, Target::Step(StepId::Spec)),
            (Policy::Refactor, Target::Step(StepId::Spec)),
            (Policy::Implement, Target::Step(StepId::Spec)),
            (Policy::Exit, Target::Terminate(Termination::PolicyExit)),
            (Policy::Clarify, Target::Terminate(Termination::PolicyExit)),
        ];
        for (policy, expected) in cases {
            assert_eq!(
                target(&table, StepId::Router, &state_with(policy)),
                expected,
                "policy {policy}"
            );
        }
    }

    /// Verifies the debug path goes straight from spec to the tester.
    #[test]
    fn debug_spec_routes_to_tester_never_planner() {
        let table = table();
        let state = state_with(Policy::Debug);
        for _ in 0..3 {
            assert_eq!(
                target(&table, StepId::Router, &state),
                Target::Step(StepId::Spec)
            );
            assert_eq!(
                target(&table, StepId::Spec, &state),
                Target::Step(StepId::Tester)
            );
        }
    }

    #[test]
    fn spec_and_plan_routes() {
        let table = table();
        assert_eq!(
            target(&table, StepId::Spec, &state_with(Policy::Refactor)),
            Target::Step(StepId::Refactor)
        );
        assert_eq!(
            target(&table, StepId::Spec, &state_with(Policy::Implement)),
            Target::Step(StepId::Plan)
        );
        assert_eq!(
            target(&table, StepId::Plan, &state_with(Policy::Research)),
            Target::Step(StepId::Research)
        );
        assert_eq!(
            target(&table, StepId::Plan, &state_with(Policy::Implement)),
            Target::Step(StepId::PlanApproval)
        );
    }

    #[test]
    fn plan_approval_fans_out_unless_rejected() {
        let table = table();
        let mut state = state_with(Policy::Implement);
        assert_eq!(
            target(&table, StepId::PlanApproval, &state),
            Target::FanOut {
                branches: vec![StepId::CodeMap, StepId::SchemaLoad],
                join: StepId::ResetState,
            }
        );
        state.final_summary = Some("Plan rejected by user.".to_string());
        assert_eq!(
            target(&table, StepId::PlanApproval, &state),
            Target::Terminate(Termination::PlanRejected)
        );
    }

    #[test]
    fn critic_checks_iteration_bound_first() {
        let table = table();
        let mut state = state_with(Policy::Implement);
        state.iteration_count = 3;
        state.critic_feedback = Some(Vec::new());
        assert_eq!(
            target(&table, StepId::Critic, &state),
            Target::Terminate(Termination::IterationsExhausted)
        );
    }

    #[test]
    fn critic_routes_on_feedback() {
        let table = table();
        let mut state = state_with(Policy::Implement);
        state.iteration_count = 1;

        state.critic_feedback = Some(Vec::new());
        assert_eq!(
            target(&table, StepId::Critic, &state),
            Target::Terminate(Termination::Converged)
        );

        state.run_performance_test = true;
        assert_eq!(
            target(&table, StepId::Critic, &state),
            Target::Step(StepId::Performance)
        );

        state.critic_feedback = Some(vec![FeedbackItem::new("x", Severity::Major)]);
        assert_eq!(
            target(&table, StepId::Critic, &state),
            Target::Step(StepId::UserInput)
        );

        state.critic_feedback = None;
        assert_eq!(
            target(&table, StepId::Critic, &state),
            Target::Step(StepId::UserInput)
        );
    }

    #[test]
    fn user_input_loops_back_until_cleared() {
        let table = table();
        let mut state = state_with(Policy::Implement);
        state.critic_feedback = Some(vec![FeedbackItem::new("x", Severity::Minor)]);
        assert_eq!(
            target(&table, StepId::UserInput, &state),
            Target::Step(StepId::Implementer)
        );
        state.critic_feedback = Some(Vec::new());
        assert_eq!(
            target(&table, StepId::UserInput, &state),
            Target::Terminate(Termination::Converged)
        );
    }

    #[test]
    fn fixed_edges() {
        let table = table();
        let state = state_with(Policy::Implement);
        let fixed = [
            (StepId::ResetState, Target::Step(StepId::Implementer)),
            (StepId::Implementer, Target::Step(StepId::Tester)),
            (StepId::Tester, Target::Step(StepId::Critic)),
            (StepId::Research, Target::Step(StepId::PlanApproval)),
            (StepId::Refactor, Target::Step(StepId::PlanApproval)),
            (StepId::Debug, Target::Step(StepId::ResetState)),
            (
                StepId::Performance,
                Target::Terminate(Termination::PerformanceReviewed),
            ),
        ];
        for (from, expected) in fixed {
            assert_eq!(target(&table, from, &state), expected, "from {from}");
        }
        assert!(table.next(StepId::CodeMap, &state).is_none());
        assert_eq!(table.dormant_steps().collect::<Vec<_>>(), vec![StepId::Debug]);
    }

    #[test]
    fn build_rejects_dangling_target() {
        let err = TableBuilder::new(StepId::Router)
            .otherwise(StepId::Router, Target::Step(StepId::Spec))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            TransitionTableError::Dangling {
                from: StepId::Router,
                to: StepId::Spec
            }
        );
    }

    #[test]
    fn build_rejects_missing_fallback_and_shadowed_edges() {
        let err = TableBuilder::new(StepId::Router)
            .when(
                StepId::Router,
                "exit",
                is_exit_or_clarify,
                Target::Terminate(Termination::PolicyExit),
            )
            .build()
            .unwrap_err();
        assert_eq!(err, TransitionTableError::NoFallback(StepId::Router));

        let err = TableBuilder::new(StepId::Router)
            .otherwise(StepId::Router, Target::Terminate(Termination::PolicyExit))
            .when(
                StepId::Router,
                "late",
                is_debug,
                Target::Terminate(Termination::Halted),
            )
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            TransitionTableError::Shadowed {
                from: StepId::Router,
                label: "late"
            }
        );
    }

    #[test]
    fn build_rejects_unreachable_unless_dormant() {
        let builder = || {
            TableBuilder::new(StepId::Router)
                .otherwise(StepId::Router, Target::Terminate(Termination::PolicyExit))
                .otherwise(StepId::Debug, Target::Terminate(Termination::Halted))
        };
        assert_eq!(
            builder().build().unwrap_err(),
            TransitionTableError::Unreachable(StepId::Debug)
        );
        assert!(builder().dormant(StepId::Debug).build().is_ok());
    }

    #[test]
    fn build_rejects_branch_with_edges() {
        let err = TableBuilder::new(StepId::Router)
            .otherwise(
                StepId::Router,
                Target::FanOut {
                    branches: vec![StepId::CodeMap],
                    join: StepId::ResetState,
                },
            )
            .otherwise(StepId::CodeMap, Target::Step(StepId::ResetState))
            .otherwise(StepId::ResetState, Target::Terminate(Termination::Halted))
            .build()
            .unwrap_err();
        assert_eq!(err, TransitionTableError::BranchWithEdges(StepId::CodeMap));
    }

    #[test]
    fn termination_summaries_mention_iterations() {
        let mut state = state_with(Policy::Implement);
        state.iteration_count = 4;
        assert_eq!(
            Termination::IterationsExhausted.summary(&state),
            "Failed to converge after 4 iterations."
        );
        assert!(Termination::Converged.summary(&state).contains('4'));
        assert!(
            Termination::PolicyExit
                .summary(&state_with(Policy::Clarify))
                .contains("clarify")
        );
    }
}
