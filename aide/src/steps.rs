//! The workflow's steps: agents, direct tool calls and operator checkpoints.

use std::fmt;
use std::fs;

use anyhow::Result;
use minijinja::context;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::agents::invocation::{Agent, AgentEnv};
use crate::core::feedback::select_feedback;
use crate::core::state::{RunState, Slot, StatePatch};
use crate::core::transitions::StepId;
use crate::core::types::{AgentResult, Document, FeedbackItem, Policy};
use crate::io::code_map::{build_code_map, write_code_map};
use crate::io::operator::{is_affirmative, normalize_answer};
use crate::io::paths::AidePaths;
use crate::io::prompt::PromptId;
use crate::tools::load_api_schema;
use crate::workflow::StepHandler;

/// Summary a tester report carries when every test passed.
pub const ALL_TESTS_PASSED: &str = "All tests passed.";
pub const PLAN_REJECTED: &str = "Plan rejected by user.";

const DEBUG_PLAN: &str = "Analyze the test report and fix the code based on the errors.";
const REFACTOR_PLAN_FAILED: &str = "Failed to generate a refactoring plan.";

/// A step needed an artifact whose prompt could not be loaded or rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingArtifactError {
    pub step: StepId,
    pub artifact: &'static str,
    pub reason: String,
}

impl fmt::Display for MissingArtifactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step '{}' could not produce the {}: {}",
            self.step, self.artifact, self.reason
        )
    }
}

impl std::error::Error for MissingArtifactError {}

/// Runs each step against the agents, tools and operator of one working root.
pub struct AgentSteps<'a> {
    env: AgentEnv<'a>,
    paths: AidePaths,
}

impl<'a> AgentSteps<'a> {
    pub fn new(env: AgentEnv<'a>) -> Self {
        let paths = AidePaths::new(env.root());
        Self { env, paths }
    }

    fn router(&self, state: &RunState) -> StatePatch {
        let result = Agent::new(PromptId::Router)
            .run(&self.env, &context! { user_input => &state.user_request });
        let policy = Policy::from_answer(
            result
                .parsed()
                .and_then(|doc| doc.get("policy"))
                .and_then(Value::as_str),
        );
        info!(policy = %policy, "request classified");
        StatePatch {
            policy: Some(policy),
            iteration_count: Some(0),
            ..StatePatch::default()
        }
    }

    fn spec(&self, state: &RunState) -> Result<StatePatch> {
        let result = Agent::new(PromptId::Spec)
            .with_output(&self.paths.spec)
            .run(&self.env, &context! { user_input => &state.user_request });
        Ok(StatePatch {
            spec: Slot::Set(required(StepId::Spec, "spec", result)?),
            ..StatePatch::default()
        })
    }

    fn plan(&self, state: &RunState) -> Result<StatePatch> {
        let result = Agent::new(PromptId::Plan)
            .with_output(&self.paths.plan)
            .run(&self.env, &context! { spec => pretty(&state.spec) });
        Ok(StatePatch {
            plan: Slot::Set(required(StepId::Plan, "plan", result)?),
            ..StatePatch::default()
        })
    }

    fn research(&self, state: &RunState) -> Result<StatePatch> {
        let result = Agent::new(PromptId::Research)
            .with_output(&self.paths.spec)
            .run(
                &self.env,
                &context! {
                    user_input => &state.user_request,
                    plan => pretty(&state.plan),
                },
            );
        Ok(StatePatch {
            spec: Slot::Set(required(StepId::Research, "spec", result)?),
            ..StatePatch::default()
        })
    }

    fn plan_approval(&self, state: &RunState) -> Result<StatePatch> {
        let operator = self.env.tools.operator;
        operator.show("Generated Plan:");
        operator.show(&pretty(&state.plan));
        let answer = operator.ask("Do you approve this plan? [y/n]")?;
        if is_affirmative(&answer) {
            info!("plan approved");
            return Ok(StatePatch::default());
        }
        operator.show("Plan rejected. Exiting.");
        Ok(StatePatch {
            final_summary: Some(PLAN_REJECTED.to_string()),
            ..StatePatch::default()
        })
    }

    fn code_map(&self) -> StatePatch {
        let root = self.env.root();
        let map = match write_code_map(root) {
            Ok(map) => map,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to write code map");
                Value::Object(build_code_map(root))
            }
        };
        StatePatch {
            code_map: Slot::Set(map),
            ..StatePatch::default()
        }
    }

    fn schema_load(&self) -> StatePatch {
        StatePatch {
            api_schema: Slot::Set(load_api_schema(self.env.root()).unwrap_or_else(|| json!({}))),
            ..StatePatch::default()
        }
    }

    fn implementer(&self, state: &RunState) -> StatePatch {
        info!(
            policy = %state.policy(),
            iteration = state.iteration_count + 1,
            "implementing"
        );
        Agent::new(PromptId::Implementer).run(
            &self.env,
            &context! {
                spec => pretty(&state.spec),
                plan => pretty(&state.plan),
                code_map => pretty(&state.code_map),
                api_schema => pretty(&state.api_schema),
                critic_feedback => critic_feedback_text(state),
                user_feedback => state.user_feedback_queue.join("\n"),
            },
        );
        next_iteration(state)
    }

    fn debug(&self, state: &RunState) -> StatePatch {
        Agent::new(PromptId::DebugImplementer).run(
            &self.env,
            &context! {
                spec => pretty(&state.spec),
                plan => pretty(&json!({ "fix": DEBUG_PLAN })),
                code_map => pretty(&state.code_map),
                api_schema => pretty(&state.api_schema),
                critic_feedback => critic_feedback_text(state),
                user_feedback => state.user_feedback_queue.join("\n"),
                test_report => pretty(&state.test_report.clone().unwrap_or_else(|| json!({}))),
            },
        );
        next_iteration(state)
    }

    fn refactor(&self, state: &RunState) -> StatePatch {
        let replanned = Agent::new(PromptId::Plan)
            .with_output(&self.paths.plan)
            .run(&self.env, &context! { spec => pretty(&state.spec) });
        let Some(plan) = replanned.into_document() else {
            return StatePatch {
                plan: Slot::Set(json!({ "error": REFACTOR_PLAN_FAILED })),
                ..StatePatch::default()
            };
        };
        Agent::new(PromptId::RefactorImplementer).run(
            &self.env,
            &context! {
                spec => pretty(&state.spec),
                plan => pretty(&plan),
                code_map => pretty(&state.code_map),
                api_schema => pretty(&state.api_schema),
                user_feedback => state.user_feedback_queue.join("\n"),
            },
        );
        StatePatch {
            plan: Slot::Set(plan),
            ..next_iteration(state)
        }
    }

    fn tester(&self, state: &RunState) -> StatePatch {
        let report = Agent::new(PromptId::Tester)
            .with_output(&self.paths.test_report)
            .run(&self.env, &context! { spec => pretty(&state.spec) })
            .into_document();
        StatePatch {
            test_report: report.into(),
            ..StatePatch::default()
        }
    }

    fn critic(&self, state: &RunState) -> StatePatch {
        let tests_passed = state
            .test_report
            .as_ref()
            .and_then(|report| report.get("summary"))
            .and_then(Value::as_str)
            == Some(ALL_TESTS_PASSED);
        if tests_passed {
            info!("tests passed; critic satisfied");
            return StatePatch {
                critic_feedback: Slot::Set(Vec::new()),
                ..StatePatch::default()
            };
        }

        let result = Agent::new(PromptId::Critic).run(
            &self.env,
            &context! {
                spec => pretty(&state.spec),
                plan => pretty(&state.plan),
                code_map => pretty(&state.code_map),
                api_schema => pretty(&state.api_schema),
                test_report => pretty(&state.test_report),
                performance_report => pretty(&state.performance_report.clone().unwrap_or_else(|| json!({}))),
                user_feedback => state.user_feedback_queue.join("\n"),
                code => self.source_listing(state),
            },
        );
        let critic_feedback = match result {
            AgentResult::Parsed(doc) => match serde_json::from_value::<Vec<FeedbackItem>>(doc) {
                Ok(items) => Slot::Set(items),
                Err(err) => {
                    warn!(err = %err, "critic findings are malformed");
                    Slot::Clear
                }
            },
            _ => Slot::Clear,
        };
        StatePatch {
            critic_feedback,
            ..StatePatch::default()
        }
    }

    /// Source of every file named in the code map, each under a path header.
    fn source_listing(&self, state: &RunState) -> String {
        let Some(files) = state.code_map.as_ref().and_then(Value::as_object) else {
            return String::new();
        };
        let mut listing = String::new();
        for path in files.keys() {
            if let Ok(source) = fs::read_to_string(self.env.root().join(path)) {
                listing.push_str(&format!("---\n{path} ---\n{source}\n\n"));
            }
        }
        listing
    }

    fn user_input(&self, state: &RunState) -> Result<StatePatch> {
        let operator = self.env.tools.operator;
        if let Some(items) = state.critic_feedback.as_ref().filter(|items| !items.is_empty()) {
            operator.show("--- Critic Feedback ---");
            for (index, item) in items.iter().enumerate() {
                operator.show(&format!(
                    "{}. [{}] {}",
                    index + 1,
                    item.severity.as_str().to_uppercase(),
                    item.description
                ));
            }
            let answer = operator.ask(
                "Please select the feedback items to address (e.g., '1,3', 'critical', 'all'), or press Enter to finish.",
            )?;
            let selected = select_feedback(items, &normalize_answer(&answer));
            info!(offered = items.len(), selected = selected.len(), "feedback selected");
            return Ok(StatePatch {
                critic_feedback: Slot::Set(selected),
                ..StatePatch::default()
            });
        }

        let answer =
            operator.ask("Awaiting user input... (Press Enter to continue without feedback)")?;
        let note = answer.trim();
        if note.is_empty() {
            return Ok(StatePatch::default());
        }
        operator.show(&format!("Feedback received: {note}"));
        Ok(StatePatch {
            append_user_feedback: vec![note.to_string()],
            ..StatePatch::default()
        })
    }

    fn performance(&self, state: &RunState) -> StatePatch {
        let report = Agent::new(PromptId::Performance)
            .with_output(&self.paths.performance_report)
            .run(
                &self.env,
                &context! {
                    spec => pretty(&state.spec),
                    code_map => pretty(&state.code_map),
                    test_report => pretty(&state.test_report),
                },
            )
            .into_document();
        StatePatch {
            performance_report: report.into(),
            ..StatePatch::default()
        }
    }
}

impl StepHandler for AgentSteps<'_> {
    #[instrument(skip_all, fields(step = %step))]
    fn run(&self, step: StepId, state: &RunState) -> Result<StatePatch> {
        match step {
            StepId::Router => Ok(self.router(state)),
            StepId::Spec => self.spec(state),
            StepId::Plan => self.plan(state),
            StepId::Research => self.research(state),
            StepId::PlanApproval => self.plan_approval(state),
            StepId::CodeMap => Ok(self.code_map()),
            StepId::SchemaLoad => Ok(self.schema_load()),
            StepId::ResetState => Ok(StatePatch {
                test_report: Slot::Clear,
                critic_feedback: Slot::Clear,
                ..StatePatch::default()
            }),
            StepId::Implementer => Ok(self.implementer(state)),
            StepId::Debug => Ok(self.debug(state)),
            StepId::Refactor => Ok(self.refactor(state)),
            StepId::Tester => Ok(self.tester(state)),
            StepId::Critic => Ok(self.critic(state)),
            StepId::UserInput => self.user_input(state),
            StepId::Performance => Ok(self.performance(state)),
        }
    }
}

fn required(step: StepId, artifact: &'static str, result: AgentResult) -> Result<Document> {
    match result {
        AgentResult::Unavailable { prompt, reason } => Err(MissingArtifactError {
            step,
            artifact,
            reason: format!("prompt '{prompt}' unavailable: {reason}"),
        }
        .into()),
        AgentResult::Parsed(doc) => Ok(doc),
        AgentResult::Failed(record) => Ok(record.to_document()),
    }
}

fn next_iteration(state: &RunState) -> StatePatch {
    StatePatch {
        iteration_count: Some(state.iteration_count + 1),
        ..StatePatch::default()
    }
}

fn critic_feedback_text(state: &RunState) -> String {
    state
        .critic_feedback
        .as_ref()
        .map(pretty)
        .unwrap_or_default()
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}
