//! Orchestration for one aide run.
//!
//! A run prepares the working root (optionally a fresh project directory),
//! materializes the prompt templates, wires the approval gate, tools and
//! reasoning engine into the step handler, then drives the workflow to a
//! terminal state. Session events land in `aide_log.jsonl`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info};

use crate::agents::invocation::AgentEnv;
use crate::core::slug::project_slug;
use crate::core::state::RunState;
use crate::core::transitions::Termination;
use crate::io::approvals::{ApprovalGate, ApprovalStore};
use crate::io::config::{AideConfig, load_config};
use crate::io::engine::{CommandEngine, ReasoningEngine};
use crate::io::event_log::EventLog;
use crate::io::operator::Operator;
use crate::io::paths::AidePaths;
use crate::io::prompt::materialize;
use crate::steps::AgentSteps;
use crate::tools::{ToolContext, ToolRegistry};
use crate::workflow::{Workflow, WorkflowEvent};

/// What the operator asked for on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub request: String,
    /// Working root, or the parent of the new project directory with `new_project`.
    pub base_dir: PathBuf,
    pub new_project: bool,
    /// Overrides `max_iterations` from the config file.
    pub max_iterations: Option<u32>,
    pub run_performance_test: bool,
}

/// Outcome of a run that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub root: PathBuf,
    pub reason: Termination,
    pub summary: String,
    pub iterations: u32,
}

/// Resolve the working root, creating the project directory for `--new`.
pub fn prepare_root(request: &RunRequest) -> Result<PathBuf> {
    if !request.new_project {
        return Ok(request.base_dir.clone());
    }
    let root = request.base_dir.join(project_slug(&request.request));
    fs::create_dir_all(&root)
        .with_context(|| format!("create project directory {}", root.display()))?;
    info!(root = %root.display(), "project directory ready");
    Ok(root)
}

/// Run with the engine configured in `.aide/config.toml`.
pub fn run(request: &RunRequest, operator: &dyn Operator) -> Result<RunOutcome> {
    let root = prepare_root(request)?;
    if request.new_project {
        operator.show(&format!(
            "--- Creating new project directory: {} ---",
            root.display()
        ));
    }
    let config = load_config(&AidePaths::new(&root).config)?;
    let engine = CommandEngine::from_config(&config, &root);
    run_in_root(&root, request, &config, &engine, operator)
}

/// Drive the workflow in `root` with explicit collaborators.
pub fn run_in_root(
    root: &Path,
    request: &RunRequest,
    config: &AideConfig,
    engine: &dyn ReasoningEngine,
    operator: &dyn Operator,
) -> Result<RunOutcome> {
    let paths = AidePaths::new(root);
    let written = materialize(root).context("materialize prompt templates")?;
    debug!(count = written.len(), "prompt templates written");

    let max_iterations = request.max_iterations.unwrap_or(config.max_iterations);
    let events = EventLog::new(&paths.event_log);
    events.record(
        "session_start",
        json!({
            "user_request": request.request,
            "root": root.display().to_string(),
            "max_iterations": max_iterations,
            "run_performance_test": request.run_performance_test,
        }),
    );

    let gate = ApprovalGate::new(ApprovalStore::new(&paths.approvals))
        .with_event_log(EventLog::new(&paths.event_log));
    let registry = ToolRegistry::standard();
    let steps = AgentSteps::new(AgentEnv {
        engine,
        registry: &registry,
        tools: ToolContext::new(root, &gate, operator, config),
        max_turns: config.turn_limit(),
    });
    let workflow = Workflow::standard()?.with_checkpoint(&paths.run_state);

    let mut state = RunState::new(
        request.request.clone(),
        root,
        max_iterations,
        request.run_performance_test,
    );
    let reason = match workflow.run(&steps, &mut state, |event| report(event, &events, operator)) {
        Ok(reason) => reason,
        Err(err) => {
            events.record("run_failed", json!({ "error": format!("{err:#}") }));
            return Err(err);
        }
    };

    let summary = state.final_summary.clone().unwrap_or_default();
    events.record(
        "run_finished",
        json!({
            "reason": reason,
            "summary": summary,
            "iterations": state.iteration_count,
        }),
    );
    info!(?reason, iterations = state.iteration_count, "run finished");
    Ok(RunOutcome {
        root: root.to_path_buf(),
        reason,
        summary,
        iterations: state.iteration_count,
    })
}

fn report(event: &WorkflowEvent, events: &EventLog, operator: &dyn Operator) {
    match event {
        WorkflowEvent::StepStarted(step) => {
            operator.show(&format!("--- Step: {step} ---"));
            events.record("step_started", json!({ "step": step }));
        }
        WorkflowEvent::StepFinished { step, touched } => {
            events.record("step_finished", json!({ "step": step, "updated": touched }));
        }
        WorkflowEvent::FanOut { branches, join } => {
            events.record("fan_out", json!({ "branches": branches, "join": join }));
        }
        WorkflowEvent::Finished { reason, summary } => {
            debug!(?reason, summary = %summary, "workflow reported finish");
        }
    }
}
