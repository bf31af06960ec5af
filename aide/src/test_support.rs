//! Test-only doubles for the operator, the reasoning engine and step handlers.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};

use crate::core::state::{RunState, StatePatch};
use crate::core::transitions::StepId;
use crate::io::engine::{EngineReply, Message, ReasoningEngine, ToolCall, ToolSpec};
use crate::io::operator::Operator;
use crate::io::prompt::materialize;
use crate::workflow::StepHandler;

/// Operator that answers from a fixed script and records what it was shown.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    answers: Mutex<VecDeque<String>>,
    questions: Mutex<Vec<String>>,
    shown: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn new<I>(answers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Every question asked so far, in order.
    pub fn questions(&self) -> Vec<String> {
        lock(&self.questions).clone()
    }

    /// Every message shown so far, in order.
    pub fn shown(&self) -> Vec<String> {
        lock(&self.shown).clone()
    }
}

impl Operator for ScriptedOperator {
    fn ask(&self, prompt: &str) -> Result<String> {
        lock(&self.questions).push(prompt.to_string());
        lock(&self.answers)
            .pop_front()
            .ok_or_else(|| anyhow!("scripted operator has no answer for: {prompt}"))
    }

    fn show(&self, message: &str) {
        lock(&self.shown).push(message.to_string());
    }
}

/// Engine that replays canned replies and records each request history.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    replies: Mutex<VecDeque<EngineReply>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedEngine {
    pub fn new(replies: impl IntoIterator<Item = EngineReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        lock(&self.requests).clone()
    }
}

impl ReasoningEngine for ScriptedEngine {
    fn respond(&self, history: &[Message], _tools: &[ToolSpec]) -> Result<EngineReply> {
        lock(&self.requests).push(history.to_vec());
        lock(&self.replies)
            .pop_front()
            .ok_or_else(|| anyhow!("scripted engine has no reply left"))
    }
}

/// Tool call with object arguments.
pub fn tool_call(id: &str, name: &str, args: Value) -> ToolCall {
    let args = match args {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        args,
    }
}

type PatchFn = Box<dyn Fn(&RunState) -> StatePatch + Send + Sync>;

/// Step handler driven by per-step closures. Unscripted steps return an
/// empty patch. Every visit is recorded.
#[derive(Default)]
pub struct ScriptedSteps {
    patches: HashMap<StepId, PatchFn>,
    failures: HashMap<StepId, String>,
    delays: HashMap<StepId, Duration>,
    visited: Mutex<Vec<StepId>>,
}

impl ScriptedSteps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, step: StepId, patch: F) -> Self
    where
        F: Fn(&RunState) -> StatePatch + Send + Sync + 'static,
    {
        self.patches.insert(step, Box::new(patch));
        self
    }

    pub fn failing(mut self, step: StepId, message: &str) -> Self {
        self.failures.insert(step, message.to_string());
        self
    }

    /// Sleep before producing the patch for `step`.
    pub fn delayed(mut self, step: StepId, delay: Duration) -> Self {
        self.delays.insert(step, delay);
        self
    }

    pub fn visited(&self) -> Vec<StepId> {
        lock(&self.visited).clone()
    }
}

impl StepHandler for ScriptedSteps {
    fn run(&self, step: StepId, state: &RunState) -> Result<StatePatch> {
        if let Some(delay) = self.delays.get(&step) {
            thread::sleep(*delay);
        }
        lock(&self.visited).push(step);
        if let Some(message) = self.failures.get(&step) {
            return Err(anyhow!("{message}"));
        }
        Ok(self
            .patches
            .get(&step)
            .map(|patch| patch(state))
            .unwrap_or_default())
    }
}

/// Temporary working root with the built-in prompts materialized.
pub fn prompt_root() -> tempfile::TempDir {
    let temp = tempfile::tempdir().expect("tempdir");
    materialize(temp.path()).expect("materialize prompts");
    temp
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
