//! Bounded think/act/observe loop between a reasoning engine and its tools.

use std::fmt;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::io::engine::{Message, ReasoningEngine, ToolCall};
use crate::io::operator::is_affirmative;
use crate::tools::{CONFIRMATION_TOOL, ToolContext, ToolRegistry};

pub const USER_CONFIRMED: &str = "User confirmed.";
pub const USER_DENIED: &str = "User denied.";

/// The engine kept requesting tools past the configured number of calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnLimitExceeded {
    pub limit: u32,
}

impl fmt::Display for TurnLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "turn limit exceeded: no final answer after {} reasoning calls",
            self.limit
        )
    }
}

impl std::error::Error for TurnLimitExceeded {}

/// Completed turn.
#[derive(Debug, Clone)]
pub struct Turn {
    pub answer: String,
    pub history: Vec<Message>,
    pub reasoning_calls: u32,
}

pub struct TurnLoop<'a> {
    engine: &'a dyn ReasoningEngine,
    registry: &'a ToolRegistry,
    tools: &'a ToolContext<'a>,
    max_turns: Option<u32>,
}

impl<'a> TurnLoop<'a> {
    pub fn new(
        engine: &'a dyn ReasoningEngine,
        registry: &'a ToolRegistry,
        tools: &'a ToolContext<'a>,
        max_turns: Option<u32>,
    ) -> Self {
        Self {
            engine,
            registry,
            tools,
            max_turns,
        }
    }

    /// Run one turn seeded with `prompt`.
    ///
    /// Returns the content of the first reply that requests no tools. Engine
    /// errors and [`TurnLimitExceeded`] are returned as errors.
    #[instrument(skip_all, fields(max_turns = ?self.max_turns))]
    pub fn run(&self, prompt: String) -> Result<Turn> {
        let specs = self.registry.specs();
        let mut history = vec![Message::User { content: prompt }];
        let mut calls = 0u32;

        loop {
            if let Some(limit) = self.max_turns
                && calls >= limit
            {
                return Err(TurnLimitExceeded { limit }.into());
            }
            calls += 1;

            let reply = self
                .engine
                .respond(&history, &specs)
                .context("reasoning engine call")?;
            let requested = reply.tool_calls.clone();
            let content = reply.content.clone();
            history.push(reply.into_message());

            if requested.is_empty() {
                debug!(calls, "turn finished");
                return Ok(Turn {
                    answer: content,
                    history,
                    reasoning_calls: calls,
                });
            }

            if !content.trim().is_empty() {
                self.tools.operator.show(&format!("Thought: {content}"));
            }
            for call in &requested {
                let observation = self.observe(call)?;
                history.push(Message::Tool {
                    tool_call_id: call.id.clone(),
                    content: observation,
                });
            }
        }
    }

    fn observe(&self, call: &ToolCall) -> Result<String> {
        if call.name == CONFIRMATION_TOOL {
            let question = call
                .args
                .get("prompt")
                .and_then(Value::as_str)
                .unwrap_or("Continue?");
            let answer = self
                .tools
                .operator
                .ask(&format!("Confirmation required: {question} [y/n]"))?;
            let observation = if is_affirmative(&answer) {
                USER_CONFIRMED
            } else {
                USER_DENIED
            };
            return Ok(observation.to_string());
        }

        info!(tool = %call.name, "tool requested");
        self.tools.operator.show(&format!(
            "Action: {}({})",
            call.name,
            Value::Object(call.args.clone())
        ));
        let observation = self
            .registry
            .invoke(&call.name, &call.args, self.tools)
            .observation();
        self.tools
            .operator
            .show(&format!("Observation: {observation}"));
        Ok(observation)
    }
}
