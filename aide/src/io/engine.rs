//! Reasoning engine abstraction.
//!
//! The [`ReasoningEngine`] trait decouples the turn loop from whatever model
//! backend answers it. [`CommandEngine`] talks to an external command over
//! stdin/stdout; tests use scripted engines that replay canned replies.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::io::config::AideConfig;
use crate::io::process::run_command_with_timeout;

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// Observation produced for the request with id `tool_call_id`.
    Tool {
        tool_call_id: String,
        content: String,
    },
}

/// A tool invocation requested by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Tool advertised to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// Engine answer: final text when `tool_calls` is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineReply {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl EngineReply {
    pub fn answer(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn into_message(self) -> Message {
        Message::Assistant {
            content: self.content,
            tool_calls: self.tool_calls,
        }
    }
}

/// Abstraction over reasoning backends.
pub trait ReasoningEngine: Send + Sync {
    fn respond(&self, history: &[Message], tools: &[ToolSpec]) -> Result<EngineReply>;
}

#[derive(Serialize)]
struct EngineRequest<'a> {
    messages: &'a [Message],
    tools: &'a [ToolSpec],
}

/// Engine backed by an external command.
///
/// The request `{"messages": [...], "tools": [...]}` is written to the
/// command's stdin; the command prints one [`EngineReply`] as JSON on stdout.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CommandEngine {
    /// Engine configured by `[engine]`, run in `workdir`.
    pub fn from_config(cfg: &AideConfig, workdir: &Path) -> Self {
        Self {
            command: cfg.engine.command.clone(),
            workdir: workdir.to_path_buf(),
            timeout: cfg.engine_timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl ReasoningEngine for CommandEngine {
    #[instrument(skip_all, fields(program = %self.command.first().map(String::as_str).unwrap_or(""), messages = history.len()))]
    fn respond(&self, history: &[Message], tools: &[ToolSpec]) -> Result<EngineReply> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("engine command is empty"))?;
        let payload = serde_json::to_vec(&EngineRequest {
            messages: history,
            tools,
        })
        .context("serialize engine request")?;

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        info!("calling reasoning engine");
        let output = run_command_with_timeout(
            cmd,
            Some(&payload),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run engine {program}"))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "engine timed out");
            return Err(anyhow!("engine timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "engine failed");
            return Err(anyhow!(
                "engine failed with status {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "engine reply exceeded {} bytes",
                self.output_limit_bytes
            ));
        }
        let reply: EngineReply =
            serde_json::from_slice(&output.stdout).context("parse engine reply")?;
        debug!(tool_calls = reply.tool_calls.len(), "engine replied");
        Ok(reply)
    }
}
