//! Tools the reasoning engine can call, dispatched by name.
//!
//! Every tool answers with text. Failures inside a tool become text as well,
//! so the turn loop always has an observation to feed back.

mod builtin;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::io::approvals::ApprovalGate;
use crate::io::config::AideConfig;
use crate::io::engine::ToolSpec;
use crate::io::operator::Operator;

pub use builtin::{
    BuildCodeMapTool, CommandRunnerTool, DockerComposeDownTool, DockerComposeUpTool,
    LoadSchemaTool, ReadFileTool, WriteFileTool, execute_command, load_api_schema,
};

/// Name of the tool the turn loop answers itself by asking the operator.
pub const CONFIRMATION_TOOL: &str = "request_user_confirmation_tool";

/// Everything a tool may touch during one invocation.
pub struct ToolContext<'a> {
    pub root: &'a Path,
    pub approvals: &'a ApprovalGate,
    pub operator: &'a dyn Operator,
    pub command_timeout: Duration,
    pub output_limit_bytes: usize,
}

impl<'a> ToolContext<'a> {
    pub fn new(
        root: &'a Path,
        approvals: &'a ApprovalGate,
        operator: &'a dyn Operator,
        config: &AideConfig,
    ) -> Self {
        Self {
            root,
            approvals,
            operator,
            command_timeout: config.command_timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    /// Resolve a tool-supplied path against the working root.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema of the arguments object.
    fn parameters(&self) -> Value;

    fn invoke(&self, args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<String>;
}

/// Result of dispatching a tool call by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Output(String),
    /// The tool ran and failed; the text describes the failure.
    Failed(String),
    NotFound(String),
}

impl ToolOutcome {
    /// Text fed back to the engine as the observation.
    pub fn observation(&self) -> String {
        match self {
            ToolOutcome::Output(text) => text.clone(),
            ToolOutcome::Failed(text) => format!("Error: {text}"),
            ToolOutcome::NotFound(name) => format!("Error: Tool '{name}' not found."),
        }
    }
}

/// Tools available to one agent, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every shipped tool.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(ReadFileTool);
        registry.register(WriteFileTool);
        registry.register(CommandRunnerTool);
        registry.register(BuildCodeMapTool);
        registry.register(LoadSchemaTool);
        registry.register(DockerComposeUpTool);
        registry.register(DockerComposeDownTool);
        registry
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    /// Specs advertised to the engine, including the confirmation tool.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        specs.push(ToolSpec {
            name: CONFIRMATION_TOOL.to_string(),
            description: "Ask the operator a yes/no question.".to_string(),
            parameters: string_params(&[("prompt", true)]),
        });
        specs
    }

    /// Single entry point for running a tool by name.
    pub fn invoke(&self, name: &str, args: &Map<String, Value>, ctx: &ToolContext<'_>) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "tool not found");
            return ToolOutcome::NotFound(name.to_string());
        };
        debug!(tool = name, "invoking tool");
        match tool.invoke(args, ctx) {
            Ok(output) => ToolOutcome::Output(output),
            Err(err) => {
                warn!(tool = name, err = %format!("{err:#}"), "tool failed");
                ToolOutcome::Failed(format!("{err:#}"))
            }
        }
    }
}

/// Object schema whose properties are all strings.
pub(crate) fn string_params(fields: &[(&str, bool)]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|(name, _)| (name.to_string(), serde_json::json!({"type": "string"})))
        .collect();
    let required: Vec<&str> = fields
        .iter()
        .filter(|(_, required)| *required)
        .map(|(name, _)| *name)
        .collect();
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

pub(crate) fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing string argument '{key}'"))
}

pub(crate) fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}
