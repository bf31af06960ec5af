use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use super::{Tool, ToolContext, optional_str, required_str, string_params};
use crate::io::code_map::write_code_map;
use crate::io::paths::API_SCHEMA_FILE;
use crate::io::process::{run_command_with_timeout, shell_command};

pub struct ReadFileTool;

impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file_tool"
    }

    fn description(&self) -> &'static str {
        "Read a text file relative to the working root."
    }

    fn parameters(&self) -> Value {
        string_params(&[("path", true)])
    }

    fn invoke(&self, args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<String> {
        let path = ctx.resolve(required_str(args, "path")?);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}

pub struct WriteFileTool;

impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file_tool"
    }

    fn description(&self) -> &'static str {
        "Write a text file relative to the working root, creating parent directories."
    }

    fn parameters(&self) -> Value {
        string_params(&[("path", true), ("content", true)])
    }

    fn invoke(&self, args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<String> {
        let raw = required_str(args, "path")?;
        let content = required_str(args, "content")?;
        let path = ctx.resolve(raw);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
        info!(path = raw, bytes = content.len(), "file written");
        Ok(format!("Successfully wrote to {raw}"))
    }
}

/// Shell command gated by the approval cache.
pub struct CommandRunnerTool;

impl Tool for CommandRunnerTool {
    fn name(&self) -> &'static str {
        "command_runner_tool"
    }

    fn description(&self) -> &'static str {
        "Run a shell command in the working root. New commands need operator approval."
    }

    fn parameters(&self) -> Value {
        string_params(&[("command", true)])
    }

    fn invoke(&self, args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<String> {
        let command = required_str(args, "command")?;
        run_gated_command(command, ctx)
    }
}

pub struct BuildCodeMapTool;

impl Tool for BuildCodeMapTool {
    fn name(&self) -> &'static str {
        "build_code_map_tool"
    }

    fn description(&self) -> &'static str {
        "Outline imports, classes and functions of every Python file and write code_map.json."
    }

    fn parameters(&self) -> Value {
        string_params(&[])
    }

    fn invoke(&self, _args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<String> {
        let map = write_code_map(ctx.root)?;
        serde_json::to_string_pretty(&map).context("serialize code map")
    }
}

pub struct LoadSchemaTool;

impl Tool for LoadSchemaTool {
    fn name(&self) -> &'static str {
        "load_schema_tool"
    }

    fn description(&self) -> &'static str {
        "Load a JSON API schema (default api_schema.json)."
    }

    fn parameters(&self) -> Value {
        string_params(&[("path", false)])
    }

    fn invoke(&self, args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<String> {
        let raw = optional_str(args, "path").unwrap_or(API_SCHEMA_FILE);
        let path = ctx.resolve(raw);
        if !path.exists() {
            return Ok(format!("API schema file not found at {raw}."));
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let schema: Value = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to decode JSON from {raw}"))?;
        serde_json::to_string_pretty(&schema).context("serialize schema")
    }
}

pub struct DockerComposeUpTool;

impl Tool for DockerComposeUpTool {
    fn name(&self) -> &'static str {
        "docker_compose_up_tool"
    }

    fn description(&self) -> &'static str {
        "Start services with `docker compose up -d`. Needs operator approval."
    }

    fn parameters(&self) -> Value {
        string_params(&[("compose_file", false)])
    }

    fn invoke(&self, args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<String> {
        let file = optional_str(args, "compose_file").unwrap_or("docker-compose.yml");
        run_gated_command(&format!("docker compose -f {file} up -d"), ctx)
    }
}

pub struct DockerComposeDownTool;

impl Tool for DockerComposeDownTool {
    fn name(&self) -> &'static str {
        "docker_compose_down_tool"
    }

    fn description(&self) -> &'static str {
        "Stop services with `docker compose down`. Needs operator approval."
    }

    fn parameters(&self) -> Value {
        string_params(&[("compose_file", false)])
    }

    fn invoke(&self, args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<String> {
        let file = optional_str(args, "compose_file").unwrap_or("docker-compose.yml");
        run_gated_command(&format!("docker compose -f {file} down"), ctx)
    }
}

fn run_gated_command(command: &str, ctx: &ToolContext<'_>) -> Result<String> {
    ctx.approvals.run_gated(command, ctx.operator, || {
        execute_command(
            command,
            ctx.root,
            ctx.command_timeout,
            ctx.output_limit_bytes,
        )
    })
}

/// Run `command` through the shell in `root` and describe the result as text.
///
/// A non-zero exit is reported as `Error: <stderr>\nExit Code: <n>`, never as an error.
#[instrument(skip_all, fields(command = %command))]
pub fn execute_command(
    command: &str,
    root: &Path,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<String> {
    let output = match run_command_with_timeout(
        shell_command(command, root),
        None,
        timeout,
        output_limit_bytes,
    ) {
        Ok(output) => output,
        Err(err) => return Ok(format!("Error: {err:#}")),
    };
    if output.timed_out {
        return Ok(format!("Error: command timed out after {timeout:?}"));
    }
    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        return Ok(format!("Error: {}\nExit Code: {code}", output.stderr_text()));
    }
    Ok(output.stdout_text())
}

/// Read `api_schema.json` from `root`. Absent or malformed files yield `None`.
pub fn load_api_schema(root: &Path) -> Option<Value> {
    let path = root.join(API_SCHEMA_FILE);
    let contents = fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(schema) => Some(schema),
        Err(err) => {
            warn!(path = %path.display(), err = %err, "api schema is not valid JSON");
            None
        }
    }
}
