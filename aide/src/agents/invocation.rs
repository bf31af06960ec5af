//! Agent invocation: prompt, turn loop, structured answer, artifact.
//!
//! [`Agent::run`] never fails. A prompt that cannot be loaded or rendered
//! yields [`AgentResult::Unavailable`]; every later failure yields a
//! [`FailureRecord`] that is persisted where the artifact would have gone.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use jsonschema::Draft;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, instrument, warn};

use crate::agents::turn_loop::TurnLoop;
use crate::core::types::{AgentResult, Document, FailureRecord};
use crate::io::engine::ReasoningEngine;
use crate::io::fs_atomic::write_json_atomic;
use crate::io::prompt::{PromptId, load_and_render};
use crate::tools::{ToolContext, ToolOutcome, ToolRegistry};

/// Collaborators shared by every agent of a run.
pub struct AgentEnv<'a> {
    pub engine: &'a dyn ReasoningEngine,
    pub registry: &'a ToolRegistry,
    pub tools: ToolContext<'a>,
    pub max_turns: Option<u32>,
}

impl AgentEnv<'_> {
    pub fn root(&self) -> &Path {
        self.tools.root
    }
}

/// A prompt identity bound to an optional artifact path and result schema.
#[derive(Debug, Clone)]
pub struct Agent {
    prompt: PromptId,
    output: Option<PathBuf>,
    schema: Option<Value>,
}

impl Agent {
    pub fn new(prompt: PromptId) -> Self {
        Self {
            prompt,
            output: None,
            schema: prompt.result_schema(),
        }
    }

    /// Persist the parsed answer (or the failure record) to `path`.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    #[instrument(skip_all, fields(prompt = self.prompt.as_str()))]
    pub fn run<A: Serialize>(&self, env: &AgentEnv<'_>, args: &A) -> AgentResult {
        let rendered = match load_and_render(env.root(), self.prompt, args) {
            Ok(rendered) => rendered,
            Err(err) => {
                let reason = format!("{err:#}");
                error!(reason = %reason, "PromptUnavailable");
                env.tools.operator.show(&format!(
                    "Error reading prompt {}: {reason}",
                    self.prompt.as_str()
                ));
                return AgentResult::Unavailable {
                    prompt: self.prompt.as_str().to_string(),
                    reason,
                };
            }
        };

        let turn = TurnLoop::new(env.engine, env.registry, &env.tools, env.max_turns);
        let answer = match turn.run(rendered) {
            Ok(turn) => turn.answer,
            Err(err) => {
                return self.fail(
                    env,
                    format!("Agent turn failed for prompt {}: {err:#}", self.prompt.as_str()),
                    String::new(),
                );
            }
        };

        let document = match self.parse(&answer) {
            Ok(document) => document,
            Err(err) => return self.fail(env, format!("{err:#}"), answer),
        };

        if let Some(path) = &self.output {
            match write_json_atomic(path, &document) {
                Ok(()) => env
                    .tools
                    .operator
                    .show(&format!("Output written to {}", display_name(path))),
                Err(err) => warn!(err = %format!("{err:#}"), "failed to persist artifact"),
            }
        }
        self.run_embedded_tool_calls(env, &document);
        info!("agent produced structured answer");
        AgentResult::Parsed(document)
    }

    fn parse(&self, answer: &str) -> Result<Document> {
        let body = strip_code_fence(answer);
        let mut document: Document = serde_json::from_str(body).map_err(|err| {
            anyhow!(
                "Invalid JSON response from agent using prompt {}: {err}",
                self.prompt.as_str()
            )
        })?;
        self.prompt.canonicalize_answer(&mut document);
        if let Some(schema) = &self.schema {
            validate_against(schema, &document).map_err(|err| {
                anyhow!(
                    "Response from agent using prompt {} violates its schema: {err:#}",
                    self.prompt.as_str()
                )
            })?;
        }
        Ok(document)
    }

    fn fail(&self, env: &AgentEnv<'_>, error: String, raw_output: String) -> AgentResult {
        warn!(error = %error, "agent failed");
        env.tools.operator.show(&format!("Error: {error}"));
        let record = FailureRecord::new(error, raw_output);
        if let Some(path) = &self.output
            && let Err(err) = write_json_atomic(path, &record)
        {
            warn!(err = %format!("{err:#}"), "failed to persist failure record");
        }
        AgentResult::Failed(record)
    }

    /// Execute a `tool_calls` list of `{tool_name, args}` embedded in the answer.
    fn run_embedded_tool_calls(&self, env: &AgentEnv<'_>, document: &Document) {
        let Some(calls) = document.get("tool_calls").and_then(Value::as_array) else {
            return;
        };
        for call in calls {
            let name = call.get("tool_name").and_then(Value::as_str).unwrap_or("");
            let args = call
                .get("args")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_else(Map::new);
            let outcome = env.registry.invoke(name, &args, &env.tools);
            match &outcome {
                ToolOutcome::NotFound(_) => env.tools.operator.show(&outcome.observation()),
                _ => {
                    env.tools
                        .operator
                        .show(&format!("Action: {name}({})", Value::Object(args)));
                    env.tools
                        .operator
                        .show(&format!("Observation: {}", outcome.observation()));
                }
            }
        }
    }
}

/// Remove a surrounding ```` ```json ```` fence, if any.
pub fn strip_code_fence(answer: &str) -> &str {
    let trimmed = answer.trim();
    let Some(rest) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    else {
        return trimmed;
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Validate a document against a JSON Schema (Draft 2020-12).
pub fn validate_against(schema: &Value, document: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| anyhow!("compile json schema: {err}"))?;
    let messages: Vec<String> = compiled
        .iter_errors(document)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!("{}", messages.join("; ")));
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AGENT_FAILURE_SUMMARY;
    use crate::io::approvals::{ApprovalGate, ApprovalStore};
    use crate::io::config::AideConfig;
    use crate::io::engine::EngineReply;
    use crate::io::prompt::materialize;
    use crate::test_support::{ScriptedEngine, ScriptedOperator};
    use minijinja::context;
    use serde_json::json;
    use std::fs;

    struct Fixture {
        temp: tempfile::TempDir,
        gate: ApprovalGate,
        operator: ScriptedOperator,
        registry: ToolRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            materialize(temp.path()).expect("materialize prompts");
            let gate = ApprovalGate::new(ApprovalStore::in_root(temp.path()));
            Self {
                temp,
                gate,
                operator: ScriptedOperator::new(Vec::<String>::new()),
                registry: ToolRegistry::standard(),
            }
        }

        fn run(&self, agent: &Agent, engine: &ScriptedEngine, args: &impl Serialize) -> AgentResult {
            let env = AgentEnv {
                engine,
                registry: &self.registry,
                tools: ToolContext::new(
                    self.temp.path(),
                    &self.gate,
                    &self.operator,
                    &AideConfig::default(),
                ),
                max_turns: Some(3),
            };
            agent.run(&env, args)
        }

        fn read_json(&self, name: &str) -> Value {
            let raw = fs::read_to_string(self.temp.path().join(name)).expect("read artifact");
            serde_json::from_str(&raw).expect("artifact json")
        }
    }

    #[test]
    fn strip_code_fence_variants() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("  {\"a\": 1}  "), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n[]\n```\n"), "[]");
    }

    #[test]
    fn parsed_answer_is_persisted() {
        let fx = Fixture::new();
        let agent = Agent::new(PromptId::Spec).with_output(fx.temp.path().join("spec.json"));
        let engine = ScriptedEngine::new([EngineReply::answer(
            "```json\n{\"project_name\": \"adder\"}\n```",
        )]);
        let result = fx.run(&agent, &engine, &context! { user_input => "add two numbers" });
        assert_eq!(result, AgentResult::Parsed(json!({"project_name": "adder"})));
        assert_eq!(fx.read_json("spec.json"), json!({"project_name": "adder"}));

        let prompt = &engine.requests()[0][0];
        assert!(matches!(prompt, crate::io::engine::Message::User { content } if content.contains("add two numbers")));
    }

    #[test]
    fn invalid_json_writes_failure_record() {
        let fx = Fixture::new();
        let agent = Agent::new(PromptId::Tester).with_output(fx.temp.path().join("test_report.json"));
        let engine = ScriptedEngine::new([EngineReply::answer("tests look fine to me")]);
        let result = fx.run(&agent, &engine, &context! { spec => "{}" });

        let AgentResult::Failed(record) = result else {
            panic!("expected failure record");
        };
        assert_eq!(record.summary, AGENT_FAILURE_SUMMARY);
        assert_eq!(record.raw_output, "tests look fine to me");
        let stored = fx.read_json("test_report.json");
        assert!(stored.get("error").is_some());
        assert_eq!(stored["raw_output"], json!("tests look fine to me"));
    }

    #[test]
    fn schema_violation_is_a_failure() {
        let fx = Fixture::new();
        let agent = Agent::new(PromptId::Critic);
        let engine = ScriptedEngine::new([EngineReply::answer(
            r#"[{"description": "x", "severity": "blocker"}]"#,
        )]);
        let args = context! {
            spec => "", plan => "", code_map => "", api_schema => "", test_report => "",
            performance_report => "", user_feedback => "", code => "",
        };
        let result = fx.run(&agent, &engine, &args);
        assert!(matches!(result, AgentResult::Failed(ref record) if record.error.contains("schema")));
    }

    #[test]
    fn missing_prompt_is_unavailable_and_skips_engine() {
        let fx = Fixture::new();
        fs::remove_file(PromptId::Plan.path(fx.temp.path())).expect("remove prompt");
        let agent = Agent::new(PromptId::Plan).with_output(fx.temp.path().join("plan.json"));
        let engine = ScriptedEngine::new([EngineReply::answer("{}")]);
        let result = fx.run(&agent, &engine, &context! { spec => "{}" });
        assert!(matches!(result, AgentResult::Unavailable { ref prompt, .. } if prompt == "plan"));
        assert!(engine.requests().is_empty());
        assert!(!fx.temp.path().join("plan.json").exists());
    }

    #[test]
    fn render_failure_is_unavailable() {
        let fx = Fixture::new();
        let agent = Agent::new(PromptId::Plan);
        let engine = ScriptedEngine::new([EngineReply::answer("{}")]);
        let result = fx.run(&agent, &engine, &context! { not_spec => "{}" });
        assert!(matches!(result, AgentResult::Unavailable { .. }));
    }

    #[test]
    fn embedded_tool_calls_run_in_order() {
        let fx = Fixture::new();
        let agent = Agent::new(PromptId::Implementer);
        let answer = json!({"tool_calls": [
            {"tool_name": "write_file_tool", "args": {"path": "adder.py", "content": "def add(a, b):\n    return a + b\n"}},
            {"tool_name": "teleport_tool", "args": {}},
            {"tool_name": "write_file_tool", "args": {"path": "tests/test_adder.py", "content": "import adder\n"}}
        ]});
        let engine = ScriptedEngine::new([EngineReply::answer(answer.to_string())]);
        let args = context! {
            spec => "", plan => "", code_map => "", api_schema => "", critic_feedback => "",
            user_feedback => "",
        };
        let result = fx.run(&agent, &engine, &args);
        assert_eq!(result, AgentResult::Parsed(answer));
        assert!(fx.temp.path().join("adder.py").exists());
        assert!(fx.temp.path().join("tests/test_adder.py").exists());
        assert!(
            fx.operator
                .shown()
                .iter()
                .any(|line| line == "Error: Tool 'teleport_tool' not found.")
        );
    }

    /// Verifies a turn-limit overrun becomes a failure record instead of an error.
    #[test]
    fn turn_limit_becomes_failure_record() {
        let fx = Fixture::new();
        let agent = Agent::new(PromptId::Tester).with_output(fx.temp.path().join("test_report.json"));
        let looping = || EngineReply {
            content: String::new(),
            tool_calls: vec![crate::test_support::tool_call(
                "c",
                "load_schema_tool",
                json!({}),
            )],
        };
        let engine = ScriptedEngine::new([looping(), looping(), looping(), looping()]);
        let result = fx.run(&agent, &engine, &context! { spec => "{}" });
        let AgentResult::Failed(record) = result else {
            panic!("expected failure");
        };
        assert!(record.error.contains("turn limit"));
        assert!(fx.read_json("test_report.json").get("error").is_some());
    }
}
