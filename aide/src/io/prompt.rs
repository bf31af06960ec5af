//! Prompt library: built-in templates, materialization, and rendering.
//!
//! Templates live in the working root under `.aide/prompts/<id>.md` so an
//! operator can edit them between runs. Built-ins are written there only when
//! the file is missing.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

const ROUTER_TEMPLATE: &str = include_str!("prompts/router.md");
const SPEC_TEMPLATE: &str = include_str!("prompts/spec.md");
const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const RESEARCH_TEMPLATE: &str = include_str!("prompts/research.md");
const IMPLEMENTER_TEMPLATE: &str = include_str!("prompts/implementer.md");
const DEBUG_IMPLEMENTER_TEMPLATE: &str = include_str!("prompts/debug_implementer.md");
const REFACTOR_IMPLEMENTER_TEMPLATE: &str = include_str!("prompts/refactor_implementer.md");
const TESTER_TEMPLATE: &str = include_str!("prompts/tester.md");
const CRITIC_TEMPLATE: &str = include_str!("prompts/critic.md");
const PERFORMANCE_TEMPLATE: &str = include_str!("prompts/performance.md");

const ROUTER_SCHEMA: &str = include_str!("../../schemas/router_output.schema.json");
const CRITIC_SCHEMA: &str = include_str!("../../schemas/critic_output.schema.json");

/// Identity of a prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptId {
    Router,
    Spec,
    Plan,
    Research,
    Implementer,
    DebugImplementer,
    RefactorImplementer,
    Tester,
    Critic,
    Performance,
}

impl PromptId {
    pub const ALL: [PromptId; 10] = [
        PromptId::Router,
        PromptId::Spec,
        PromptId::Plan,
        PromptId::Research,
        PromptId::Implementer,
        PromptId::DebugImplementer,
        PromptId::RefactorImplementer,
        PromptId::Tester,
        PromptId::Critic,
        PromptId::Performance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PromptId::Router => "router",
            PromptId::Spec => "spec",
            PromptId::Plan => "plan",
            PromptId::Research => "research",
            PromptId::Implementer => "implementer",
            PromptId::DebugImplementer => "debug_implementer",
            PromptId::RefactorImplementer => "refactor_implementer",
            PromptId::Tester => "tester",
            PromptId::Critic => "critic",
            PromptId::Performance => "performance",
        }
    }

    pub fn builtin_template(self) -> &'static str {
        match self {
            PromptId::Router => ROUTER_TEMPLATE,
            PromptId::Spec => SPEC_TEMPLATE,
            PromptId::Plan => PLAN_TEMPLATE,
            PromptId::Research => RESEARCH_TEMPLATE,
            PromptId::Implementer => IMPLEMENTER_TEMPLATE,
            PromptId::DebugImplementer => DEBUG_IMPLEMENTER_TEMPLATE,
            PromptId::RefactorImplementer => REFACTOR_IMPLEMENTER_TEMPLATE,
            PromptId::Tester => TESTER_TEMPLATE,
            PromptId::Critic => CRITIC_TEMPLATE,
            PromptId::Performance => PERFORMANCE_TEMPLATE,
        }
    }

    /// JSON Schema the parsed answer must satisfy, if the prompt declares one.
    pub fn result_schema(self) -> Option<Value> {
        let raw = match self {
            PromptId::Router => ROUTER_SCHEMA,
            PromptId::Critic => CRITIC_SCHEMA,
            _ => return None,
        };
        serde_json::from_str(raw).ok()
    }

    /// Canonicalise an answer before schema validation.
    ///
    /// Critic severities are matched case-insensitively, so they are lowercased.
    pub fn canonicalize_answer(self, answer: &mut Value) {
        if self != PromptId::Critic {
            return;
        }
        let Some(items) = answer.as_array_mut() else {
            return;
        };
        for item in items {
            if let Some(severity) = item.get_mut("severity")
                && let Some(text) = severity.as_str()
            {
                *severity = Value::String(text.trim().to_ascii_lowercase());
            }
        }
    }

    /// Location of the template under the working root.
    pub fn path(self, root: &Path) -> PathBuf {
        prompts_dir(root).join(format!("{}.md", self.as_str()))
    }
}

pub fn prompts_dir(root: &Path) -> PathBuf {
    root.join(".aide").join("prompts")
}

/// Write every built-in template that is not already present under `root`.
///
/// Existing files are left untouched. Returns the paths that were created.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn materialize(root: &Path) -> Result<Vec<PathBuf>> {
    let dir = prompts_dir(root);
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let mut created = Vec::new();
    for id in PromptId::ALL {
        let path = id.path(root);
        if path.exists() {
            continue;
        }
        fs::write(&path, id.builtin_template())
            .with_context(|| format!("write prompt {}", path.display()))?;
        created.push(path);
    }
    debug!(created = created.len(), "prompt templates materialized");
    Ok(created)
}

/// Load the template for `id` from `root` and render it with `args`.
///
/// Rendering is strict: a placeholder without a matching argument is an error.
pub fn load_and_render<S: Serialize>(root: &Path, id: PromptId, args: &S) -> Result<String> {
    let path = id.path(root);
    let template =
        fs::read_to_string(&path).with_context(|| format!("read prompt {}", path.display()))?;
    render(&template, args).with_context(|| format!("render prompt {}", path.display()))
}

pub fn render<S: Serialize>(template: &str, args: &S) -> Result<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    let rendered = env.render_str(template, args)?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;
    use serde_json::json;

    #[test]
    fn materialize_keeps_operator_edits() {
        let temp = tempfile::tempdir().expect("tempdir");
        let edited = PromptId::Spec.path(temp.path());
        fs::create_dir_all(edited.parent().expect("parent")).expect("mkdir");
        fs::write(&edited, "custom {{ user_input }}").expect("write");

        let created = materialize(temp.path()).expect("materialize");
        assert_eq!(created.len(), PromptId::ALL.len() - 1);
        assert_eq!(
            fs::read_to_string(&edited).expect("read"),
            "custom {{ user_input }}"
        );
        assert!(materialize(temp.path()).expect("second").is_empty());
    }

    #[test]
    fn render_substitutes_arguments() {
        let temp = tempfile::tempdir().expect("tempdir");
        materialize(temp.path()).expect("materialize");
        let rendered = load_and_render(
            temp.path(),
            PromptId::Router,
            &context! { user_input => "add two numbers" },
        )
        .expect("render");
        assert!(rendered.contains("add two numbers"));
        assert!(rendered.contains("\"policy\""));
    }

    /// Verifies an unknown placeholder fails rendering instead of rendering empty.
    #[test]
    fn render_is_strict_about_placeholders() {
        let err = render("{{ missing }}", &context! { other => 1 }).expect_err("strict");
        assert!(err.to_string().to_lowercase().contains("undefined"));
    }

    #[test]
    fn missing_template_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load_and_render(temp.path(), PromptId::Plan, &context! { spec => "{}" }).is_err());
    }

    #[test]
    fn every_builtin_renders_with_its_arguments() {
        let full = context! {
            user_input => "r", spec => "{}", plan => "{}", code_map => "{}",
            api_schema => "{}", critic_feedback => "[]", user_feedback => "",
            test_report => "{}", performance_report => "{}", code => "",
        };
        for id in PromptId::ALL {
            render(id.builtin_template(), &full)
                .unwrap_or_else(|err| panic!("{} failed: {err:#}", id.as_str()));
        }
    }

    #[test]
    fn declared_schemas_parse() {
        assert!(PromptId::Router.result_schema().is_some());
        assert!(PromptId::Critic.result_schema().is_some());
        assert!(PromptId::Tester.result_schema().is_none());
    }

    #[test]
    fn critic_severities_are_lowercased() {
        let mut answer = json!([
            {"description": "a", "severity": "Major"},
            {"description": "b", "severity": " CRITICAL"},
            {"description": "c"}
        ]);
        PromptId::Critic.canonicalize_answer(&mut answer);
        assert_eq!(answer[0]["severity"], json!("major"));
        assert_eq!(answer[1]["severity"], json!("critical"));
        assert_eq!(answer[2].get("severity"), None);

        let mut router = json!({"policy": "Debug", "severity": "Major"});
        PromptId::Router.canonicalize_answer(&mut router);
        assert_eq!(router["severity"], json!("Major"));
    }
}
