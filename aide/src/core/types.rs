//! Shared deterministic types for the aide control plane.
//!
//! These types define stable contracts between the workflow engine, the steps,
//! and the persisted artifacts. They must not depend on I/O.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque structured artifact produced or consumed by a step (spec, plan, ...).
pub type Document = Value;

/// Classification of the operator's request that selects the workflow path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    Implement,
    Research,
    Debug,
    Refactor,
    Exit,
    Clarify,
}

impl Policy {
    pub fn as_str(self) -> &'static str {
        match self {
            Policy::Implement => "implement",
            Policy::Research => "research",
            Policy::Debug => "debug",
            Policy::Refactor => "refactor",
            Policy::Exit => "exit",
            Policy::Clarify => "clarify",
        }
    }

    /// Parse a router answer. Unknown or missing values fall back to `implement`.
    pub fn from_answer(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("research") => Policy::Research,
            Some("debug") => Policy::Debug,
            Some("refactor") => Policy::Refactor,
            Some("exit") => Policy::Exit,
            Some("clarify") => Policy::Clarify,
            _ => Policy::Implement,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a critic finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "critical" => Some(Severity::Critical),
            "major" => Some(Severity::Major),
            "minor" => Some(Severity::Minor),
            _ => None,
        }
    }
}

/// A single critic finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub description: String,
    pub severity: Severity,
}

impl FeedbackItem {
    pub fn new(description: impl Into<String>, severity: Severity) -> Self {
        Self {
            description: description.into(),
            severity,
        }
    }
}

/// Failure record written in place of an artifact when an agent answer cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub error: String,
    pub summary: String,
    pub raw_output: String,
}

pub const AGENT_FAILURE_SUMMARY: &str = "Agent failed due to error.";

impl FailureRecord {
    pub fn new(error: impl Into<String>, raw_output: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            summary: AGENT_FAILURE_SUMMARY.to_string(),
            raw_output: raw_output.into(),
        }
    }

    pub fn to_document(&self) -> Document {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Result of a single agent invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentResult {
    /// The final answer parsed as structured data.
    Parsed(Document),
    /// The answer could not be used; the record was persisted in the artifact slot.
    Failed(FailureRecord),
    /// The prompt template could not be loaded or rendered; nothing was produced.
    Unavailable { prompt: String, reason: String },
}

impl AgentResult {
    /// The artifact this invocation produced, if any. Failures yield their record.
    pub fn into_document(self) -> Option<Document> {
        match self {
            AgentResult::Parsed(doc) => Some(doc),
            AgentResult::Failed(record) => Some(record.to_document()),
            AgentResult::Unavailable { .. } => None,
        }
    }

    pub fn parsed(&self) -> Option<&Document> {
        match self {
            AgentResult::Parsed(doc) => Some(doc),
            _ => None,
        }
    }
}
