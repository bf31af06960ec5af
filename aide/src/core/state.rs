//! Run state record and the typed patches steps use to update it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::types::{Document, FeedbackItem, Policy};

/// The single mutable record shared by every step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub user_request: String,
    pub root_path: PathBuf,
    pub policy: Option<Policy>,
    pub spec: Option<Document>,
    pub plan: Option<Document>,
    pub code_map: Option<Document>,
    pub api_schema: Option<Document>,
    pub test_report: Option<Document>,
    pub performance_report: Option<Document>,
    /// `None` means "not yet computed"; `Some(vec![])` is the convergence signal.
    pub critic_feedback: Option<Vec<FeedbackItem>>,
    pub user_feedback_queue: Vec<String>,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub run_performance_test: bool,
    pub final_summary: Option<String>,
}

impl RunState {
    pub fn new(
        user_request: impl Into<String>,
        root_path: impl Into<PathBuf>,
        max_iterations: u32,
        run_performance_test: bool,
    ) -> Self {
        Self {
            user_request: user_request.into(),
            root_path: root_path.into(),
            policy: None,
            spec: None,
            plan: None,
            code_map: None,
            api_schema: None,
            test_report: None,
            performance_report: None,
            critic_feedback: None,
            user_feedback_queue: Vec::new(),
            iteration_count: 0,
            max_iterations,
            run_performance_test,
            final_summary: None,
        }
    }

    /// Policy chosen by the router, `implement` until the router has run.
    pub fn policy(&self) -> Policy {
        self.policy.unwrap_or(Policy::Implement)
    }

    pub fn iterations_exhausted(&self) -> bool {
        self.iteration_count >= self.max_iterations
    }

    /// True only when the critic has run and reported nothing left to address.
    pub fn feedback_converged(&self) -> bool {
        matches!(&self.critic_feedback, Some(items) if items.is_empty())
    }

    /// Merge a patch into the state. Fields the patch does not mention are kept.
    pub fn apply(&mut self, patch: StatePatch) {
        if let Some(policy) = patch.policy {
            self.policy = Some(policy);
        }
        patch.spec.apply_to(&mut self.spec);
        patch.plan.apply_to(&mut self.plan);
        patch.code_map.apply_to(&mut self.code_map);
        patch.api_schema.apply_to(&mut self.api_schema);
        patch.test_report.apply_to(&mut self.test_report);
        patch.performance_report.apply_to(&mut self.performance_report);
        patch.critic_feedback.apply_to(&mut self.critic_feedback);
        self.user_feedback_queue
            .extend(patch.append_user_feedback);
        if let Some(count) = patch.iteration_count {
            self.iteration_count = count;
        }
        if let Some(summary) = patch.final_summary {
            self.final_summary = Some(summary);
        }
    }
}

/// Update to a single optional field.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Slot<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> Slot<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Slot::Keep)
    }

    fn apply_to(self, field: &mut Option<T>) {
        match self {
            Slot::Keep => {}
            Slot::Set(value) => *field = Some(value),
            Slot::Clear => *field = None,
        }
    }

    /// Keep `self` unless it leaves the field untouched, in which case take `other`.
    fn or(self, other: Slot<T>) -> Slot<T> {
        if self.is_keep() { other } else { self }
    }
}

impl<T> From<Option<T>> for Slot<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Slot::Set(value),
            None => Slot::Keep,
        }
    }
}

/// Partial update returned by a step. Only declared fields can be touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub policy: Option<Policy>,
    pub spec: Slot<Document>,
    pub plan: Slot<Document>,
    pub code_map: Slot<Document>,
    pub api_schema: Slot<Document>,
    pub test_report: Slot<Document>,
    pub performance_report: Slot<Document>,
    pub critic_feedback: Slot<Vec<FeedbackItem>>,
    /// Notes appended to the user feedback queue; the queue is never cleared.
    pub append_user_feedback: Vec<String>,
    pub iteration_count: Option<u32>,
    pub final_summary: Option<String>,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        *self == StatePatch::default()
    }

    /// Combine two branch patches. Fields set by `self` win over `other`.
    pub fn merge_preferring(self, other: StatePatch) -> StatePatch {
        let mut append_user_feedback = self.append_user_feedback;
        append_user_feedback.extend(other.append_user_feedback);
        StatePatch {
            policy: self.policy.or(other.policy),
            spec: self.spec.or(other.spec),
            plan: self.plan.or(other.plan),
            code_map: self.code_map.or(other.code_map),
            api_schema: self.api_schema.or(other.api_schema),
            test_report: self.test_report.or(other.test_report),
            performance_report: self.performance_report.or(other.performance_report),
            critic_feedback: self.critic_feedback.or(other.critic_feedback),
            append_user_feedback,
            iteration_count: self.iteration_count.or(other.iteration_count),
            final_summary: self.final_summary.or(other.final_summary),
        }
    }

    /// Names of the fields this patch touches, for logging.
    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.policy.is_some() {
            fields.push("policy");
        }
        let slots = [
            ("spec", self.spec.is_keep()),
            ("plan", self.plan.is_keep()),
            ("code_map", self.code_map.is_keep()),
            ("api_schema", self.api_schema.is_keep()),
            ("test_report", self.test_report.is_keep()),
            ("performance_report", self.performance_report.is_keep()),
            ("critic_feedback", self.critic_feedback.is_keep()),
        ];
        fields.extend(slots.iter().filter(|(_, keep)| !keep).map(|(name, _)| *name));
        if !self.append_user_feedback.is_empty() {
            fields.push("user_feedback_queue");
        }
        if self.iteration_count.is_some() {
            fields.push("iteration_count");
        }
        if self.final_summary.is_some() {
            fields.push("final_summary");
        }
        fields
    }
}
