//! Tiered approval of shell commands.
//!
//! A command runs without prompting when it is recorded as `always` in the
//! durable store (`aide_config.json`) or when it was approved for the session
//! earlier in this process. Otherwise the operator chooses `once`, `session`,
//! `always` (or `y`/`yes`), and anything else denies it.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument};

use crate::io::event_log::EventLog;
use crate::io::fs_atomic::write_json_atomic;
use crate::io::operator::{Operator, normalize_answer};

pub const APPROVAL_STORE_FILE: &str = "aide_config.json";
pub const DENIED_MESSAGE: &str = "Command execution denied by user.";
const ALWAYS: &str = "always";

/// On-disk shape of `aide_config.json`. Unknown top-level keys survive rewrites.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    approved_commands: BTreeMap<String, String>,
    #[serde(flatten)]
    other: Map<String, Value>,
}

/// Durable approvals, reread on every lookup so edits from other runs are seen.
#[derive(Debug, Clone)]
pub struct ApprovalStore {
    path: PathBuf,
}

impl ApprovalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join(APPROVAL_STORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_always(&self, command: &str) -> Result<bool> {
        let file = self.load()?;
        Ok(file
            .approved_commands
            .get(command)
            .is_some_and(|decision| decision == ALWAYS))
    }

    /// Record `command` as `always` and persist immediately.
    pub fn record_always(&self, command: &str) -> Result<()> {
        let mut file = self.load()?;
        file.approved_commands
            .insert(command.to_string(), ALWAYS.to_string());
        write_json_atomic(&self.path, &file)
    }

    /// Commands recorded as `always`, sorted.
    pub fn always_commands(&self) -> Result<Vec<String>> {
        let file = self.load()?;
        Ok(file
            .approved_commands
            .into_iter()
            .filter(|(_, decision)| decision == ALWAYS)
            .map(|(command, _)| command)
            .collect())
    }

    fn load(&self) -> Result<StoreFile> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(StoreFile::default());
        }
        serde_json::from_str(&contents).with_context(|| format!("parse {}", self.path.display()))
    }
}

/// Operator's answer to an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consent {
    Once,
    Session,
    Always,
    Denied,
}

impl Consent {
    pub fn parse(answer: &str) -> Self {
        match normalize_answer(answer).as_str() {
            "always" => Consent::Always,
            "session" => Consent::Session,
            "once" | "y" | "yes" => Consent::Once,
            _ => Consent::Denied,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Consent::Once => "once",
            Consent::Session => "session",
            Consent::Always => "always",
            Consent::Denied => "denied",
        }
    }
}

/// How a gated command was cleared to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clearance {
    Durable,
    Session,
    Granted(Consent),
}

/// Approval context threaded through every gated call.
#[derive(Debug)]
pub struct ApprovalGate {
    store: ApprovalStore,
    session: Mutex<HashSet<String>>,
    events: Option<EventLog>,
}

impl ApprovalGate {
    /// New gate with an empty session set.
    pub fn new(store: ApprovalStore) -> Self {
        Self {
            store,
            session: Mutex::new(HashSet::new()),
            events: None,
        }
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &ApprovalStore {
        &self.store
    }

    pub fn session_contains(&self, command: &str) -> bool {
        self.session_set().contains(command)
    }

    /// Decide whether `command` may run, prompting the operator if needed.
    ///
    /// Returns `None` when the operator denied it. A denial changes neither tier.
    #[instrument(skip_all, fields(command = %command))]
    pub fn clear(&self, command: &str, operator: &dyn Operator) -> Result<Option<Clearance>> {
        if self.store.is_always(command)? {
            debug!("command pre-approved");
            operator.show(&format!("Executing pre-approved command: {command}"));
            return Ok(Some(Clearance::Durable));
        }
        if self.session_contains(command) {
            debug!("command session-approved");
            operator.show(&format!("Executing session-approved command: {command}"));
            return Ok(Some(Clearance::Session));
        }

        operator.show(&format!("Execution approval required for command: {command}"));
        let answer = operator.ask("Approve execution? (y/n, or: once, session, always)")?;
        let consent = Consent::parse(&answer);
        info!(consent = consent.as_str(), "command approval answered");
        if let Some(events) = &self.events {
            events.record(
                "command_approval",
                json!({"command": command, "decision": consent.as_str()}),
            );
        }

        match consent {
            Consent::Always => {
                self.store.record_always(command)?;
                self.session_set().insert(command.to_string());
            }
            Consent::Session => {
                self.session_set().insert(command.to_string());
            }
            Consent::Once => {}
            Consent::Denied => return Ok(None),
        }
        Ok(Some(Clearance::Granted(consent)))
    }

    /// Run `exec` if `command` is cleared; otherwise return the fixed denial text.
    pub fn run_gated<F>(&self, command: &str, operator: &dyn Operator, exec: F) -> Result<String>
    where
        F: FnOnce() -> Result<String>,
    {
        match self.clear(command, operator)? {
            Some(_) => exec(),
            None => Ok(DENIED_MESSAGE.to_string()),
        }
    }

    fn session_set(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
