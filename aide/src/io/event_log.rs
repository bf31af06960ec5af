//! Append-only product event log (`aide_log.jsonl`).
//!
//! Each line is `{timestamp, event_type, details}` with a UTC ISO-8601
//! timestamp. The log is written regardless of `RUST_LOG`; a failed write is a
//! warning and never stops the run.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

pub const EVENT_LOG_FILE: &str = "aide_log.jsonl";

#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    timestamp: String,
    event_type: &'a str,
    details: &'a Value,
}

/// Handle to the event log of one working root.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn in_root(root: &Path) -> Self {
        Self::new(root.join(EVENT_LOG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. Failures are logged, not returned.
    pub fn record(&self, event_type: &str, details: Value) {
        if let Err(err) = self.try_record(event_type, &details) {
            warn!(path = %self.path.display(), event_type, err = %format!("{err:#}"), "failed to append event");
        }
    }

    fn try_record(&self, event_type: &str, details: &Value) -> Result<()> {
        let record = EventRecord {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            event_type,
            details,
        };
        let mut line = serde_json::to_string(&record).context("serialize event")?;
        line.push('\n');

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", self.path.display()))?;
        Ok(())
    }
}
