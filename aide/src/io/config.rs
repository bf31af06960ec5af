//! Aide configuration stored under `.aide/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::fs_atomic::write_atomic;

/// Aide configuration (TOML).
///
/// Edited by humans; every field has a default so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AideConfig {
    /// Iteration budget for the implement/test/review loop.
    pub max_iterations: u32,

    /// Reasoning calls allowed per agent turn. `0` disables the cap.
    pub max_turns: u32,

    /// Wall-clock limit for a single gated shell command.
    pub command_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Command that answers reasoning requests (e.g. `["aide-engine"]`).
    pub command: Vec<String>,

    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: vec!["aide-engine".to_string()],
            timeout_secs: 600,
        }
    }
}

impl Default for AideConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_turns: 25,
            command_timeout_secs: 300,
            output_limit_bytes: 100_000,
            engine: EngineConfig::default(),
        }
    }
}

impl AideConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.engine.timeout_secs == 0 {
            return Err(anyhow!("engine.timeout_secs must be > 0"));
        }
        if self.engine.command.is_empty() || self.engine.command[0].trim().is_empty() {
            return Err(anyhow!("engine.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.timeout_secs)
    }

    /// Turn cap for the turn loop, `None` when unbounded.
    pub fn turn_limit(&self) -> Option<u32> {
        (self.max_turns > 0).then_some(self.max_turns)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AideConfig::default()`.
pub fn load_config(path: &Path) -> Result<AideConfig> {
    if !path.exists() {
        let cfg = AideConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AideConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk.
pub fn write_config(path: &Path, cfg: &AideConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
