//! Scheduler configuration stored in `simrun.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Run configuration (TOML).
///
/// Edited by humans; missing fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum number of simulation processes running at once.
    pub max_concurrency: usize,

    /// Seconds between the graceful stop signal and the forced kill.
    pub escalate_after_secs: u64,

    pub tool: ToolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    /// Program and leading arguments. The job specification path and the
    /// result path are appended to this list.
    pub command: Vec<String>,

    /// Extra environment for every invocation.
    pub env: BTreeMap<String, String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "python3".to_string(),
                "-u".to_string(),
                "run_simulation.py".to_string(),
            ],
            env: BTreeMap::from([
                ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
                ("PYTHONFAULTHANDLER".to_string(), "1".to_string()),
            ]),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            escalate_after_secs: 5,
            tool: ToolConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(anyhow!("max_concurrency must be > 0"));
        }
        if self.escalate_after_secs == 0 {
            return Err(anyhow!("escalate_after_secs must be > 0"));
        }
        if self.tool.command.is_empty() || self.tool.command[0].trim().is_empty() {
            return Err(anyhow!("tool.command must be a non-empty array"));
        }
        if let Some(key) = self
            .tool
            .env
            .keys()
            .find(|key| key.is_empty() || key.contains('='))
        {
            return Err(anyhow!("tool.env has invalid variable name '{key}'"));
        }
        Ok(())
    }

    pub fn escalate_after(&self) -> Duration {
        Duration::from_secs(self.escalate_after_secs)
    }

    /// Apply command-line overrides and re-validate.
    pub fn with_overrides(
        mut self,
        max_concurrency: Option<usize>,
        escalate_after_secs: Option<u64>,
    ) -> Result<Self> {
        if let Some(max_concurrency) = max_concurrency {
            self.max_concurrency = max_concurrency;
        }
        if let Some(secs) = escalate_after_secs {
            self.escalate_after_secs = secs;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        let cfg = RunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
