//! Loop configuration stored as TOML (default `steploop.toml`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::event::DEFAULT_COMMAND_TIMEOUT_SECS;
use crate::core::stuck::StuckThresholds;
use crate::io::runtime::DEFAULT_OUTPUT_LIMIT_BYTES;

/// Loop configuration (TOML).
///
/// Missing fields fall back to the defaults below, so an empty file is a
/// valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Non-interactive mode: stuck detection looks at the whole history.
    pub headless: bool,

    /// Upper bound on steps taken by one `run`/`resume` invocation.
    pub max_steps: u32,

    /// Truncate command stdout/stderr beyond this many bytes per stream.
    pub output_limit_bytes: usize,

    pub stuck: StuckThresholds,

    pub agent: AgentConfig,

    /// Sub-workflows reachable through `delegate` actions, keyed by agent name.
    pub delegates: BTreeMap<String, DelegateConfig>,
}

/// External agent process consulted on every `think` step.
///
/// An empty `command` means no agent: the session finishes once its replay
/// script is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 300,
        }
    }
}

/// External command backing a delegated sub-workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DelegateConfig {
    /// Program and arguments (e.g. `["python3","review.py"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for DelegateConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            headless: true,
            max_steps: 100,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            stuck: StuckThresholds::default(),
            agent: AgentConfig::default(),
            delegates: BTreeMap::new(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        self.stuck.validate().map_err(|msg| anyhow!(msg))?;
        if !self.agent.command.is_empty() {
            if self.agent.command[0].trim().is_empty() {
                return Err(anyhow!("agent.command must start with a program"));
            }
            if self.agent.timeout_secs == 0 {
                return Err(anyhow!("agent.timeout_secs must be > 0"));
            }
        }
        for (name, delegate) in &self.delegates {
            if name.trim().is_empty() {
                return Err(anyhow!("delegate names must be non-empty"));
            }
            if delegate.command.is_empty() || delegate.command[0].trim().is_empty() {
                return Err(anyhow!(
                    "delegates.{name}.command must be a non-empty array"
                ));
            }
            if delegate.timeout_secs == 0 {
                return Err(anyhow!("delegates.{name}.timeout_secs must be > 0"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, LoopConfig::default());
        assert!(cfg.headless);
        assert_eq!(cfg.stuck.repeat_window, 4);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("steploop.toml");
        let mut cfg = LoopConfig {
            max_steps: 12,
            ..LoopConfig::default()
        };
        cfg.delegates.insert(
            "reviewer".to_string(),
            DelegateConfig {
                command: vec!["cat".to_string()],
                timeout_secs: 5,
            },
        );
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    /// Verifies partial TOML merges over defaults, including nested tables.
    #[test]
    fn partial_file_merges_with_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("steploop.toml");
        fs::write(
            &path,
            "headless = false\n\n[agent]\ncommand = [\"./agent.py\"]\n\n[stuck]\nerror_window = 5\n\n[delegates.browser]\ncommand = [\"./browse.sh\", \"--json\"]\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert!(!cfg.headless);
        assert_eq!(cfg.max_steps, 100);
        assert_eq!(cfg.stuck.error_window, 5);
        assert_eq!(cfg.stuck.repeat_window, 4);
        assert_eq!(cfg.agent.command, vec!["./agent.py"]);
        assert_eq!(cfg.agent.timeout_secs, 300);
        let browser = cfg.delegates.get("browser").expect("browser delegate");
        assert_eq!(browser.command, vec!["./browse.sh", "--json"]);
        assert_eq!(browser.timeout_secs, DEFAULT_COMMAND_TIMEOUT_SECS);
    }

    #[test]
    fn invalid_thresholds_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("steploop.toml");
        fs::write(&path, "[stuck]\npattern_window = 5\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("pattern_window"));
    }

    #[test]
    fn delegate_without_command_is_rejected() {
        let mut cfg = LoopConfig::default();
        cfg.delegates
            .insert("empty".to_string(), DelegateConfig::default());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("delegates.empty.command"));
    }

    #[test]
    fn zero_max_steps_is_rejected() {
        let cfg = LoopConfig {
            max_steps: 0,
            ..LoopConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
