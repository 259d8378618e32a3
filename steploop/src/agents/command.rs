//! Decider backed by an external agent process.
//!
//! Each `think` spawns the configured program, writes the history as a JSON
//! array on stdin, and reads one action object from stdout.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::agents::Decider;
use crate::core::event::Action;
use crate::core::history::History;
use crate::io::process::run_command_with_timeout;
use crate::io::script::parse_action;

/// Runs `argv` once per step.
#[derive(Debug, Clone)]
pub struct CommandDecider {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandDecider {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("agent command must be a non-empty array"));
        }
        Ok(Self {
            argv,
            timeout,
            output_limit_bytes,
        })
    }
}

impl Decider for CommandDecider {
    #[instrument(skip_all, fields(program = %self.argv[0], history_len = history.len()))]
    fn think(&mut self, history: &History) -> Result<Action> {
        let input = serde_json::to_vec(history).context("serialize history")?;
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]);

        info!("asking agent for next action");
        let output = run_command_with_timeout(
            cmd,
            Some(&input),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run agent command")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "agent timed out");
            return Err(anyhow!("agent timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            return Err(anyhow!(
                "agent failed with status {:?}: {}",
                output.status.code(),
                output.stderr_lossy().trim()
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "agent output exceeded {} bytes",
                self.output_limit_bytes
            ));
        }

        let action = parse_action(&output.stdout_lossy()).context("read agent action")?;
        debug!(kind = action.kind(), "agent chose action");
        Ok(action)
    }
}
