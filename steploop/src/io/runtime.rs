//! Command runtime: turns a `Run` action into a command-output observation.
//!
//! The [`Runtime`] trait decouples step orchestration from the actual
//! environment. Tests use scripted runtimes that return predetermined
//! observations without spawning processes.

use std::process::Command;

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::core::event::{Action, CommandOutput, CommandRun, Observation};
use crate::io::process::run_command_with_timeout;

/// Default per-stream capture limit for command output.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 100_000;

/// Executes actions against an environment.
///
/// Execution failures are data: implementations return an observation
/// describing the failure instead of an error.
pub trait Runtime {
    fn execute(&self, action: &Action) -> Observation;
}

/// Runtime that runs commands through the platform shell.
#[derive(Debug, Clone)]
pub struct ShellRuntime {
    output_limit_bytes: usize,
}

impl Default for ShellRuntime {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_LIMIT_BYTES)
    }
}

impl ShellRuntime {
    pub fn new(output_limit_bytes: usize) -> Self {
        Self { output_limit_bytes }
    }

    fn run(&self, run: &CommandRun) -> Result<CommandOutput> {
        let output = run_command_with_timeout(
            shell_command(&run.command),
            None,
            run.timeout_duration(),
            self.output_limit_bytes,
        )?;

        let content = if output.timed_out {
            format!(
                "command timed out after {}s\n--- stdout ---\n{}\n--- stderr ---\n{}{}",
                run.timeout,
                output.stdout_lossy(),
                output.stderr_lossy(),
                output.truncated_notice()
            )
        } else {
            let mut content = output.stdout_lossy();
            content.push_str(&output.stderr_lossy());
            content.push_str(&output.truncated_notice());
            content
        };

        Ok(CommandOutput {
            content,
            command: run.command.clone(),
            exit_code: output.exit_code(),
            pid: Some(output.pid),
        })
    }
}

impl Runtime for ShellRuntime {
    #[instrument(skip_all, fields(kind = action.kind()))]
    fn execute(&self, action: &Action) -> Observation {
        let Action::Run(run) = action else {
            debug!("action is not executable");
            return Observation::null(format!("action '{}' is not executable", action.kind()));
        };

        match self.run(run) {
            Ok(output) => {
                debug!(exit_code = output.exit_code, pid = ?output.pid, "command executed");
                Observation::Run(output)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), command = %run.command, "command failed to run");
                Observation::Run(CommandOutput {
                    content: format!("failed to run command: {err:#}"),
                    command: run.command.clone(),
                    exit_code: -1,
                    pid: None,
                })
            }
        }
    }
}

impl<R: Runtime + ?Sized> Runtime for &R {
    fn execute(&self, action: &Action) -> Observation {
        (**self).execute(action)
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::event::CommandRun;
    use crate::core::matching::observations_match;

    fn execute(command: &str) -> CommandOutput {
        match ShellRuntime::default().execute(&Action::run(command)) {
            Observation::Run(output) => output,
            other => panic!("expected command output, got {other:?}"),
        }
    }

    #[test]
    fn concatenates_stdout_then_stderr() {
        let output = execute("echo err >&2; echo out");
        assert_eq!(output.content, "out\nerr\n");
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.command, "echo err >&2; echo out");
        assert!(output.pid.is_some());
    }

    #[test]
    fn reports_nonzero_exit_code() {
        let output = execute("echo nope; exit 7");
        assert_eq!(output.exit_code, 7);
        assert_eq!(output.content, "nope\n");
    }

    #[test]
    fn repeated_runs_match_semantically() {
        let runtime = ShellRuntime::default();
        let first = runtime.execute(&Action::run("echo same"));
        let second = runtime.execute(&Action::run("echo same"));
        assert!(observations_match(&first, &second));
    }

    /// A command sleeping past its timeout is killed: exit code -1, content
    /// marked as timed out, and nothing written after the kill.
    #[test]
    fn timeout_is_reported_as_data() {
        let action = Action::Run(CommandRun::new("echo before; sleep 5; echo after").with_timeout(1));
        let Observation::Run(output) = ShellRuntime::default().execute(&action) else {
            panic!("expected command output");
        };
        assert_eq!(output.exit_code, -1);
        assert!(output.content.starts_with("command timed out after 1s"));
        assert!(output.content.contains("before"));
        assert!(!output.content.contains("after"));
    }

    #[test]
    fn missing_program_is_a_shell_error_not_a_fault() {
        let output = execute("definitely-not-a-real-program-xyz");
        assert_eq!(output.exit_code, 127);
        assert!(output.content.contains("not found"));
    }

    #[test]
    fn non_run_actions_yield_null_observation() {
        let runtime = ShellRuntime::default();
        let obs = runtime.execute(&Action::message("hello"));
        assert_eq!(obs, Observation::null("action 'message' is not executable"));
        let obs = runtime.execute(&Action::Finish);
        assert_eq!(obs, Observation::null("action 'finish' is not executable"));
    }
}
