//! Delegation registry: routes `delegate` actions to named sub-workflows.
//!
//! A sub-workflow receives the action's input mapping and returns an output
//! mapping, which the registry wraps in a delegation observation. Lookup and
//! sub-workflow failures are errors; the step machine treats them as fatal.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::event::{Action, Mapping, Observation};
use crate::io::config::LoopConfig;
use crate::io::process::run_command_with_timeout;

/// A nested runnable that maps inputs to outputs.
pub trait Workflow: Send + Sync {
    fn run(&self, inputs: &Mapping) -> Result<Mapping>;
}

impl<F> Workflow for F
where
    F: Fn(&Mapping) -> Result<Mapping> + Send + Sync,
{
    fn run(&self, inputs: &Mapping) -> Result<Mapping> {
        self(inputs)
    }
}

/// `delegate` action naming an agent the registry does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDelegateError {
    pub agent_name: String,
}

impl fmt::Display for UnknownDelegateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown delegate agent '{}'", self.agent_name)
    }
}

impl Error for UnknownDelegateError {}

/// Sub-workflow that runs an external command.
///
/// Inputs are written to stdin as a JSON object. If stdout is a JSON object it
/// becomes the outputs; otherwise outputs are `{"exit_code", "output"}` with
/// `timed_out: true` added when the command was killed.
#[derive(Debug, Clone)]
pub struct CommandWorkflow {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandWorkflow {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("delegate command must be a non-empty array"));
        }
        Ok(Self {
            argv,
            timeout,
            output_limit_bytes,
        })
    }
}

impl Workflow for CommandWorkflow {
    #[instrument(skip_all, fields(program = %self.argv[0]))]
    fn run(&self, inputs: &Mapping) -> Result<Mapping> {
        let stdin = serde_json::to_vec(inputs).context("serialize delegate inputs")?;
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]);
        let output =
            run_command_with_timeout(cmd, Some(&stdin), self.timeout, self.output_limit_bytes)
                .context("run delegate command")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "delegate command timed out");
        }

        let stdout = output.stdout_lossy();
        if !output.timed_out
            && let Ok(Value::Object(outputs)) = serde_json::from_str::<Value>(stdout.trim())
        {
            debug!(keys = outputs.len(), "delegate returned a json object");
            return Ok(outputs);
        }

        let mut combined = stdout;
        combined.push_str(&output.stderr_lossy());
        combined.push_str(&output.truncated_notice());
        let mut outputs = Mapping::new();
        outputs.insert("exit_code".to_string(), json!(output.exit_code()));
        outputs.insert("output".to_string(), Value::String(combined));
        if output.timed_out {
            outputs.insert("timed_out".to_string(), Value::Bool(true));
        }
        Ok(outputs)
    }
}

/// Static name → sub-workflow table.
#[derive(Default)]
pub struct DelegateRegistry {
    workflows: BTreeMap<String, Box<dyn Workflow>>,
}

impl fmt::Debug for DelegateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateRegistry")
            .field("names", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

impl DelegateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry of [`CommandWorkflow`]s from `[delegates.<name>]` tables.
    pub fn from_config(cfg: &LoopConfig) -> Result<Self> {
        let mut registry = Self::new();
        for (name, delegate) in &cfg.delegates {
            let workflow = CommandWorkflow::new(
                delegate.command.clone(),
                Duration::from_secs(delegate.timeout_secs),
                cfg.output_limit_bytes,
            )
            .with_context(|| format!("delegate '{name}'"))?;
            registry.register(name.clone(), workflow);
        }
        Ok(registry)
    }

    /// Registers `workflow` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, workflow: impl Workflow + 'static) {
        self.workflows.insert(name.into(), Box::new(workflow));
    }

    pub fn with(mut self, name: impl Into<String>, workflow: impl Workflow + 'static) -> Self {
        self.register(name, workflow);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(String::as_str)
    }

    /// Runs the sub-workflow named by a `delegate` action.
    #[instrument(skip_all, fields(agent = tracing::field::Empty))]
    pub fn invoke(&self, action: &Action) -> Result<Observation> {
        let Action::Delegate { agent_name, inputs } = action else {
            return Err(anyhow!(
                "expected a delegate action, got '{}'",
                action.kind()
            ));
        };
        tracing::Span::current().record("agent", agent_name.as_str());

        let workflow = self
            .workflows
            .get(agent_name)
            .ok_or_else(|| UnknownDelegateError {
                agent_name: agent_name.clone(),
            })?;

        info!("invoking delegate");
        let outputs = workflow
            .run(inputs)
            .with_context(|| format!("delegate '{agent_name}' failed"))?;
        debug!(keys = outputs.len(), "delegate finished");
        Ok(Observation::Delegate { outputs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::DelegateConfig;

    fn inputs(value: Value) -> Mapping {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn invokes_registered_closure() {
        let registry = DelegateRegistry::new().with("echo", |inputs: &Mapping| -> Result<Mapping> {
            let mut out = inputs.clone();
            out.insert("seen".to_string(), Value::Bool(true));
            Ok(out)
        });
        let obs = registry
            .invoke(&Action::delegate("echo", inputs(json!({"q": 1}))))
            .expect("invoke");
        assert_eq!(
            obs,
            Observation::Delegate {
                outputs: inputs(json!({"q": 1, "seen": true}))
            }
        );
    }

    #[test]
    fn unknown_agent_is_a_typed_error() {
        let registry = DelegateRegistry::new();
        let err = registry
            .invoke(&Action::delegate("ghost", Mapping::new()))
            .unwrap_err();
        let unknown = err
            .downcast_ref::<UnknownDelegateError>()
            .expect("unknown delegate error");
        assert_eq!(unknown.agent_name, "ghost");
    }

    #[test]
    fn workflow_errors_name_the_agent() {
        let registry = DelegateRegistry::new().with("flaky", |_: &Mapping| -> Result<Mapping> {
            Err(anyhow!("backend down"))
        });
        let err = registry
            .invoke(&Action::delegate("flaky", Mapping::new()))
            .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("delegate 'flaky' failed"));
        assert!(msg.contains("backend down"));
    }

    #[test]
    fn non_delegate_action_is_rejected() {
        let registry = DelegateRegistry::new();
        assert!(registry.invoke(&Action::run("ls")).is_err());
    }

    #[test]
    fn names_are_sorted() {
        let registry = DelegateRegistry::new()
            .with("b", |i: &Mapping| -> Result<Mapping> { Ok(i.clone()) })
            .with("a", |i: &Mapping| -> Result<Mapping> { Ok(i.clone()) });
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(registry.contains("a"));
        assert!(!registry.contains("c"));
    }

    #[cfg(unix)]
    fn sh(script: &str) -> CommandWorkflow {
        CommandWorkflow::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            Duration::from_secs(10),
            10_000,
        )
        .expect("workflow")
    }

    /// Verifies JSON stdout becomes the output mapping and inputs arrive on stdin.
    #[cfg(unix)]
    #[test]
    fn command_workflow_passes_json_through() {
        let outputs = sh("cat").run(&inputs(json!({"x": [1, 2]}))).expect("run");
        assert_eq!(outputs, inputs(json!({"x": [1, 2]})));
    }

    #[cfg(unix)]
    #[test]
    fn command_workflow_wraps_plain_output() {
        let outputs = sh("cat >/dev/null; echo plain; exit 4")
            .run(&Mapping::new())
            .expect("run");
        assert_eq!(outputs, inputs(json!({"exit_code": 4, "output": "plain\n"})));
    }

    #[cfg(unix)]
    #[test]
    fn command_workflow_reports_timeout_as_data() {
        let workflow = CommandWorkflow::new(
            vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string()],
            Duration::from_secs(1),
            1000,
        )
        .expect("workflow");
        let outputs = workflow.run(&Mapping::new()).expect("run");
        assert_eq!(outputs.get("exit_code"), Some(&json!(-1)));
        assert_eq!(outputs.get("timed_out"), Some(&json!(true)));
    }

    #[test]
    fn registry_from_config_registers_every_delegate() {
        let mut cfg = LoopConfig::default();
        cfg.delegates.insert(
            "reviewer".to_string(),
            DelegateConfig {
                command: vec!["cat".to_string()],
                timeout_secs: 5,
            },
        );
        let registry = DelegateRegistry::from_config(&cfg).expect("registry");
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["reviewer"]);
    }
}
