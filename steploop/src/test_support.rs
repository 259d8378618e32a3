//! Test-only helpers: event builders, a scripted runtime, and scratch workspaces.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tempfile::TempDir;

use crate::core::event::{Action, CommandOutput, Event, Observation};
use crate::io::config::{LoopConfig, write_config};
use crate::io::runtime::Runtime;

/// `run` action event with the default timeout.
pub fn run(command: &str) -> Event {
    Event::from(Action::run(command))
}

/// Successful command output without a pid.
pub fn output(command: &str, content: &str) -> Observation {
    output_with(command, content, 0, None)
}

pub fn output_with(command: &str, content: &str, exit_code: i32, pid: Option<u32>) -> Observation {
    Observation::Run(CommandOutput {
        content: content.to_string(),
        command: command.to_string(),
        exit_code,
        pid,
    })
}

pub fn error(content: &str) -> Observation {
    Observation::error(content)
}

pub fn agent_message(content: &str) -> Event {
    Event::from(Action::message(content))
}

pub fn user_message(content: &str) -> Event {
    Event::from(Action::user_message(content))
}

pub fn condensation() -> Event {
    Event::from(Observation::Condensation)
}

/// Flatten `pairs` into `[action, observation, ...]`, repeated `times`.
pub fn repeat_pairs(pairs: &[(Event, Observation)], times: usize) -> Vec<Event> {
    let mut events = Vec::with_capacity(pairs.len() * 2 * times);
    for _ in 0..times {
        for (action, observation) in pairs {
            events.push(action.clone());
            events.push(Event::from(observation.clone()));
        }
    }
    events
}

/// Runtime that never spawns processes.
///
/// Queued observations are returned first, in order. Afterwards `run` actions
/// answer `"ran <command>"` with exit code 0, and every other action gets the
/// same null observation a real runtime would produce.
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    queued: Mutex<VecDeque<Observation>>,
    calls: Mutex<Vec<Action>>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observations(observations: impl IntoIterator<Item = Observation>) -> Self {
        Self {
            queued: Mutex::new(observations.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Actions executed so far, oldest first.
    pub fn calls(&self) -> Vec<Action> {
        lock(&self.calls).clone()
    }
}

impl Runtime for ScriptedRuntime {
    fn execute(&self, action: &Action) -> Observation {
        lock(&self.calls).push(action.clone());
        if let Some(observation) = lock(&self.queued).pop_front() {
            return observation;
        }
        match action {
            Action::Run(run) => output(&run.command, &format!("ran {}", run.command)),
            other => Observation::null(format!("action '{}' is not executable", other.kind())),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scratch directory that is removed on drop.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write a replay script and return its path.
    pub fn write_script(&self, name: &str, actions: &[Action]) -> PathBuf {
        let path = self.join(name);
        let buf = serde_json::to_string_pretty(actions).expect("serialize script");
        fs::write(&path, buf).expect("write script");
        path
    }

    /// Write a history file and return its path.
    pub fn write_history(&self, name: &str, events: &[Event]) -> PathBuf {
        let path = self.join(name);
        let buf = serde_json::to_string_pretty(events).expect("serialize history");
        fs::write(&path, buf).expect("write history");
        path
    }

    pub fn write_config(&self, name: &str, cfg: &LoopConfig) -> PathBuf {
        let path = self.join(name);
        write_config(&path, cfg).expect("write config");
        path
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}
