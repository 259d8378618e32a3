//! Event vocabulary shared by every component of the loop.
//!
//! Events come in two closed families: [`Action`]s chosen by the agent (or
//! typed by a user) and [`Observation`]s produced by the environment. Both are
//! plain data; constructing one never performs I/O.
//!
//! The JSON form tags actions with `"action"` and observations with
//! `"observation"`, so a mixed history deserializes without an outer wrapper.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Timeout applied to a command when the action does not specify one.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// String-keyed JSON mapping used for delegation inputs and outputs.
pub type Mapping = Map<String, Value>;

/// Who produced an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    #[default]
    Agent,
    User,
}

/// A shell command the agent wants to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRun {
    pub command: String,
    /// Wall-clock limit in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

impl CommandRun {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = timeout_secs;
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Agent-initiated intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Free-text message. User messages reset stuck tracking in interactive sessions.
    Message {
        content: String,
        #[serde(default)]
        source: EventSource,
    },
    /// Run a shell command.
    Run(CommandRun),
    /// End the session. Never executed.
    Finish,
    /// Route to a named sub-workflow. Never executed directly.
    Delegate {
        agent_name: String,
        #[serde(default)]
        inputs: Mapping,
    },
    /// No-op placeholder, ignored by stuck detection.
    Null,
}

impl Action {
    pub fn message(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
            source: EventSource::Agent,
        }
    }

    pub fn user_message(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
            source: EventSource::User,
        }
    }

    pub fn run(command: impl Into<String>) -> Self {
        Self::Run(CommandRun::new(command))
    }

    pub fn delegate(agent_name: impl Into<String>, inputs: Mapping) -> Self {
        Self::Delegate {
            agent_name: agent_name.into(),
            inputs,
        }
    }

    /// Stable kind tag, identical to the serialized `"action"` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Run(_) => "run",
            Self::Finish => "finish",
            Self::Delegate { .. } => "delegate",
            Self::Null => "null",
        }
    }

    pub fn source(&self) -> EventSource {
        match self {
            Self::Message { source, .. } => *source,
            _ => EventSource::Agent,
        }
    }

    pub fn is_user_message(&self) -> bool {
        matches!(
            self,
            Self::Message {
                source: EventSource::User,
                ..
            }
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message { content, source } => {
                write!(f, "message[{}]({content})", source_str(*source))
            }
            Self::Run(run) => write!(f, "run({})", run.command),
            Self::Finish => f.write_str("finish"),
            Self::Delegate { agent_name, .. } => write!(f, "delegate({agent_name})"),
            Self::Null => f.write_str("null"),
        }
    }
}

fn source_str(source: EventSource) -> &'static str {
    match source {
        EventSource::Agent => "agent",
        EventSource::User => "user",
    }
}

/// Result of running a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Combined stdout followed by stderr.
    pub content: String,
    pub command: String,
    #[serde(default)]
    pub exit_code: i32,
    /// Process id, for diagnostics only. Never part of semantic equality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Result of an action or external input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "observation", rename_all = "snake_case")]
pub enum Observation {
    Run(CommandOutput),
    Error {
        content: String,
    },
    /// Output mapping returned by a delegated sub-workflow.
    Delegate {
        outputs: Mapping,
    },
    /// Marker that the history was summarized or trimmed.
    Condensation,
    Null {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        content: String,
    },
}

impl Observation {
    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    pub fn null(content: impl Into<String>) -> Self {
        Self::Null {
            content: content.into(),
        }
    }

    /// Stable kind tag, identical to the serialized `"observation"` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Run(_) => "run",
            Self::Error { .. } => "error",
            Self::Delegate { .. } => "delegate",
            Self::Condensation => "condensation",
            Self::Null { .. } => "null",
        }
    }
}

/// One history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Event {
    Action(Action),
    Observation(Observation),
}

impl Event {
    pub fn source(&self) -> EventSource {
        match self {
            Self::Action(action) => action.source(),
            Self::Observation(_) => EventSource::Agent,
        }
    }

    pub fn as_action(&self) -> Option<&Action> {
        match self {
            Self::Action(action) => Some(action),
            Self::Observation(_) => None,
        }
    }

    pub fn as_observation(&self) -> Option<&Observation> {
        match self {
            Self::Observation(observation) => Some(observation),
            Self::Action(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(
            self,
            Self::Action(Action::Null) | Self::Observation(Observation::Null { .. })
        )
    }

    pub fn is_user_message(&self) -> bool {
        self.as_action().is_some_and(Action::is_user_message)
    }
}

impl From<Action> for Event {
    fn from(action: Action) -> Self {
        Self::Action(action)
    }
}

impl From<Observation> for Event {
    fn from(observation: Observation) -> Self {
        Self::Observation(observation)
    }
}
