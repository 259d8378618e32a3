//! Per-session state and its serializable snapshot form.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::event::Action;
use crate::core::history::History;
use crate::core::machine::Step;
use crate::core::stuck::StuckReason;

/// Why a session ended without finishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminalError {
    Stuck {
        reason: StuckReason,
        message: String,
    },
    Delegation {
        agent_name: String,
        message: String,
    },
}

impl TerminalError {
    pub fn message(&self) -> &str {
        match self {
            Self::Stuck { message, .. } | Self::Delegation { message, .. } => message,
        }
    }
}

/// Everything one session owns. Doubles as the checkpoint/stream snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Opaque identifier supplied by whoever started the session.
    pub session_id: String,
    /// Step to run next, or the terminal step the session ended in.
    pub step: Step,
    /// Steps completed so far.
    pub steps_taken: u32,
    pub history: History,
    /// Pre-recorded actions, consumed front to back.
    pub replay_queue: VecDeque<Action>,
    pub is_replaying: bool,
    /// Most recently chosen action.
    pub latest_action: Option<Action>,
    pub terminal_error: Option<TerminalError>,
}

impl SessionState {
    /// Fresh session; enters `Replay` when `replay` is non-empty.
    pub fn new(session_id: impl Into<String>, replay: Vec<Action>) -> Self {
        let replay_queue = VecDeque::from(replay);
        let is_replaying = !replay_queue.is_empty();
        Self {
            session_id: session_id.into(),
            step: Step::entry(is_replaying),
            steps_taken: 0,
            history: History::new(),
            replay_queue,
            is_replaying,
            latest_action: None,
            terminal_error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.step.is_terminal()
    }
}
