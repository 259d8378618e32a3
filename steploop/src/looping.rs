//! Drive a session step by step until it ends or exhausts its step budget.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::agents::Decider;
use crate::core::machine::Step;
use crate::core::session::{SessionState, TerminalError};
use crate::core::stuck::StuckReason;
use crate::step::{Session, StepOutcome};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stop", rename_all = "snake_case")]
pub enum LoopStop {
    /// The agent chose to finish.
    Finished,
    /// The history matched a repetition signature.
    Stuck { reason: StuckReason, message: String },
    /// A delegation could not be completed.
    Failed { agent_name: String, message: String },
    /// The invocation ran `max_steps` steps without reaching a terminal step.
    MaxStepsExceeded { max_steps: u32 },
}

impl LoopStop {
    /// Terminal stop recorded in `state`, if the session has ended.
    pub fn from_state(state: &SessionState) -> Option<Self> {
        match state.step {
            Step::Finish => Some(Self::Finished),
            Step::StuckError | Step::Failed => Some(match &state.terminal_error {
                Some(TerminalError::Stuck { reason, message }) => Self::Stuck {
                    reason: *reason,
                    message: message.clone(),
                },
                Some(TerminalError::Delegation {
                    agent_name,
                    message,
                }) => Self::Failed {
                    agent_name: agent_name.clone(),
                    message: message.clone(),
                },
                None => Self::Failed {
                    agent_name: String::new(),
                    message: format!("session ended in step '{}' without an error", state.step),
                },
            }),
            Step::Think | Step::Replay | Step::Execute | Step::Delegate => None,
        }
    }
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopOutcome {
    pub session_id: String,
    pub steps_executed: u32,
    pub stop: LoopStop,
}

/// Step `session` until it reaches a terminal step or `max_steps` is used up.
///
/// `on_step` sees every completed step together with the updated state; an
/// error from it, or from a step, stops the loop and is returned as is.
#[instrument(skip_all, fields(session = %session.state().session_id, max_steps))]
pub fn run_loop<D, F>(session: &mut Session<D>, max_steps: u32, mut on_step: F) -> Result<LoopOutcome>
where
    D: Decider,
    F: FnMut(&StepOutcome, &SessionState) -> Result<()>,
{
    let mut steps_executed = 0u32;
    loop {
        if let Some(stop) = LoopStop::from_state(session.state()) {
            info!(steps_executed, ?stop, "loop stopped");
            return Ok(LoopOutcome {
                session_id: session.state().session_id.clone(),
                steps_executed,
                stop,
            });
        }
        if steps_executed >= max_steps {
            info!(steps_executed, "step budget exhausted");
            return Ok(LoopOutcome {
                session_id: session.state().session_id.clone(),
                steps_executed,
                stop: LoopStop::MaxStepsExceeded { max_steps },
            });
        }

        let outcome = session.step()?;
        steps_executed += 1;
        on_step(&outcome, session.state())?;
    }
}
