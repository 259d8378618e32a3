//! Step states and the pure transition table of the session state machine.
//!
//! ```text
//! Think | Replay  --run/message/null-->  Execute
//! Think | Replay  --delegate---------->  Delegate
//! Think | Replay  --finish------------>  Finish
//! Execute         --stuck------------->  StuckError
//! Execute         --still replaying--->  Replay
//! Execute         --otherwise--------->  Think
//! Delegate        --ok---------------->  Think
//! Delegate        --lookup failure---->  Failed
//! ```
//!
//! The orchestrator performs side effects; this module only decides where a
//! session goes next.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::event::Action;

/// A state of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Think,
    Replay,
    Execute,
    Delegate,
    /// Terminal: a repetition signature matched.
    StuckError,
    /// Terminal: the agent finished.
    Finish,
    /// Terminal: a fatal delegation error.
    Failed,
}

impl Step {
    /// Entry state for a new session.
    pub fn entry(has_replay: bool) -> Self {
        if has_replay { Self::Replay } else { Self::Think }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::StuckError | Self::Finish | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Think => "think",
            Self::Replay => "replay",
            Self::Execute => "execute",
            Self::Delegate => "delegate",
            Self::StuckError => "stuck_error",
            Self::Finish => "finish",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a freshly chosen action is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Execute,
    Delegate,
    Finish,
}

impl Route {
    pub fn of(action: &Action) -> Self {
        match action {
            Action::Finish => Self::Finish,
            Action::Delegate { .. } => Self::Delegate,
            _ => Self::Execute,
        }
    }
}

/// Outcome of the work performed in a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `Think` or `Replay` chose an action.
    Decided(Route),
    /// `Execute` appended its pair and ran stuck detection.
    Executed { stuck: bool, replaying: bool },
    /// `Delegate` appended its pair.
    Delegated,
    /// `Delegate` could not find or run the sub-workflow.
    DelegationFailed,
}

/// A transition that the table does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: Step,
    pub transition: Transition,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid transition {:?} from step '{}'",
            self.transition, self.from
        )
    }
}

impl Error for InvalidTransition {}

/// Pure transition function.
pub fn transition(from: Step, event: Transition) -> Result<Step, InvalidTransition> {
    let next = match (from, event) {
        (Step::Think | Step::Replay, Transition::Decided(route)) => match route {
            Route::Execute => Step::Execute,
            Route::Delegate => Step::Delegate,
            Route::Finish => Step::Finish,
        },
        (Step::Execute, Transition::Executed { stuck: true, .. }) => Step::StuckError,
        (Step::Execute, Transition::Executed { replaying: true, .. }) => Step::Replay,
        (Step::Execute, Transition::Executed { .. }) => Step::Think,
        // Delegation results never resume replay directly.
        (Step::Delegate, Transition::Delegated) => Step::Think,
        (Step::Delegate, Transition::DelegationFailed) => Step::Failed,
        _ => {
            return Err(InvalidTransition {
                from,
                transition: event,
            });
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn entry_prefers_replay() {
        assert_eq!(Step::entry(true), Step::Replay);
        assert_eq!(Step::entry(false), Step::Think);
    }

    #[test]
    fn routes_follow_action_kind() {
        assert_eq!(Route::of(&Action::Finish), Route::Finish);
        assert_eq!(
            Route::of(&Action::delegate("checker", Map::new())),
            Route::Delegate
        );
        assert_eq!(Route::of(&Action::run("ls")), Route::Execute);
        assert_eq!(Route::of(&Action::message("hi")), Route::Execute);
        assert_eq!(Route::of(&Action::Null), Route::Execute);
    }

    #[test]
    fn think_and_replay_route_identically() {
        for from in [Step::Think, Step::Replay] {
            assert_eq!(
                transition(from, Transition::Decided(Route::Execute)),
                Ok(Step::Execute)
            );
            assert_eq!(
                transition(from, Transition::Decided(Route::Delegate)),
                Ok(Step::Delegate)
            );
            assert_eq!(
                transition(from, Transition::Decided(Route::Finish)),
                Ok(Step::Finish)
            );
        }
    }

    #[test]
    fn stuck_wins_over_replay_after_execute() {
        let next = transition(
            Step::Execute,
            Transition::Executed {
                stuck: true,
                replaying: true,
            },
        );
        assert_eq!(next, Ok(Step::StuckError));
    }

    #[test]
    fn execute_returns_to_replay_or_think() {
        let replay = transition(
            Step::Execute,
            Transition::Executed {
                stuck: false,
                replaying: true,
            },
        );
        assert_eq!(replay, Ok(Step::Replay));
        let think = transition(
            Step::Execute,
            Transition::Executed {
                stuck: false,
                replaying: false,
            },
        );
        assert_eq!(think, Ok(Step::Think));
    }

    #[test]
    fn delegate_goes_to_think_or_failed() {
        assert_eq!(
            transition(Step::Delegate, Transition::Delegated),
            Ok(Step::Think)
        );
        assert_eq!(
            transition(Step::Delegate, Transition::DelegationFailed),
            Ok(Step::Failed)
        );
    }

    #[test]
    fn terminal_steps_reject_every_transition() {
        for from in [Step::StuckError, Step::Finish, Step::Failed] {
            assert!(from.is_terminal());
            let err = transition(from, Transition::Delegated).unwrap_err();
            assert_eq!(err.from, from);
            assert!(err.to_string().contains(from.as_str()));
        }
    }

    #[test]
    fn mismatched_work_is_rejected() {
        assert!(transition(Step::Think, Transition::Delegated).is_err());
        assert!(transition(Step::Delegate, Transition::Decided(Route::Execute)).is_err());
        assert!(
            transition(
                Step::Replay,
                Transition::Executed {
                    stuck: false,
                    replaying: false
                }
            )
            .is_err()
        );
    }
}
