//! Semantic equality used by stuck detection.
//!
//! Structural `PartialEq` compares every field. Loop detection needs a looser
//! notion: a command is the same command regardless of its timeout, and a
//! command's output is the same output regardless of which process produced it.

use crate::core::event::{Action, Event, Observation};

/// Compare actions semantically. `Run` actions compare by command string only.
pub fn actions_match(a: &Action, b: &Action) -> bool {
    match (a, b) {
        (Action::Run(a), Action::Run(b)) => a.command == b.command,
        _ => a == b,
    }
}

/// Compare observations semantically. Command outputs ignore the process id.
pub fn observations_match(a: &Observation, b: &Observation) -> bool {
    match (a, b) {
        (Observation::Run(a), Observation::Run(b)) => {
            a.command == b.command && a.exit_code == b.exit_code && a.content == b.content
        }
        _ => a == b,
    }
}

/// Compare events semantically. Events from different families never match.
pub fn events_match(a: &Event, b: &Event) -> bool {
    match (a, b) {
        (Event::Action(a), Event::Action(b)) => actions_match(a, b),
        (Event::Observation(a), Event::Observation(b)) => observations_match(a, b),
        _ => false,
    }
}
