//! Decision-function contract and the deciders shipped with the crate.
//!
//! A [`Decider`] looks at the session history and picks the next action. When
//! to finish is entirely up to the decider; the loop never finishes on its own.

use std::collections::VecDeque;

use anyhow::Result;

use crate::core::event::Action;
use crate::core::history::History;

pub mod command;

pub use command::CommandDecider;

/// Chooses the next action from the history so far.
pub trait Decider {
    fn think(&mut self, history: &History) -> Result<Action>;
}

impl<F> Decider for F
where
    F: FnMut(&History) -> Result<Action>,
{
    fn think(&mut self, history: &History) -> Result<Action> {
        self(history)
    }
}

/// Hands out queued actions in order, then finishes.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDecider {
    actions: VecDeque<Action>,
}

impl ScriptedDecider {
    pub fn new(actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
        }
    }
}

impl Decider for ScriptedDecider {
    fn think(&mut self, _history: &History) -> Result<Action> {
        Ok(self.actions.pop_front().unwrap_or(Action::Finish))
    }
}
