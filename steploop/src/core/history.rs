//! Append-only event history for one session.

use std::slice;

use serde::{Deserialize, Serialize};

use crate::core::event::{Action, Event, Observation};

/// Ordered log of events. Entries are only ever appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    events: Vec<Event>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing ordered log (e.g. one loaded from disk).
    pub fn from_events(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    /// Append a single event.
    pub fn push(&mut self, event: impl Into<Event>) {
        self.events.push(event.into());
    }

    /// Append an action together with the observation it caused.
    ///
    /// Both entries land in one call so no reader ever sees the action without
    /// its observation.
    pub fn record(&mut self, action: Action, observation: Observation) {
        self.events.reserve(2);
        self.events.push(Event::Action(action));
        self.events.push(Event::Observation(observation));
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a Event;
    type IntoIter = slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
