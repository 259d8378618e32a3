//! Detection of unproductive repetition in a session history.
//!
//! The detector looks only at the tail of the history and reports the first
//! matching signature. Each signature needs a minimum amount of data before it
//! can fire, so short or healthy histories never trip it.

use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::event::{Action, Event, EventSource, Observation};
use crate::core::matching::{actions_match, observations_match};

/// Which repetition signature matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StuckReason {
    /// The same action keeps producing the same observation.
    RepeatingActionObservation,
    /// The same action keeps failing.
    RepeatingActionError,
    /// The agent keeps sending itself the same message.
    Monologue,
    /// Two actions alternate with identical results (A-B-A-B).
    ActionObservationPattern,
    /// The history keeps getting condensed without progress.
    ContextCondensation,
}

impl StuckReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RepeatingActionObservation => "repeating_action_observation",
            Self::RepeatingActionError => "repeating_action_error",
            Self::Monologue => "monologue",
            Self::ActionObservationPattern => "action_observation_pattern",
            Self::ContextCondensation => "context_condensation",
        }
    }

    /// Human-readable explanation for error markers and logs.
    pub fn describe(self) -> &'static str {
        match self {
            Self::RepeatingActionObservation => {
                "the same action keeps producing the same observation"
            }
            Self::RepeatingActionError => "the same action keeps producing errors",
            Self::Monologue => "the agent keeps repeating the same message",
            Self::ActionObservationPattern => {
                "two actions keep alternating with identical results"
            }
            Self::ContextCondensation => "the context keeps being condensed without progress",
        }
    }
}

impl fmt::Display for StuckReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window sizes and limits for each signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StuckThresholds {
    /// Filtered events required before any signature is evaluated.
    pub min_history: usize,
    /// Identical action/observation pairs that count as a loop.
    pub repeat_window: usize,
    /// Identical actions answered by errors that count as a loop.
    pub error_window: usize,
    /// Identical agent messages that count as a monologue.
    pub monologue_window: usize,
    /// Actions (and observations) inspected for the alternating pattern.
    pub pattern_window: usize,
    /// Filtered events required before the alternating pattern is evaluated.
    pub pattern_min_history: usize,
    /// Filtered events required before condensations are counted.
    pub condensation_min_history: usize,
    /// Condensation markers that count as a spiral.
    pub condensation_limit: usize,
}

impl Default for StuckThresholds {
    fn default() -> Self {
        Self {
            min_history: 3,
            repeat_window: 4,
            error_window: 3,
            monologue_window: 3,
            pattern_window: 6,
            pattern_min_history: 6,
            condensation_min_history: 10,
            condensation_limit: 10,
        }
    }
}

impl StuckThresholds {
    pub fn validate(&self) -> Result<(), String> {
        let windows = [
            ("min_history", self.min_history),
            ("repeat_window", self.repeat_window),
            ("error_window", self.error_window),
            ("monologue_window", self.monologue_window),
            ("condensation_limit", self.condensation_limit),
        ];
        for (name, value) in windows {
            if value == 0 {
                return Err(format!("stuck.{name} must be > 0"));
            }
        }
        if self.pattern_window < 4 || self.pattern_window % 2 != 0 {
            return Err(format!(
                "stuck.pattern_window must be an even number >= 4 (got {})",
                self.pattern_window
            ));
        }
        Ok(())
    }
}

/// Stateless detector parameterized by [`StuckThresholds`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StuckDetector {
    thresholds: StuckThresholds,
}

impl StuckDetector {
    /// Build a detector, rejecting thresholds that would flag healthy progress.
    pub fn new(thresholds: StuckThresholds) -> Result<Self> {
        thresholds.validate().map_err(|msg| anyhow!(msg))?;
        Ok(Self { thresholds })
    }

    pub fn is_stuck(&self, history: &[Event], headless: bool) -> bool {
        self.detect(history, headless).is_some()
    }

    /// Return the first signature matching the tail of `history`.
    ///
    /// Interactive sessions (`headless == false`) only consider events after
    /// the most recent user message.
    pub fn detect(&self, history: &[Event], headless: bool) -> Option<StuckReason> {
        let t = &self.thresholds;
        let scoped = if headless {
            history
        } else {
            since_last_user_message(history)
        };
        let filtered: Vec<&Event> = scoped
            .iter()
            .filter(|event| !event.is_user_message() && !event.is_null())
            .collect();

        if filtered.len() < t.min_history {
            return None;
        }

        let window = t.repeat_window.max(t.error_window);
        let actions = last_actions(&filtered, window);
        let observations = last_observations(&filtered, window);

        if repeating_action_observation(&actions, &observations, t.repeat_window) {
            return Some(StuckReason::RepeatingActionObservation);
        }
        if repeating_action_error(&actions, &observations, t.error_window) {
            return Some(StuckReason::RepeatingActionError);
        }
        if monologue(&filtered, t.monologue_window) {
            return Some(StuckReason::Monologue);
        }
        if filtered.len() >= t.pattern_min_history
            && alternating_pattern(&filtered, t.pattern_window)
        {
            return Some(StuckReason::ActionObservationPattern);
        }
        if filtered.len() >= t.condensation_min_history
            && condensation_count(&filtered) >= t.condensation_limit
        {
            return Some(StuckReason::ContextCondensation);
        }
        None
    }
}

/// Check `history` with the default thresholds.
pub fn is_stuck(history: &[Event], headless: bool) -> bool {
    StuckDetector::default().is_stuck(history, headless)
}

fn since_last_user_message(history: &[Event]) -> &[Event] {
    match history.iter().rposition(Event::is_user_message) {
        Some(idx) => &history[idx + 1..],
        None => history,
    }
}

/// Up to `n` most recent actions, newest first.
fn last_actions<'a>(events: &[&'a Event], n: usize) -> Vec<&'a Action> {
    events
        .iter()
        .rev()
        .filter_map(|event| event.as_action())
        .take(n)
        .collect()
}

/// Up to `n` most recent observations, newest first.
fn last_observations<'a>(events: &[&'a Event], n: usize) -> Vec<&'a Observation> {
    events
        .iter()
        .rev()
        .filter_map(|event| event.as_observation())
        .take(n)
        .collect()
}

fn all_match<T: ?Sized>(items: &[&T], eq: fn(&T, &T) -> bool) -> bool {
    match items.split_first() {
        Some((first, rest)) => rest.iter().all(|item| eq(first, item)),
        None => true,
    }
}

fn repeating_action_observation(
    actions: &[&Action],
    observations: &[&Observation],
    n: usize,
) -> bool {
    if actions.len() < n || observations.len() < n {
        return false;
    }
    all_match(&actions[..n], actions_match) && all_match(&observations[..n], observations_match)
}

fn repeating_action_error(actions: &[&Action], observations: &[&Observation], n: usize) -> bool {
    if actions.len() < n || observations.len() < n {
        return false;
    }
    all_match(&actions[..n], actions_match)
        && observations[..n]
            .iter()
            .all(|obs| matches!(obs, Observation::Error { .. }))
}

fn monologue(events: &[&Event], n: usize) -> bool {
    let contents: Vec<&str> = events
        .iter()
        .filter_map(|event| match event.as_action() {
            Some(Action::Message {
                content,
                source: EventSource::Agent,
            }) => Some(content.as_str()),
            _ => None,
        })
        .collect();
    if contents.len() < n {
        return false;
    }
    let tail = &contents[contents.len() - n..];
    tail.iter().all(|content| *content == tail[0])
}

/// Period-2 repetition over the last `window` actions and observations.
fn alternating_pattern(events: &[&Event], window: usize) -> bool {
    let actions = last_actions(events, window);
    let observations = last_observations(events, window);
    if actions.len() < window || observations.len() < window {
        return false;
    }
    (2..window).all(|i| {
        actions_match(actions[i % 2], actions[i])
            && observations_match(observations[i % 2], observations[i])
    })
}

fn condensation_count(events: &[&Event]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event.as_observation(), Some(Observation::Condensation)))
        .count()
}
