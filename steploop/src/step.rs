//! Orchestration for a single state-machine step of one session.
//!
//! Each call to [`Session::step`] performs the work of the current [`Step`],
//! consults the pure transition table, and leaves the session in the next
//! state. History is only ever appended to.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::agents::Decider;
use crate::core::event::{Action, Observation};
use crate::core::machine::{Route, Step, Transition, transition};
use crate::core::session::{SessionState, TerminalError};
use crate::core::stuck::StuckDetector;
use crate::delegate::DelegateRegistry;
use crate::io::config::LoopConfig;
use crate::io::runtime::Runtime;

/// Per-session knobs for stuck detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepConfig {
    /// Non-interactive: stuck detection ignores user-message boundaries.
    pub headless: bool,
    pub detector: StuckDetector,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            headless: true,
            detector: StuckDetector::default(),
        }
    }
}

impl TryFrom<&LoopConfig> for StepConfig {
    type Error = anyhow::Error;

    fn try_from(cfg: &LoopConfig) -> Result<Self> {
        Ok(Self {
            headless: cfg.headless,
            detector: StuckDetector::new(cfg.stuck)?,
        })
    }
}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub session_id: String,
    /// Step whose work was performed.
    pub ran: Step,
    /// Step the session is in now.
    pub next: Step,
    /// History entries appended by this step.
    pub appended: usize,
    /// Action chosen or acted on during this step.
    pub action: Option<Action>,
}

/// Internal fault raised while performing `step`. The session state is unchanged.
#[derive(Debug)]
pub struct StepError {
    pub step: Step,
    source: anyhow::Error,
}

impl StepError {
    pub fn new(step: Step, source: anyhow::Error) -> Self {
        Self { step, source }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} step failed", self.step)
    }
}

impl Error for StepError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// One conversation: its state plus the collaborators a step calls into.
pub struct Session<D> {
    state: SessionState,
    decider: D,
    runtime: Arc<dyn Runtime + Send + Sync>,
    delegates: Arc<DelegateRegistry>,
    detector: StuckDetector,
    headless: bool,
}

impl<D> fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("delegates", &self.delegates)
            .field("headless", &self.headless)
            .finish_non_exhaustive()
    }
}

impl<D: Decider> Session<D> {
    pub fn new(
        state: SessionState,
        decider: D,
        runtime: Arc<dyn Runtime + Send + Sync>,
        delegates: Arc<DelegateRegistry>,
        config: StepConfig,
    ) -> Self {
        Self {
            state,
            decider,
            runtime,
            delegates,
            detector: config.detector,
            headless: config.headless,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn into_state(self) -> SessionState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Perform the current step and move to the next one.
    ///
    /// Errors are internal faults (decider failures, stepping a finished
    /// session). Command failures are recorded as observations, and stuck or
    /// delegation outcomes move the session to a terminal step instead.
    #[instrument(skip_all, fields(session = %self.state.session_id, step = %self.state.step))]
    pub fn step(&mut self) -> Result<StepOutcome> {
        let ran = self.state.step;
        let before = self.state.history.len();
        let (ran, action, event) = match ran {
            Step::Think => self.think()?,
            Step::Replay => self.replay()?,
            Step::Execute => self.execute()?,
            Step::Delegate => self.delegate()?,
            Step::StuckError | Step::Finish | Step::Failed => {
                return Err(anyhow!(
                    "session '{}' already ended in step '{}'",
                    self.state.session_id,
                    ran
                ));
            }
        };
        let next = transition(ran, event)?;
        if next == Step::Finish {
            self.state.history.push(Action::Finish);
        }
        self.state.step = next;
        self.state.steps_taken += 1;

        let appended = self.state.history.len() - before;
        debug!(%ran, %next, appended, "step complete");
        if next.is_terminal() {
            let err = self.state.terminal_error.as_ref().map(TerminalError::message);
            info!(%next, steps_taken = self.state.steps_taken, ?err, "session ended");
        }
        Ok(StepOutcome {
            session_id: self.state.session_id.clone(),
            ran,
            next,
            appended,
            action,
        })
    }

    fn think(&mut self) -> Result<(Step, Option<Action>, Transition)> {
        let action = self
            .decider
            .think(&self.state.history)
            .map_err(|source| StepError::new(Step::Think, source))?;
        debug!(%action, "decided");
        Ok(self.adopt(Step::Think, action))
    }

    fn replay(&mut self) -> Result<(Step, Option<Action>, Transition)> {
        let Some(action) = self.state.replay_queue.pop_front() else {
            debug!("replay queue empty, thinking instead");
            let decided = self.think()?;
            self.state.is_replaying = false;
            return Ok(decided);
        };
        self.state.is_replaying = !self.state.replay_queue.is_empty();
        debug!(%action, remaining = self.state.replay_queue.len(), "replaying");
        Ok(self.adopt(Step::Replay, action))
    }

    fn adopt(&mut self, ran: Step, action: Action) -> (Step, Option<Action>, Transition) {
        let route = Route::of(&action);
        self.state.latest_action = Some(action.clone());
        (ran, Some(action), Transition::Decided(route))
    }

    fn execute(&mut self) -> Result<(Step, Option<Action>, Transition)> {
        let action = self.pending_action(Step::Execute)?;
        let observation = self.runtime.execute(&action);
        debug!(kind = observation.kind(), "executed");
        self.state.history.record(action.clone(), observation);

        let reason = self
            .detector
            .detect(self.state.history.events(), self.headless);
        if let Some(reason) = reason {
            let message = format!("agent is stuck in a loop: {}", reason.describe());
            warn!(%reason, "stuck detected");
            self.state
                .history
                .push(Observation::error(message.clone()));
            self.state.terminal_error = Some(TerminalError::Stuck { reason, message });
        }
        let event = Transition::Executed {
            stuck: reason.is_some(),
            replaying: self.state.is_replaying,
        };
        Ok((Step::Execute, Some(action), event))
    }

    fn delegate(&mut self) -> Result<(Step, Option<Action>, Transition)> {
        let action = self.pending_action(Step::Delegate)?;
        match self.delegates.invoke(&action) {
            Ok(observation) => {
                self.state.history.record(action.clone(), observation);
                Ok((Step::Delegate, Some(action), Transition::Delegated))
            }
            Err(err) => {
                let agent_name = match &action {
                    Action::Delegate { agent_name, .. } => agent_name.clone(),
                    other => other.kind().to_string(),
                };
                let message = format!("{err:#}");
                warn!(agent = %agent_name, err = %message, "delegation failed");
                self.state.terminal_error = Some(TerminalError::Delegation {
                    agent_name,
                    message,
                });
                Ok((Step::Delegate, Some(action), Transition::DelegationFailed))
            }
        }
    }

    fn pending_action(&self, step: Step) -> Result<Action> {
        self.state.latest_action.clone().ok_or_else(|| {
            StepError::new(step, anyhow!("no action was chosen before this step")).into()
        })
    }
}
