//! Transport adapter: publishes one event per step and a single terminal event.
//!
//! A sink receives a [`StreamEvent::State`] after every completed step, then
//! exactly one closing event: [`StreamEvent::Done`] when the loop stops
//! normally, or [`StreamEvent::Error`] when an internal fault aborts it.
//! Nothing is retried.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

use crate::agents::Decider;
use crate::core::machine::Step;
use crate::core::session::SessionState;
use crate::looping::{LoopOutcome, LoopStop, run_loop};
use crate::step::{Session, StepError};

/// One message on the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Snapshot taken after `step` ran.
    State { step: Step, state: SessionState },
    Done { stop: LoopStop, steps_executed: u32 },
    /// Internal fault; the stream closes after this event.
    Error {
        error_type: String,
        message: String,
        trace: String,
    },
}

impl StreamEvent {
    /// Terminal error event for an internal fault.
    pub fn from_error(err: &anyhow::Error) -> Self {
        let error_type = match err.downcast_ref::<StepError>() {
            Some(step_err) => format!("{}_failed", step_err.step),
            None => "internal".to_string(),
        };
        Self::Error {
            error_type,
            message: format!("{err:#}"),
            trace: format!("{err:?}"),
        }
    }
}

/// Drive `session` with [`run_loop`], forwarding events to `sink`.
///
/// A fault is reported to the sink as an error event before it is returned.
/// A failing sink is itself a fault, but no further events are sent to it.
pub fn stream_session<D, S>(
    session: &mut Session<D>,
    max_steps: u32,
    sink: S,
) -> Result<LoopOutcome>
where
    D: Decider,
    S: FnMut(&StreamEvent) -> Result<()>,
{
    stream_session_with(session, max_steps, |_| Ok(()), sink)
}

/// Like [`stream_session`], handing every snapshot to `persist` before it is
/// published.
///
/// A `persist` error is a loop fault: the sink still receives the closing
/// error event.
#[instrument(skip_all, fields(session = %session.state().session_id))]
pub fn stream_session_with<D, P, S>(
    session: &mut Session<D>,
    max_steps: u32,
    mut persist: P,
    mut sink: S,
) -> Result<LoopOutcome>
where
    D: Decider,
    P: FnMut(&SessionState) -> Result<()>,
    S: FnMut(&StreamEvent) -> Result<()>,
{
    let mut sink_failed = false;
    let result = run_loop(session, max_steps, |outcome, state| {
        persist(state)?;
        let event = StreamEvent::State {
            step: outcome.ran,
            state: state.clone(),
        };
        sink(&event).inspect_err(|_| sink_failed = true)
    });

    match result {
        Ok(outcome) => {
            sink(&StreamEvent::Done {
                stop: outcome.stop.clone(),
                steps_executed: outcome.steps_executed,
            })?;
            Ok(outcome)
        }
        Err(err) => {
            error!(err = %format!("{err:#}"), "session aborted");
            if !sink_failed {
                // The stream is closing with an error either way.
                let _ = sink(&StreamEvent::from_error(&err));
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use anyhow::anyhow;

    use crate::agents::ScriptedDecider;
    use crate::core::event::Action;
    use crate::core::history::History;
    use crate::delegate::DelegateRegistry;
    use crate::step::StepConfig;
    use crate::test_support::ScriptedRuntime;

    fn session<D: Decider>(replay: Vec<Action>, decider: D) -> Session<D> {
        Session::new(
            SessionState::new("stream", replay),
            decider,
            Arc::new(ScriptedRuntime::new()),
            Arc::new(DelegateRegistry::new()),
            StepConfig::default(),
        )
    }

    #[test]
    fn emits_one_state_event_per_step_then_done() {
        let mut s = session(vec![Action::run("ls")], ScriptedDecider::default());
        let mut events = Vec::new();
        let outcome = stream_session(&mut s, 10, |event| {
            events.push(event.clone());
            Ok(())
        })
        .expect("stream");

        assert_eq!(outcome.steps_executed, 3);
        assert_eq!(events.len(), 4);
        let steps: Vec<Step> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::State { step, .. } => Some(*step),
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec![Step::Replay, Step::Execute, Step::Think]);
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Done {
                stop: LoopStop::Finished,
                steps_executed: 3
            })
        );
    }

    /// Verifies a decider fault closes the stream with a typed error event.
    #[test]
    fn decider_fault_emits_terminal_error_event() {
        let mut s = session(Vec::new(), |_: &History| -> Result<Action> {
            Err(anyhow!("model unavailable"))
        });
        let mut events = Vec::new();
        let err = stream_session(&mut s, 10, |event| {
            events.push(event.clone());
            Ok(())
        })
        .unwrap_err();

        assert!(format!("{err:#}").contains("model unavailable"));
        assert_eq!(events.len(), 1);
        let StreamEvent::Error {
            error_type,
            message,
            trace,
        } = &events[0]
        else {
            panic!("expected error event, got {:?}", events[0]);
        };
        assert_eq!(error_type, "think_failed");
        assert!(message.contains("think step failed"));
        assert!(message.contains("model unavailable"));
        assert!(!trace.is_empty());
    }

    #[test]
    fn failing_sink_is_not_sent_more_events() {
        let mut s = session(Vec::new(), ScriptedDecider::new([Action::run("a")]));
        let mut calls = 0;
        let err = stream_session(&mut s, 10, |_| {
            calls += 1;
            Err(anyhow!("client disconnected"))
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "client disconnected");
        assert_eq!(calls, 1);
    }

    /// Verifies a snapshot that cannot be persisted still closes the stream
    /// with an error event.
    #[test]
    fn persist_failure_closes_stream_with_error_event() {
        let mut s = session(
            vec![Action::run("a"), Action::run("b")],
            ScriptedDecider::default(),
        );
        let mut saves = 0;
        let mut events = Vec::new();
        let err = stream_session_with(
            &mut s,
            10,
            |_| {
                saves += 1;
                if saves == 2 {
                    Err(anyhow!("checkpoint write failed"))
                } else {
                    Ok(())
                }
            },
            |event| {
                events.push(event.clone());
                Ok(())
            },
        )
        .unwrap_err();

        assert_eq!(err.to_string(), "checkpoint write failed");
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::State { step: Step::Replay, .. }));
        let StreamEvent::Error {
            error_type,
            message,
            ..
        } = &events[1]
        else {
            panic!("expected error event, got {:?}", events[1]);
        };
        assert_eq!(error_type, "internal");
        assert!(message.contains("checkpoint write failed"));
    }

    #[test]
    fn events_serialize_with_event_tag() {
        let event = StreamEvent::Done {
            stop: LoopStop::Finished,
            steps_executed: 1,
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({"event": "done", "stop": {"stop": "finished"}, "steps_executed": 1})
        );
        let back: StreamEvent = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, event);
    }
}
