//! Step-driven agent loop with stuck detection.
//!
//! A session repeatedly asks a decision function for the next action, executes
//! it against the environment, and appends the `[action, observation]` pair to
//! an append-only history. The run ends when the agent finishes, when a fatal
//! delegation error occurs, or when the history shows the agent repeating
//! itself. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (event model, stuck detection,
//!   transition table, session state). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (process execution, config,
//!   checkpoints, script files). Isolated to enable fakes in tests.
//!
//! Orchestration modules ([`step`], [`looping`], [`stream`]) coordinate core
//! logic with the collaborators in [`agents`], [`delegate`] and [`io`].

pub mod agents;
pub mod core;
pub mod delegate;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod step;
pub mod stream;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
