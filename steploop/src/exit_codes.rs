//! Stable exit codes for steploop CLI commands.

/// The session finished, or `check` found no repetition.
pub const OK: i32 = 0;
/// Invalid input/config/checkpoint, or an internal fault while stepping.
pub const INVALID: i32 = 1;
/// The session ended because a delegation failed.
pub const FAILED: i32 = 2;
/// The session (or the checked history) is stuck in a loop.
pub const STUCK: i32 = 3;
/// `max_steps` was used up before the session ended.
pub const STEP_LIMIT: i32 = 4;
