//! Step-driven agent loop runner.
//!
//! Replays recorded actions, asks an optional external agent for more, and
//! stops when the agent finishes, a delegation fails, or the session gets
//! stuck repeating itself. Step events are written to stdout as JSON lines.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use steploop::agents::{CommandDecider, Decider, ScriptedDecider};
use steploop::core::event::Action;
use steploop::core::history::History;
use steploop::core::session::SessionState;
use steploop::core::stuck::StuckDetector;
use steploop::delegate::DelegateRegistry;
use steploop::exit_codes;
use steploop::io::checkpoint::CheckpointStore;
use steploop::io::config::{LoopConfig, load_config};
use steploop::io::runtime::ShellRuntime;
use steploop::io::script::{load_history, load_replay_script};
use steploop::logging;
use steploop::looping::LoopStop;
use steploop::step::{Session, StepConfig};
use steploop::stream::stream_session_with;

#[derive(Parser)]
#[command(
    name = "steploop",
    version,
    about = "Step-driven agent loop with stuck detection"
)]
struct Cli {
    /// Loop configuration (TOML). Defaults apply when the file is missing.
    #[arg(long, global = true, default_value = "steploop.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new session, replaying `--script` before consulting the agent.
    Run {
        /// JSON array of actions to replay first.
        #[arg(long)]
        script: Option<PathBuf>,
        /// Session id (a random UUID when omitted).
        #[arg(long)]
        session_id: Option<String>,
        /// Only look for loops since the last user message.
        #[arg(long)]
        interactive: bool,
        /// Save a snapshot after every step.
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
        /// Override `max_steps` from the config.
        #[arg(long)]
        max_steps: Option<u32>,
    },
    /// Continue a checkpointed session.
    Resume {
        #[arg(long)]
        session_id: String,
        #[arg(long)]
        checkpoint_dir: PathBuf,
        #[arg(long)]
        interactive: bool,
        #[arg(long)]
        max_steps: Option<u32>,
    },
    /// Run stuck detection over a saved history.
    Check {
        /// JSON array of actions and observations.
        #[arg(long)]
        history: PathBuf,
        #[arg(long)]
        interactive: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;
    match cli.command {
        Command::Run {
            script,
            session_id,
            interactive,
            checkpoint_dir,
            max_steps,
        } => {
            let cfg = with_overrides(cfg, interactive, max_steps);
            let replay = match script {
                Some(path) => load_replay_script(&path)?,
                None => Vec::new(),
            };
            let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let store = checkpoint_dir.map(CheckpointStore::new);
            let state = SessionState::new(session_id, replay);
            if let Some(store) = &store {
                store.save(&state)?;
            }
            cmd_drive(&cfg, state, store.as_ref())
        }
        Command::Resume {
            session_id,
            checkpoint_dir,
            interactive,
            max_steps,
        } => {
            let cfg = with_overrides(cfg, interactive, max_steps);
            let store = CheckpointStore::new(checkpoint_dir);
            let state = store
                .load(&session_id)
                .with_context(|| format!("resume session '{session_id}'"))?;
            cmd_drive(&cfg, state, Some(&store))
        }
        Command::Check {
            history,
            interactive,
        } => cmd_check(&cfg, &history, !interactive && cfg.headless),
    }
}

fn with_overrides(mut cfg: LoopConfig, interactive: bool, max_steps: Option<u32>) -> LoopConfig {
    if interactive {
        cfg.headless = false;
    }
    if let Some(max_steps) = max_steps {
        cfg.max_steps = max_steps;
    }
    cfg
}

/// Drive a session to a stop, printing stream events and saving checkpoints.
fn cmd_drive(
    cfg: &LoopConfig,
    state: SessionState,
    store: Option<&CheckpointStore>,
) -> Result<i32> {
    let decider = build_decider(cfg)?;
    let runtime = Arc::new(ShellRuntime::new(cfg.output_limit_bytes));
    let delegates = Arc::new(DelegateRegistry::from_config(cfg)?);
    let step_config = StepConfig::try_from(cfg)?;
    info!(
        session = %state.session_id,
        step = %state.step,
        delegates = ?delegates.names().collect::<Vec<_>>(),
        checkpoint_dir = ?store.map(CheckpointStore::dir),
        "starting session"
    );
    let mut session = Session::new(state, decider, runtime, delegates, step_config);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let outcome = stream_session_with(
        &mut session,
        cfg.max_steps,
        |state| match store {
            Some(store) => store.save(state).map(|_| ()),
            None => Ok(()),
        },
        |event| {
            let line = serde_json::to_string(event).context("serialize stream event")?;
            writeln!(out, "{line}").context("write stream event")?;
            out.flush().context("flush stdout")
        },
    )?;

    Ok(exit_code_for(&outcome.stop))
}

/// Decider selected by `[agent]` in the config.
enum CliDecider {
    /// No agent configured: finish once the replay script is exhausted.
    Finish(ScriptedDecider),
    Agent(CommandDecider),
}

impl Decider for CliDecider {
    fn think(&mut self, history: &History) -> Result<Action> {
        match self {
            Self::Finish(decider) => decider.think(history),
            Self::Agent(decider) => decider.think(history),
        }
    }
}

fn build_decider(cfg: &LoopConfig) -> Result<CliDecider> {
    if cfg.agent.command.is_empty() {
        return Ok(CliDecider::Finish(ScriptedDecider::default()));
    }
    let decider = CommandDecider::new(
        cfg.agent.command.clone(),
        Duration::from_secs(cfg.agent.timeout_secs),
        cfg.output_limit_bytes,
    )
    .context("configure agent")?;
    Ok(CliDecider::Agent(decider))
}

fn cmd_check(cfg: &LoopConfig, path: &Path, headless: bool) -> Result<i32> {
    let history = load_history(path)?;
    let reason = StuckDetector::new(cfg.stuck)?.detect(history.events(), headless);
    let verdict = json!({
        "stuck": reason.is_some(),
        "reason": reason,
        "description": reason.map(|r| r.describe()),
        "events": history.len(),
    });
    println!("{verdict}");
    Ok(if reason.is_some() {
        exit_codes::STUCK
    } else {
        exit_codes::OK
    })
}

fn exit_code_for(stop: &LoopStop) -> i32 {
    match stop {
        LoopStop::Finished => exit_codes::OK,
        LoopStop::Stuck { .. } => exit_codes::STUCK,
        LoopStop::Failed { .. } => exit_codes::FAILED,
        LoopStop::MaxStepsExceeded { .. } => exit_codes::STEP_LIMIT,
    }
}
