//! Replay scripts and histories on disk, validated against the v1 event schema.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::{Value, json};
use tracing::debug;

use crate::core::event::{Action, Event};
use crate::core::history::History;

/// Event schema (Draft 2020-12), compiled into the binary.
pub const EVENTS_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/steploop/v1.schema.json"
));

/// Parse a replay script: a JSON array of actions.
pub fn parse_replay_script(raw: &str) -> Result<Vec<Action>> {
    let value: Value = serde_json::from_str(raw).context("parse replay script json")?;
    validate_array_of(&value, "action").context("validate replay script")?;
    serde_json::from_value(value).context("deserialize replay script")
}

pub fn load_replay_script(path: &Path) -> Result<Vec<Action>> {
    debug!(path = %path.display(), "loading replay script");
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read replay script {}", path.display()))?;
    let actions =
        parse_replay_script(&raw).with_context(|| format!("load {}", path.display()))?;
    debug!(actions = actions.len(), "replay script loaded");
    Ok(actions)
}

/// Parse a history: a JSON array of actions and observations.
pub fn parse_history(raw: &str) -> Result<History> {
    let value: Value = serde_json::from_str(raw).context("parse history json")?;
    validate_array_of(&value, "event").context("validate history")?;
    let events: Vec<Event> = serde_json::from_value(value).context("deserialize history")?;
    Ok(History::from_events(events))
}

pub fn load_history(path: &Path) -> Result<History> {
    debug!(path = %path.display(), "loading history");
    let raw =
        fs::read_to_string(path).with_context(|| format!("read history {}", path.display()))?;
    parse_history(&raw).with_context(|| format!("load {}", path.display()))
}

/// Parse a single action, as printed by an external decider.
pub fn parse_action(raw: &str) -> Result<Action> {
    let value: Value = serde_json::from_str(raw.trim()).context("parse action json")?;
    validate_against_def(&value, json!({ "$ref": "#/$defs/action" })).context("validate action")?;
    serde_json::from_value(value).context("deserialize action")
}

/// Validate `instance` as an array whose items match `$defs/<item_def>`.
fn validate_array_of(instance: &Value, item_def: &str) -> Result<()> {
    let root = json!({
        "type": "array",
        "items": { "$ref": format!("#/$defs/{item_def}") }
    });
    validate_against_def(instance, root)
}

/// Validate `instance` against `root`, resolved inside the bundled events schema.
fn validate_against_def(instance: &Value, root: Value) -> Result<()> {
    let mut schema: Value = serde_json::from_str(EVENTS_SCHEMA).context("parse events schema")?;
    let (Some(schema_obj), Value::Object(root)) = (schema.as_object_mut(), root) else {
        bail!("events schema must be an object");
    };
    schema_obj.extend(root);
    validate_schema(instance, &schema)
}

/// Validate JSON instance against a JSON Schema (Draft 2020-12).
pub fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{CommandRun, Observation};

    #[test]
    fn parses_replay_script() {
        let actions = parse_replay_script(
            r#"[
                {"action": "run", "command": "ls", "timeout": 5},
                {"action": "delegate", "agent_name": "reviewer", "inputs": {"path": "a.rs"}},
                {"action": "finish"}
            ]"#,
        )
        .expect("parse");
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0], Action::Run(CommandRun::new("ls").with_timeout(5)));
        assert_eq!(actions[1].kind(), "delegate");
        assert_eq!(actions[2], Action::Finish);
    }

    #[test]
    fn replay_script_rejects_observations() {
        let err = parse_replay_script(r#"[{"observation": "error", "content": "x"}]"#)
            .unwrap_err();
        assert!(format!("{err:#}").contains("schema validation failed"));
    }

    #[test]
    fn replay_script_rejects_unknown_fields_and_kinds() {
        assert!(parse_replay_script(r#"[{"action": "run", "cmd": "ls"}]"#).is_err());
        assert!(parse_replay_script(r#"[{"action": "browse", "url": "x"}]"#).is_err());
        assert!(parse_replay_script(r#"{"action": "finish"}"#).is_err());
    }

    #[test]
    fn parses_single_action_with_surrounding_whitespace() {
        let action = parse_action("  {\"action\": \"message\", \"content\": \"done?\"}\n")
            .expect("parse");
        assert_eq!(action, Action::message("done?"));
        assert!(parse_action(r#"[{"action": "finish"}]"#).is_err());
    }

    #[test]
    fn empty_replay_script_is_valid() {
        assert!(parse_replay_script("[]").expect("parse").is_empty());
    }

    #[test]
    fn parses_mixed_history() {
        let history = parse_history(
            r#"[
                {"action": "message", "content": "fix the build", "source": "user"},
                {"action": "run", "command": "cargo build"},
                {"observation": "run", "command": "cargo build", "content": "ok", "exit_code": 0},
                {"observation": "condensation"}
            ]"#,
        )
        .expect("parse");
        assert_eq!(history.len(), 4);
        assert!(history.events()[0].is_user_message());
        assert_eq!(
            history.last().and_then(Event::as_observation),
            Some(&Observation::Condensation)
        );
    }

    #[test]
    fn history_rejects_wrong_field_types() {
        let err = parse_history(r#"[{"observation": "run", "command": "ls", "content": 3}]"#)
            .unwrap_err();
        assert!(format!("{err:#}").contains("validate history"));
    }

    #[test]
    fn load_replay_script_reports_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("script.json");
        fs::write(&path, "not json").expect("write");
        let err = load_replay_script(&path).unwrap_err();
        assert!(format!("{err:#}").contains("script.json"));
    }
}
