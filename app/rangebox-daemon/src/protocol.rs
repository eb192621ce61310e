//! Wire protocol of the engine.
//!
//! One JSON object per line in, one per line out. Incoming envelopes are
//! validated at this boundary into typed per-command requests; nothing
//! downstream sees raw argument maps.

use rangebox_constants::wire;
use rangebox_core::{ExercisePatch, OperationResult, PlatformPatch};
use rangebox_fleet::InstanceRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Raw wire input.
#[derive(Debug, Deserialize)]
pub struct CommandEnvelope {
    pub prog: String,
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

/// Wire output; always produced, never an unhandled fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub status: String,
    pub message: String,
    pub data: Value,
}

impl ResultEnvelope {
    /// Error envelope with an empty payload.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: wire::STATUS_ERROR.to_string(),
            message: message.into(),
            data: Value::Object(serde_json::Map::new()),
        }
    }

    /// Collapses an [`OperationResult`] into its wire form. Failures carry
    /// the operation message with the original error text appended.
    #[must_use]
    pub fn from_operation(result: OperationResult) -> Self {
        let status = if result.success {
            wire::STATUS_OK
        } else {
            wire::STATUS_ERROR
        };
        let message = match &result.error {
            Some(error) if !result.success => format!("{}: {}", result.message, error),
            _ => result.message.clone(),
        };
        Self {
            status: status.to_string(),
            message,
            data: result.data.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
        }
    }

    /// Whether this envelope reports success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == wire::STATUS_OK
    }
}

/// Validated request, ready for dispatch.
#[derive(Debug)]
pub enum Request {
    Exercises(ExerciseCommand),
    Platform(PlatformCommand),
}

/// Commands of the pooled exercise program (`JS`).
#[derive(Debug)]
pub enum ExerciseCommand {
    Start,
    Stop,
    StopOne(InstanceRef),
    Status,
    StatusOne(InstanceRef),
    Config,
    SetConfig(ExercisePatch),
    Restart,
    PortsRange,
    GenerateMissions,
}

/// Commands of the platform pair program (`RTB`).
#[derive(Debug)]
pub enum PlatformCommand {
    Start,
    Stop,
    Status,
    Config,
    SetConfig(PlatformPatch),
    Restart,
}

/// Protocol-level rejections. Displayed verbatim on the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON format")]
    InvalidJson,

    #[error("Program not recognized")]
    UnknownProgram,

    #[error("Command not recognized by program")]
    UnknownCommand,

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
}

/// Parses one request line into a validated [`Request`].
///
/// # Errors
///
/// Returns a [`ProtocolError`] describing the first rejection.
pub fn parse_line(line: &str) -> Result<Request, ProtocolError> {
    let envelope: CommandEnvelope =
        serde_json::from_str(line.trim()).map_err(|_| ProtocolError::InvalidJson)?;
    parse_envelope(&envelope)
}

fn parse_envelope(envelope: &CommandEnvelope) -> Result<Request, ProtocolError> {
    match envelope.prog.as_str() {
        wire::PROG_EXERCISES => Ok(Request::Exercises(parse_exercise_command(envelope)?)),
        wire::PROG_PLATFORM => Ok(Request::Platform(parse_platform_command(envelope)?)),
        _ => Err(ProtocolError::UnknownProgram),
    }
}

fn parse_exercise_command(envelope: &CommandEnvelope) -> Result<ExerciseCommand, ProtocolError> {
    match envelope.command.as_str() {
        "START" => Ok(ExerciseCommand::Start),
        "STOP" => Ok(ExerciseCommand::Stop),
        "STOP_ONE" => Ok(ExerciseCommand::StopOne(instance_ref(&envelope.args)?)),
        "STATUS" => Ok(ExerciseCommand::Status),
        "STATUS_ONE" => Ok(ExerciseCommand::StatusOne(instance_ref(&envelope.args)?)),
        "CONFIG" => Ok(ExerciseCommand::Config),
        "SET_CONFIG" => Ok(ExerciseCommand::SetConfig(patch(&envelope.args)?)),
        "RESTART" => Ok(ExerciseCommand::Restart),
        "PORTS_RANGE" => Ok(ExerciseCommand::PortsRange),
        "GENERATE_MISSIONS" => Ok(ExerciseCommand::GenerateMissions),
        _ => Err(ProtocolError::UnknownCommand),
    }
}

fn parse_platform_command(envelope: &CommandEnvelope) -> Result<PlatformCommand, ProtocolError> {
    match envelope.command.as_str() {
        "START" => Ok(PlatformCommand::Start),
        "STOP" => Ok(PlatformCommand::Stop),
        "STATUS" => Ok(PlatformCommand::Status),
        "CONFIG" => Ok(PlatformCommand::Config),
        "SET_CONFIG" => Ok(PlatformCommand::SetConfig(patch(&envelope.args)?)),
        "RESTART" => Ok(PlatformCommand::Restart),
        _ => Err(ProtocolError::UnknownCommand),
    }
}

/// Arguments selecting one pool instance.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InstanceArgs {
    port: Option<u16>,
    container: Option<String>,
}

fn instance_ref(args: &Value) -> Result<InstanceRef, ProtocolError> {
    let args: InstanceArgs = serde_json::from_value(non_null(args))
        .map_err(|e| ProtocolError::InvalidArgs(e.to_string()))?;
    match (args.port, args.container) {
        (Some(port), _) => Ok(InstanceRef::Port(port)),
        (None, Some(container)) => Ok(InstanceRef::Name(container)),
        (None, None) => Err(ProtocolError::InvalidArgs(
            "either 'port' or 'container' is required".to_string(),
        )),
    }
}

fn patch<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ProtocolError> {
    serde_json::from_value(non_null(args)).map_err(|e| ProtocolError::InvalidArgs(e.to_string()))
}

/// Missing `args` arrive as JSON null; treat them as an empty map.
fn non_null(args: &Value) -> Value {
    if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_json_rejected() {
        let err = parse_line("{not json").unwrap_err();
        assert_eq!(err.to_string(), "Invalid JSON format");
    }

    #[test]
    fn test_unknown_program_rejected() {
        let err = parse_line(r#"{"prog": "XX", "command": "START"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Program not recognized");
    }

    #[test]
    fn test_unknown_command_rejected() {
        let err = parse_line(r#"{"prog": "RTB", "command": "STOP_ONE"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Command not recognized by program");
    }

    #[test]
    fn test_missing_args_default_to_empty() {
        let request = parse_line(r#"{"prog": "JS", "command": "START"}"#).unwrap();
        assert!(matches!(request, Request::Exercises(ExerciseCommand::Start)));
    }

    #[test]
    fn test_stop_one_accepts_port_or_container() {
        let by_port =
            parse_line(r#"{"prog": "JS", "command": "STOP_ONE", "args": {"port": 3001}}"#).unwrap();
        assert!(matches!(
            by_port,
            Request::Exercises(ExerciseCommand::StopOne(InstanceRef::Port(3001)))
        ));

        let by_name = parse_line(
            r#"{"prog": "JS", "command": "STOP_ONE", "args": {"container": "js_3001"}}"#,
        )
        .unwrap();
        assert!(matches!(
            by_name,
            Request::Exercises(ExerciseCommand::StopOne(InstanceRef::Name(_)))
        ));

        let neither =
            parse_line(r#"{"prog": "JS", "command": "STOP_ONE", "args": {}}"#).unwrap_err();
        assert!(matches!(neither, ProtocolError::InvalidArgs(_)));
    }

    #[test]
    fn test_set_config_args_typed() {
        let request = parse_line(
            r#"{"prog": "JS", "command": "SET_CONFIG", "args": {"lifespan_minutes": 30}}"#,
        )
        .unwrap();
        match request {
            Request::Exercises(ExerciseCommand::SetConfig(patch)) => {
                assert_eq!(patch.lifespan_minutes, Some(30));
                assert!(patch.port_start.is_none());
            }
            other => panic!("unexpected request: {other:?}"),
        }

        let bad = parse_line(
            r#"{"prog": "JS", "command": "SET_CONFIG", "args": {"bogus_field": 1}}"#,
        )
        .unwrap_err();
        assert!(matches!(bad, ProtocolError::InvalidArgs(_)));
    }

    #[test]
    fn test_failed_operation_appends_error() {
        let envelope = ResultEnvelope::from_operation(OperationResult::failed(
            "Failed to start js_3000",
            "image missing",
        ));
        assert_eq!(envelope.status, "error");
        assert_eq!(envelope.message, "Failed to start js_3000: image missing");
    }

    #[test]
    fn test_ok_operation_keeps_message() {
        let envelope = ResultEnvelope::from_operation(OperationResult::ok("No available ports"));
        assert_eq!(envelope.status, "ok");
        assert_eq!(envelope.message, "No available ports");
        assert!(envelope.data.as_object().unwrap().is_empty());
    }
}
