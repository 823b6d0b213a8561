//! Vitrine IPC Protocol
//!
//! Shared types for daemon-CLI communication over a local named pipe.
//! Messages are newline-delimited JSON; one command line in, one response
//! line back.

use serde::{Deserialize, Serialize};

/// Named pipe path for IPC communication.
pub const PIPE_NAME: &str = r"\\.\pipe\vitrine";

/// Upper bound for a single IPC message. Commands are tiny; anything larger
/// is a misbehaving client.
pub const MAX_IPC_MESSAGE_SIZE: usize = 16 * 1024;

/// Commands the operator tooling can send to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KioskCommand {
    /// Query controller status.
    Status,
    /// Re-enumerate displays, recompute the target geometry and re-apply.
    Reprobe,
    /// Force a geometry correction pass now.
    Apply,
    /// Stop the daemon. This is the one sanctioned exit besides a kill
    /// signal; the surface's own close events never terminate anything.
    Stop,
}

/// A rectangle in screen coordinates, as reported over IPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl IpcRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

/// Responses from the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KioskResponse {
    /// Command executed successfully.
    Ok,
    /// Command failed with an error.
    Error {
        /// Error message describing what went wrong.
        message: String,
    },
    /// Status query response.
    Status {
        /// Daemon version.
        version: String,
        /// Surface lifecycle phase (`created`, `ready`, `shown`, `drifted`).
        phase: String,
        /// Target geometry the surface converges to.
        target: IpcRect,
        /// Whether fullscreen is asserted.
        fullscreen: bool,
        /// Pinned scale factor.
        scale_factor: f64,
        /// Geometry pushes since startup.
        corrections: u64,
        /// Termination events suppressed since startup.
        suppressed_closes: u64,
        /// Content load state (`idle`, `loading`, `ready`, `failed`).
        content: String,
        /// Seconds since the daemon started.
        uptime_seconds: u64,
    },
}

impl KioskResponse {
    /// Create an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization_uses_snake_case_tags() {
        let json = serde_json::to_string(&KioskCommand::Reprobe).unwrap();
        assert!(json.contains("reprobe"));

        let parsed: KioskCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, KioskCommand::Reprobe);
    }

    #[test]
    fn test_stop_command_roundtrip() {
        let json = serde_json::to_string(&KioskCommand::Stop).unwrap();
        let parsed: KioskCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, KioskCommand::Stop);
    }

    #[test]
    fn test_status_response_roundtrip() {
        let resp = KioskResponse::Status {
            version: "0.1.0".to_string(),
            phase: "shown".to_string(),
            target: IpcRect::new(0, 0, 1920, 1080),
            fullscreen: true,
            scale_factor: 1.0,
            corrections: 3,
            suppressed_closes: 12,
            content: "ready".to_string(),
            uptime_seconds: 86400,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"status\":\"status\""));
        assert!(json.contains("\"suppressed_closes\":12"));

        let parsed: KioskResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn test_error_response_helper() {
        let resp = KioskResponse::error("no display");
        match resp {
            KioskResponse::Error { message } => assert_eq!(message, "no display"),
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_line_delimited_protocol() {
        let cmd = KioskCommand::Status;
        let wire = serde_json::to_string(&cmd).unwrap() + "\n";
        assert!(!wire.trim().contains('\n'));

        let parsed: KioskCommand = serde_json::from_str(wire.trim()).unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn test_invalid_json_rejected() {
        for input in ["", "not json", "{", "null", "{\"type\":\"resize\"}"] {
            let result: Result<KioskCommand, _> = serde_json::from_str(input);
            assert!(result.is_err(), "should fail to parse: {}", input);
        }
    }

    #[test]
    fn test_pipe_name_format() {
        assert!(PIPE_NAME.starts_with(r"\\.\pipe\"));
    }

    #[test]
    fn test_max_message_size_bounds() {
        assert!(MAX_IPC_MESSAGE_SIZE >= 1024);
        assert!(MAX_IPC_MESSAGE_SIZE <= 1024 * 1024);
    }
}
