//! Command envelopes sent to the edge device and the responses it returns.
//!
//! Wire form is `{"command": "<kind>", "payload": {...}}` on the device's
//! request topic. Responses carry no request id; see [`CommandScope`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::coords::SensorPoint;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandKind {
    StartPipeline,
    RequestSnapshot,
    SetZone,
    DeleteZone,
    ResetZoneCounts,
    SetLine,
    DeleteLine,
    ResetLineCounts,
}

impl CommandKind {
    pub const ALL: [CommandKind; 8] = [
        CommandKind::StartPipeline,
        CommandKind::RequestSnapshot,
        CommandKind::SetZone,
        CommandKind::DeleteZone,
        CommandKind::ResetZoneCounts,
        CommandKind::SetLine,
        CommandKind::DeleteLine,
        CommandKind::ResetLineCounts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartPipeline => "start_pipeline",
            Self::RequestSnapshot => "request_snapshot",
            Self::SetZone => "set_zone",
            Self::DeleteZone => "delete_zone",
            Self::ResetZoneCounts => "reset_zone_counts",
            Self::SetLine => "set_line",
            Self::DeleteLine => "delete_line",
            Self::ResetLineCounts => "reset_line_counts",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "command", content = "payload", rename_all = "snake_case")]
pub enum Command {
    StartPipeline {
        sources: Vec<String>,
    },
    RequestSnapshot {
        camera_id: String,
    },
    SetZone {
        camera_id: String,
        zone: u8,
        top_left: SensorPoint,
        bottom_right: SensorPoint,
    },
    DeleteZone {
        camera_id: String,
        zone: u8,
    },
    ResetZoneCounts {
        camera_id: String,
        zone: u8,
    },
    SetLine {
        camera_id: String,
        line_name: String,
        start: SensorPoint,
        end: SensorPoint,
    },
    DeleteLine {
        camera_id: String,
        line_name: String,
    },
    ResetLineCounts {
        camera_id: String,
        line_name: String,
    },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::StartPipeline { .. } => CommandKind::StartPipeline,
            Self::RequestSnapshot { .. } => CommandKind::RequestSnapshot,
            Self::SetZone { .. } => CommandKind::SetZone,
            Self::DeleteZone { .. } => CommandKind::DeleteZone,
            Self::ResetZoneCounts { .. } => CommandKind::ResetZoneCounts,
            Self::SetLine { .. } => CommandKind::SetLine,
            Self::DeleteLine { .. } => CommandKind::DeleteLine,
            Self::ResetLineCounts { .. } => CommandKind::ResetLineCounts,
        }
    }

    pub fn camera_id(&self) -> Option<&str> {
        match self {
            Self::StartPipeline { .. } => None,
            Self::RequestSnapshot { camera_id }
            | Self::SetZone { camera_id, .. }
            | Self::DeleteZone { camera_id, .. }
            | Self::ResetZoneCounts { camera_id, .. }
            | Self::SetLine { camera_id, .. }
            | Self::DeleteLine { camera_id, .. }
            | Self::ResetLineCounts { camera_id, .. } => Some(camera_id),
        }
    }

    pub fn scope(&self) -> CommandScope {
        let target = match self {
            Self::SetZone { zone, .. }
            | Self::DeleteZone { zone, .. }
            | Self::ResetZoneCounts { zone, .. } => Some(format!("zone{}", zone)),
            Self::SetLine { line_name, .. }
            | Self::DeleteLine { line_name, .. }
            | Self::ResetLineCounts { line_name, .. } => Some(format!("line_{}", line_name)),
            Self::StartPipeline { .. } | Self::RequestSnapshot { .. } => None,
        };
        CommandScope {
            kind: self.kind(),
            camera_id: self.camera_id().map(str::to_string),
            target,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Responses are matched to requests by topic and command name only, so at
/// most one request per scope may be outstanding.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandScope {
    pub kind: CommandKind,
    pub camera_id: Option<String>,
    pub target: Option<String>,
}

impl CommandScope {
    pub fn snapshot(camera_id: &str) -> Self {
        Self {
            kind: CommandKind::RequestSnapshot,
            camera_id: Some(camera_id.to_string()),
            target: None,
        }
    }
}

impl fmt::Display for CommandScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(camera) = &self.camera_id {
            write!(f, "[{}", camera)?;
            if let Some(target) = &self.target {
                write!(f, "/{}", target)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Deserialize)]
struct RawCommandResponse {
    command: String,
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    camera_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResponse {
    pub command: String,
    pub kind: Option<CommandKind>,
    pub status: ResponseStatus,
    pub message: Option<String>,
    pub camera_id: Option<String>,
}

impl CommandResponse {
    pub fn parse(payload: &[u8]) -> anyhow::Result<Self> {
        let raw: RawCommandResponse = serde_json::from_slice(payload)
            .map_err(|e| anyhow::anyhow!("parse command response: {}", e))?;
        let status = match raw.status.to_lowercase().as_str() {
            "success" | "ok" => ResponseStatus::Success,
            "error" | "failed" => ResponseStatus::Error,
            other => return Err(anyhow::anyhow!("unknown response status '{}'", other)),
        };
        Ok(Self {
            kind: CommandKind::parse(&raw.command),
            command: raw.command,
            status,
            message: raw.message,
            camera_id: raw.camera_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_zone_envelope_matches_wire_format() {
        let cmd = Command::SetZone {
            camera_id: "cam1".to_string(),
            zone: 2,
            top_left: [240, 180],
            bottom_right: [360, 288],
        };
        let value: serde_json::Value = serde_json::from_slice(&cmd.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "command": "set_zone",
                "payload": {
                    "camera_id": "cam1",
                    "zone": 2,
                    "top_left": [240, 180],
                    "bottom_right": [360, 288]
                }
            })
        );
    }

    #[test]
    fn line_commands_use_line_name_field() {
        let cmd = Command::ResetLineCounts {
            camera_id: "cam3".to_string(),
            line_name: "door".to_string(),
        };
        let value: serde_json::Value = serde_json::from_slice(&cmd.to_json().unwrap()).unwrap();
        assert_eq!(value["command"], "reset_line_counts");
        assert_eq!(value["payload"]["line_name"], "door");
    }

    #[test]
    fn kind_names_round_trip_through_parse() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(CommandKind::parse("reboot"), None);
    }

    #[test]
    fn scopes_distinguish_targets() {
        let a = Command::DeleteZone {
            camera_id: "cam1".into(),
            zone: 1,
        };
        let b = Command::DeleteZone {
            camera_id: "cam1".into(),
            zone: 2,
        };
        assert_ne!(a.scope(), b.scope());
        assert_eq!(a.scope().to_string(), "delete_zone[cam1/zone1]");
    }

    #[test]
    fn parses_error_response() {
        let resp = CommandResponse::parse(
            br#"{"command":"set_zone","status":"error","message":"zone limit reached"}"#,
        )
        .unwrap();
        assert_eq!(resp.kind, Some(CommandKind::SetZone));
        assert_eq!(resp.status, ResponseStatus::Error);
        assert_eq!(resp.message.as_deref(), Some("zone limit reached"));
    }

    #[test]
    fn rejects_response_without_status() {
        assert!(CommandResponse::parse(br#"{"command":"set_zone"}"#).is_err());
        assert!(CommandResponse::parse(b"not json").is_err());
    }
}
