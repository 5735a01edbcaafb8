//! Operator-facing error type.
//!
//! Plumbing code (config, store, broker link) returns `anyhow::Result`.
//! Anything the operator can trigger and needs to read back is a
//! `ConsoleError`, so the console can render it without downcasting.

use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum ConsoleError {
    /// Publish/subscribe failure; `operation` names what was being attempted.
    Transport { operation: String, message: String },
    /// A snapshot request for this camera is still waiting for its response.
    AlreadyInProgress { camera: String },
    /// A command with the same scope is awaiting its response.
    CommandInFlight { scope: String },
    ZoneIdOutOfRange(u8),
    DuplicateZone(u8),
    EmptyLineName,
    DuplicateLine(String),
    ZoneTooSmall { width: f64, height: f64 },
    LineTooShort { length: f64 },
    ImageNotLoaded,
    NoActiveCamera,
    UnknownCamera(String),
    UnknownZone(u8),
    UnknownLine(String),
    InvalidState(&'static str),
    InvalidIdentifier(String),
}

impl ConsoleError {
    pub fn transport(operation: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Local validation failures never reach the network.
    pub fn is_local_validation(&self) -> bool {
        matches!(
            self,
            Self::ZoneIdOutOfRange(_)
                | Self::DuplicateZone(_)
                | Self::EmptyLineName
                | Self::DuplicateLine(_)
                | Self::ZoneTooSmall { .. }
                | Self::LineTooShort { .. }
        )
    }
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { operation, message } => {
                write!(f, "{} failed: {}", operation, message)
            }
            Self::AlreadyInProgress { camera } => {
                write!(f, "snapshot request for {} already in progress", camera)
            }
            Self::CommandInFlight { scope } => {
                write!(f, "{} is still awaiting a response", scope)
            }
            Self::ZoneIdOutOfRange(id) => write!(
                f,
                "zone id {} out of range ({}..={})",
                id,
                crate::editor::MIN_ZONE_ID,
                crate::editor::MAX_ZONE_ID
            ),
            Self::DuplicateZone(id) => write!(f, "zone {} already exists", id),
            Self::EmptyLineName => write!(f, "line name must not be empty"),
            Self::DuplicateLine(name) => write!(f, "line '{}' already exists", name),
            Self::ZoneTooSmall { width, height } => write!(
                f,
                "zone too small: {:.0}x{:.0} px (minimum {:.0}x{:.0})",
                width,
                height,
                crate::editor::MIN_ZONE_SIDE,
                crate::editor::MIN_ZONE_SIDE
            ),
            Self::LineTooShort { length } => write!(
                f,
                "line too short: {:.1} px (minimum {:.0})",
                length,
                crate::editor::MIN_LINE_LENGTH
            ),
            Self::ImageNotLoaded => write!(f, "snapshot image has not finished loading"),
            Self::NoActiveCamera => write!(f, "no camera selected"),
            Self::UnknownCamera(id) => write!(f, "camera {} is not in the active roster", id),
            Self::UnknownZone(id) => write!(f, "zone {} is not known for this camera", id),
            Self::UnknownLine(name) => write!(f, "line '{}' is not known for this camera", name),
            Self::InvalidState(what) => f.write_str(what),
            Self::InvalidIdentifier(id) => write!(
                f,
                "identifier '{}' must match ^[A-Za-z0-9_.-]{{1,64}}$",
                id
            ),
        }
    }
}

impl std::error::Error for ConsoleError {}
