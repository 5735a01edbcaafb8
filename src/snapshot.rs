//! Per-camera snapshot request/response session.
//!
//! ```text
//! Idle --start--> Requested --response--> Idle (image held, ready to edit)
//!                     \------timeout----> Idle (diagnostic)
//! ```
//!
//! Only one request per camera may be outstanding. The first response after a
//! `start` sets the handled guard; everything after it (duplicates from QoS 1
//! redelivery, late answers) is dropped until the next `start`.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::channel::{Ack, CommandChannel};
use crate::command::{Command, CommandScope};
use crate::coords::Size;
use crate::error::ConsoleError;

pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Debug, PartialEq)]
pub enum SnapshotImage {
    /// URL or data URI supplied by the edge device.
    Reference {
        uri: String,
        natural: Option<(u32, u32)>,
    },
    /// Raw image bytes written to a local file.
    File {
        path: PathBuf,
        natural: Option<(u32, u32)>,
    },
}

impl SnapshotImage {
    pub fn natural_size(&self) -> Option<Size> {
        let natural = match self {
            Self::Reference { natural, .. } | Self::File { natural, .. } => *natural,
        };
        natural.map(|(w, h)| Size::new(w as f64, h as f64))
    }

    pub fn location(&self) -> String {
        match self {
            Self::Reference { uri, .. } => uri.clone(),
            Self::File { path, .. } => path.display().to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotPhase {
    Idle,
    Requested { deadline: Instant },
}

#[derive(Clone, Debug, PartialEq)]
pub enum SnapshotEvent {
    Ready(SnapshotImage),
    Failed(String),
    Ignored,
}

#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    status: String,
    #[serde(default)]
    payload: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImagePayload {
    image: String,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

/// Writes raw snapshot bytes to disk so the console can hand out a path.
#[derive(Clone, Debug)]
pub struct SnapshotSink {
    dir: PathBuf,
}

impl SnapshotSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn materialize(&self, camera_id: &str, bytes: &[u8]) -> Result<SnapshotImage> {
        if bytes.is_empty() {
            return Err(anyhow!("empty snapshot payload"));
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create snapshot dir {}", self.dir.display()))?;
        let ext = image::guess_format(bytes)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("bin");
        let path = self.dir.join(format!("{}.{}", camera_id, ext));
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        let natural = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()
            .and_then(|reader| reader.into_dimensions().ok());
        Ok(SnapshotImage::File { path, natural })
    }
}

#[derive(Debug)]
pub struct SnapshotSession {
    camera_id: String,
    phase: SnapshotPhase,
    image: Option<SnapshotImage>,
    handled: bool,
    timeout: Duration,
}

impl SnapshotSession {
    pub fn new(camera_id: &str, timeout: Duration) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            phase: SnapshotPhase::Idle,
            image: None,
            handled: false,
            timeout,
        }
    }

    pub fn phase(&self) -> SnapshotPhase {
        self.phase
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.phase, SnapshotPhase::Requested { .. })
    }

    pub fn image(&self) -> Option<&SnapshotImage> {
        self.image.as_ref()
    }

    /// Resubscribe to the response topic, drop any held image and publish
    /// `request_snapshot`. On a transport failure nothing changes.
    pub fn start(&mut self, channel: &mut CommandChannel, now: Instant) -> Result<Ack, ConsoleError> {
        if self.is_pending() {
            return Err(ConsoleError::AlreadyInProgress {
                camera: self.camera_id.clone(),
            });
        }
        let topic = channel.topics().snapshot_response(&self.camera_id);
        channel.unsubscribe(&topic)?;
        if let Err(e) = channel.subscribe(&topic) {
            if let Err(restore) = channel.subscribe(&topic) {
                log::warn!("could not restore subscription to {}: {}", topic, restore);
            }
            return Err(e);
        }
        let ack = channel.send(
            &Command::RequestSnapshot {
                camera_id: self.camera_id.clone(),
            },
            now,
        )?;

        self.image = None;
        self.handled = false;
        self.phase = SnapshotPhase::Requested {
            deadline: now + self.timeout,
        };
        Ok(ack)
    }

    pub fn on_message(
        &mut self,
        payload: &[u8],
        sink: &SnapshotSink,
        channel: &mut CommandChannel,
    ) -> SnapshotEvent {
        if self.handled || !self.is_pending() {
            log::debug!(
                "ignoring snapshot response for {} (handled: {}, pending: {})",
                self.camera_id,
                self.handled,
                self.is_pending()
            );
            return SnapshotEvent::Ignored;
        }
        self.handled = true;
        self.phase = SnapshotPhase::Idle;
        channel.release(&CommandScope::snapshot(&self.camera_id));

        let result = match serde_json::from_slice::<SnapshotEnvelope>(payload) {
            Ok(envelope) => image_from_envelope(envelope),
            Err(_) => sink
                .materialize(&self.camera_id, payload)
                .map_err(|e| format!("{:#}", e)),
        };
        match result {
            Ok(image) => {
                log::info!("snapshot for {} ready: {}", self.camera_id, image.location());
                self.image = Some(image.clone());
                SnapshotEvent::Ready(image)
            }
            Err(message) => {
                log::warn!("snapshot for {} failed: {}", self.camera_id, message);
                SnapshotEvent::Failed(message)
            }
        }
    }

    /// Abandon the local wait once the deadline passes. The published request
    /// itself cannot be recalled.
    pub fn poll_timeout(&mut self, channel: &mut CommandChannel, now: Instant) -> bool {
        match self.phase {
            SnapshotPhase::Requested { deadline } if now >= deadline => {
                log::warn!(
                    "snapshot request for {} timed out after {}s",
                    self.camera_id,
                    self.timeout.as_secs()
                );
                self.abandon(channel);
                true
            }
            _ => false,
        }
    }

    /// Close the snapshot view: abandon any wait and drop the image.
    pub fn close(&mut self, channel: &mut CommandChannel) {
        if self.is_pending() {
            self.abandon(channel);
        }
        self.image = None;
    }

    fn abandon(&mut self, channel: &mut CommandChannel) {
        let topic = channel.topics().snapshot_response(&self.camera_id);
        if let Err(e) = channel.unsubscribe(&topic) {
            log::warn!("{}", e);
        }
        channel.release(&CommandScope::snapshot(&self.camera_id));
        self.phase = SnapshotPhase::Idle;
    }
}

fn image_from_envelope(envelope: SnapshotEnvelope) -> std::result::Result<SnapshotImage, String> {
    match envelope.status.to_lowercase().as_str() {
        "success" | "ok" => {}
        "error" | "failed" => {
            return Err(envelope
                .message
                .unwrap_or_else(|| "edge device reported a snapshot error".to_string()))
        }
        other => return Err(format!("unknown snapshot status '{}'", other)),
    }
    match envelope.payload {
        Some(serde_json::Value::String(uri)) if !uri.is_empty() => Ok(SnapshotImage::Reference {
            uri,
            natural: None,
        }),
        Some(value @ serde_json::Value::Object(_)) => {
            let payload: ImagePayload = serde_json::from_value(value)
                .map_err(|e| format!("invalid snapshot payload: {}", e))?;
            Ok(SnapshotImage::Reference {
                uri: payload.image,
                natural: payload.width.zip(payload.height),
            })
        }
        _ => Err("snapshot response carried no image".to_string()),
    }
}
