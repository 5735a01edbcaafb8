//! Camera session manager.
//!
//! Owns one [`CameraRecord`] per known camera, the current selection, the
//! command channel and the source picker. Every input (broker messages,
//! operator actions, timer ticks) goes through `&mut self`, so there is
//! exactly one mutator and camera switches are atomic with respect to
//! editor and snapshot state.
//!
//! Operations return `Result<_, ConsoleError>` for synchronous failures.
//! Asynchronous outcomes are queued as [`Notice`]s and drained with
//! [`CameraSessionManager::take_notices`].

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::channel::{Ack, CommandChannel};
use crate::command::{Command, CommandKind, ResponseStatus};
use crate::config::ConsoleConfig;
use crate::coords::{ImageGeometry, Point, Size};
use crate::counts::{parse_live, CountAggregator, CountKey, DisplayedCounts};
use crate::editor::{Draft, EditorState, ZoneLineEditor};
use crate::error::ConsoleError;
use crate::input::OperatorInput;
use crate::picker::{PickerMsg, PickerOutcome, SourcePicker};
use crate::snapshot::{SnapshotEvent, SnapshotImage, SnapshotSession, SnapshotSink};
use crate::store::{parse_line_sync, parse_zone_sync, ShapeStore, SyncedLine, SyncedZone};
use crate::transport::{validate_segment, InboundTopic, LinkEvent};

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub camera_slots: Vec<String>,
    pub pipeline_sources: Vec<String>,
    pub snapshot_dir: PathBuf,
    pub snapshot_timeout: Duration,
    /// Size the snapshot is drawn at on the operator's surface.
    pub rendered_size: Size,
}

impl SessionSettings {
    pub fn from_config(cfg: &ConsoleConfig) -> Self {
        Self {
            camera_slots: cfg.camera_slots.clone(),
            pipeline_sources: cfg.pipeline_sources.clone(),
            snapshot_dir: cfg.snapshot_dir.clone(),
            snapshot_timeout: cfg.snapshot_timeout,
            rendered_size: cfg.viewport.size(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Notice {
    Connected { subscriptions: usize },
    Disconnected(String),
    TransportError(ConsoleError),
    /// The broker client accepted a command; says nothing about execution.
    Sent { command: CommandKind, topic: String },
    CommandSucceeded { command: String, message: Option<String> },
    CommandFailed { command: String, message: String },
    SnapshotReady { camera: String, image: SnapshotImage },
    SnapshotFailed { camera: String, message: String },
    SnapshotTimedOut { camera: String },
    ZoneCommitted { camera: String, zone: u8 },
    LineCommitted { camera: String, name: String },
    ZoneDeleted { camera: String, zone: u8 },
    LineDeleted { camera: String, name: String },
    CountsReset { camera: String, key: CountKey },
    CountsUpdated { camera: String },
    ZonesSynced { camera: String, count: usize },
    LinesSynced { camera: String, count: usize },
    RosterUpdated { connected: Vec<String> },
    SelectionCleared { camera: String },
    PipelineStarted { sources: Vec<String> },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { subscriptions } => {
                write!(f, "connected to broker ({} subscriptions)", subscriptions)
            }
            Self::Disconnected(reason) => write!(f, "broker connection lost: {}", reason),
            Self::TransportError(e) => write!(f, "{}", e),
            Self::Sent { command, topic } => write!(f, "{} published to {}", command, topic),
            Self::CommandSucceeded { command, message } => match message {
                Some(m) => write!(f, "{} succeeded: {}", command, m),
                None => write!(f, "{} succeeded", command),
            },
            Self::CommandFailed { command, message } => {
                write!(f, "{} failed on device: {}", command, message)
            }
            Self::SnapshotReady { camera, image } => {
                write!(f, "snapshot for {} ready: {}", camera, image.location())
            }
            Self::SnapshotFailed { camera, message } => {
                write!(f, "snapshot for {} failed: {}", camera, message)
            }
            Self::SnapshotTimedOut { camera } => {
                write!(f, "snapshot request for {} timed out", camera)
            }
            Self::ZoneCommitted { camera, zone } => write!(f, "zone {} set on {}", zone, camera),
            Self::LineCommitted { camera, name } => {
                write!(f, "line '{}' set on {}", name, camera)
            }
            Self::ZoneDeleted { camera, zone } => {
                write!(f, "zone {} deleted on {}", zone, camera)
            }
            Self::LineDeleted { camera, name } => {
                write!(f, "line '{}' deleted on {}", name, camera)
            }
            Self::CountsReset { camera, key } => write!(f, "counts for {} reset on {}", key, camera),
            Self::CountsUpdated { camera } => write!(f, "counts updated for {}", camera),
            Self::ZonesSynced { camera, count } => {
                write!(f, "{} zone(s) synced for {}", count, camera)
            }
            Self::LinesSynced { camera, count } => {
                write!(f, "{} line(s) synced for {}", count, camera)
            }
            Self::RosterUpdated { connected } => {
                write!(f, "active cameras: [{}]", connected.join(", "))
            }
            Self::SelectionCleared { camera } => {
                write!(f, "{} left the roster; selection cleared", camera)
            }
            Self::PipelineStarted { sources } => {
                write!(f, "start_pipeline sent for {} source(s)", sources.len())
            }
        }
    }
}

/// Everything the console knows about one camera.
#[derive(Debug)]
pub struct CameraRecord {
    pub id: String,
    pub connected: bool,
    pub editor: ZoneLineEditor,
    pub snapshot: SnapshotSession,
    /// Set once the snapshot has loaded; drives the coordinate mapper.
    pub geometry: Option<ImageGeometry>,
    pub counts: CountAggregator,
    pub synced_zones: BTreeMap<u8, SyncedZone>,
    pub synced_lines: BTreeMap<String, SyncedLine>,
}

impl CameraRecord {
    fn new(id: &str, snapshot_timeout: Duration) -> Self {
        Self {
            id: id.to_string(),
            connected: false,
            editor: ZoneLineEditor::new(),
            snapshot: SnapshotSession::new(id, snapshot_timeout),
            geometry: None,
            counts: CountAggregator::new(),
            synced_zones: BTreeMap::new(),
            synced_lines: BTreeMap::new(),
        }
    }

    fn knows_zone(&self, id: u8) -> bool {
        self.editor.has_zone(id)
            || self.synced_zones.contains_key(&id)
            || self.counts.record(&CountKey::Zone(id)).is_some()
    }

    fn knows_line(&self, name: &str) -> bool {
        self.editor.has_line(name)
            || self.synced_lines.contains_key(name)
            || self
                .counts
                .record(&CountKey::Line(name.to_string()))
                .is_some()
    }

    /// Distinct zones, whether drawn here or reported by a full sync.
    pub fn zone_count(&self) -> usize {
        self.editor
            .zones()
            .keys()
            .chain(self.synced_zones.keys())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn line_count(&self) -> usize {
        self.editor
            .lines()
            .keys()
            .chain(self.synced_lines.keys())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Drop everything tied to the edit surface of this camera.
    fn deactivate(&mut self, channel: &mut CommandChannel) {
        self.snapshot.close(channel);
        self.editor.reset();
        self.geometry = None;
        self.counts.clear_all();
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RosterEntry {
    Id(String),
    Status {
        camera_id: String,
        #[serde(default = "default_connected")]
        connected: bool,
    },
}

fn default_connected() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RosterPayload {
    Bare(Vec<RosterEntry>),
    Wrapped { cameras: Vec<RosterEntry> },
}

pub struct CameraSessionManager {
    channel: CommandChannel,
    store: Box<dyn ShapeStore>,
    sink: SnapshotSink,
    settings: SessionSettings,
    cameras: BTreeMap<String, CameraRecord>,
    selected: Option<String>,
    picker: SourcePicker,
    notices: Vec<Notice>,
}

impl CameraSessionManager {
    pub fn new(channel: CommandChannel, store: Box<dyn ShapeStore>, settings: SessionSettings) -> Self {
        Self {
            channel,
            store,
            sink: SnapshotSink::new(settings.snapshot_dir.clone()),
            settings,
            cameras: BTreeMap::new(),
            selected: None,
            picker: SourcePicker::new(),
            notices: Vec::new(),
        }
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    pub fn picker(&self) -> &SourcePicker {
        &self.picker
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn camera(&self, id: &str) -> Option<&CameraRecord> {
        self.cameras.get(id)
    }

    pub fn cameras(&self) -> impl Iterator<Item = &CameraRecord> {
        self.cameras.values()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    fn record_entry(&mut self, camera: &str) -> &mut CameraRecord {
        let timeout = self.settings.snapshot_timeout;
        self.cameras
            .entry(camera.to_string())
            .or_insert_with(|| CameraRecord::new(camera, timeout))
    }

    fn active_id(&self) -> Result<String, ConsoleError> {
        self.selected.clone().ok_or(ConsoleError::NoActiveCamera)
    }

    fn sent(&mut self, ack: &Ack) {
        self.notices.push(Notice::Sent {
            command: ack.command,
            topic: ack.topic.clone(),
        });
    }

    // ---- broker side ----

    pub fn handle_link_event(&mut self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::Connected => self.on_connected(),
            LinkEvent::Disconnected(reason) => self.notices.push(Notice::Disconnected(reason)),
            LinkEvent::Message { topic, payload } => self.handle_message(&topic, &payload, now),
        }
    }

    fn on_connected(&mut self) {
        let result = self.channel.resubscribe_all(&self.settings.camera_slots);
        // pending snapshots for cameras outside the provisioned slots
        let extra: Vec<String> = self
            .cameras
            .values()
            .filter(|r| r.snapshot.is_pending() && !self.settings.camera_slots.contains(&r.id))
            .map(|r| self.channel.topics().snapshot_response(&r.id))
            .collect();
        let mut extra_ok = 0;
        for topic in extra {
            match self.channel.subscribe(&topic) {
                Ok(()) => extra_ok += 1,
                Err(e) => self.notices.push(Notice::TransportError(e)),
            }
        }
        match result {
            Ok(n) => {
                log::info!("re-subscribed {} topics", n + extra_ok);
                self.notices.push(Notice::Connected {
                    subscriptions: n + extra_ok,
                });
            }
            Err(e) => {
                log::warn!("resubscription incomplete: {}", e);
                self.notices.push(Notice::TransportError(e));
            }
        }
    }

    pub fn handle_message(&mut self, topic: &str, payload: &[u8], now: Instant) {
        let Some(inbound) = self.channel.topics().classify(topic) else {
            log::debug!("ignoring message on unrecognised topic {}", topic);
            return;
        };
        match inbound {
            InboundTopic::CommandResponse => self.on_command_response(topic, payload),
            InboundTopic::Roster => self.on_roster(topic, payload),
            InboundTopic::Counts(camera) => self.on_counts(&camera, topic, payload, now),
            InboundTopic::ZonesFullSync(camera) => self.on_zone_sync(&camera, topic, payload),
            InboundTopic::LinesFullSync(camera) => self.on_line_sync(&camera, topic, payload),
            InboundTopic::Snapshot(camera) => self.on_snapshot(&camera, payload),
        }
    }

    fn on_command_response(&mut self, topic: &str, payload: &[u8]) {
        let outcome = match self.channel.resolve_response(payload) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("dropping malformed payload on {}: {:#}", topic, e);
                return;
            }
        };
        let response = outcome.response;
        match response.status {
            ResponseStatus::Success => self.notices.push(Notice::CommandSucceeded {
                command: response.command,
                message: response.message,
            }),
            ResponseStatus::Error => {
                let message = response
                    .message
                    .unwrap_or_else(|| "no message from device".to_string());
                log::warn!("{} failed on device: {}", response.command, message);
                self.notices.push(Notice::CommandFailed {
                    command: response.command,
                    message,
                });
            }
        }
    }

    fn on_roster(&mut self, topic: &str, payload: &[u8]) {
        let entries = match serde_json::from_slice::<RosterPayload>(payload) {
            Ok(RosterPayload::Bare(entries)) | Ok(RosterPayload::Wrapped { cameras: entries }) => {
                entries
            }
            Err(e) => {
                log::warn!("dropping malformed payload on {}: {}", topic, e);
                return;
            }
        };
        let mut listed = BTreeMap::new();
        for entry in entries {
            let (id, connected) = match entry {
                RosterEntry::Id(id) => (id, true),
                RosterEntry::Status {
                    camera_id,
                    connected,
                } => (camera_id, connected),
            };
            if let Err(e) = validate_segment(&id) {
                log::warn!("skipping roster entry: {}", e);
                continue;
            }
            listed.insert(id, connected);
        }

        for record in self.cameras.values_mut() {
            record.connected = false;
        }
        for (id, connected) in &listed {
            self.record_entry(id).connected = *connected;
        }

        if let Some(selected) = self.selected.clone() {
            let still_there = self.cameras.get(&selected).is_some_and(|r| r.connected);
            if !still_there {
                log::info!("{} dropped from the roster, clearing selection", selected);
                if let Some(record) = self.cameras.get_mut(&selected) {
                    record.deactivate(&mut self.channel);
                }
                self.selected = None;
                self.notices.push(Notice::SelectionCleared { camera: selected });
            }
        }

        let connected = self
            .cameras
            .values()
            .filter(|r| r.connected)
            .map(|r| r.id.clone())
            .collect();
        self.notices.push(Notice::RosterUpdated { connected });
    }

    fn on_counts(&mut self, camera: &str, topic: &str, payload: &[u8], now: Instant) {
        let live = match parse_live(payload) {
            Ok(live) => live,
            Err(e) => {
                log::warn!("dropping malformed payload on {}: {:#}", topic, e);
                return;
            }
        };
        let totals = match self.store.cumulative_totals(camera) {
            Ok(totals) => Some(totals),
            Err(e) => {
                log::warn!("cumulative totals for {} unavailable: {:#}", camera, e);
                None
            }
        };
        let record = self.record_entry(camera);
        record.counts.apply_live(&live, now);
        if let Some(totals) = totals {
            record.counts.apply_cumulative(&totals);
        }
        self.notices.push(Notice::CountsUpdated {
            camera: camera.to_string(),
        });
    }

    fn on_zone_sync(&mut self, camera: &str, topic: &str, payload: &[u8]) {
        let zones = match parse_zone_sync(payload) {
            Ok(zones) => zones,
            Err(e) => {
                log::warn!("dropping malformed payload on {}: {:#}", topic, e);
                return;
            }
        };
        if let Err(e) = self.store.write_zones(camera, &zones) {
            log::warn!("failed to persist zones for {}: {:#}", camera, e);
        }
        let count = zones.len();
        self.record_entry(camera).synced_zones = zones.into_iter().map(|z| (z.zone, z)).collect();
        self.notices.push(Notice::ZonesSynced {
            camera: camera.to_string(),
            count,
        });
    }

    fn on_line_sync(&mut self, camera: &str, topic: &str, payload: &[u8]) {
        let lines = match parse_line_sync(payload) {
            Ok(lines) => lines,
            Err(e) => {
                log::warn!("dropping malformed payload on {}: {:#}", topic, e);
                return;
            }
        };
        if let Err(e) = self.store.write_lines(camera, &lines) {
            log::warn!("failed to persist lines for {}: {:#}", camera, e);
        }
        let count = lines.len();
        self.record_entry(camera).synced_lines = lines
            .into_iter()
            .map(|l| (l.line_name.clone(), l))
            .collect();
        self.notices.push(Notice::LinesSynced {
            camera: camera.to_string(),
            count,
        });
    }

    fn on_snapshot(&mut self, camera: &str, payload: &[u8]) {
        let Some(record) = self.cameras.get_mut(camera) else {
            log::debug!("snapshot response for unknown camera {}", camera);
            return;
        };
        match record
            .snapshot
            .on_message(payload, &self.sink, &mut self.channel)
        {
            SnapshotEvent::Ready(image) => self.notices.push(Notice::SnapshotReady {
                camera: camera.to_string(),
                image,
            }),
            SnapshotEvent::Failed(message) => self.notices.push(Notice::SnapshotFailed {
                camera: camera.to_string(),
                message,
            }),
            SnapshotEvent::Ignored => {}
        }
    }

    /// Expire stale pending commands and abandon overdue snapshot waits.
    pub fn poll_timeouts(&mut self, now: Instant) {
        self.channel.expire(now);
        for record in self.cameras.values_mut() {
            if record.snapshot.poll_timeout(&mut self.channel, now) {
                self.notices.push(Notice::SnapshotTimedOut {
                    camera: record.id.clone(),
                });
            }
        }
    }

    // ---- operator side ----

    pub fn select_camera(&mut self, camera: &str) -> Result<(), ConsoleError> {
        let record = self
            .cameras
            .get(camera)
            .ok_or_else(|| ConsoleError::UnknownCamera(camera.to_string()))?;
        if !record.connected {
            return Err(ConsoleError::InvalidState("camera is not connected"));
        }
        if self.selected.as_deref() == Some(camera) {
            return Ok(());
        }
        self.deselect();
        self.selected = Some(camera.to_string());
        log::info!("active camera: {}", camera);
        Ok(())
    }

    pub fn deselect(&mut self) {
        if let Some(previous) = self.selected.take() {
            if let Some(record) = self.cameras.get_mut(&previous) {
                record.deactivate(&mut self.channel);
            }
            log::debug!("cleared edit surface for {}", previous);
        }
    }

    pub fn request_snapshot(&mut self, now: Instant) -> Result<Ack, ConsoleError> {
        let camera = self.active_id()?;
        let record = self
            .cameras
            .get_mut(&camera)
            .ok_or_else(|| ConsoleError::UnknownCamera(camera.clone()))?;
        let ack = record.snapshot.start(&mut self.channel, now)?;
        record.geometry = None;
        record.editor.set_bounds(None);
        self.sent(&ack);
        Ok(ack)
    }

    pub fn close_snapshot(&mut self) -> Result<(), ConsoleError> {
        let camera = self.active_id()?;
        let record = self
            .cameras
            .get_mut(&camera)
            .ok_or_else(|| ConsoleError::UnknownCamera(camera.clone()))?;
        record.snapshot.close(&mut self.channel);
        record.editor.discard();
        record.editor.set_bounds(None);
        record.geometry = None;
        Ok(())
    }

    /// The snapshot finished loading at `rendered` size; drawing is enabled.
    pub fn image_loaded(&mut self, natural: Size, rendered: Size) -> Result<(), ConsoleError> {
        let record = self.active_mut()?;
        if record.snapshot.image().is_none() {
            return Err(ConsoleError::ImageNotLoaded);
        }
        let geometry = ImageGeometry::new(natural, rendered)?;
        record.geometry = Some(geometry);
        record.editor.set_bounds(Some(rendered));
        log::debug!(
            "{}: natural {}x{}, rendered {}x{}",
            record.id,
            natural.width,
            natural.height,
            rendered.width,
            rendered.height
        );
        Ok(())
    }

    fn active_mut(&mut self) -> Result<&mut CameraRecord, ConsoleError> {
        let camera = self.active_id()?;
        self.cameras
            .get_mut(&camera)
            .ok_or(ConsoleError::UnknownCamera(camera))
    }

    pub fn editor_state(&self) -> Option<&EditorState> {
        let camera = self.selected.as_deref()?;
        self.cameras.get(camera).map(|r| r.editor.state())
    }

    pub fn arm_zone(&mut self, id: u8) -> Result<(), ConsoleError> {
        let record = self.active_mut()?;
        if record.synced_zones.contains_key(&id) {
            return Err(ConsoleError::DuplicateZone(id));
        }
        record.editor.arm_zone(id)
    }

    pub fn arm_line(&mut self, name: &str) -> Result<(), ConsoleError> {
        let record = self.active_mut()?;
        if record.synced_lines.contains_key(name.trim()) {
            return Err(ConsoleError::DuplicateLine(name.trim().to_string()));
        }
        record.editor.arm_line(name)
    }

    pub fn pointer_down(&mut self, p: Point) -> Result<(), ConsoleError> {
        self.active_mut()?.editor.pointer_down(p)
    }

    pub fn pointer_move(&mut self, p: Point) -> Result<(), ConsoleError> {
        self.active_mut()?.editor.pointer_move(p);
        Ok(())
    }

    pub fn pointer_leave(&mut self) -> Result<bool, ConsoleError> {
        Ok(self.active_mut()?.editor.pointer_leave())
    }

    pub fn discard(&mut self) -> Result<(), ConsoleError> {
        self.active_mut()?.editor.discard();
        Ok(())
    }

    /// Finish a drag. A valid shape is mapped to sensor space and sent; it
    /// is added to the committed set only once the publish was accepted.
    pub fn pointer_up(&mut self, now: Instant) -> Result<Option<Ack>, ConsoleError> {
        let camera = self.active_id()?;
        let record = self
            .cameras
            .get_mut(&camera)
            .ok_or_else(|| ConsoleError::UnknownCamera(camera.clone()))?;
        let Some(draft) = record.editor.pointer_up()? else {
            return Ok(None);
        };
        let geometry = record.geometry.ok_or(ConsoleError::ImageNotLoaded)?;
        let command = draft.to_command(&camera, &geometry.mapper());
        let notice = match &draft {
            Draft::Zone { id, .. } => Notice::ZoneCommitted {
                camera: camera.clone(),
                zone: *id,
            },
            Draft::Line { name, .. } => Notice::LineCommitted {
                camera: camera.clone(),
                name: name.clone(),
            },
        };
        let ack = self.channel.send(&command, now)?;
        record.editor.commit(draft)?;
        self.sent(&ack);
        self.notices.push(notice);
        Ok(Some(ack))
    }

    pub fn delete_zone(&mut self, id: u8, now: Instant) -> Result<Ack, ConsoleError> {
        let camera = self.active_id()?;
        let record = self
            .cameras
            .get_mut(&camera)
            .ok_or_else(|| ConsoleError::UnknownCamera(camera.clone()))?;
        if !record.knows_zone(id) {
            return Err(ConsoleError::UnknownZone(id));
        }
        let ack = self.channel.send(
            &Command::DeleteZone {
                camera_id: camera.clone(),
                zone: id,
            },
            now,
        )?;
        record.editor.remove_zone(id);
        record.synced_zones.remove(&id);
        record.counts.clear(&CountKey::Zone(id));
        self.sent(&ack);
        self.notices.push(Notice::ZoneDeleted { camera, zone: id });
        Ok(ack)
    }

    pub fn delete_line(&mut self, name: &str, now: Instant) -> Result<Ack, ConsoleError> {
        let camera = self.active_id()?;
        let record = self
            .cameras
            .get_mut(&camera)
            .ok_or_else(|| ConsoleError::UnknownCamera(camera.clone()))?;
        if !record.knows_line(name) {
            return Err(ConsoleError::UnknownLine(name.to_string()));
        }
        let ack = self.channel.send(
            &Command::DeleteLine {
                camera_id: camera.clone(),
                line_name: name.to_string(),
            },
            now,
        )?;
        record.editor.remove_line(name);
        record.synced_lines.remove(name);
        record.counts.clear(&CountKey::Line(name.to_string()));
        self.sent(&ack);
        self.notices.push(Notice::LineDeleted {
            camera,
            name: name.to_string(),
        });
        Ok(ack)
    }

    pub fn reset_zone_counts(&mut self, id: u8, now: Instant) -> Result<Ack, ConsoleError> {
        let camera = self.active_id()?;
        let record = self
            .cameras
            .get_mut(&camera)
            .ok_or_else(|| ConsoleError::UnknownCamera(camera.clone()))?;
        if !record.knows_zone(id) {
            return Err(ConsoleError::UnknownZone(id));
        }
        let ack = self.channel.send(
            &Command::ResetZoneCounts {
                camera_id: camera.clone(),
                zone: id,
            },
            now,
        )?;
        let key = CountKey::Zone(id);
        record.counts.clear(&key);
        self.sent(&ack);
        self.notices.push(Notice::CountsReset { camera, key });
        Ok(ack)
    }

    pub fn reset_line_counts(&mut self, name: &str, now: Instant) -> Result<Ack, ConsoleError> {
        let camera = self.active_id()?;
        let record = self
            .cameras
            .get_mut(&camera)
            .ok_or_else(|| ConsoleError::UnknownCamera(camera.clone()))?;
        if !record.knows_line(name) {
            return Err(ConsoleError::UnknownLine(name.to_string()));
        }
        let ack = self.channel.send(
            &Command::ResetLineCounts {
                camera_id: camera.clone(),
                line_name: name.to_string(),
            },
            now,
        )?;
        let key = CountKey::Line(name.to_string());
        record.counts.clear(&key);
        self.sent(&ack);
        self.notices.push(Notice::CountsReset { camera, key });
        Ok(ack)
    }

    /// Displayed counts for the active camera, zones first.
    pub fn displayed_counts(&self) -> Result<Vec<(CountKey, DisplayedCounts)>, ConsoleError> {
        let camera = self.selected.as_deref().ok_or(ConsoleError::NoActiveCamera)?;
        let record = self
            .cameras
            .get(camera)
            .ok_or_else(|| ConsoleError::UnknownCamera(camera.to_string()))?;
        Ok(record
            .counts
            .records()
            .keys()
            .filter_map(|key| record.counts.displayed(key).map(|d| (key.clone(), d)))
            .collect())
    }

    pub fn open_picker(&mut self) -> Result<(), ConsoleError> {
        self.picker
            .update(PickerMsg::Open(self.settings.pipeline_sources.clone()))?;
        Ok(())
    }

    pub fn picker_msg(&mut self, msg: PickerMsg, now: Instant) -> Result<PickerOutcome, ConsoleError> {
        let outcome = self.picker.update(msg)?;
        if let PickerOutcome::Submit(sources) = &outcome {
            let ack = self.channel.send(
                &Command::StartPipeline {
                    sources: sources.clone(),
                },
                now,
            )?;
            self.picker.close();
            self.sent(&ack);
            self.notices.push(Notice::PipelineStarted {
                sources: sources.clone(),
            });
        }
        Ok(outcome)
    }

    /// Route one operator action. `image` uses the configured rendered size.
    /// Display-only inputs (`cameras`, `counts`, `help`, `quit`) are left to
    /// the console and are no-ops here.
    pub fn apply(&mut self, input: OperatorInput, now: Instant) -> Result<(), ConsoleError> {
        match input {
            OperatorInput::Select(camera) => self.select_camera(&camera),
            OperatorInput::Deselect => {
                self.deselect();
                Ok(())
            }
            OperatorInput::Snapshot => self.request_snapshot(now).map(|_| ()),
            OperatorInput::Close => self.close_snapshot(),
            OperatorInput::ImageLoaded { width, height } => self.image_loaded(
                Size::new(width as f64, height as f64),
                self.settings.rendered_size,
            ),
            OperatorInput::ArmZone(id) => self.arm_zone(id),
            OperatorInput::ArmLine(name) => self.arm_line(&name),
            OperatorInput::Down(p) => self.pointer_down(p),
            OperatorInput::Move(p) => self.pointer_move(p),
            OperatorInput::Up => self.pointer_up(now).map(|_| ()),
            OperatorInput::Leave => self.pointer_leave().map(|_| ()),
            OperatorInput::Discard => self.discard(),
            OperatorInput::DeleteZone(id) => self.delete_zone(id, now).map(|_| ()),
            OperatorInput::DeleteLine(name) => self.delete_line(&name, now).map(|_| ()),
            OperatorInput::ResetZone(id) => self.reset_zone_counts(id, now).map(|_| ()),
            OperatorInput::ResetLine(name) => self.reset_line_counts(&name, now).map(|_| ()),
            OperatorInput::Pick => self.open_picker(),
            OperatorInput::Toggle(source) => self.picker_msg(PickerMsg::Toggle(source), now).map(|_| ()),
            OperatorInput::Confirm => self.picker_msg(PickerMsg::Confirm, now).map(|_| ()),
            OperatorInput::Cancel => self.picker_msg(PickerMsg::Cancel, now).map(|_| ()),
            OperatorInput::Cameras | OperatorInput::Counts | OperatorInput::Help | OperatorInput::Quit => {
                Ok(())
            }
        }
    }

    /// Connected camera ids, for display.
    pub fn connected_cameras(&self) -> BTreeSet<&str> {
        self.cameras
            .values()
            .filter(|r| r.connected)
            .map(|r| r.id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryShapeStore;
    use crate::transport::{InMemoryLink, Topics};

    const REQUEST: &str = "vision/edge-01/command/request";

    fn manager() -> (CameraSessionManager, InMemoryLink, tempfile::TempDir) {
        let link = InMemoryLink::new();
        let channel = CommandChannel::new(
            Box::new(link.clone()),
            Topics::new("edge-01").unwrap(),
            Duration::from_secs(30),
        );
        let dir = tempfile::tempdir().unwrap();
        let settings = SessionSettings {
            camera_slots: vec!["cam1".to_string(), "cam2".to_string()],
            pipeline_sources: vec!["rtsp://a".to_string()],
            snapshot_dir: dir.path().to_path_buf(),
            snapshot_timeout: Duration::from_secs(15),
            rendered_size: Size::new(800.0, 600.0),
        };
        let mgr = CameraSessionManager::new(channel, Box::new(InMemoryShapeStore::new()), settings);
        (mgr, link, dir)
    }

    fn roster(mgr: &mut CameraSessionManager, payload: &str) {
        mgr.handle_message(
            "vision/edge-01/cameras/active_list",
            payload.as_bytes(),
            Instant::now(),
        );
    }

    /// Select `camera`, take a snapshot and load it at 800x600 from 1920x1080.
    fn ready(mgr: &mut CameraSessionManager, camera: &str, now: Instant) {
        mgr.select_camera(camera).unwrap();
        mgr.request_snapshot(now).unwrap();
        mgr.handle_message(
            &format!("vision/edge-01/{}/snapshot/response", camera),
            br#"{"status":"success","payload":"http://edge/snap.jpg"}"#,
            now,
        );
        mgr.image_loaded(Size::new(1920.0, 1080.0), Size::new(800.0, 600.0))
            .unwrap();
    }

    #[test]
    fn shape_counts_do_not_double_count_synced_echoes() {
        let (mut mgr, _link, _dir) = manager();
        roster(&mut mgr, r#"["cam1"]"#);
        let now = Instant::now();
        ready(&mut mgr, "cam1", now);
        mgr.arm_zone(1).unwrap();
        mgr.pointer_down(Point::new(10.0, 10.0)).unwrap();
        mgr.pointer_move(Point::new(100.0, 100.0)).unwrap();
        mgr.pointer_up(now).unwrap();
        mgr.handle_message(
            "vision/edge-01/cam1/zones/full_data",
            br#"[{"zone":1,"top_left":[24,24],"bottom_right":[240,180]},{"zone":3,"top_left":[0,0],"bottom_right":[50,50]}]"#,
            now,
        );
        let record = mgr.camera("cam1").unwrap();
        assert_eq!(record.zone_count(), 2);
        assert_eq!(record.line_count(), 0);
    }

    #[test]
    fn roster_accepts_all_shapes() {
        let (mut mgr, _link, _dir) = manager();
        roster(&mut mgr, r#"["cam1","cam2"]"#);
        assert_eq!(mgr.connected_cameras().len(), 2);
        roster(
            &mut mgr,
            r#"{"cameras":[{"camera_id":"cam1","connected":true},{"camera_id":"cam2","connected":false}]}"#,
        );
        assert_eq!(mgr.connected_cameras().into_iter().collect::<Vec<_>>(), vec!["cam1"]);
        roster(&mut mgr, r#"["bad/id"]"#);
        assert!(mgr.connected_cameras().is_empty());
    }

    #[test]
    fn roster_removal_clears_selection() {
        let (mut mgr, link, _dir) = manager();
        roster(&mut mgr, r#"["cam1"]"#);
        mgr.select_camera("cam1").unwrap();
        mgr.request_snapshot(Instant::now()).unwrap();
        roster(&mut mgr, r#"[]"#);
        assert_eq!(mgr.selected(), None);
        assert!(!mgr.camera("cam1").unwrap().snapshot.is_pending());
        assert!(link.log().active_subscriptions().is_empty());
        assert!(mgr
            .take_notices()
            .contains(&Notice::SelectionCleared {
                camera: "cam1".to_string()
            }));
    }

    #[test]
    fn zone_drag_transmits_sensor_coordinates() {
        let (mut mgr, link, _dir) = manager();
        roster(&mut mgr, r#"["cam1"]"#);
        let now = Instant::now();
        ready(&mut mgr, "cam1", now);
        mgr.arm_zone(1).unwrap();
        mgr.pointer_down(Point::new(100.0, 100.0)).unwrap();
        mgr.pointer_move(Point::new(150.0, 160.0)).unwrap();
        assert!(mgr.pointer_up(now).unwrap().is_some());

        let sent = link.published_to(REQUEST);
        let set_zone = sent.last().unwrap();
        assert_eq!(set_zone["command"], "set_zone");
        assert_eq!(set_zone["payload"]["top_left"], serde_json::json!([240, 180]));
        assert_eq!(set_zone["payload"]["bottom_right"], serde_json::json!([360, 288]));
        assert!(mgr.camera("cam1").unwrap().editor.has_zone(1));
    }

    #[test]
    fn transport_failure_on_commit_adds_nothing() {
        let (mut mgr, link, _dir) = manager();
        roster(&mut mgr, r#"["cam1"]"#);
        let now = Instant::now();
        ready(&mut mgr, "cam1", now);
        mgr.arm_zone(2).unwrap();
        mgr.pointer_down(Point::new(10.0, 10.0)).unwrap();
        mgr.pointer_move(Point::new(100.0, 100.0)).unwrap();
        link.fail_publishes(1);
        let err = mgr.pointer_up(now).unwrap_err();
        assert!(matches!(err, ConsoleError::Transport { .. }));
        let record = mgr.camera("cam1").unwrap();
        assert!(!record.editor.has_zone(2));
        assert_eq!(record.editor.state(), &EditorState::Idle);
    }

    #[test]
    fn camera_switch_clears_previous_surface() {
        let (mut mgr, _link, _dir) = manager();
        roster(&mut mgr, r#"["cam1","cam2"]"#);
        let now = Instant::now();
        ready(&mut mgr, "cam1", now);
        mgr.arm_line("door").unwrap();
        mgr.pointer_down(Point::new(0.0, 0.0)).unwrap();
        mgr.handle_message(
            "vision/edge-01/cam1/counts/update",
            br#"{"zone1":{"in":1,"out":0}}"#,
            now,
        );

        mgr.select_camera("cam2").unwrap();
        let cam1 = mgr.camera("cam1").unwrap();
        assert_eq!(cam1.editor.state(), &EditorState::Idle);
        assert!(cam1.geometry.is_none());
        assert!(cam1.snapshot.image().is_none());
        assert!(cam1.counts.is_empty());
        assert_eq!(
            mgr.pointer_down(Point::new(1.0, 1.0)),
            Err(ConsoleError::ImageNotLoaded)
        );
    }

    #[test]
    fn delete_removes_local_state_only_after_ack() {
        let (mut mgr, link, _dir) = manager();
        roster(&mut mgr, r#"["cam1"]"#);
        let now = Instant::now();
        ready(&mut mgr, "cam1", now);
        mgr.arm_zone(3).unwrap();
        mgr.pointer_down(Point::new(0.0, 0.0)).unwrap();
        mgr.pointer_move(Point::new(50.0, 50.0)).unwrap();
        mgr.pointer_up(now).unwrap();

        link.fail_publishes(1);
        assert!(mgr.delete_zone(3, now).is_err());
        assert!(mgr.camera("cam1").unwrap().editor.has_zone(3));

        mgr.delete_zone(3, now).unwrap();
        assert!(!mgr.camera("cam1").unwrap().editor.has_zone(3));
        assert_eq!(mgr.delete_zone(3, now), Err(ConsoleError::UnknownZone(3)));
    }

    #[test]
    fn synced_shapes_are_addressable() {
        let (mut mgr, link, _dir) = manager();
        roster(&mut mgr, r#"["cam1"]"#);
        mgr.select_camera("cam1").unwrap();
        mgr.handle_message(
            "vision/edge-01/cam1/lines/full_data",
            br#"[{"line_name":"exit","start":[0,0],"end":[100,0]}]"#,
            Instant::now(),
        );
        assert_eq!(
            mgr.arm_line("exit"),
            Err(ConsoleError::DuplicateLine("exit".to_string()))
        );
        mgr.reset_line_counts("exit", Instant::now()).unwrap();
        let sent = link.published_to(REQUEST);
        assert_eq!(sent[0]["command"], "reset_line_counts");
        assert_eq!(sent[0]["payload"]["line_name"], "exit");
    }

    #[test]
    fn command_error_is_surfaced_with_name() {
        let (mut mgr, _link, _dir) = manager();
        mgr.handle_message(
            "vision/edge-01/command/response",
            br#"{"command":"set_zone","status":"error","message":"zone overlaps"}"#,
            Instant::now(),
        );
        assert_eq!(
            mgr.take_notices(),
            vec![Notice::CommandFailed {
                command: "set_zone".to_string(),
                message: "zone overlaps".to_string()
            }]
        );
    }

    #[test]
    fn reconnect_resubscribes_every_slot() {
        let (mut mgr, link, _dir) = manager();
        mgr.handle_link_event(LinkEvent::Connected, Instant::now());
        let active = link.log().active_subscriptions();
        assert_eq!(active.len(), 7);
        assert!(active.contains(&"vision/edge-01/cam2/snapshot/response".to_string()));
        assert_eq!(
            mgr.take_notices(),
            vec![Notice::Connected { subscriptions: 7 }]
        );
    }

    #[test]
    fn picker_submits_start_pipeline() {
        let (mut mgr, link, _dir) = manager();
        let now = Instant::now();
        mgr.open_picker().unwrap();
        assert!(mgr.picker_msg(PickerMsg::Confirm, now).is_err());
        mgr.picker_msg(PickerMsg::Toggle("rtsp://a".to_string()), now)
            .unwrap();
        link.fail_publishes(1);
        assert!(mgr.picker_msg(PickerMsg::Confirm, now).is_err());
        assert!(mgr.picker().is_open());
        assert!(mgr.picker().is_selected("rtsp://a"));

        let outcome = mgr.picker_msg(PickerMsg::Confirm, now).unwrap();
        assert_eq!(outcome, PickerOutcome::Submit(vec!["rtsp://a".to_string()]));
        assert!(!mgr.picker().is_open());
        let sent = link.published_to(REQUEST);
        assert_eq!(sent[0]["command"], "start_pipeline");
        assert_eq!(sent[0]["payload"]["sources"], serde_json::json!(["rtsp://a"]));
    }
}
