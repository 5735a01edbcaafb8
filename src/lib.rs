//! Vision Console
//!
//! Control-plane core for remote edge vision devices: an operator requests a
//! snapshot from a camera, draws counting zones and lines on it, and watches
//! occupancy and throughput counts. The edge device does all the vision work;
//! this crate only speaks its MQTT command protocol.
//!
//! # Architecture
//!
//! Components, leaves first:
//!
//! 1. **coords**: display-to-sensor coordinate mapping.
//! 2. **channel**: command envelopes out, response correlation in.
//! 3. **snapshot**: per-camera single-flight snapshot session with timeout.
//! 4. **editor**: zone/line drawing state machine with id and size checks.
//! 5. **counts**: live + cumulative count reconciliation.
//! 6. **session**: per-camera records, camera switch, roster handling.
//!
//! Everything is driven from a single event loop; no component is shared
//! between threads except the broker link, which the transport pump owns.
//!
//! # Module Structure
//!
//! - `transport`: broker link trait, rumqttc implementation, topic layout
//! - `store`: SQLite-backed shape and totals store
//! - `config`: file + environment configuration
//! - `picker`, `input`: operator-facing modal and line protocol

pub mod channel;
pub mod command;
pub mod config;
pub mod coords;
pub mod counts;
pub mod editor;
pub mod error;
pub mod input;
pub mod picker;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod transport;

pub use channel::{Ack, CommandChannel, CommandOutcome};
pub use command::{Command, CommandKind, CommandResponse, CommandScope, ResponseStatus};
pub use config::ConsoleConfig;
pub use coords::{map_point, CoordinateMapper, ImageGeometry, Point, SensorPoint, Size};
pub use counts::{CountAggregator, CountKey, CountRecord, DisplayedCounts, HIGH_TRAFFIC_THRESHOLD};
pub use editor::{Draft, EditorState, Rect, Segment, ZoneLineEditor};
pub use error::ConsoleError;
pub use picker::{PickerMsg, PickerOutcome, SourcePicker};
pub use session::{CameraRecord, CameraSessionManager, Notice, SessionSettings};
pub use snapshot::{SnapshotEvent, SnapshotImage, SnapshotSession, SnapshotSink, SNAPSHOT_TIMEOUT};
pub use store::{InMemoryShapeStore, ShapeStore, SqliteShapeStore, SyncedLine, SyncedZone};
pub use transport::{BrokerLink, InMemoryLink, LinkEvent};
