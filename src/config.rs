use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coords::Size;
use crate::transport::validate_segment;

const DEFAULT_DEVICE_ID: &str = "edge-01";
const DEFAULT_CAMERA_SLOTS: [&str; 4] = ["cam1", "cam2", "cam3", "cam4"];
const DEFAULT_DB_PATH: &str = "vision_console.db";
const DEFAULT_SNAPSHOT_DIR: &str = "snapshots";
const DEFAULT_SNAPSHOT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_RESPONSE_WINDOW_SECS: u64 = 30;
const DEFAULT_RECONNECT_BACKOFF_SECS: u64 = 5;
const DEFAULT_VIEWPORT_WIDTH: u32 = 800;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 600;

#[derive(Debug, Deserialize, Default)]
struct ConsoleConfigFile {
    device_id: Option<String>,
    camera_slots: Option<Vec<String>>,
    pipeline_sources: Option<Vec<String>>,
    db_path: Option<String>,
    snapshot_dir: Option<PathBuf>,
    snapshot_timeout_secs: Option<u64>,
    response_window_secs: Option<u64>,
    reconnect_backoff_secs: Option<u64>,
    viewport: Option<ViewportConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ViewportConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub device_id: String,
    /// Pre-provisioned camera slots; each gets a standing snapshot subscription.
    pub camera_slots: Vec<String>,
    /// Candidates offered by the source picker.
    pub pipeline_sources: Vec<String>,
    pub db_path: String,
    pub snapshot_dir: PathBuf,
    pub snapshot_timeout: Duration,
    pub response_window: Duration,
    pub reconnect_backoff: Duration,
    /// Rendered size of the drawing surface.
    pub viewport: Viewport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn size(&self) -> Size {
        Size::new(self.width as f64, self.height as f64)
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self::from_file(ConsoleConfigFile::default())
    }
}

impl ConsoleConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VISION_CONSOLE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConsoleConfigFile) -> Self {
        let viewport = Viewport {
            width: file
                .viewport
                .as_ref()
                .and_then(|v| v.width)
                .unwrap_or(DEFAULT_VIEWPORT_WIDTH),
            height: file
                .viewport
                .as_ref()
                .and_then(|v| v.height)
                .unwrap_or(DEFAULT_VIEWPORT_HEIGHT),
        };
        Self {
            device_id: file
                .device_id
                .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string()),
            camera_slots: file.camera_slots.unwrap_or_else(|| {
                DEFAULT_CAMERA_SLOTS
                    .iter()
                    .map(|slot| slot.to_string())
                    .collect()
            }),
            pipeline_sources: file.pipeline_sources.unwrap_or_default(),
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            snapshot_dir: file
                .snapshot_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            snapshot_timeout: Duration::from_secs(
                file.snapshot_timeout_secs
                    .unwrap_or(DEFAULT_SNAPSHOT_TIMEOUT_SECS),
            ),
            response_window: Duration::from_secs(
                file.response_window_secs
                    .unwrap_or(DEFAULT_RESPONSE_WINDOW_SECS),
            ),
            reconnect_backoff: Duration::from_secs(
                file.reconnect_backoff_secs
                    .unwrap_or(DEFAULT_RECONNECT_BACKOFF_SECS),
            ),
            viewport,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("VISION_DEVICE_ID") {
            if !device.trim().is_empty() {
                self.device_id = device.trim().to_string();
            }
        }
        if let Ok(slots) = std::env::var("VISION_CAMERA_SLOTS") {
            let parsed = split_csv(&slots);
            if !parsed.is_empty() {
                self.camera_slots = parsed;
            }
        }
        if let Ok(sources) = std::env::var("VISION_PIPELINE_SOURCES") {
            self.pipeline_sources = split_csv(&sources);
        }
        if let Ok(path) = std::env::var("VISION_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("VISION_SNAPSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.snapshot_dir = PathBuf::from(dir);
            }
        }
        if let Ok(secs) = std::env::var("VISION_SNAPSHOT_TIMEOUT_SECS") {
            self.snapshot_timeout = parse_secs("VISION_SNAPSHOT_TIMEOUT_SECS", &secs)?;
        }
        if let Ok(secs) = std::env::var("VISION_RESPONSE_WINDOW_SECS") {
            self.response_window = parse_secs("VISION_RESPONSE_WINDOW_SECS", &secs)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        validate_segment(&self.device_id).map_err(|e| anyhow!("device_id: {}", e))?;
        if self.camera_slots.is_empty() {
            return Err(anyhow!("camera_slots must not be empty"));
        }
        let mut seen = BTreeSet::new();
        for slot in &self.camera_slots {
            validate_segment(slot).map_err(|e| anyhow!("camera_slots: {}", e))?;
            if !seen.insert(slot.as_str()) {
                return Err(anyhow!("camera_slots: duplicate slot '{}'", slot));
            }
        }
        if self.snapshot_timeout.is_zero() {
            return Err(anyhow!("snapshot timeout must be greater than zero"));
        }
        if self.response_window.is_zero() {
            return Err(anyhow!("response window must be greater than zero"));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(anyhow!("viewport dimensions must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ConsoleConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_secs(var: &str, value: &str) -> Result<Duration> {
    let seconds: u64 = value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be an integer number of seconds", var))?;
    Ok(Duration::from_secs(seconds))
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
