//! vision_console - operator console for edge vision devices.
//!
//! Talks to one edge device over MQTT:
//! 1. Keeps the device's response, roster, count and sync topics subscribed
//!    (re-established on every reconnect)
//! 2. Requests snapshots and lets the operator draw zones and lines on them
//! 3. Sends set/delete/reset commands and shows live + historical counts
//!
//! Operator commands are read from stdin, one per line (`help` lists them).
//! Broker events, stdin, Ctrl-C and a timer tick all feed one channel that a
//! single loop drains, so the session state has exactly one mutator.

use anyhow::Result;
use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use vision_console::channel::CommandChannel;
use vision_console::config::ConsoleConfig;
use vision_console::coords::Size;
use vision_console::input::{parse_input, OperatorInput, HELP};
use vision_console::session::{CameraSessionManager, Notice, SessionSettings};
use vision_console::store::SqliteShapeStore;
use vision_console::transport::{
    spawn_pump, BrokerEndpoint, LinkEvent, MqttLink, MqttSettings, TlsMaterials, Topics,
};

#[path = "../ui.rs"]
mod ui;

const CONSOLE_NAME: &str = "vision_console";
const TICK: Duration = Duration::from_millis(250);
const KEEP_ALIVE: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Configure zones and lines on edge vision cameras over MQTT"
)]
struct Args {
    /// MQTT broker address.
    #[arg(long, env = "MQTT_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    mqtt_broker_addr: String,

    /// Allow non-loopback MQTT connections.
    #[arg(long, env = "ALLOW_REMOTE_MQTT")]
    allow_remote_mqtt: bool,

    /// MQTT username for authentication.
    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// MQTT password for authentication.
    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    /// Enable TLS for MQTT (required for mqtts:// brokers).
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    /// Path to a PEM-encoded CA certificate to trust for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CA_PATH")]
    mqtt_tls_ca_path: Option<PathBuf>,

    /// Path to a PEM-encoded client certificate for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_CERT_PATH")]
    mqtt_tls_client_cert_path: Option<PathBuf>,

    /// Path to a PEM-encoded client private key for MQTT TLS.
    #[arg(long, env = "MQTT_TLS_CLIENT_KEY_PATH")]
    mqtt_tls_client_key_path: Option<PathBuf>,

    /// MQTT client identifier (random suffix when unset).
    #[arg(long, env = "MQTT_CLIENT_ID")]
    mqtt_client_id: Option<String>,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

enum LoopEvent {
    Link(LinkEvent),
    Input(String),
    InputClosed,
    Shutdown,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let cfg = {
        let _stage = ui.stage("Load configuration");
        ConsoleConfig::load()?
    };
    let endpoint = BrokerEndpoint::parse(&args.mqtt_broker_addr, args.mqtt_use_tls)?;
    endpoint.require_loopback(args.allow_remote_mqtt)?;
    let tls = TlsMaterials::load(
        args.mqtt_tls_ca_path.as_deref(),
        args.mqtt_tls_client_cert_path.as_deref(),
        args.mqtt_tls_client_key_path.as_deref(),
    )?;

    let store = {
        let _stage = ui.stage("Open shape store");
        SqliteShapeStore::open(&cfg.db_path)?
    };

    let settings = MqttSettings {
        endpoint,
        tls,
        client_id: args
            .mqtt_client_id
            .clone()
            .unwrap_or_else(|| MqttSettings::unique_client_id(CONSOLE_NAME)),
        username: args.mqtt_username.clone(),
        password: args.mqtt_password.clone(),
        keep_alive: KEEP_ALIVE,
    };
    let (link, connection) = {
        let _stage = ui.stage("Configure MQTT client");
        MqttLink::connect(&settings)?
    };

    let topics = Topics::new(&cfg.device_id)?;
    let channel = CommandChannel::new(Box::new(link.clone()), topics, cfg.response_window);
    let mut manager = CameraSessionManager::new(
        channel,
        Box::new(store),
        SessionSettings::from_config(&cfg),
    );

    let (tx, rx) = mpsc::channel();

    let pump_tx = tx.clone();
    let pump = spawn_pump(connection, cfg.reconnect_backoff, move |event| {
        pump_tx.send(LoopEvent::Link(event)).is_ok()
    });

    let stdin_tx = tx.clone();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if stdin_tx.send(LoopEvent::Input(line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    log::warn!("stdin read failed: {}", e);
                    break;
                }
            }
        }
        let _ = stdin_tx.send(LoopEvent::InputClosed);
    });

    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(LoopEvent::Shutdown);
    })
    .expect("failed to install Ctrl-C handler");
    drop(tx);

    log::info!(
        "{} controlling device {} ({} camera slots); type 'help' for commands",
        CONSOLE_NAME,
        cfg.device_id,
        cfg.camera_slots.len()
    );
    run_loop(&mut manager, &rx, &ui, cfg.viewport.size());

    log::info!("shutting down");
    if let Err(e) = link.disconnect() {
        log::warn!("MQTT disconnect failed: {}", e);
    }
    drop(rx);
    let _ = pump.join();
    Ok(())
}

fn run_loop(manager: &mut CameraSessionManager, rx: &Receiver<LoopEvent>, ui: &ui::Ui, viewport: Size) {
    let mut snapshot_wait: Option<ui::StageGuard> = None;
    loop {
        match rx.recv_timeout(TICK) {
            Ok(LoopEvent::Link(event)) => manager.handle_link_event(event, Instant::now()),
            Ok(LoopEvent::Input(line)) => match parse_input(&line) {
                Ok(None) => {}
                Ok(Some(OperatorInput::Quit)) => return,
                Ok(Some(input)) => handle_input(manager, input, ui, &mut snapshot_wait),
                Err(e) => ui.error(&e),
            },
            Ok(LoopEvent::InputClosed) => {
                log::info!("stdin closed; still listening (Ctrl-C to exit)");
            }
            Ok(LoopEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }

        manager.poll_timeouts(Instant::now());
        for notice in manager.take_notices() {
            match &notice {
                Notice::SnapshotReady { camera, image } => {
                    snapshot_wait = None;
                    // Raw or sized snapshots can be drawn on straight away.
                    if manager.selected() == Some(camera.as_str()) {
                        if let Some(natural) = image.natural_size() {
                            if let Err(e) = manager.image_loaded(natural, viewport) {
                                ui.error(&e);
                            }
                        }
                    }
                }
                Notice::SnapshotFailed { message, .. } => {
                    if let Some(wait) = snapshot_wait.take() {
                        wait.fail(message);
                    }
                }
                Notice::SnapshotTimedOut { .. } => {
                    if let Some(wait) = snapshot_wait.take() {
                        wait.fail("timed out");
                    }
                }
                _ => {}
            }
            ui.notice(&notice);
        }
    }
}

fn handle_input(
    manager: &mut CameraSessionManager,
    input: OperatorInput,
    ui: &ui::Ui,
    snapshot_wait: &mut Option<ui::StageGuard>,
) {
    let now = Instant::now();
    match input {
        OperatorInput::Help => ui.info(&HELP),
        OperatorInput::Cameras => ui.cameras(manager.cameras(), manager.selected()),
        OperatorInput::Counts => match manager.displayed_counts() {
            Ok(rows) => ui.counts(&rows),
            Err(e) => ui.error(&e),
        },
        OperatorInput::Snapshot => match manager.request_snapshot(now) {
            Ok(_) => *snapshot_wait = Some(ui.stage("Waiting for snapshot")),
            Err(e) => ui.error(&e),
        },
        other => {
            if let Err(e) = manager.apply(other, now) {
                ui.error(&e);
            }
        }
    }
}
