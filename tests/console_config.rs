use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use vision_console::config::ConsoleConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "VISION_CONSOLE_CONFIG",
        "VISION_DEVICE_ID",
        "VISION_CAMERA_SLOTS",
        "VISION_PIPELINE_SOURCES",
        "VISION_DB_PATH",
        "VISION_SNAPSHOT_DIR",
        "VISION_SNAPSHOT_TIMEOUT_SECS",
        "VISION_RESPONSE_WINDOW_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "device_id": "lobby-edge",
        "camera_slots": ["entrance", "exit"],
        "pipeline_sources": ["rtsp://10.0.0.5/stream1"],
        "db_path": "lobby.db",
        "snapshot_dir": "/var/lib/vision/snapshots",
        "snapshot_timeout_secs": 20,
        "viewport": { "width": 1280, "height": 720 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("VISION_CONSOLE_CONFIG", file.path());
    std::env::set_var("VISION_CAMERA_SLOTS", "entrance, exit ,dock");
    std::env::set_var("VISION_RESPONSE_WINDOW_SECS", "45");

    let cfg = ConsoleConfig::load().expect("load config");

    assert_eq!(cfg.device_id, "lobby-edge");
    assert_eq!(cfg.camera_slots, vec!["entrance", "exit", "dock"]);
    assert_eq!(cfg.pipeline_sources, vec!["rtsp://10.0.0.5/stream1"]);
    assert_eq!(cfg.db_path, "lobby.db");
    assert_eq!(
        cfg.snapshot_dir,
        std::path::PathBuf::from("/var/lib/vision/snapshots")
    );
    assert_eq!(cfg.snapshot_timeout, Duration::from_secs(20));
    assert_eq!(cfg.response_window, Duration::from_secs(45));
    assert_eq!(cfg.reconnect_backoff, Duration::from_secs(5));
    assert_eq!((cfg.viewport.width, cfg.viewport.height), (1280, 720));

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
device_id = "yard"
camera_slots = ["gate"]

[viewport]
width = 640
height = 480
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("VISION_CONSOLE_CONFIG", file.path());

    let cfg = ConsoleConfig::load().expect("load config");
    assert_eq!(cfg.device_id, "yard");
    assert_eq!(cfg.camera_slots, vec!["gate"]);
    assert_eq!(cfg.viewport.height, 480);
    assert_eq!(cfg.snapshot_timeout, Duration::from_secs(15));

    clear_env();
}

#[test]
fn defaults_apply_without_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = ConsoleConfig::load().expect("load config");
    assert_eq!(cfg.device_id, "edge-01");
    assert_eq!(cfg.camera_slots, vec!["cam1", "cam2", "cam3", "cam4"]);
    assert!(cfg.pipeline_sources.is_empty());
    assert_eq!(cfg.db_path, "vision_console.db");
    assert_eq!(cfg.response_window, Duration::from_secs(30));
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("VISION_DEVICE_ID", "edge/+");
    assert!(ConsoleConfig::load().is_err());
    clear_env();

    std::env::set_var("VISION_SNAPSHOT_TIMEOUT_SECS", "soon");
    assert!(ConsoleConfig::load().is_err());
    clear_env();

    std::env::set_var("VISION_SNAPSHOT_TIMEOUT_SECS", "0");
    assert!(ConsoleConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{"camera_slots": []}"#).expect("write config");
    std::env::set_var("VISION_CONSOLE_CONFIG", file.path());
    assert!(ConsoleConfig::load().is_err());
    clear_env();
}
