use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt::Display;
use std::time::{Duration, Instant};

use vision_console::counts::{CountKey, DisplayedCounts};
use vision_console::session::{CameraRecord, Notice};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        let pretty = is_tty
            && match mode {
                UiMode::Pretty | UiMode::Auto => true,
                UiMode::Plain => false,
            };
        Self { pretty }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty)
    }

    /// Spinner (or a plain banner) until the guard is dropped.
    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    pub fn notice(&self, notice: &Notice) {
        let marker = match notice {
            Notice::TransportError(_)
            | Notice::Disconnected(_)
            | Notice::CommandFailed { .. }
            | Notice::SnapshotFailed { .. }
            | Notice::SnapshotTimedOut { .. }
            | Notice::SelectionCleared { .. } => "!!",
            Notice::Sent { .. } | Notice::CountsUpdated { .. } => "..",
            _ => "--",
        };
        println!("{} {}", marker, notice);
    }

    pub fn error(&self, err: &dyn Display) {
        println!("!! {}", err);
    }

    pub fn info(&self, line: &dyn Display) {
        println!("{}", line);
    }

    pub fn cameras<'a>(&self, cameras: impl Iterator<Item = &'a CameraRecord>, selected: Option<&str>) {
        let mut any = false;
        for record in cameras {
            any = true;
            let mark = if selected == Some(record.id.as_str()) { "*" } else { " " };
            let state = if record.connected { "online" } else { "offline" };
            let snapshot = if record.snapshot.is_pending() {
                "snapshot pending"
            } else if record.snapshot.image().is_some() {
                "snapshot held"
            } else {
                ""
            };
            println!(
                "{} {:<12} {:<8} zones:{} lines:{} {}",
                mark,
                record.id,
                state,
                record.zone_count(),
                record.line_count(),
                snapshot
            );
        }
        if !any {
            println!("(no cameras reported yet)");
        }
    }

    pub fn counts(&self, rows: &[(CountKey, DisplayedCounts)]) {
        if rows.is_empty() {
            println!("(no counts yet)");
            return;
        }
        println!("{:<16} {:>8} {:>8} {:>10}", "id", "in", "out", "occupancy");
        for (key, shown) in rows {
            let occupancy = match shown.occupancy {
                Some(o) if shown.high_traffic => format!("{} HIGH", o),
                Some(o) => o.to_string(),
                None => "-".to_string(),
            };
            println!(
                "{:<16} {:>8} {:>8} {:>10}",
                key.to_string(),
                shown.entered,
                shown.exited,
                occupancy
            );
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: Option<String>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failed: None,
        }
    }

    /// Finish with a failure mark instead of a check.
    pub fn fail(mut self, reason: impl Display) {
        self.failed = Some(reason.to_string());
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = format_duration(self.start.elapsed());
        let message = match &self.failed {
            Some(reason) => format!("✘ {} ({}): {}", self.name, elapsed, reason),
            None => format!("✔ {} ({})", self.name, elapsed),
        };
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
