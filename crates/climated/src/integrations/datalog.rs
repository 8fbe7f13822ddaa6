//! Time-series data logger.
//!
//! Subscribes to the event bus and appends `<unix-timestamp> <value>` lines
//! to one flat file per signal under the configured data directory. The
//! `*Updated` events carry every observation, so the files sample at the
//! pollers' cadence whether or not anything changed.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use chrono::Local;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

use crate::engine::Event;
use crate::engine::EventBus;

/// Start logging events under `data_dir`; abort the handle to stop.
pub fn spawn(data_dir: PathBuf, events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        info!(dir = %data_dir.display(), "data logger started");
        loop {
            match rx.recv().await {
                Ok(event) => record(&data_dir, &event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "data logger lagged behind the event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn record(dir: &Path, event: &Event) {
    let (file, value) = match event {
        Event::TemperatureUpdated { location, value } => {
            (format!("sensor-{location}.dat"), format!("{value:.2}"))
        }
        Event::OutsideTemperatureUpdated { value } => {
            ("outside.dat".to_string(), format!("{value:.2}"))
        }
        Event::SetpointUpdated { value } => ("setpoint.dat".to_string(), format!("{value:.2}")),
        Event::AwayUpdated { away } => ("away.dat".to_string(), i32::from(*away).to_string()),
        Event::SystemModeUpdated { mode } => ("system-mode.dat".to_string(), mode.to_string()),
        Event::FanModeUpdated { mode } => ("fan-mode.dat".to_string(), mode.to_string()),
        _ => return,
    };

    append(&dir.join(file), &value);
}

fn append(path: &Path, value: &str) {
    let timestamp = Local::now().timestamp();
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut f| writeln!(f, "{timestamp} {value}"));

    if let Err(e) = result {
        warn!(error = %e, path = %path.display(), "failed to append data point");
    }
}
