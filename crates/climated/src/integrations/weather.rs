//! Outside weather poller.
//!
//! Polls a JSON endpoint in the background and stores the latest observation
//! in lock-free cells. Any fetch or parse failure degrades the reading to
//! NaN, which the policy engine treats as "unknown": comparisons against it
//! fail closed and auto mode falls back to heating.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::config::WeatherConfig;
use crate::engine::device::OutsideWeatherSource;
use crate::engine::Event;
use crate::engine::EventBus;

#[derive(Debug, Deserialize)]
struct WeatherObservation {
    temperature: f64,

    #[serde(default = "nan")]
    humidity: f64,
}

fn nan() -> f64 {
    f64::NAN
}

struct Cells {
    temperature: AtomicU64,
    humidity: AtomicU64,
}

impl Cells {
    fn store(&self, cell: &AtomicU64, value: f64) {
        cell.store(value.to_bits(), Ordering::Relaxed);
    }

    fn load(&self, cell: &AtomicU64) -> f64 {
        f64::from_bits(cell.load(Ordering::Relaxed))
    }
}

/// Shared handle to the latest weather observation.
#[derive(Clone)]
pub struct WeatherPoller {
    cells: Arc<Cells>,
}

impl OutsideWeatherSource for WeatherPoller {
    fn temperature(&self) -> f64 {
        self.cells.load(&self.cells.temperature)
    }

    fn relative_humidity(&self) -> f64 {
        self.cells.load(&self.cells.humidity)
    }
}

/// Treat NaN as a value so an outage registers as a transition exactly once.
fn observably_different(old: f64, new: f64) -> bool {
    if old.is_nan() || new.is_nan() {
        old.is_nan() != new.is_nan()
    } else {
        old != new
    }
}

/// Start polling. The returned poller reads the latest observation; abort
/// the handle to stop.
pub fn spawn(config: &WeatherConfig, events: EventBus) -> (WeatherPoller, JoinHandle<()>) {
    let cells = Arc::new(Cells {
        temperature: AtomicU64::new(f64::NAN.to_bits()),
        humidity: AtomicU64::new(f64::NAN.to_bits()),
    });
    let poller = WeatherPoller {
        cells: cells.clone(),
    };

    let url = config.url.clone();
    let interval = Duration::from_secs(config.poll_secs);
    let handle = tokio::spawn(async move {
        let client = reqwest::Client::new();
        loop {
            let observation = fetch(&client, &url).await.unwrap_or_else(|e| {
                warn!(error = %e, url = %url, "weather fetch failed, degrading to NaN");
                WeatherObservation {
                    temperature: f64::NAN,
                    humidity: f64::NAN,
                }
            });

            let previous = cells.load(&cells.temperature);
            cells.store(&cells.temperature, observation.temperature);
            cells.store(&cells.humidity, observation.humidity);
            debug!(
                temperature = observation.temperature,
                humidity = observation.humidity,
                "weather observation"
            );

            events.publish(Event::OutsideTemperatureUpdated {
                value: observation.temperature,
            });
            if observably_different(previous, observation.temperature) {
                events.publish(Event::OutsideTemperatureChanged {
                    value: observation.temperature,
                });
            }

            tokio::time::sleep(interval).await;
        }
    });

    (poller, handle)
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<WeatherObservation, reqwest::Error> {
    client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
}
