//! Remote temperature sensor poller.
//!
//! One poller per configured location. Each fresh reading publishes a
//! `TemperatureUpdated` event for loggers; a reading that differs from the
//! previous one also publishes `TemperatureChanged`, which wakes the
//! controller. Fetch failures degrade the reading to NaN so the aggregates
//! exclude the sensor until it recovers.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::config::SensorConfig;
use crate::engine::device::TemperatureSource;
use crate::engine::Event;
use crate::engine::EventBus;

#[derive(Debug, Deserialize)]
struct SensorReading {
    temperature: f64,
}

/// Shared handle to the latest reading of one sensor.
#[derive(Clone)]
pub struct SensorPoller {
    value: Arc<AtomicU64>,
}

impl TemperatureSource for SensorPoller {
    fn temperature(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

fn observably_different(old: f64, new: f64) -> bool {
    if old.is_nan() || new.is_nan() {
        old.is_nan() != new.is_nan()
    } else {
        old != new
    }
}

pub fn spawn(
    location: &str,
    config: &SensorConfig,
    events: EventBus,
) -> (SensorPoller, JoinHandle<()>) {
    let value = Arc::new(AtomicU64::new(f64::NAN.to_bits()));
    let poller = SensorPoller {
        value: value.clone(),
    };

    let location = location.to_string();
    let url = config.url.clone();
    let interval = Duration::from_secs(config.poll_secs);
    let handle = tokio::spawn(async move {
        let client = reqwest::Client::new();
        loop {
            let reading = fetch(&client, &url).await.unwrap_or_else(|e| {
                warn!(error = %e, location = %location, url = %url, "sensor fetch failed, degrading to NaN");
                f64::NAN
            });

            let previous = f64::from_bits(value.load(Ordering::Relaxed));
            value.store(reading.to_bits(), Ordering::Relaxed);
            debug!(location = %location, reading, "sensor observation");

            events.publish(Event::TemperatureUpdated {
                location: location.clone(),
                value: reading,
            });
            if observably_different(previous, reading) {
                events.publish(Event::TemperatureChanged {
                    location: location.clone(),
                    value: reading,
                });
            }

            tokio::time::sleep(interval).await;
        }
    });

    (poller, handle)
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<f64, reqwest::Error> {
    let reading: SensorReading = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(reading.temperature)
}
