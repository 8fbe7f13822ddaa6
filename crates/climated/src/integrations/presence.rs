//! Presence detector poller.
//!
//! One poller per occupant. Unlike the temperature pollers this keeps the
//! last known verdict on fetch failure: flapping to "home" on a transient
//! network error would kick the heat on in an empty house, and flapping to
//! "away" could let it drift cold in an occupied one.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use crate::config::AwayConfig;
use crate::engine::device::AwayDetector;
use crate::engine::Event;
use crate::engine::EventBus;

#[derive(Debug, Deserialize)]
struct PresenceReport {
    away: bool,
}

/// Shared handle to the latest verdict for one occupant.
#[derive(Clone)]
pub struct PresencePoller {
    away: Arc<AtomicBool>,
}

impl AwayDetector for PresencePoller {
    fn is_away(&self) -> bool {
        self.away.load(Ordering::Relaxed)
    }
}

pub fn spawn(
    name: &str,
    config: &AwayConfig,
    events: EventBus,
) -> (PresencePoller, JoinHandle<()>) {
    // Everyone starts at home; away must be positively observed.
    let away = Arc::new(AtomicBool::new(false));
    let poller = PresencePoller { away: away.clone() };

    let name = name.to_string();
    let url = config.url.clone();
    let interval = Duration::from_secs(config.poll_secs);
    let handle = tokio::spawn(async move {
        let client = reqwest::Client::new();
        loop {
            match fetch(&client, &url).await {
                Ok(verdict) => {
                    let previous = away.swap(verdict, Ordering::Relaxed);
                    debug!(name = %name, verdict, "presence observation");

                    events.publish(Event::AwayUpdated { away: verdict });
                    if previous != verdict {
                        events.publish(Event::AwayChanged { away: verdict });
                    }
                }
                Err(e) => {
                    warn!(error = %e, name = %name, url = %url, "presence fetch failed, keeping last verdict");
                }
            }

            tokio::time::sleep(interval).await;
        }
    });

    (poller, handle)
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<bool, reqwest::Error> {
    let report: PresenceReport = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(report.away)
}
