use tokio::sync::broadcast;
use tracing::trace;

use super::policy::PolicyKind;
use super::state::FanMode;
use super::state::SystemMode;

/// Change notifications published by the controller and the sensor pollers.
///
/// `*Changed` events fire only when a value transitions; `*Updated` events
/// fire on every fresh observation, whether or not it differs. Loggers tend
/// to subscribe to `*Updated`, the controller re-evaluates on `*Changed`.
#[derive(Debug, Clone)]
pub enum Event {
    TemperatureChanged { location: String, value: f64 },
    TemperatureUpdated { location: String, value: f64 },
    OutsideTemperatureChanged { value: f64 },
    OutsideTemperatureUpdated { value: f64 },
    SetpointChanged { value: f64 },
    SetpointUpdated { value: f64 },
    PolicyChanged { policy: PolicyKind },
    AwayChanged { away: bool },
    AwayUpdated { away: bool },
    SystemModeChanged { mode: SystemMode },
    SystemModeUpdated { mode: SystemMode },
    FanModeChanged { mode: FanMode },
    FanModeUpdated { mode: FanMode },
}

/// Capacity of the notification channel. Slow subscribers that fall more
/// than this far behind observe a lag error and miss events, never a stalled
/// publisher.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Fire-and-forget notification bus.
///
/// Publishing is synchronous to the publisher and delivers at most once per
/// publish call to each live subscriber. A publish with no subscribers is
/// simply dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        trace!(?event, "publishing");
        // send() errors only when there are no subscribers, which is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
