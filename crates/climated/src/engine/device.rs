//! Collaborator contracts the engine consumes.
//!
//! The physical transport (Z-Wave, MQTT, whatever actually moves bytes) sits
//! behind these traits. Read paths must be safe under concurrent access:
//! pollers store the latest observation atomically and readers see either
//! the old or the new value, never a torn one.

use async_trait::async_trait;

use super::state::FanMode;
use super::state::FanState;
use super::state::SystemMode;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The hardware reported a value outside the known enum mapping. This is
    /// a device/firmware contract violation and is propagated to the caller
    /// of the getter, never swallowed.
    #[error("device reported unrecognized {kind}: {value:?}")]
    UnrecognizedState { kind: &'static str, value: String },

    /// A setter failed. The controller logs it, leaves the corresponding
    /// state field unadvanced for the cycle, and retries on the next one.
    #[error("failed to write {field}: {reason}")]
    WriteFailed { field: &'static str, reason: String },
}

impl SystemMode {
    /// Map a raw device mode string to the enum, e.g. "Heat" from a
    /// thermostat register.
    pub fn from_device(value: &str) -> Result<Self, DeviceError> {
        value.parse().map_err(|_| DeviceError::UnrecognizedState {
            kind: "system mode",
            value: value.to_string(),
        })
    }
}

impl FanMode {
    pub fn from_device(value: &str) -> Result<Self, DeviceError> {
        value.parse().map_err(|_| DeviceError::UnrecognizedState {
            kind: "fan mode",
            value: value.to_string(),
        })
    }
}

impl FanState {
    pub fn from_device(value: &str) -> Result<Self, DeviceError> {
        value.parse().map_err(|_| DeviceError::UnrecognizedState {
            kind: "fan state",
            value: value.to_string(),
        })
    }
}

/// Anything that can report a temperature. Sensors and the thermostat's own
/// probe implement it.
pub trait TemperatureSource: Send + Sync {
    /// Latest reading in degrees F, NaN when unavailable.
    fn temperature(&self) -> f64;
}

/// A presence detector. The controller ANDs all registered detectors into
/// one occupancy signal.
pub trait AwayDetector: Send + Sync {
    fn is_away(&self) -> bool;
}

/// Outside weather conditions, polled in the background.
pub trait OutsideWeatherSource: Send + Sync {
    /// Latest outside temperature in degrees F, NaN when unavailable.
    fn temperature(&self) -> f64;

    /// Latest relative humidity in percent, NaN when unavailable.
    fn relative_humidity(&self) -> f64;
}

/// The thermostat actuator.
///
/// Getters read back what the device believes; setters push commands and may
/// fail transiently. Display strings for modes come from the enums' `Display`
/// implementations.
#[async_trait]
pub trait Thermostat: Send + Sync {
    /// The thermostat's own probe, NaN when unavailable.
    fn temperature(&self) -> f64;

    async fn system_mode(&self) -> Result<SystemMode, DeviceError>;
    async fn set_system_mode(&self, mode: SystemMode) -> Result<(), DeviceError>;

    async fn fan_mode(&self) -> Result<FanMode, DeviceError>;
    async fn set_fan_mode(&self, mode: FanMode) -> Result<(), DeviceError>;

    async fn fan_state(&self) -> Result<FanState, DeviceError>;

    async fn set_heat_target(&self, target: f64) -> Result<(), DeviceError>;
    async fn set_cool_target(&self, target: f64) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_strings_round_trip() {
        assert_eq!(SystemMode::from_device("Heat").unwrap(), SystemMode::Heat);
        assert_eq!(SystemMode::from_device("Off").unwrap(), SystemMode::Off);
        assert_eq!(FanMode::from_device("Auto").unwrap(), FanMode::Auto);
        assert_eq!(FanState::from_device("Idle").unwrap(), FanState::Idle);
    }

    #[test]
    fn unrecognized_device_state_is_an_error() {
        let err = SystemMode::from_device("Emergency Heat").unwrap_err();
        match err {
            DeviceError::UnrecognizedState { kind, value } => {
                assert_eq!(kind, "system mode");
                assert_eq!(value, "Emergency Heat");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
