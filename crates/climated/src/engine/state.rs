use std::collections::HashMap;

use chrono::DateTime;
use chrono::Local;
use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

/// System (heat/cool) operating state of the thermostat.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SystemMode {
    #[default]
    Off,
    Heat,
    Cool,
}

/// Fan operating state of the thermostat.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    #[default]
    Auto,
    On,
}

/// Reported fan activity, read-only from the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
pub enum FanState {
    Running,
    Idle,
}

/// User-selected operating mode. `Auto` derives heat or cool from the
/// outside temperature at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    #[default]
    Auto,
    Heat,
    Cool,
}

/// The functional mode actually in effect for one evaluation cycle.
/// Schedule tables and default configs are kept per functional mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum FunctionalMode {
    Heat,
    Cool,
}

/// Desired (and, after application, observed) configuration of the physical
/// system.
///
/// A `HardwareState` is an immutable snapshot: an evaluation cycle never
/// mutates the controller's current state in place, it derives a new snapshot
/// with [`HardwareState::derive`], lets the rule chain write to that, and the
/// controller swaps it in wholesale once the diff has been applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HardwareState {
    pub system_mode: SystemMode,
    /// When `system_mode` last changed, for hysteresis rules. Unset until the
    /// first mode transition is applied.
    pub system_mode_set_at: Option<DateTime<Local>>,

    pub fan_mode: FanMode,
    /// When `fan_mode` last changed.
    pub fan_mode_set_at: Option<DateTime<Local>>,

    /// Target temperature (degrees F) to push to the thermostat when heating.
    pub heat_setpoint: Option<f64>,
    /// Target temperature (degrees F) to push to the thermostat when cooling.
    pub cool_setpoint: Option<f64>,

    /// Policy-private memory that survives across evaluations. Entries read
    /// as absent before their first write. Crate-visible so tests can build
    /// states with struct-update syntax; external callers go through
    /// [`HardwareState::var`] and [`HardwareState::set_var`].
    pub(crate) custom_vars: HashMap<String, serde_json::Value>,
}

impl HardwareState {
    /// Start the next snapshot as a copy of this one. Rules overwrite fields
    /// on the copy; untouched fields carry forward.
    pub fn derive(&self) -> HardwareState {
        self.clone()
    }

    /// Read a policy-private variable, `None` if never written.
    pub fn var(&self, key: &str) -> Option<&serde_json::Value> {
        self.custom_vars.get(key)
    }

    /// Write a policy-private variable.
    pub fn set_var(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.custom_vars.insert(key.into(), value);
    }
}
