//! In-memory thermostat for bring-up and tests.
//!
//! Registers are stored as the raw display strings a real device would
//! expose, so the getters exercise the same string-to-enum mapping (and the
//! same failure mode on junk values) as a hardware transport.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::engine::device::DeviceError;
use crate::engine::device::Thermostat;
use crate::engine::state::FanMode;
use crate::engine::state::FanState;
use crate::engine::state::SystemMode;

pub struct LoopbackThermostat {
    system_mode: Mutex<String>,
    fan_mode: Mutex<String>,
    fan_state: Mutex<String>,
    heat_target: Mutex<Option<f64>>,
    cool_target: Mutex<Option<f64>>,
    temperature: Mutex<f64>,
}

impl LoopbackThermostat {
    pub fn new() -> Self {
        Self {
            system_mode: Mutex::new(SystemMode::Off.to_string()),
            fan_mode: Mutex::new(FanMode::Auto.to_string()),
            fan_state: Mutex::new(FanState::Idle.to_string()),
            heat_target: Mutex::new(None),
            cool_target: Mutex::new(None),
            temperature: Mutex::new(f64::NAN),
        }
    }

    /// Poke the probe reading, for tests and demos.
    pub fn set_temperature(&self, value: f64) {
        if let Ok(mut t) = self.temperature.lock() {
            *t = value;
        }
    }

    /// Corrupt a register, for tests of the unrecognized-state path.
    #[cfg(test)]
    fn poke_system_mode_register(&self, raw: &str) {
        *self.system_mode.lock().unwrap() = raw.to_string();
    }

    fn read(&self, register: &Mutex<String>) -> String {
        match register.lock() {
            Ok(value) => value.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn write(&self, register: &Mutex<String>, value: String) {
        match register.lock() {
            Ok(mut slot) => *slot = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

impl Default for LoopbackThermostat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Thermostat for LoopbackThermostat {
    fn temperature(&self) -> f64 {
        match self.temperature.lock() {
            Ok(value) => *value,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    async fn system_mode(&self) -> Result<SystemMode, DeviceError> {
        SystemMode::from_device(&self.read(&self.system_mode))
    }

    async fn set_system_mode(&self, mode: SystemMode) -> Result<(), DeviceError> {
        self.write(&self.system_mode, mode.to_string());
        // A real system reports the blower through the fan state register.
        let fan_state = match mode {
            SystemMode::Off => FanState::Idle,
            SystemMode::Heat | SystemMode::Cool => FanState::Running,
        };
        self.write(&self.fan_state, fan_state.to_string());
        Ok(())
    }

    async fn fan_mode(&self) -> Result<FanMode, DeviceError> {
        FanMode::from_device(&self.read(&self.fan_mode))
    }

    async fn set_fan_mode(&self, mode: FanMode) -> Result<(), DeviceError> {
        self.write(&self.fan_mode, mode.to_string());
        Ok(())
    }

    async fn fan_state(&self) -> Result<FanState, DeviceError> {
        FanState::from_device(&self.read(&self.fan_state))
    }

    async fn set_heat_target(&self, target: f64) -> Result<(), DeviceError> {
        match self.heat_target.lock() {
            Ok(mut slot) => *slot = Some(target),
            Err(poisoned) => *poisoned.into_inner() = Some(target),
        }
        Ok(())
    }

    async fn set_cool_target(&self, target: f64) -> Result<(), DeviceError> {
        match self.cool_target.lock() {
            Ok(mut slot) => *slot = Some(target),
            Err(poisoned) => *poisoned.into_inner() = Some(target),
        }
        Ok(())
    }
}
