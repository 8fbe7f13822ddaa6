//! Configuration file parsing and structures.
//!
//! climated uses TOML for declarative configuration: control tunables, the
//! thermostat and sensor inventory, and the initial heating/cooling
//! schedules.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use chrono::TimeDelta;
use clap::ValueEnum;
use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use crate::engine::policy::PolicyKind;
use crate::engine::policy::PolicyTuning;
use crate::engine::state::OperatingMode;
use crate::engine::ControllerTunables;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub tuning: TuningConfig,

    #[serde(default)]
    pub thermostat: ThermostatConfig,

    /// Remote temperature sensors, keyed by location name.
    #[serde(default)]
    pub sensors: HashMap<String, SensorConfig>,

    /// Presence detectors, keyed by occupant name.
    #[serde(default)]
    pub away: HashMap<String, AwayConfig>,

    #[serde(default)]
    pub weather: Option<WeatherConfig>,

    #[serde(default)]
    pub api: Option<ApiConfig>,

    #[serde(default)]
    pub schedule: SchedulesConfig,
}

#[derive(
    Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target overrides, e.g. `"climated::engine" = "debug"`.
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Build the subscriber filter: the configured (or CLI-overridden)
    /// default level, with the per-target overrides on top.
    pub fn filter(&self, override_level: Option<LogLevel>) -> Targets {
        let default: LevelFilter = override_level.unwrap_or(self.level).into();
        let mut targets = Targets::new().with_default(default);
        for (target, level) in &self.overrides {
            targets = targets.with_target(target.clone(), LevelFilter::from(*level));
        }
        targets
    }
}

/// System-wide configuration
#[derive(Debug, Default, Deserialize)]
pub struct SystemConfig {
    /// Where the data logger writes its time-series files. Logging to disk
    /// is disabled when unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Controller-level knobs. Every field has the production default.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Initial setpoint in degrees F, until a schedule entry resolves.
    pub setpoint: f64,

    pub operating_mode: OperatingMode,

    /// Outside temperature at or above this selects cooling when the
    /// operating mode is auto.
    pub cool_threshold: f64,

    /// Seconds of quiet before the watchdog forces a control cycle.
    pub watchdog_secs: u64,

    /// Seconds between parameter broadcasts to observers.
    pub broadcast_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            setpoint: 74.0,
            operating_mode: OperatingMode::Auto,
            cool_threshold: 75.0,
            watchdog_secs: 240,
            broadcast_secs: 60,
        }
    }
}

/// Optional overrides of the built-in policy constants, split by
/// functional mode.
#[derive(Debug, Default, Deserialize)]
pub struct TuningConfig {
    #[serde(default)]
    pub heating: TuningOverrides,

    #[serde(default)]
    pub cooling: TuningOverrides,
}

#[derive(Debug, Default, Deserialize)]
pub struct TuningOverrides {
    pub trigger_band: Option<f64>,
    pub heat_target: Option<f64>,
    pub cool_target: Option<f64>,
    pub min_off_secs: Option<u64>,
    pub min_on_secs: Option<u64>,
    pub min_fan_secs: Option<u64>,
    pub circulate_spread: Option<f64>,
    pub away_floor: Option<f64>,
    pub away_ceiling: Option<f64>,
}

impl TuningOverrides {
    fn apply(&self, tuning: &mut PolicyTuning) {
        if let Some(v) = self.trigger_band {
            tuning.trigger_band = v;
        }
        if let Some(v) = self.heat_target {
            tuning.heat_target = v;
        }
        if let Some(v) = self.cool_target {
            tuning.cool_target = v;
        }
        if let Some(v) = self.min_off_secs {
            tuning.min_off_interval = TimeDelta::seconds(v as i64);
        }
        if let Some(v) = self.min_on_secs {
            tuning.min_on_interval = TimeDelta::seconds(v as i64);
        }
        if let Some(v) = self.min_fan_secs {
            tuning.min_fan_time = TimeDelta::seconds(v as i64);
        }
        if let Some(v) = self.circulate_spread {
            tuning.circulate_spread = v;
        }
        if let Some(v) = self.away_floor {
            tuning.away_floor = v;
        }
        if let Some(v) = self.away_ceiling {
            tuning.away_ceiling = Some(v);
        }
    }
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThermostatKind {
    /// In-memory thermostat that accepts every write. Useful for bring-up
    /// and for running the controller without hardware attached.
    #[default]
    Loopback,
}

#[derive(Debug, Default, Deserialize)]
pub struct ThermostatConfig {
    #[serde(default)]
    pub kind: ThermostatKind,
}

/// A polled HTTP temperature sensor
#[derive(Debug, Deserialize)]
pub struct SensorConfig {
    pub url: String,

    #[serde(default = "default_sensor_poll_secs")]
    pub poll_secs: u64,
}

fn default_sensor_poll_secs() -> u64 {
    60
}

/// A polled HTTP presence detector
#[derive(Debug, Deserialize)]
pub struct AwayConfig {
    pub url: String,

    #[serde(default = "default_away_poll_secs")]
    pub poll_secs: u64,
}

fn default_away_poll_secs() -> u64 {
    120
}

/// The outside weather poller
#[derive(Debug, Deserialize)]
pub struct WeatherConfig {
    pub url: String,

    #[serde(default = "default_weather_poll_secs")]
    pub poll_secs: u64,
}

fn default_weather_poll_secs() -> u64 {
    240
}

/// HTTP API configuration
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,

    #[serde(default = "default_api_bind")]
    pub bind: String,
}

fn default_api_bind() -> String {
    "127.0.0.1:5678".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct SchedulesConfig {
    #[serde(default)]
    pub heat: ScheduleConfig,

    #[serde(default)]
    pub cool: ScheduleConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleConfig {
    /// Applies whenever no entry covers the current time.
    #[serde(default)]
    pub default: Option<NamedConfig>,

    #[serde(default)]
    pub entries: Vec<ScheduleEntryConfig>,
}

/// A named policy/setpoint pairing
#[derive(Debug, Deserialize)]
pub struct NamedConfig {
    pub name: String,
    pub policy: PolicyKind,
    pub setpoint: f64,
}

impl NamedConfig {
    pub fn to_config(&self) -> Arc<crate::engine::schedule::Config> {
        crate::engine::schedule::Config::new(&self.name, self.policy, self.setpoint)
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleEntryConfig {
    #[serde(flatten)]
    pub config: NamedConfig,

    /// Inclusive start, "HH:MM".
    #[serde(with = "clock_time")]
    pub start: NaiveTime,

    /// Exclusive end, "HH:MM". An end before the start wraps past midnight.
    #[serde(with = "clock_time")]
    pub end: NaiveTime,
}

mod clock_time {
    use chrono::NaiveTime;
    use serde::Deserialize;
    use serde::Deserializer;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M").map_err(serde::de::Error::custom)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Fold the control and tuning sections over the built-in defaults.
    pub fn tunables(&self) -> ControllerTunables {
        let mut tunables = ControllerTunables {
            setpoint: self.control.setpoint,
            operating_mode: self.control.operating_mode,
            cool_threshold: self.control.cool_threshold,
            watchdog_interval: Duration::from_secs(self.control.watchdog_secs),
            broadcast_interval: Duration::from_secs(self.control.broadcast_secs),
            ..ControllerTunables::default()
        };
        self.tuning.heating.apply(&mut tunables.heating);
        self.tuning.cooling.apply(&mut tunables.cooling);
        tunables
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.control.setpoint, 74.0);
        assert_eq!(config.control.operating_mode, OperatingMode::Auto);
        assert_eq!(config.control.watchdog_secs, 240);
        assert!(config.sensors.is_empty());
        assert!(config.schedule.heat.default.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [system]
            data_dir = "/var/lib/climated"

            [logging]
            level = "debug"

            [control]
            setpoint = 72.0
            operating_mode = "heat"

            [thermostat]
            kind = "loopback"

            [sensors.bedroom]
            url = "http://sensor-bedroom.local/temperature"

            [sensors.livingroom]
            url = "http://sensor-livingroom.local/temperature"
            poll_secs = 30

            [away.alice]
            url = "http://presence.local/alice"

            [weather]
            url = "http://wttr.local/v1/current"

            [api]
            enabled = true
            bind = "0.0.0.0:8080"

            [schedule.heat]
            default = { name = "day", policy = "daytime_heat", setpoint = 74.0 }
            entries = [
                { name = "night", policy = "bedtime_heat", setpoint = 70.0, start = "22:00", end = "06:00" },
            ]
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.control.operating_mode, OperatingMode::Heat);
        assert_eq!(config.sensors.len(), 2);
        assert_eq!(config.sensors["livingroom"].poll_secs, 30);
        assert_eq!(config.sensors["bedroom"].poll_secs, 60);
        assert_eq!(config.away["alice"].poll_secs, 120);

        let api = config.api.as_ref().unwrap();
        assert!(api.enabled);
        assert_eq!(api.bind, "0.0.0.0:8080");

        let default = config.schedule.heat.default.as_ref().unwrap();
        assert_eq!(default.policy, PolicyKind::DaytimeHeat);

        let night = &config.schedule.heat.entries[0];
        assert_eq!(night.start, NaiveTime::from_hms_opt(22, 0, 0).unwrap());
        assert_eq!(night.end, NaiveTime::from_hms_opt(6, 0, 0).unwrap());
        assert_eq!(night.config.setpoint, 70.0);
    }

    #[test]
    fn test_logging_overrides_build_filter() {
        let toml = r#"
            [logging]
            level = "warn"

            [logging.overrides]
            "climated::engine" = "debug"
        "#;

        let config: Config = toml::from_str(toml).unwrap();

        let filter = config.logging.filter(None);
        assert!(filter.would_enable("climated::engine::policy", &tracing::Level::DEBUG));
        assert!(!filter.would_enable("climated::api", &tracing::Level::INFO));

        // A CLI override replaces the default level but not the per-target
        // overrides.
        let filter = config.logging.filter(Some(LogLevel::Trace));
        assert!(filter.would_enable("climated::api", &tracing::Level::TRACE));
        assert!(filter.would_enable("climated::engine::policy", &tracing::Level::DEBUG));
    }

    #[test]
    fn test_tuning_overrides_fold_over_defaults() {
        let toml = r#"
            [control]
            cool_threshold = 78.0

            [tuning.heating]
            circulate_spread = 1.5
            min_off_secs = 300

            [tuning.cooling]
            away_ceiling = 80.0
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        let tunables = config.tunables();
        assert_eq!(tunables.cool_threshold, 78.0);
        assert_eq!(tunables.heating.circulate_spread, 1.5);
        assert_eq!(tunables.heating.min_off_interval, TimeDelta::seconds(300));
        // Untouched fields keep their defaults.
        assert_eq!(tunables.heating.trigger_band, 1.0);
        assert_eq!(tunables.cooling.away_ceiling, Some(80.0));
    }

    #[test]
    fn test_invalid_schedule_time_is_rejected() {
        let toml = r#"
            [schedule.heat]
            entries = [
                { name = "bad", policy = "basic_heat", setpoint = 70.0, start = "25:99", end = "06:00" },
            ]
        "#;

        assert!(toml::from_str::<Config>(toml).is_err());
    }
}
