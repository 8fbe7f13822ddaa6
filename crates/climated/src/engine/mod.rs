pub mod controller;
pub mod device;
pub mod event;
pub mod policy;
pub mod schedule;
pub mod state;
pub mod stats;

pub use controller::ClimateController;
pub use controller::ControllerError;
pub use controller::ControllerTunables;
pub use controller::StatusSnapshot;
pub use device::AwayDetector;
pub use device::DeviceError;
pub use device::OutsideWeatherSource;
pub use device::TemperatureSource;
pub use device::Thermostat;
pub use event::Event;
pub use event::EventBus;
pub use policy::Policy;
pub use policy::PolicyKind;
pub use policy::PolicyTuning;
pub use policy::Readings;
pub use schedule::Config;
pub use schedule::ScheduleEntry;
pub use schedule::ScheduleError;
pub use schedule::Scheduler;
pub use state::FanMode;
pub use state::FanState;
pub use state::FunctionalMode;
pub use state::HardwareState;
pub use state::OperatingMode;
pub use state::SystemMode;
