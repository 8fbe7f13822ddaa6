//! Interactive operator shell on stdin/stdout.
//!
//! Line-oriented: one command per line, output printed immediately. Runs
//! alongside the controller and the HTTP API; all three talk to the same
//! [`ClimateController`] handle.

use std::str::FromStr;

use chrono::NaiveTime;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tracing::debug;

use crate::engine::schedule::Config;
use crate::engine::ClimateController;
use crate::engine::FanMode;
use crate::engine::FunctionalMode;
use crate::engine::HardwareState;
use crate::engine::OperatingMode;
use crate::engine::PolicyKind;
use crate::engine::SystemMode;

const HELP: &str = "\
commands:
  status                                              show controller state
  setpoint <degrees>                                  change the setpoint
  mode <auto|heat|cool>                               set the operating mode
  override <on|off>                                   toggle override mode
  override system <off|heat|cool>                     push system mode (override on)
  override fan <auto|on>                              push fan mode (override on)
  override target <heat|cool> <degrees>               push a target (override on)
  schedule list <heat|cool>                           show a schedule table
  schedule add <heat|cool> <name> <policy> <setpoint> <start> <end>
  schedule remove <heat|cool> <index>
  schedule setpoint <heat|cool> <index> <degrees>
  help                                                this text
  exit                                                stop the controller and quit";

/// What the caller should do after a line has been handled.
#[derive(Debug, PartialEq, Eq)]
pub enum ShellAction {
    Continue,
    Exit,
}

/// Run the shell until `exit` or end of input.
pub async fn run(controller: ClimateController) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    stdout.write_all(b"> ").await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let (output, action) = handle_line(&controller, &line).await;
        if !output.is_empty() {
            stdout.write_all(output.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
        if action == ShellAction::Exit {
            return Ok(());
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }

    Ok(())
}

/// Handle one input line; returns the text to print and what to do next.
pub async fn handle_line(controller: &ClimateController, line: &str) -> (String, ShellAction) {
    let words: Vec<&str> = line.split_whitespace().collect();
    debug!(?words, "shell command");

    let result = match words.as_slice() {
        [] => Ok(String::new()),
        ["help"] => Ok(HELP.to_string()),
        ["exit"] => {
            controller.stop().await;
            return ("goodbye".to_string(), ShellAction::Exit);
        }

        ["status"] => Ok(render_status(controller).await),

        ["setpoint", value] => match value.parse::<f64>() {
            Ok(setpoint) => {
                controller.set_setpoint(setpoint).await;
                Ok(format!("setpoint set to {setpoint:.1}"))
            }
            Err(_) => Err(format!("not a temperature: {value:?}")),
        },

        ["mode", mode] => match OperatingMode::from_str(mode) {
            Ok(mode) => {
                controller.set_operating_mode(mode).await;
                Ok(format!("operating mode set to {mode}"))
            }
            Err(_) => Err(format!("unknown operating mode: {mode:?}")),
        },

        ["override", "on"] => {
            controller.override_enable().await;
            Ok("override enabled, automatic control suspended".to_string())
        }
        ["override", "off"] => {
            controller.override_disable().await;
            Ok("override disabled, automatic control resumed".to_string())
        }
        ["override", "system", mode] => match mode.to_lowercase().as_str() {
            "off" => apply_override(controller, |next| next.system_mode = SystemMode::Off).await,
            "heat" => apply_override(controller, |next| next.system_mode = SystemMode::Heat).await,
            "cool" => apply_override(controller, |next| next.system_mode = SystemMode::Cool).await,
            _ => Err(format!("unknown system mode: {mode:?}")),
        },
        ["override", "fan", mode] => match mode.to_lowercase().as_str() {
            "auto" => apply_override(controller, |next| next.fan_mode = FanMode::Auto).await,
            "on" => apply_override(controller, |next| next.fan_mode = FanMode::On).await,
            _ => Err(format!("unknown fan mode: {mode:?}")),
        },
        ["override", "target", which, value] => match value.parse::<f64>() {
            Ok(target) => match *which {
                "heat" => {
                    apply_override(controller, |next| next.heat_setpoint = Some(target)).await
                }
                "cool" => {
                    apply_override(controller, |next| next.cool_setpoint = Some(target)).await
                }
                _ => Err(format!("unknown target: {which:?}")),
            },
            Err(_) => Err(format!("not a temperature: {value:?}")),
        },

        ["schedule", "list", mode] => match parse_functional_mode(mode) {
            Ok(mode) => Ok(controller.render_schedule(mode).await),
            Err(e) => Err(e),
        },
        ["schedule", "add", mode, name, policy, setpoint, start, end] => {
            add_schedule_entry(controller, mode, name, policy, setpoint, start, end).await
        }
        ["schedule", "remove", mode, index] => remove_schedule_entry(controller, mode, index).await,
        ["schedule", "setpoint", mode, index, value] => {
            update_schedule_setpoint(controller, mode, index, value).await
        }

        _ => Err(format!("unknown command: {line:?} (try \"help\")")),
    };

    match result {
        Ok(output) => (output, ShellAction::Continue),
        Err(message) => (format!("error: {message}"), ShellAction::Continue),
    }
}

fn parse_functional_mode(word: &str) -> Result<FunctionalMode, String> {
    FunctionalMode::from_str(word).map_err(|_| format!("unknown schedule: {word:?}"))
}

fn parse_index(word: &str) -> Result<usize, String> {
    word.parse::<usize>()
        .map_err(|_| format!("not an index: {word:?}"))
}

fn parse_temperature(word: &str) -> Result<f64, String> {
    word.parse::<f64>()
        .map_err(|_| format!("not a temperature: {word:?}"))
}

fn parse_clock_time(word: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(word, "%H:%M").map_err(|_| format!("not a HH:MM time: {word:?}"))
}

async fn apply_override<F>(controller: &ClimateController, mutate: F) -> Result<String, String>
where
    F: FnOnce(&mut HardwareState),
{
    controller
        .apply_override(mutate)
        .await
        .map(|()| "applied".to_string())
        .map_err(|e| e.to_string())
}

async fn add_schedule_entry(
    controller: &ClimateController,
    mode: &str,
    name: &str,
    policy: &str,
    setpoint: &str,
    start: &str,
    end: &str,
) -> Result<String, String> {
    let mode = parse_functional_mode(mode)?;
    let policy =
        PolicyKind::from_str(policy).map_err(|_| format!("unknown policy: {policy:?}"))?;
    let setpoint = parse_temperature(setpoint)?;
    let start = parse_clock_time(start)?;
    let end = parse_clock_time(end)?;

    controller
        .add_schedule_entry(mode, Config::new(name, policy, setpoint), start, end)
        .await
        .map(|()| format!("added {name}"))
        .map_err(|e| e.to_string())
}

async fn remove_schedule_entry(
    controller: &ClimateController,
    mode: &str,
    index: &str,
) -> Result<String, String> {
    let mode = parse_functional_mode(mode)?;
    let index = parse_index(index)?;

    controller
        .remove_schedule_entry(mode, index)
        .await
        .map(|()| format!("removed entry {index}"))
        .map_err(|e| e.to_string())
}

async fn update_schedule_setpoint(
    controller: &ClimateController,
    mode: &str,
    index: &str,
    value: &str,
) -> Result<String, String> {
    let mode = parse_functional_mode(mode)?;
    let index = parse_index(index)?;
    let setpoint = parse_temperature(value)?;

    controller
        .update_schedule_setpoint(mode, index, setpoint)
        .await
        .map(|()| format!("entry {index} setpoint set to {setpoint:.1}"))
        .map_err(|e| e.to_string())
}

async fn render_status(controller: &ClimateController) -> String {
    let status = controller.status();
    let readings = controller.sensor_readings();

    let mut out = String::new();
    out.push_str(&format!("setpoint:       {:.1}\n", status.setpoint));
    out.push_str(&format!("operating mode: {}\n", status.operating_mode));
    out.push_str(&format!("system mode:    {}\n", status.system_mode));
    out.push_str(&format!("fan mode:       {}\n", status.fan_mode));
    out.push_str(&format!(
        "override:       {}\n",
        if status.override_enabled { "on" } else { "off" }
    ));
    out.push_str(&format!("away:           {}\n", status.away));

    out.push_str("sensors:\n");
    for (location, value) in readings.iter() {
        out.push_str(&format!("  {location}: {value:.1}\n"));
    }
    let outside = controller.outside_temperature();
    if !outside.is_nan() {
        out.push_str(&format!("  outside: {outside:.1}\n"));
    }

    let detectors = controller.away_report();
    if !detectors.is_empty() {
        out.push_str("presence:\n");
        for (name, away) in detectors {
            out.push_str(&format!(
                "  {name}: {}\n",
                if away { "away" } else { "home" }
            ));
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::engine::device::DeviceError;
    use crate::engine::device::TemperatureSource;
    use crate::engine::device::Thermostat;
    use crate::engine::ControllerTunables;
    use crate::engine::EventBus;
    use crate::engine::FanState;

    struct NullThermostat;

    #[async_trait]
    impl Thermostat for NullThermostat {
        fn temperature(&self) -> f64 {
            f64::NAN
        }

        async fn system_mode(&self) -> Result<SystemMode, DeviceError> {
            Ok(SystemMode::Off)
        }

        async fn set_system_mode(&self, _mode: SystemMode) -> Result<(), DeviceError> {
            Ok(())
        }

        async fn fan_mode(&self) -> Result<FanMode, DeviceError> {
            Ok(FanMode::Auto)
        }

        async fn set_fan_mode(&self, _mode: FanMode) -> Result<(), DeviceError> {
            Ok(())
        }

        async fn fan_state(&self) -> Result<FanState, DeviceError> {
            Ok(FanState::Idle)
        }

        async fn set_heat_target(&self, _target: f64) -> Result<(), DeviceError> {
            Ok(())
        }

        async fn set_cool_target(&self, _target: f64) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    struct FixedSensor(f64);

    impl TemperatureSource for FixedSensor {
        fn temperature(&self) -> f64 {
            self.0
        }
    }

    fn controller() -> ClimateController {
        let mut sensors: HashMap<String, Arc<dyn TemperatureSource>> = HashMap::new();
        sensors.insert("bedroom".to_string(), Arc::new(FixedSensor(71.5)));

        ClimateController::new(
            Arc::new(NullThermostat),
            sensors,
            None,
            HashMap::new(),
            ControllerTunables::default(),
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn status_renders_controller_state() {
        let controller = controller();
        let (output, action) = handle_line(&controller, "status").await;
        assert_eq!(action, ShellAction::Continue);
        assert!(output.contains("setpoint:       74.0"));
        assert!(output.contains("bedroom: 71.5"));
    }

    #[tokio::test]
    async fn schedule_round_trip() {
        let controller = controller();

        let (output, _) = handle_line(
            &controller,
            "schedule add heat night bedtime_heat 70 22:00 06:00",
        )
        .await;
        assert_eq!(output, "added night");

        let (output, _) = handle_line(&controller, "schedule list heat").await;
        assert!(output.contains("bedtime_heat"));
        assert!(output.contains("22:00"));

        let (output, _) = handle_line(&controller, "schedule setpoint heat 0 68").await;
        assert_eq!(output, "entry 0 setpoint set to 68.0");

        let (output, _) = handle_line(&controller, "schedule remove heat 0").await;
        assert_eq!(output, "removed entry 0");

        let (output, _) = handle_line(&controller, "schedule remove heat 0").await;
        assert!(output.starts_with("error:"));
    }

    #[tokio::test]
    async fn override_commands_require_override_mode() {
        let controller = controller();

        let (output, _) = handle_line(&controller, "override fan on").await;
        assert_eq!(output, "error: override mode is not enabled");

        handle_line(&controller, "override on").await;
        let (output, _) = handle_line(&controller, "override fan on").await;
        assert_eq!(output, "applied");
        assert_eq!(controller.current_state().await.fan_mode, FanMode::On);
    }

    #[tokio::test]
    async fn unknown_command_reports_an_error() {
        let controller = controller();
        let (output, action) = handle_line(&controller, "frobnicate").await;
        assert_eq!(action, ShellAction::Continue);
        assert!(output.starts_with("error: unknown command"));
    }

    #[tokio::test]
    async fn setpoint_command_updates_status() {
        let controller = controller();
        let (output, _) = handle_line(&controller, "setpoint 72.5").await;
        assert_eq!(output, "setpoint set to 72.5");
        assert_eq!(controller.status().setpoint, 72.5);
    }
}
