use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use climated::config::Config;
use climated::config::LogLevel;
use climated::config::ThermostatKind;
use climated::engine::device::AwayDetector;
use climated::engine::device::OutsideWeatherSource;
use climated::engine::device::TemperatureSource;
use climated::engine::device::Thermostat;
use climated::engine::ClimateController;
use climated::engine::EventBus;
use climated::engine::FunctionalMode;
use climated::integrations::datalog;
use climated::integrations::loopback::LoopbackThermostat;
use climated::shell;

#[derive(Parser)]
#[command(name = "climated", version, about = "Residential climate control daemon")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "climated.toml")]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.filter(args.log_level))
        .init();

    info!("climated starting");
    info!("Loaded config from: {}", args.config.display());

    let events = EventBus::new();
    let mut background: Vec<JoinHandle<()>> = Vec::new();

    let thermostat: Arc<dyn Thermostat> = match config.thermostat.kind {
        ThermostatKind::Loopback => {
            info!("using loopback thermostat");
            Arc::new(LoopbackThermostat::new())
        }
    };

    let mut sensors: HashMap<String, Arc<dyn TemperatureSource>> = HashMap::new();
    let mut away_detectors: HashMap<String, Arc<dyn AwayDetector>> = HashMap::new();
    let mut outside: Option<Arc<dyn OutsideWeatherSource>> = None;

    #[cfg(feature = "integration_http")]
    {
        use climated::integrations::presence;
        use climated::integrations::sensor;
        use climated::integrations::weather;

        for (location, sensor_config) in &config.sensors {
            info!(location = %location, url = %sensor_config.url, "starting sensor poller");
            let (poller, handle) = sensor::spawn(location, sensor_config, events.clone());
            sensors.insert(location.clone(), Arc::new(poller));
            background.push(handle);
        }

        for (name, away_config) in &config.away {
            info!(name = %name, url = %away_config.url, "starting presence poller");
            let (poller, handle) = presence::spawn(name, away_config, events.clone());
            away_detectors.insert(name.clone(), Arc::new(poller));
            background.push(handle);
        }

        if let Some(weather_config) = &config.weather {
            info!(url = %weather_config.url, "starting weather poller");
            let (poller, handle) = weather::spawn(weather_config, events.clone());
            outside = Some(Arc::new(poller));
            background.push(handle);
        }
    }

    #[cfg(not(feature = "integration_http"))]
    {
        if !config.sensors.is_empty() || !config.away.is_empty() || config.weather.is_some() {
            warn!("built without integration_http; configured pollers are ignored");
        }
    }

    if sensors.is_empty() {
        warn!("no temperature sensors configured; policies will see only NaN");
    }

    let controller = ClimateController::new(
        thermostat,
        sensors,
        outside,
        away_detectors,
        config.tunables(),
        events.clone(),
    );

    seed_schedule(&controller, FunctionalMode::Heat, &config.schedule.heat).await?;
    seed_schedule(&controller, FunctionalMode::Cool, &config.schedule.cool).await?;

    if let Some(data_dir) = &config.system.data_dir {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;
        background.push(datalog::spawn(data_dir.clone(), &events));
    }

    let mut api_shutdown = None;
    if let Some(api_config) = &config.api {
        if api_config.enabled {
            let (tx, rx) = tokio::sync::oneshot::channel();
            api_shutdown = Some(tx);
            let bind = api_config.bind.clone();
            let api_controller = controller.clone();
            background.push(tokio::spawn(async move {
                if let Err(e) = climated::api::serve(bind, api_controller, rx).await {
                    tracing::error!("HTTP API server failed: {}", e);
                }
            }));
        }
    }

    controller.start().await;
    info!("controller running; type \"help\" for commands, Ctrl+C to exit");

    tokio::select! {
        result = shell::run(controller.clone()) => {
            // The exit command already stopped the controller.
            result.context("shell failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            controller.stop().await;
        }
    }

    if let Some(tx) = api_shutdown {
        let _ = tx.send(());
    }
    for handle in background {
        handle.abort();
    }

    info!("climated shutdown complete");
    Ok(())
}

async fn seed_schedule(
    controller: &ClimateController,
    mode: FunctionalMode,
    schedule: &climated::config::ScheduleConfig,
) -> anyhow::Result<()> {
    if let Some(default) = &schedule.default {
        controller.set_default_config(mode, default.to_config()).await;
    }
    for entry in &schedule.entries {
        controller
            .add_schedule_entry(mode, entry.config.to_config(), entry.start, entry.end)
            .await
            .with_context(|| format!("adding {} schedule entry {:?}", mode, entry.config.name))?;
    }
    Ok(())
}
