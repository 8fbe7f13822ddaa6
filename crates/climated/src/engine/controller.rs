//! The climate controller: owns system state, resolves the active
//! configuration, runs the policy engine, and applies state diffs to the
//! thermostat.
//!
//! One conceptual cycle runs Idle -> Evaluating -> Applying -> Idle. A cycle
//! is entered from the watchdog timer or from a change notification; entry is
//! guarded by a non-blocking try-lock, so a trigger that arrives while a
//! cycle is in flight is dropped rather than queued. The watchdog re-arm at
//! the end of every cycle bounds how stale a dropped trigger can leave us:
//! one watchdog period at worst.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use chrono::DateTime;
use chrono::Local;
use chrono::NaiveTime;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::device::AwayDetector;
use super::device::OutsideWeatherSource;
use super::device::TemperatureSource;
use super::device::Thermostat;
use super::event::Event;
use super::event::EventBus;
use super::policy::Policy;
use super::policy::PolicyKind;
use super::policy::PolicyTuning;
use super::policy::Readings;
use super::schedule::Config;
use super::schedule::ScheduleError;
use super::schedule::Scheduler;
use super::state::FanMode;
use super::state::FunctionalMode;
use super::state::HardwareState;
use super::state::OperatingMode;
use super::state::SystemMode;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("override mode is not enabled")]
    OverrideDisabled,
}

/// Controller-level tuning. Policy-level constants live in [`PolicyTuning`].
#[derive(Debug, Clone)]
pub struct ControllerTunables {
    /// Initial setpoint in degrees F, until a configuration resolves.
    pub setpoint: f64,

    pub operating_mode: OperatingMode,

    /// In auto operating mode: outside temperature at or above this selects
    /// cooling, below it heating.
    pub cool_threshold: f64,

    /// How long after a cycle completes before the watchdog forces the next
    /// one, guaranteeing liveness with no external triggers.
    pub watchdog_interval: Duration,

    /// How often current parameters are republished to observers.
    pub broadcast_interval: Duration,

    pub heating: PolicyTuning,
    pub cooling: PolicyTuning,
}

impl Default for ControllerTunables {
    fn default() -> Self {
        Self {
            setpoint: 74.0,
            operating_mode: OperatingMode::Auto,
            cool_threshold: 75.0,
            watchdog_interval: Duration::from_secs(240),
            broadcast_interval: Duration::from_secs(60),
            heating: PolicyTuning::heating(),
            cooling: PolicyTuning::cooling(),
        }
    }
}

/// Point-in-time view of the controller for observers (API, shell,
/// broadcast). Readable without touching the cycle lock.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub setpoint: f64,
    pub operating_mode: OperatingMode,
    pub system_mode: SystemMode,
    pub fan_mode: FanMode,
    pub heat_setpoint: Option<f64>,
    pub cool_setpoint: Option<f64>,
    pub override_enabled: bool,
    pub away: bool,
}

/// Everything the evaluate-and-apply critical section touches, guarded by
/// one controller-wide lock. The cycle guard try-locks it; override toggling
/// and schedule edits block on it.
struct CycleState {
    current: HardwareState,
    scheduler: Scheduler,
    /// Policy engines are stateful and instantiated at most once per kind.
    policies: HashMap<PolicyKind, Policy>,
    operating_mode: OperatingMode,
    setpoint: f64,
    override_enabled: bool,
    active_config: Option<Arc<Config>>,
    watchdog: Option<JoinHandle<()>>,
    trigger_listener: Option<JoinHandle<()>>,
}

struct BroadcastState {
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    thermostat: Arc<dyn Thermostat>,
    sensors: HashMap<String, Arc<dyn TemperatureSource>>,
    outside: Option<Arc<dyn OutsideWeatherSource>>,
    away_detectors: HashMap<String, Arc<dyn AwayDetector>>,
    tunables: ControllerTunables,
    events: EventBus,
    cycle: Mutex<CycleState>,
    broadcast: Mutex<BroadcastState>,
    status: RwLock<StatusSnapshot>,
}

/// Handle to the running controller. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ClimateController {
    inner: Arc<Inner>,
}

impl ClimateController {
    pub fn new(
        thermostat: Arc<dyn Thermostat>,
        sensors: HashMap<String, Arc<dyn TemperatureSource>>,
        outside: Option<Arc<dyn OutsideWeatherSource>>,
        away_detectors: HashMap<String, Arc<dyn AwayDetector>>,
        tunables: ControllerTunables,
        events: EventBus,
    ) -> Self {
        let status = StatusSnapshot {
            setpoint: tunables.setpoint,
            operating_mode: tunables.operating_mode,
            system_mode: SystemMode::Off,
            fan_mode: FanMode::Auto,
            heat_setpoint: None,
            cool_setpoint: None,
            override_enabled: false,
            away: false,
        };
        let cycle = CycleState {
            current: HardwareState::default(),
            scheduler: Scheduler::new(),
            policies: HashMap::new(),
            operating_mode: tunables.operating_mode,
            setpoint: tunables.setpoint,
            override_enabled: false,
            active_config: None,
            watchdog: None,
            trigger_listener: None,
        };

        Self {
            inner: Arc::new(Inner {
                thermostat,
                sensors,
                outside,
                away_detectors,
                tunables,
                events,
                cycle: Mutex::new(cycle),
                broadcast: Mutex::new(BroadcastState { timer: None }),
                status: RwLock::new(status),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Begin controlling: write the all-OFF baseline, wire change
    /// notifications to re-evaluation, and run the first cycle.
    pub async fn start(&self) {
        info!("controller starting");

        if let Err(e) = self.inner.thermostat.set_system_mode(SystemMode::Off).await {
            warn!(error = %e, "failed to write baseline system mode");
        }
        if let Err(e) = self.inner.thermostat.set_fan_mode(FanMode::Auto).await {
            warn!(error = %e, "failed to write baseline fan mode");
        }

        let listener = self.spawn_trigger_listener();
        self.inner.cycle.lock().await.trigger_listener = Some(listener);

        self.broadcast_params().await;
        self.evaluate("startup").await;
    }

    /// Stop controlling: cancel timers and force a final all-OFF write.
    pub async fn stop(&self) {
        {
            let mut cycle = self.inner.cycle.lock().await;
            if let Some(watchdog) = cycle.watchdog.take() {
                watchdog.abort();
            }
            if let Some(listener) = cycle.trigger_listener.take() {
                listener.abort();
            }
        }
        {
            let mut broadcast = self.inner.broadcast.lock().await;
            if let Some(timer) = broadcast.timer.take() {
                timer.abort();
            }
        }

        if let Err(e) = self.inner.thermostat.set_system_mode(SystemMode::Off).await {
            warn!(error = %e, "failed to write shutdown system mode");
        }
        if let Err(e) = self.inner.thermostat.set_fan_mode(FanMode::Auto).await {
            warn!(error = %e, "failed to write shutdown fan mode");
        }

        info!("controller stopped");
    }

    /// Away aggregate: true iff every registered detector reports away.
    /// Zero detectors configured always reads as home.
    pub fn away(&self) -> bool {
        if self.inner.away_detectors.is_empty() {
            return false;
        }
        self.inner.away_detectors.values().all(|d| d.is_away())
    }

    /// Latest reading from every sensor, sorted by location for
    /// deterministic aggregates.
    pub fn sensor_readings(&self) -> Readings {
        let mut readings: Vec<(String, f64)> = self
            .inner
            .sensors
            .iter()
            .map(|(name, sensor)| (name.clone(), sensor.temperature()))
            .collect();
        readings.sort_by(|a, b| a.0.cmp(&b.0));
        Readings::new(readings)
    }

    pub fn outside_temperature(&self) -> f64 {
        self.inner
            .outside
            .as_ref()
            .map_or(f64::NAN, |o| o.temperature())
    }

    /// Names of the registered away detectors with their current verdicts.
    pub fn away_report(&self) -> Vec<(String, bool)> {
        let mut report: Vec<(String, bool)> = self
            .inner
            .away_detectors
            .iter()
            .map(|(name, d)| (name.clone(), d.is_away()))
            .collect();
        report.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }

    pub fn status(&self) -> StatusSnapshot {
        // A poisoned lock only happens if a writer panicked; fall back to
        // the poisoned value, it is still structurally valid.
        match self.inner.status.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn current_state(&self) -> HardwareState {
        self.inner.cycle.lock().await.current.clone()
    }

    /// One control cycle. Non-blocking entry: if a cycle is already in
    /// flight the trigger is dropped, and the in-flight cycle's re-armed
    /// watchdog picks up whatever changed.
    pub async fn evaluate(&self, cause: &str) {
        let mut cycle = match self.inner.cycle.try_lock() {
            Ok(cycle) => cycle,
            Err(_) => {
                debug!(cause, "evaluation in flight, dropping trigger");
                return;
            }
        };

        // The watchdog is single-shot: cancel any pending one now, re-arm on
        // every exit path below.
        if let Some(watchdog) = cycle.watchdog.take() {
            watchdog.abort();
        }

        info!(cause, "entered evaluation");

        if cycle.override_enabled {
            debug!("override enabled, skipping policy");
            self.arm_watchdog(&mut cycle);
            return;
        }

        let now = Local::now();
        let mode = self.functional_mode(&cycle);
        let Some(config) = cycle.scheduler.resolve(mode, now.time()) else {
            info!(%mode, "no configuration resolves, leaving state untouched");
            self.arm_watchdog(&mut cycle);
            return;
        };

        self.apply_setpoint(&mut cycle, config.setpoint);

        let config_changed = match &cycle.active_config {
            Some(previous) => !Arc::ptr_eq(previous, &config),
            None => true,
        };
        if config_changed {
            info!(config = %config.name, policy = %config.policy, setpoint = config.setpoint, "active configuration changed");
            let policy_changed = cycle
                .active_config
                .as_ref()
                .map_or(true, |previous| previous.policy != config.policy);
            if policy_changed {
                self.inner.events.publish(Event::PolicyChanged {
                    policy: config.policy,
                });
            }
        }
        cycle.active_config = Some(Arc::clone(&config));

        let readings = self.sensor_readings();
        let away = self.away();
        let tuning = match config.policy {
            PolicyKind::BasicCool => self.inner.tunables.cooling.clone(),
            _ => self.inner.tunables.heating.clone(),
        };

        let next = {
            let CycleState {
                policies,
                current,
                setpoint,
                ..
            } = &mut *cycle;
            let policy = policies
                .entry(config.policy)
                .or_insert_with(|| Policy::new(config.policy, tuning));
            let ctx = policy.context(&readings, *setpoint, away, now);
            policy.evaluate(&ctx, current)
        };

        self.apply(&mut cycle, next, now).await;
        self.arm_watchdog(&mut cycle);

        info!("finished evaluation");
    }

    /// Diff `next` against the current snapshot and push only the changed
    /// fields to the thermostat. A failed setter leaves its field (and its
    /// hysteresis timestamp) unadvanced so the next cycle retries it;
    /// remaining fields still attempt to apply.
    async fn apply(&self, cycle: &mut CycleState, mut next: HardwareState, now: DateTime<Local>) {
        let thermostat = &self.inner.thermostat;
        let events = &self.inner.events;

        if next.fan_mode != cycle.current.fan_mode {
            match thermostat.set_fan_mode(next.fan_mode).await {
                Ok(()) => {
                    next.fan_mode_set_at = Some(now);
                    info!(mode = %next.fan_mode, "fan mode applied");
                    events.publish(Event::FanModeChanged {
                        mode: next.fan_mode,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "failed to set fan mode, retrying next cycle");
                    next.fan_mode = cycle.current.fan_mode;
                    next.fan_mode_set_at = cycle.current.fan_mode_set_at;
                }
            }
        }

        if next.system_mode != cycle.current.system_mode {
            match thermostat.set_system_mode(next.system_mode).await {
                Ok(()) => {
                    next.system_mode_set_at = Some(now);
                    info!(mode = %next.system_mode, "system mode applied");
                    events.publish(Event::SystemModeChanged {
                        mode: next.system_mode,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "failed to set system mode, retrying next cycle");
                    next.system_mode = cycle.current.system_mode;
                    next.system_mode_set_at = cycle.current.system_mode_set_at;
                }
            }
        }

        if next.heat_setpoint != cycle.current.heat_setpoint {
            if let Some(target) = next.heat_setpoint {
                if let Err(e) = thermostat.set_heat_target(target).await {
                    warn!(error = %e, "failed to set heat target, retrying next cycle");
                    next.heat_setpoint = cycle.current.heat_setpoint;
                }
            }
        }

        if next.cool_setpoint != cycle.current.cool_setpoint {
            if let Some(target) = next.cool_setpoint {
                if let Err(e) = thermostat.set_cool_target(target).await {
                    warn!(error = %e, "failed to set cool target, retrying next cycle");
                    next.cool_setpoint = cycle.current.cool_setpoint;
                }
            }
        }

        cycle.current = next;
        self.update_status(cycle);
    }

    /// Enable override: automatic control is suspended until disabled.
    /// Blocking acquisition, so toggling cannot race an in-flight cycle.
    pub async fn override_enable(&self) {
        let mut cycle = self.inner.cycle.lock().await;
        cycle.override_enabled = true;
        self.update_status(&cycle);
        info!("override enabled");
    }

    pub async fn override_disable(&self) {
        {
            let mut cycle = self.inner.cycle.lock().await;
            cycle.override_enabled = false;
            self.update_status(&cycle);
        }
        info!("override disabled");
        self.evaluate("override disabled").await;
    }

    /// Direct state mutation while override is enabled. Bypasses the policy
    /// engine but goes through the same diff-and-apply path, so hysteresis
    /// timestamps stay consistent for when override is disabled again.
    pub async fn apply_override<F>(&self, mutate: F) -> Result<(), ControllerError>
    where
        F: FnOnce(&mut HardwareState),
    {
        let mut cycle = self.inner.cycle.lock().await;
        if !cycle.override_enabled {
            return Err(ControllerError::OverrideDisabled);
        }

        let mut next = cycle.current.derive();
        mutate(&mut next);
        self.apply(&mut cycle, next, Local::now()).await;
        Ok(())
    }

    pub async fn set_setpoint(&self, setpoint: f64) {
        {
            let mut cycle = self.inner.cycle.lock().await;
            self.apply_setpoint(&mut cycle, setpoint);
            self.update_status(&cycle);
        }
        self.broadcast_params().await;
    }

    pub async fn set_operating_mode(&self, mode: OperatingMode) {
        {
            let mut cycle = self.inner.cycle.lock().await;
            cycle.operating_mode = mode;
            self.update_status(&cycle);
        }
        info!(%mode, "operating mode set");
        self.evaluate("operating mode changed").await;
    }

    pub async fn set_default_config(&self, mode: FunctionalMode, config: Arc<Config>) {
        let mut cycle = self.inner.cycle.lock().await;
        cycle.scheduler.set_default(mode, config);
    }

    pub async fn add_schedule_entry(
        &self,
        mode: FunctionalMode,
        config: Arc<Config>,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<(), ScheduleError> {
        let mut cycle = self.inner.cycle.lock().await;
        cycle.scheduler.add_entry(mode, config, start, end)
    }

    pub async fn remove_schedule_entry(
        &self,
        mode: FunctionalMode,
        index: usize,
    ) -> Result<(), ScheduleError> {
        let mut cycle = self.inner.cycle.lock().await;
        cycle.scheduler.remove_entry(mode, index).map(|_| ())
    }

    pub async fn update_schedule_setpoint(
        &self,
        mode: FunctionalMode,
        index: usize,
        setpoint: f64,
    ) -> Result<(), ScheduleError> {
        let mut cycle = self.inner.cycle.lock().await;
        cycle.scheduler.update_setpoint(mode, index, setpoint)
    }

    pub async fn render_schedule(&self, mode: FunctionalMode) -> String {
        let cycle = self.inner.cycle.lock().await;
        cycle.scheduler.render(mode)
    }

    /// Republish current parameters to observers, debounced: an in-flight
    /// broadcast skips scheduling a duplicate, and the timer is single-shot
    /// and re-armed on each run.
    ///
    /// Boxed so the re-arm task can await the next run without the future
    /// type becoming cyclic.
    pub fn broadcast_params(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.broadcast_params_inner())
    }

    async fn broadcast_params_inner(&self) {
        let mut broadcast = match self.inner.broadcast.try_lock() {
            Ok(broadcast) => broadcast,
            Err(_) => return,
        };
        if let Some(timer) = broadcast.timer.take() {
            timer.abort();
        }

        let status = self.status();
        let events = &self.inner.events;
        events.publish(Event::SetpointUpdated {
            value: status.setpoint,
        });
        events.publish(Event::SystemModeUpdated {
            mode: status.system_mode,
        });
        events.publish(Event::FanModeUpdated {
            mode: status.fan_mode,
        });
        events.publish(Event::AwayUpdated { away: status.away });

        let controller = self.clone();
        let interval = self.inner.tunables.broadcast_interval;
        broadcast.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            controller.broadcast_params().await;
        }));
    }

    fn spawn_trigger_listener(&self) -> JoinHandle<()> {
        let controller = self.clone();
        let mut rx = self.inner.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Event::TemperatureChanged { .. }) => {
                        controller.evaluate("temperature changed").await;
                    }
                    Ok(Event::SetpointChanged { .. }) => {
                        controller.evaluate("setpoint changed").await;
                    }
                    Ok(Event::AwayChanged { .. }) => {
                        controller.evaluate("away state changed").await;
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "trigger listener lagged behind the event bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn apply_setpoint(&self, cycle: &mut CycleState, setpoint: f64) {
        if (setpoint - cycle.setpoint).abs() > f64::EPSILON {
            self.inner
                .events
                .publish(Event::SetpointChanged { value: setpoint });
        }
        cycle.setpoint = setpoint;
    }

    /// Resolve which functional mode the cycle runs in. NaN outside
    /// temperature compares false, so auto falls back to heating.
    fn functional_mode(&self, cycle: &CycleState) -> FunctionalMode {
        match cycle.operating_mode {
            OperatingMode::Heat => FunctionalMode::Heat,
            OperatingMode::Cool => FunctionalMode::Cool,
            OperatingMode::Auto => {
                if self.outside_temperature() >= self.inner.tunables.cool_threshold {
                    FunctionalMode::Cool
                } else {
                    FunctionalMode::Heat
                }
            }
        }
    }

    fn arm_watchdog(&self, cycle: &mut CycleState) {
        let controller = self.clone();
        let interval = self.inner.tunables.watchdog_interval;
        cycle.watchdog = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            // evaluate() aborts whatever handle sits in the slot. A fired
            // timer must clear its own handle first or it cancels the very
            // cycle it is starting at the first hardware await.
            controller.inner.cycle.lock().await.watchdog.take();
            controller.evaluate("watchdog").await;
        }));
    }

    fn update_status(&self, cycle: &CycleState) {
        let status = StatusSnapshot {
            setpoint: cycle.setpoint,
            operating_mode: cycle.operating_mode,
            system_mode: cycle.current.system_mode,
            fan_mode: cycle.current.fan_mode,
            heat_setpoint: cycle.current.heat_setpoint,
            cool_setpoint: cycle.current.cool_setpoint,
            override_enabled: cycle.override_enabled,
            away: self.away(),
        };
        match self.inner.status.write() {
            Ok(mut slot) => *slot = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }
}
