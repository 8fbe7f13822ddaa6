//! Subsumption-architecture policy engine.
//!
//! A concrete policy is a fixed, ordered list of rule functions, lowest
//! priority first. Every evaluation starts `next` as a copy of `current`;
//! each rule may overwrite fields of `next`, and a later (higher-priority)
//! rule sees and may override everything earlier rules wrote. The chain is
//! pure with respect to wall-clock time: `now` arrives in the context, so
//! identical inputs always produce identical output.
//!
//! The engine only computes the next snapshot. Pushing the diff to hardware
//! is the controller's job.

use chrono::DateTime;
use chrono::Local;
use chrono::TimeDelta;
use serde::Deserialize;
use strum::Display;
use strum::EnumString;
use tracing::debug;

use super::state::FanMode;
use super::state::HardwareState;
use super::state::SystemMode;
use super::stats;

/// Identity of a concrete policy. Each kind is instantiated at most once per
/// controller and reused across cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Heat against the whole-house mean temperature.
    BasicHeat,
    /// Heat against the living room sensor.
    DaytimeHeat,
    /// Heat against the bedroom sensor.
    BedtimeHeat,
    /// Cool against the whole-house mean temperature.
    BasicCool,
}

/// Which reading the on/off trigger rules compare against the setpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceTemp {
    WholeHouseMean,
    Location(&'static str),
}

/// How the fan-circulate rules measure imbalance across sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadMetric {
    StdDev,
    MaxDelta,
}

/// Per-policy tuning constants, hoisted out of the rules so deployments can
/// adjust them without touching the chain.
#[derive(Debug, Clone)]
pub struct PolicyTuning {
    /// Degrees F past the setpoint before the on trigger trips.
    pub trigger_band: f64,
    /// Target pushed to the thermostat while heating.
    pub heat_target: f64,
    /// Target pushed to the thermostat while cooling.
    pub cool_target: f64,
    /// Minimum dwell in OFF before the system may turn back on.
    pub min_off_interval: TimeDelta,
    /// Minimum dwell in HEAT/COOL before the system may turn off.
    pub min_on_interval: TimeDelta,
    /// Minimum fan runtime before the fan-off rule may reset it to auto.
    pub min_fan_time: TimeDelta,
    /// Sensor spread that triggers fan circulation.
    pub circulate_spread: f64,
    /// Away rule only shuts the system down if every sensor reads above this.
    pub away_floor: f64,
    /// Cooling variants additionally require readings below this ceiling.
    pub away_ceiling: Option<f64>,
}

impl PolicyTuning {
    pub fn heating() -> Self {
        Self {
            trigger_band: 1.0,
            heat_target: 80.0,
            cool_target: 60.0,
            min_off_interval: TimeDelta::minutes(4),
            min_on_interval: TimeDelta::minutes(4),
            min_fan_time: TimeDelta::minutes(4),
            circulate_spread: 2.0,
            away_floor: 60.0,
            away_ceiling: None,
        }
    }

    pub fn cooling() -> Self {
        Self {
            circulate_spread: 3.0,
            away_ceiling: Some(78.0),
            ..Self::heating()
        }
    }
}

/// Named sensor readings for one evaluation.
#[derive(Debug, Clone, Default)]
pub struct Readings {
    readings: Vec<(String, f64)>,
}

impl Readings {
    pub fn new(readings: Vec<(String, f64)>) -> Self {
        Self { readings }
    }

    pub fn values(&self) -> Vec<f64> {
        self.readings.iter().map(|(_, v)| *v).collect()
    }

    /// Reading for a named location, NaN if the location has no sensor.
    pub fn at(&self, location: &str) -> f64 {
        self.readings
            .iter()
            .find(|(name, _)| name == location)
            .map_or(f64::NAN, |(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.readings.iter().map(|(name, v)| (name.as_str(), *v))
    }
}

/// Inputs a rule may consult. Rules read this and the current snapshot, and
/// write only to the next snapshot.
#[derive(Debug)]
pub struct RuleContext<'a> {
    pub reference_temp: f64,
    pub spread: f64,
    pub min_temp: f64,
    pub setpoint: f64,
    pub away: bool,
    pub now: DateTime<Local>,
    pub tuning: &'a PolicyTuning,
}

type RuleFn = fn(&RuleContext, &HardwareState, &mut HardwareState);

struct Rule {
    name: &'static str,
    apply: RuleFn,
}

/// A concrete policy: rule chain plus the knobs the rules consult.
pub struct Policy {
    kind: PolicyKind,
    reference: ReferenceTemp,
    spread: SpreadMetric,
    tuning: PolicyTuning,
    rules: Vec<Rule>,
}

impl Policy {
    pub fn new(kind: PolicyKind, tuning: PolicyTuning) -> Self {
        let heat_rules = || {
            vec![
                Rule { name: "heat_on", apply: heat_on },
                Rule { name: "heat_off", apply: heat_off },
                Rule { name: "min_off_interval", apply: heat_min_off_interval },
                Rule { name: "min_on_interval", apply: heat_min_on_interval },
                Rule { name: "fan_after_heat", apply: fan_after_heat },
                Rule { name: "fan_circulate", apply: fan_circulate },
                Rule { name: "fan_off", apply: fan_off },
                Rule { name: "away", apply: away },
            ]
        };
        let cool_rules = || {
            vec![
                Rule { name: "cool_on", apply: cool_on },
                Rule { name: "cool_off", apply: cool_off },
                Rule { name: "min_off_interval", apply: cool_min_off_interval },
                Rule { name: "min_on_interval", apply: cool_min_on_interval },
                Rule { name: "fan_after_cool", apply: fan_after_cool },
                Rule { name: "fan_circulate", apply: fan_circulate },
                Rule { name: "fan_off", apply: fan_off },
                Rule { name: "away", apply: away },
            ]
        };

        let (reference, spread, rules) = match kind {
            PolicyKind::BasicHeat => (
                ReferenceTemp::WholeHouseMean,
                SpreadMetric::StdDev,
                heat_rules(),
            ),
            PolicyKind::DaytimeHeat => (
                ReferenceTemp::Location("livingroom"),
                SpreadMetric::StdDev,
                heat_rules(),
            ),
            PolicyKind::BedtimeHeat => (
                ReferenceTemp::Location("bedroom"),
                SpreadMetric::StdDev,
                heat_rules(),
            ),
            PolicyKind::BasicCool => (
                ReferenceTemp::WholeHouseMean,
                SpreadMetric::MaxDelta,
                cool_rules(),
            ),
        };

        Self {
            kind,
            reference,
            spread,
            tuning,
            rules,
        }
    }

    /// Default tuning for a policy kind.
    pub fn default_tuning(kind: PolicyKind) -> PolicyTuning {
        match kind {
            PolicyKind::BasicCool => PolicyTuning::cooling(),
            _ => PolicyTuning::heating(),
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    pub fn reference_temp(&self, readings: &Readings) -> f64 {
        match &self.reference {
            ReferenceTemp::WholeHouseMean => stats::mean(&readings.values()),
            ReferenceTemp::Location(location) => readings.at(location),
        }
    }

    fn spread(&self, readings: &Readings) -> f64 {
        match self.spread {
            SpreadMetric::StdDev => stats::std_dev(&readings.values()),
            SpreadMetric::MaxDelta => stats::max_delta(&readings.values()),
        }
    }

    /// Assemble the rule inputs for one evaluation.
    pub fn context<'a>(
        &'a self,
        readings: &Readings,
        setpoint: f64,
        away: bool,
        now: DateTime<Local>,
    ) -> RuleContext<'a> {
        RuleContext {
            reference_temp: self.reference_temp(readings),
            spread: self.spread(readings),
            min_temp: stats::min(&readings.values()),
            setpoint,
            away,
            now,
            tuning: &self.tuning,
        }
    }

    /// Run the rule chain, lowest priority first, and return the resulting
    /// snapshot. Never touches hardware.
    pub fn evaluate(&self, ctx: &RuleContext, current: &HardwareState) -> HardwareState {
        debug!(
            policy = %self.kind,
            reference_temp = ctx.reference_temp,
            setpoint = ctx.setpoint,
            "running rule chain"
        );

        let mut next = current.derive();
        for rule in &self.rules {
            let before = next.clone();
            (rule.apply)(ctx, current, &mut next);
            if next != before {
                debug!(rule = rule.name, "rule tripped");
            }
        }
        next
    }
}

fn heat_on(ctx: &RuleContext, current: &HardwareState, next: &mut HardwareState) {
    if ctx.reference_temp <= ctx.setpoint - ctx.tuning.trigger_band
        && current.system_mode == SystemMode::Off
    {
        next.system_mode = SystemMode::Heat;
        next.fan_mode = FanMode::Auto;
        next.heat_setpoint = Some(ctx.tuning.heat_target);
    }
}

fn heat_off(ctx: &RuleContext, current: &HardwareState, next: &mut HardwareState) {
    if ctx.reference_temp >= ctx.setpoint && current.system_mode == SystemMode::Heat {
        next.system_mode = SystemMode::Off;
    }
}

fn cool_on(ctx: &RuleContext, current: &HardwareState, next: &mut HardwareState) {
    if ctx.reference_temp >= ctx.setpoint + ctx.tuning.trigger_band
        && current.system_mode == SystemMode::Off
    {
        next.system_mode = SystemMode::Cool;
        next.fan_mode = FanMode::Auto;
        next.cool_setpoint = Some(ctx.tuning.cool_target);
    }
}

fn cool_off(ctx: &RuleContext, current: &HardwareState, next: &mut HardwareState) {
    if ctx.reference_temp <= ctx.setpoint && current.system_mode == SystemMode::Cool {
        next.system_mode = SystemMode::Off;
    }
}

fn within(now: DateTime<Local>, set_at: Option<DateTime<Local>>, interval: TimeDelta) -> bool {
    set_at.is_some_and(|at| now - at < interval)
}

/// Veto a tentative turn-on that arrives too soon after the last turn-off.
fn heat_min_off_interval(ctx: &RuleContext, current: &HardwareState, next: &mut HardwareState) {
    if next.system_mode == SystemMode::Heat
        && current.system_mode == SystemMode::Off
        && within(ctx.now, current.system_mode_set_at, ctx.tuning.min_off_interval)
    {
        next.system_mode = SystemMode::Off;
    }
}

/// Veto a tentative turn-off that arrives too soon after the last turn-on.
fn heat_min_on_interval(ctx: &RuleContext, current: &HardwareState, next: &mut HardwareState) {
    if next.system_mode == SystemMode::Off
        && current.system_mode == SystemMode::Heat
        && within(ctx.now, current.system_mode_set_at, ctx.tuning.min_on_interval)
    {
        next.system_mode = SystemMode::Heat;
    }
}

fn cool_min_off_interval(ctx: &RuleContext, current: &HardwareState, next: &mut HardwareState) {
    if next.system_mode == SystemMode::Cool
        && current.system_mode == SystemMode::Off
        && within(ctx.now, current.system_mode_set_at, ctx.tuning.min_off_interval)
    {
        next.system_mode = SystemMode::Off;
    }
}

fn cool_min_on_interval(ctx: &RuleContext, current: &HardwareState, next: &mut HardwareState) {
    if next.system_mode == SystemMode::Off
        && current.system_mode == SystemMode::Cool
        && within(ctx.now, current.system_mode_set_at, ctx.tuning.min_on_interval)
    {
        next.system_mode = SystemMode::Cool;
    }
}

/// Circulate residual heat once the system shuts off.
fn fan_after_heat(_ctx: &RuleContext, current: &HardwareState, next: &mut HardwareState) {
    if next.system_mode == SystemMode::Off && current.system_mode == SystemMode::Heat {
        next.fan_mode = FanMode::On;
    }
}

fn fan_after_cool(_ctx: &RuleContext, current: &HardwareState, next: &mut HardwareState) {
    if next.system_mode == SystemMode::Off && current.system_mode == SystemMode::Cool {
        next.fan_mode = FanMode::On;
    }
}

/// Even the house out when sensors disagree and the system is idle.
fn fan_circulate(ctx: &RuleContext, _current: &HardwareState, next: &mut HardwareState) {
    if next.system_mode == SystemMode::Off
        && next.fan_mode == FanMode::Auto
        && ctx.spread > ctx.tuning.circulate_spread
    {
        next.fan_mode = FanMode::On;
    }
}

fn fan_off(ctx: &RuleContext, current: &HardwareState, next: &mut HardwareState) {
    if next.system_mode == SystemMode::Off
        && next.fan_mode == FanMode::On
        && ctx.spread <= ctx.tuning.circulate_spread
        && current
            .fan_mode_set_at
            .is_some_and(|at| ctx.now - at >= ctx.tuning.min_fan_time)
    {
        next.fan_mode = FanMode::Auto;
    }
}

/// Highest priority: everyone is away, shut the system down, as long as the
/// house stays inside the safety band.
fn away(ctx: &RuleContext, _current: &HardwareState, next: &mut HardwareState) {
    let above_floor = ctx.min_temp > ctx.tuning.away_floor;
    let below_ceiling = ctx
        .tuning
        .away_ceiling
        .map_or(true, |ceiling| ctx.min_temp < ceiling);

    if ctx.away && above_floor && below_ceiling {
        next.system_mode = SystemMode::Off;
        next.fan_mode = FanMode::Auto;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(values: &[(&str, f64)]) -> Readings {
        Readings::new(
            values
                .iter()
                .map(|(name, v)| (name.to_string(), *v))
                .collect(),
        )
    }

    fn evaluate(
        policy: &Policy,
        readings: &Readings,
        setpoint: f64,
        away: bool,
        now: DateTime<Local>,
        current: &HardwareState,
    ) -> HardwareState {
        let ctx = policy.context(readings, setpoint, away, now);
        policy.evaluate(&ctx, current)
    }

    fn basic_heat() -> Policy {
        Policy::new(PolicyKind::BasicHeat, PolicyTuning::heating())
    }

    #[test]
    fn cold_house_turns_heat_on() {
        let policy = basic_heat();
        let now = Local::now();
        let current = HardwareState::default();

        let next = evaluate(
            &policy,
            &readings(&[("bedroom", 72.0)]),
            74.0,
            false,
            now,
            &current,
        );

        assert_eq!(next.system_mode, SystemMode::Heat);
        assert_eq!(next.fan_mode, FanMode::Auto);
        assert_eq!(next.heat_setpoint, Some(80.0));
    }

    #[test]
    fn within_trigger_band_stays_off() {
        let policy = basic_heat();
        let next = evaluate(
            &policy,
            &readings(&[("bedroom", 73.5)]),
            74.0,
            false,
            Local::now(),
            &HardwareState::default(),
        );
        assert_eq!(next.system_mode, SystemMode::Off);
    }

    #[test]
    fn warm_house_turns_heat_off_and_runs_fan() {
        let policy = basic_heat();
        let now = Local::now();
        let current = HardwareState {
            system_mode: SystemMode::Heat,
            system_mode_set_at: Some(now - TimeDelta::minutes(10)),
            ..HardwareState::default()
        };

        let next = evaluate(
            &policy,
            &readings(&[("bedroom", 74.5)]),
            74.0,
            false,
            now,
            &current,
        );

        assert_eq!(next.system_mode, SystemMode::Off);
        assert_eq!(next.fan_mode, FanMode::On);
    }

    #[test]
    fn min_off_interval_vetoes_rapid_turn_on() {
        let policy = basic_heat();
        let now = Local::now();
        let current = HardwareState {
            system_mode: SystemMode::Off,
            system_mode_set_at: Some(now - TimeDelta::minutes(1)),
            ..HardwareState::default()
        };

        // Cold enough to trip heat_on, but OFF for less than the interval.
        let next = evaluate(
            &policy,
            &readings(&[("bedroom", 65.0)]),
            74.0,
            false,
            now,
            &current,
        );
        assert_eq!(next.system_mode, SystemMode::Off);

        // Once the interval elapses the same inputs turn heat on.
        let later = now + TimeDelta::minutes(5);
        let next = evaluate(
            &policy,
            &readings(&[("bedroom", 65.0)]),
            74.0,
            false,
            later,
            &current,
        );
        assert_eq!(next.system_mode, SystemMode::Heat);
    }

    #[test]
    fn min_on_interval_vetoes_rapid_turn_off() {
        let policy = basic_heat();
        let now = Local::now();
        let current = HardwareState {
            system_mode: SystemMode::Heat,
            system_mode_set_at: Some(now - TimeDelta::minutes(1)),
            ..HardwareState::default()
        };

        // Hot enough to trip heat_off, but heating for less than the interval.
        let next = evaluate(
            &policy,
            &readings(&[("bedroom", 80.0)]),
            74.0,
            false,
            now,
            &current,
        );
        assert_eq!(next.system_mode, SystemMode::Heat);
        // The vetoed transition must not leave the fan-after rule tripped.
        assert_eq!(next.fan_mode, FanMode::Auto);
    }

    #[test]
    fn fan_circulates_on_large_spread() {
        let policy = basic_heat();
        // Mean 71.5, population std-dev ~3.5: spread exceeds 2.0 but the
        // reference stays inside the trigger band.
        let r = readings(&[("bedroom", 68.0), ("livingroom", 75.0)]);
        let next = evaluate(
            &policy,
            &r,
            72.0,
            false,
            Local::now(),
            &HardwareState::default(),
        );
        assert_eq!(next.system_mode, SystemMode::Off);
        assert_eq!(next.fan_mode, FanMode::On);
    }

    #[test]
    fn fan_returns_to_auto_after_min_fan_time() {
        let policy = basic_heat();
        let now = Local::now();
        let r = readings(&[("bedroom", 73.8), ("livingroom", 74.2)]);

        let recently = HardwareState {
            fan_mode: FanMode::On,
            fan_mode_set_at: Some(now - TimeDelta::minutes(1)),
            ..HardwareState::default()
        };
        let next = evaluate(&policy, &r, 74.0, false, now, &recently);
        assert_eq!(next.fan_mode, FanMode::On);

        let long_enough = HardwareState {
            fan_mode: FanMode::On,
            fan_mode_set_at: Some(now - TimeDelta::minutes(5)),
            ..HardwareState::default()
        };
        let next = evaluate(&policy, &r, 74.0, false, now, &long_enough);
        assert_eq!(next.fan_mode, FanMode::Auto);
    }

    #[test]
    fn away_overrides_everything_above_the_floor() {
        let policy = basic_heat();
        // Cold enough that heat_on trips, but everyone is away and the
        // minimum reading is above the 60F floor.
        let next = evaluate(
            &policy,
            &readings(&[("bedroom", 65.0)]),
            74.0,
            true,
            Local::now(),
            &HardwareState::default(),
        );
        assert_eq!(next.system_mode, SystemMode::Off);
        assert_eq!(next.fan_mode, FanMode::Auto);
    }

    #[test]
    fn away_defers_to_safety_floor() {
        let policy = basic_heat();
        // Below the floor the away rule must not strand the house cold.
        let next = evaluate(
            &policy,
            &readings(&[("bedroom", 58.0)]),
            74.0,
            true,
            Local::now(),
            &HardwareState::default(),
        );
        assert_eq!(next.system_mode, SystemMode::Heat);
    }

    #[test]
    fn cooling_away_defers_to_safety_ceiling() {
        let policy = Policy::new(PolicyKind::BasicCool, PolicyTuning::cooling());
        // Hot enough that cool_on trips; away must not cancel it above the
        // 78F ceiling.
        let next = evaluate(
            &policy,
            &readings(&[("bedroom", 82.0)]),
            74.0,
            true,
            Local::now(),
            &HardwareState::default(),
        );
        assert_eq!(next.system_mode, SystemMode::Cool);
        assert_eq!(next.cool_setpoint, Some(60.0));
    }

    #[test]
    fn cool_trigger_band_is_symmetric() {
        let policy = Policy::new(PolicyKind::BasicCool, PolicyTuning::cooling());
        let current = HardwareState::default();

        let staying = evaluate(
            &policy,
            &readings(&[("bedroom", 74.5)]),
            74.0,
            false,
            Local::now(),
            &current,
        );
        assert_eq!(staying.system_mode, SystemMode::Off);

        let cooling = evaluate(
            &policy,
            &readings(&[("bedroom", 75.5)]),
            74.0,
            false,
            Local::now(),
            &current,
        );
        assert_eq!(cooling.system_mode, SystemMode::Cool);
    }

    #[test]
    fn all_nan_readings_change_nothing() {
        let policy = basic_heat();
        let now = Local::now();
        let r = readings(&[("bedroom", f64::NAN), ("livingroom", f64::NAN)]);

        for current in [
            HardwareState::default(),
            HardwareState {
                system_mode: SystemMode::Heat,
                system_mode_set_at: Some(now - TimeDelta::minutes(30)),
                fan_mode: FanMode::On,
                fan_mode_set_at: Some(now - TimeDelta::minutes(30)),
                ..HardwareState::default()
            },
        ] {
            let next = evaluate(&policy, &r, 74.0, false, now, &current);
            assert_eq!(next.system_mode, current.system_mode);
            assert_eq!(next.fan_mode, current.fan_mode);
        }
    }

    #[test]
    fn chain_is_deterministic() {
        let policy = basic_heat();
        let now = Local::now();
        let r = readings(&[("bedroom", 69.0), ("livingroom", 75.5)]);
        let current = HardwareState {
            system_mode: SystemMode::Heat,
            system_mode_set_at: Some(now - TimeDelta::minutes(2)),
            ..HardwareState::default()
        };

        let a = evaluate(&policy, &r, 74.0, false, now, &current);
        let b = evaluate(&policy, &r, 74.0, false, now, &current);
        assert_eq!(a, b);
    }

    #[test]
    fn named_location_reference() {
        let bedtime = Policy::new(PolicyKind::BedtimeHeat, PolicyTuning::heating());
        let r = readings(&[("bedroom", 68.0), ("livingroom", 75.0)]);
        assert_eq!(bedtime.reference_temp(&r), 68.0);

        let daytime = Policy::new(PolicyKind::DaytimeHeat, PolicyTuning::heating());
        assert_eq!(daytime.reference_temp(&r), 75.0);

        // A policy whose location has no sensor degrades to NaN, and the
        // chain no-ops.
        let lonely = readings(&[("livingroom", 75.0)]);
        assert!(bedtime.reference_temp(&lonely).is_nan());
    }

    #[test]
    fn policy_kind_parses_from_operator_input() {
        assert_eq!(
            "bedtime_heat".parse::<PolicyKind>().unwrap(),
            PolicyKind::BedtimeHeat
        );
        assert!("nonsense".parse::<PolicyKind>().is_err());
    }
}
