//! Wall-clock scheduling of policy/setpoint configurations.
//!
//! Each functional mode (heat, cool) has a default [`Config`] plus a set of
//! non-overlapping scheduled time-of-day windows. A window is half-open
//! `[start, end)`; `end < start` denotes a wraparound interval crossing
//! midnight, e.g. `[22:00, 06:00)`.

use std::sync::Arc;

use chrono::NaiveTime;
use chrono::TimeDelta;

use super::policy::PolicyKind;
use super::state::FunctionalMode;

/// A named pairing of a policy and a setpoint. Immutable after creation;
/// "did the active config change" checks compare by identity
/// (`Arc::ptr_eq`), not by value.
#[derive(Debug)]
pub struct Config {
    pub name: String,
    pub policy: PolicyKind,
    /// Target temperature in degrees F.
    pub setpoint: f64,
}

impl Config {
    pub fn new(name: impl Into<String>, policy: PolicyKind, setpoint: f64) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            policy,
            setpoint,
        })
    }
}

/// A [`Config`] active during a half-open wall-clock window.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub config: Arc<Config>,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ScheduleEntry {
    /// Wraparound containment: for `[start, end)`, `now` is contained if
    /// the interval is normal and `start <= now < end`, or it wraps and
    /// `now >= start || now < end`.
    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.end >= self.start {
            self.start <= now && now < self.end
        } else {
            now >= self.start || now < self.end
        }
    }

    /// Point-wise overlap test against a candidate interval, modulo 24h.
    /// Two half-open intervals overlap iff either one contains the other's
    /// start or last contained minute.
    fn overlaps(&self, start: NaiveTime, end: NaiveTime) -> bool {
        let candidate = ScheduleEntry {
            config: Arc::clone(&self.config),
            start,
            end,
        };
        // NaiveTime subtraction wraps around midnight, so [x, 00:00) derives
        // a last minute of 23:59.
        let one_minute = TimeDelta::minutes(1);
        self.contains(start)
            || self.contains(end - one_minute)
            || candidate.contains(self.start)
            || candidate.contains(self.end - one_minute)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("entry [{start}, {end}) conflicts with existing entry [{existing_start}, {existing_end})")]
    Conflict {
        start: NaiveTime,
        end: NaiveTime,
        existing_start: NaiveTime,
        existing_end: NaiveTime,
    },

    #[error("no schedule entry at index {0}")]
    InvalidIndex(usize),
}

/// Default config plus sorted, non-overlapping entries for one functional
/// mode.
#[derive(Debug, Default, Clone)]
pub struct ModeSchedule {
    default: Option<Arc<Config>>,
    entries: Vec<ScheduleEntry>,
}

/// Schedule tables for both functional modes.
#[derive(Debug, Default)]
pub struct Scheduler {
    heat: ModeSchedule,
    cool: ModeSchedule,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, mode: FunctionalMode) -> &ModeSchedule {
        match mode {
            FunctionalMode::Heat => &self.heat,
            FunctionalMode::Cool => &self.cool,
        }
    }

    fn table_mut(&mut self, mode: FunctionalMode) -> &mut ModeSchedule {
        match mode {
            FunctionalMode::Heat => &mut self.heat,
            FunctionalMode::Cool => &mut self.cool,
        }
    }

    pub fn set_default(&mut self, mode: FunctionalMode, config: Arc<Config>) {
        self.table_mut(mode).default = Some(config);
    }

    pub fn default_config(&self, mode: FunctionalMode) -> Option<Arc<Config>> {
        self.table(mode).default.clone()
    }

    /// Insert a scheduled window, keeping entries sorted by `(start, end)`.
    /// Rejected with [`ScheduleError::Conflict`] before insertion if the
    /// window overlaps any existing entry for the mode; the table is never
    /// silently truncated or merged.
    pub fn add_entry(
        &mut self,
        mode: FunctionalMode,
        config: Arc<Config>,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<(), ScheduleError> {
        let table = self.table_mut(mode);
        for existing in &table.entries {
            if existing.overlaps(start, end) {
                return Err(ScheduleError::Conflict {
                    start,
                    end,
                    existing_start: existing.start,
                    existing_end: existing.end,
                });
            }
        }

        table.entries.push(ScheduleEntry { config, start, end });
        table.entries.sort_by_key(|e| (e.start, e.end));
        Ok(())
    }

    /// Remove an entry by position in the sorted table.
    pub fn remove_entry(
        &mut self,
        mode: FunctionalMode,
        index: usize,
    ) -> Result<ScheduleEntry, ScheduleError> {
        let table = self.table_mut(mode);
        if index >= table.entries.len() {
            return Err(ScheduleError::InvalidIndex(index));
        }
        Ok(table.entries.remove(index))
    }

    /// Replace the config of the entry at `index` with one carrying a new
    /// setpoint. Configs are immutable, so this allocates a fresh one.
    pub fn update_setpoint(
        &mut self,
        mode: FunctionalMode,
        index: usize,
        setpoint: f64,
    ) -> Result<(), ScheduleError> {
        let table = self.table_mut(mode);
        let entry = table
            .entries
            .get_mut(index)
            .ok_or(ScheduleError::InvalidIndex(index))?;
        entry.config = Config::new(entry.config.name.clone(), entry.config.policy, setpoint);
        Ok(())
    }

    /// Resolve the active config at `now`: the first entry whose interval
    /// contains `now` (entries are non-overlapping, so at most one can), or
    /// the mode's default, or `None` if neither is configured.
    pub fn resolve(&self, mode: FunctionalMode, now: NaiveTime) -> Option<Arc<Config>> {
        let table = self.table(mode);
        for entry in &table.entries {
            if entry.contains(now) {
                return Some(Arc::clone(&entry.config));
            }
        }
        table.default.clone()
    }

    pub fn entries(&self, mode: FunctionalMode) -> &[ScheduleEntry] {
        &self.table(mode).entries
    }

    /// Render one mode's table for operator display.
    pub fn render(&self, mode: FunctionalMode) -> String {
        let table = self.table(mode);
        let mut out = String::from("index\tpolicy\tsetpoint\tstart\tend\n");
        match &table.default {
            Some(config) => out.push_str(&format!(
                "default\t{}\t{:.1}\t-\t-\n",
                config.policy, config.setpoint
            )),
            None => out.push_str("default\t(none)\t-\t-\t-\n"),
        }
        for (i, entry) in table.entries.iter().enumerate() {
            out.push_str(&format!(
                "{}\t{}\t{:.1}\t{}\t{}\n",
                i,
                entry.config.policy,
                entry.config.setpoint,
                entry.start.format("%H:%M"),
                entry.end.format("%H:%M"),
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn cfg(setpoint: f64) -> Arc<Config> {
        Config::new("test", PolicyKind::BasicHeat, setpoint)
    }

    #[test]
    fn resolve_prefers_matching_entry_over_default() {
        let mut sched = Scheduler::new();
        sched.set_default(FunctionalMode::Heat, cfg(74.0));
        sched
            .add_entry(FunctionalMode::Heat, cfg(68.0), t(22, 0), t(6, 0))
            .unwrap();

        let night = sched.resolve(FunctionalMode::Heat, t(23, 30)).unwrap();
        assert_eq!(night.setpoint, 68.0);

        let day = sched.resolve(FunctionalMode::Heat, t(12, 0)).unwrap();
        assert_eq!(day.setpoint, 74.0);
    }

    #[test]
    fn resolve_without_default_or_match_is_none() {
        let mut sched = Scheduler::new();
        sched
            .add_entry(FunctionalMode::Heat, cfg(68.0), t(22, 0), t(6, 0))
            .unwrap();
        assert!(sched.resolve(FunctionalMode::Heat, t(12, 0)).is_none());
    }

    #[test]
    fn wraparound_containment() {
        let entry = ScheduleEntry {
            config: cfg(68.0),
            start: t(22, 0),
            end: t(6, 0),
        };
        assert!(entry.contains(t(22, 0)));
        assert!(entry.contains(t(23, 59)));
        assert!(entry.contains(t(0, 0)));
        assert!(entry.contains(t(5, 59)));
        assert!(!entry.contains(t(6, 0)));
        assert!(!entry.contains(t(12, 0)));
        assert!(!entry.contains(t(21, 59)));
    }

    #[test]
    fn half_open_boundary_is_not_contained() {
        let entry = ScheduleEntry {
            config: cfg(70.0),
            start: t(6, 0),
            end: t(10, 0),
        };
        assert!(entry.contains(t(6, 0)));
        assert!(!entry.contains(t(10, 0)));
    }

    #[test]
    fn overlapping_entries_are_rejected() {
        let mut sched = Scheduler::new();
        sched
            .add_entry(FunctionalMode::Heat, cfg(68.0), t(22, 0), t(6, 0))
            .unwrap();

        // [05:00, 09:00) overlaps the tail of the wraparound entry.
        let err = sched
            .add_entry(FunctionalMode::Heat, cfg(70.0), t(5, 0), t(9, 0))
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Conflict { .. }));
        assert_eq!(sched.entries(FunctionalMode::Heat).len(), 1);
    }

    #[test]
    fn wraparound_boundary_overlap_is_rejected() {
        let mut sched = Scheduler::new();
        sched
            .add_entry(FunctionalMode::Heat, cfg(68.0), t(17, 45), t(7, 0))
            .unwrap();

        // Overlap in [06:00, 07:00).
        let err = sched
            .add_entry(FunctionalMode::Heat, cfg(70.0), t(6, 0), t(10, 0))
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Conflict { .. }));
    }

    #[test]
    fn adjacent_entries_are_accepted() {
        let mut sched = Scheduler::new();
        sched
            .add_entry(FunctionalMode::Heat, cfg(68.0), t(22, 0), t(6, 0))
            .unwrap();
        sched
            .add_entry(FunctionalMode::Heat, cfg(70.0), t(6, 0), t(10, 0))
            .unwrap();

        // Accepted pairs claim no instant in common.
        for minute in 0..24 * 60 {
            let now = t(minute / 60, minute % 60);
            let claims = sched
                .entries(FunctionalMode::Heat)
                .iter()
                .filter(|e| e.contains(now))
                .count();
            assert!(claims <= 1, "{now} claimed by {claims} entries");
        }
    }

    #[test]
    fn entries_kept_sorted_by_start() {
        let mut sched = Scheduler::new();
        sched
            .add_entry(FunctionalMode::Heat, cfg(68.0), t(22, 0), t(6, 0))
            .unwrap();
        sched
            .add_entry(FunctionalMode::Heat, cfg(70.0), t(6, 0), t(10, 0))
            .unwrap();

        let starts: Vec<_> = sched
            .entries(FunctionalMode::Heat)
            .iter()
            .map(|e| e.start)
            .collect();
        assert_eq!(starts, vec![t(6, 0), t(22, 0)]);
    }

    #[test]
    fn remove_out_of_range_is_an_error() {
        let mut sched = Scheduler::new();
        let err = sched.remove_entry(FunctionalMode::Heat, 0).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidIndex(0)));
    }

    #[test]
    fn update_setpoint_replaces_config_identity() {
        let mut sched = Scheduler::new();
        sched
            .add_entry(FunctionalMode::Heat, cfg(68.0), t(22, 0), t(6, 0))
            .unwrap();

        let before = Arc::clone(&sched.entries(FunctionalMode::Heat)[0].config);
        sched
            .update_setpoint(FunctionalMode::Heat, 0, 66.0)
            .unwrap();
        let after = &sched.entries(FunctionalMode::Heat)[0].config;

        assert!(!Arc::ptr_eq(&before, after));
        assert_eq!(after.setpoint, 66.0);
        assert_eq!(after.policy, before.policy);
    }

    #[test]
    fn modes_have_independent_tables() {
        let mut sched = Scheduler::new();
        sched
            .add_entry(FunctionalMode::Heat, cfg(68.0), t(22, 0), t(6, 0))
            .unwrap();

        // Same window on the cool table is not a conflict.
        sched
            .add_entry(FunctionalMode::Cool, cfg(76.0), t(22, 0), t(6, 0))
            .unwrap();
    }

    #[test]
    fn render_lists_default_and_entries() {
        let mut sched = Scheduler::new();
        sched.set_default(
            FunctionalMode::Heat,
            Config::new("day", PolicyKind::BasicHeat, 74.0),
        );
        sched
            .add_entry(
                FunctionalMode::Heat,
                Config::new("night", PolicyKind::BedtimeHeat, 68.0),
                t(22, 0),
                t(6, 0),
            )
            .unwrap();

        insta::assert_snapshot!(sched.render(FunctionalMode::Heat), @r"
        index	policy	setpoint	start	end
        default	basic_heat	74.0	-	-
        0	bedtime_heat	68.0	22:00	06:00
        ");
    }
}
