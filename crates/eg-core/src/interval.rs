//! Start/stop interval bookkeeping per timer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::types::TimerName;

/// One continuous stretch of tracked time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: DateTime<Utc>,
    /// `None` while the interval is still running.
    pub stop: Option<DateTime<Utc>>,
}

impl Interval {
    const fn open(start: DateTime<Utc>) -> Self {
        Self { start, stop: None }
    }

    pub const fn is_open(&self) -> bool {
        self.stop.is_none()
    }

    /// Duration in milliseconds, measuring an open interval against `now`.
    ///
    /// Negative when the clock moved backwards; callers decide how to clamp.
    pub fn duration_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.stop.unwrap_or(now) - self.start).num_milliseconds()
    }
}

/// Records intervals for any number of named timers.
///
/// Per timer, at most one interval is open at a time and the series keeps
/// insertion order, so the last entry is always the latest interval.
#[derive(Debug, Clone, Default)]
pub struct IntervalAccumulator {
    series: BTreeMap<TimerName, Vec<Interval>>,
}

impl IntervalAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new interval for `name` at `at`.
    ///
    /// Returns `false` without changes when the latest interval is still open.
    pub fn start(&mut self, name: &TimerName, at: DateTime<Utc>) -> bool {
        let series = self.series.entry(name.clone()).or_default();
        if series.last().is_some_and(Interval::is_open) {
            return false;
        }
        series.push(Interval::open(at));
        true
    }

    /// Closes the open interval for `name` at `at`.
    ///
    /// Returns `false` when the timer was never started or is already stopped.
    pub fn stop(&mut self, name: &TimerName, at: DateTime<Utc>) -> bool {
        match self.series.get_mut(name).and_then(|s| s.last_mut()) {
            Some(latest) if latest.is_open() => {
                latest.stop = Some(at);
                true
            }
            _ => false,
        }
    }

    /// Closes every open interval at `at`.
    pub fn stop_all(&mut self, at: DateTime<Utc>) {
        for latest in self.series.values_mut().filter_map(|s| s.last_mut()) {
            if latest.is_open() {
                latest.stop = Some(at);
            }
        }
    }

    /// Whether `name` currently has an open interval.
    pub fn is_running(&self, name: &TimerName) -> bool {
        self.series
            .get(name)
            .and_then(|s| s.last())
            .is_some_and(Interval::is_open)
    }

    /// Total tracked milliseconds for `name`, or `None` if it was never started.
    pub fn elapsed_ms(&self, name: &TimerName, now: DateTime<Utc>) -> Option<i64> {
        self.series
            .get(name)
            .map(|series| series.iter().map(|i| i.duration_ms(now)).sum())
    }

    /// Total tracked seconds for `name`, or `None` if it was never started.
    #[expect(
        clippy::cast_precision_loss,
        reason = "millisecond totals stay far below 2^52"
    )]
    pub fn elapsed_seconds(&self, name: &TimerName, now: DateTime<Utc>) -> Option<f64> {
        self.elapsed_ms(name, now).map(|ms| ms as f64 / 1000.0)
    }

    /// The recorded intervals for `name`.
    pub fn series(&self, name: &TimerName) -> Option<&[Interval]> {
        self.series.get(name).map(Vec::as_slice)
    }

    /// All timer names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &TimerName> {
        self.series.keys()
    }

    /// Forgets everything recorded for `name`.
    pub fn reset_series(&mut self, name: &TimerName) {
        self.series.remove(name);
    }

    pub fn reset_all(&mut self) {
        self.series.clear();
    }
}
