//! Active-time tracking for one page load.
//!
//! [`ActiveTimer`] composes the interval accumulator, the idle detector and the
//! presence machine behind the operations a host wires to browser events.

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::EngineError;
use crate::idle::{IdleDetector, Milestones, PollOutcome};
use crate::interval::IntervalAccumulator;
use crate::options::{EngineOptions, idle_timeout_ms};
use crate::presence::{Invocations, PresenceEvent, PresenceMachine, PresenceState};
use crate::types::TimerName;

/// Time recorded for one timer, as reported by [`ActiveTimer::time_on_all_pages`].
#[derive(Debug, Clone, PartialEq)]
pub struct PageTime {
    pub page_name: TimerName,
    pub seconds: Option<f64>,
}

/// Measures active time on the current page, pausing while the visitor is
/// away or idle.
#[derive(Debug)]
pub struct ActiveTimer<C> {
    clock: C,
    timers: IntervalAccumulator,
    idle: IdleDetector,
    presence: PresenceMachine,
    milestones: Milestones,
    current_page: TimerName,
    track_leaves: bool,
    track_idle: bool,
}

impl<C: Clock> ActiveTimer<C> {
    /// Validates `options` and starts timing the current page.
    pub fn new(options: &EngineOptions, clock: C) -> Result<Self, EngineError> {
        options.validate()?;
        let idle = IdleDetector::new(
            idle_timeout_ms(options.idle_timeout_seconds)?,
            options.poll_interval_ms,
        );
        let current_page = options
            .current_page_name
            .clone()
            .unwrap_or_else(TimerName::generate);

        let mut timer = Self {
            clock,
            timers: IntervalAccumulator::new(),
            idle,
            presence: PresenceMachine::new(),
            milestones: Milestones::default(),
            current_page,
            track_leaves: options.track_when_user_leaves_page,
            track_idle: options.track_when_user_goes_idle,
        };
        timer.start_timer(None, options.initial_start_time);
        tracing::debug!(page = %timer.current_page, "active timer started");
        Ok(timer)
    }

    pub const fn clock(&self) -> &C {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub const fn current_page_name(&self) -> &TimerName {
        &self.current_page
    }

    /// Switches the page whose timer returns and elapsed queries refer to.
    ///
    /// Running timers are left alone.
    pub fn set_current_page_name(&mut self, name: TimerName) {
        self.current_page = name;
    }

    pub const fn presence(&self) -> PresenceState {
        self.presence.state()
    }

    pub const fn idle_detector(&self) -> &IdleDetector {
        &self.idle
    }

    pub const fn intervals(&self) -> &IntervalAccumulator {
        &self.timers
    }

    /// Starts `name` (default: the current page) at `at` (default: now).
    pub fn start_timer(&mut self, name: Option<&TimerName>, at: Option<DateTime<Utc>>) {
        let at = at.unwrap_or_else(|| self.clock.now());
        let name = name.unwrap_or(&self.current_page);
        self.timers.start(name, at);
    }

    /// Stops `name` (default: the current page) at `at` (default: now).
    pub fn stop_timer(&mut self, name: Option<&TimerName>, at: Option<DateTime<Utc>>) {
        let at = at.unwrap_or_else(|| self.clock.now());
        let name = name.unwrap_or(&self.current_page);
        self.timers.stop(name, at);
    }

    pub fn stop_all_timers(&mut self, at: Option<DateTime<Utc>>) {
        let at = at.unwrap_or_else(|| self.clock.now());
        self.timers.stop_all(at);
    }

    pub fn time_on_page_millis(&self, name: &TimerName) -> Option<i64> {
        self.timers.elapsed_ms(name, self.clock.now())
    }

    /// Seconds tracked on `name`, `None` if it was never started.
    pub fn time_on_page_seconds(&self, name: &TimerName) -> Option<f64> {
        self.timers.elapsed_seconds(name, self.clock.now())
    }

    pub fn time_on_current_page_seconds(&self) -> Option<f64> {
        self.time_on_page_seconds(&self.current_page)
    }

    pub fn time_on_all_pages(&self) -> Vec<PageTime> {
        let now = self.clock.now();
        self.timers
            .names()
            .map(|name| PageTime {
                page_name: name.clone(),
                seconds: self.timers.elapsed_seconds(name, now),
            })
            .collect()
    }

    /// Seconds tracked on an element, `0.0` if it was never entered.
    pub fn time_on_element_seconds(&self, id: &TimerName) -> f64 {
        self.time_on_page_seconds(id).unwrap_or(0.0)
    }

    /// Starts timing `id` when the pointer or focus enters it.
    pub fn element_entered(&mut self, id: &TimerName) {
        self.start_timer(Some(id), None);
    }

    /// Stops timing `id` when the pointer leaves it.
    pub fn element_left(&mut self, id: &TimerName) {
        self.stop_timer(Some(id), None);
    }

    pub fn reset_recorded_page_time(&mut self, name: &TimerName) {
        self.timers.reset_series(name);
    }

    pub fn reset_all_recorded_page_times(&mut self) {
        self.timers.reset_all();
    }

    /// Changes the idle threshold.
    pub fn set_idle_duration_seconds(&mut self, seconds: f64) -> Result<(), EngineError> {
        self.idle.set_idle_timeout_ms(idle_timeout_ms(seconds)?);
        Ok(())
    }

    /// Runs `callback` when the visitor leaves or goes idle, at most `times`
    /// times (`None` for unbounded).
    pub fn call_when_user_leaves(&mut self, callback: impl FnMut() + 'static, times: Option<u32>) {
        self.presence.on_leave(callback, Invocations::from(times));
    }

    pub fn call_when_user_leaves_page(
        &mut self,
        callback: impl FnMut() + 'static,
        times: Option<u32>,
    ) {
        self.presence.on_leave_page(callback, Invocations::from(times));
    }

    pub fn call_when_user_goes_idle(
        &mut self,
        callback: impl FnMut() + 'static,
        times: Option<u32>,
    ) {
        self.presence.on_idle(callback, Invocations::from(times));
    }

    pub fn call_when_user_returns(&mut self, callback: impl FnMut() + 'static, times: Option<u32>) {
        self.presence.on_return(callback, Invocations::from(times));
    }

    /// Runs `callback` once, the first poll after the current page's active
    /// time exceeds `seconds`.
    pub fn call_after_time_elapsed_seconds(
        &mut self,
        seconds: f64,
        callback: impl FnMut() + 'static,
    ) {
        self.milestones.register(seconds, callback);
    }

    /// Pointer movement, key release, touch or scroll.
    pub fn user_activity_detected(&mut self) {
        if !self.track_idle {
            return;
        }
        if self.idle.is_idle() {
            self.trigger_user_returned();
        }
        self.idle.reset();
    }

    /// One tick of the recurring idle check.
    pub fn poll(&mut self) -> PollOutcome {
        if !self.track_idle || self.idle.is_idle() {
            return PollOutcome::Skipped;
        }
        let elapsed = self.time_on_current_page_seconds();
        let fired = self.milestones.check(elapsed);
        if fired > 0 {
            tracing::debug!(fired, ?elapsed, "elapsed-time milestones reached");
        }
        let outcome = self.idle.poll();
        if outcome == PollOutcome::WentIdle {
            self.trigger_user_left(PresenceEvent::WentIdle);
        }
        outcome
    }

    pub fn visibility_changed(&mut self, hidden: bool) {
        if hidden {
            self.page_left();
        } else {
            self.page_entered();
        }
    }

    pub fn window_focused(&mut self) {
        self.page_entered();
    }

    pub fn window_blurred(&mut self) {
        self.page_left();
    }

    pub fn page_unloaded(&mut self) {
        self.page_left();
    }

    fn page_left(&mut self) {
        if self.track_leaves {
            self.trigger_user_left(PresenceEvent::LeftPage);
        }
    }

    fn page_entered(&mut self) {
        if self.track_leaves {
            self.trigger_user_returned();
        }
    }

    fn trigger_user_left(&mut self, event: PresenceEvent) {
        let now = self.clock.now();
        self.presence.leave(event, &mut self.timers, now);
    }

    fn trigger_user_returned(&mut self) {
        let now = self.clock.now();
        self.presence
            .come_back(&mut self.timers, &mut self.idle, &self.current_page, now);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use chrono::Duration;

    use super::*;
    use crate::clock::ManualClock;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-29T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn options(page: &str) -> EngineOptions {
        EngineOptions {
            current_page_name: Some(TimerName::new(page).unwrap()),
            ..EngineOptions::default()
        }
    }

    fn counter() -> (Rc<Cell<u32>>, impl FnMut() + 'static) {
        let hits = Rc::new(Cell::new(0));
        let handle = Rc::clone(&hits);
        (hits, move || handle.set(handle.get() + 1))
    }

    /// Polls every poll interval for `ms` of simulated time.
    fn run_for(timer: &mut ActiveTimer<ManualClock>, clock: &ManualClock, ms: i64) {
        let step = 250;
        for _ in 0..ms / step {
            clock.advance_ms(step);
            timer.poll();
        }
    }

    #[test]
    fn starts_current_page_on_creation() {
        let clock = ManualClock::new(start());
        let timer = ActiveTimer::new(&options("home"), clock.clone()).unwrap();
        clock.advance_ms(4000);

        assert!(timer.intervals().is_running(timer.current_page_name()));
        assert_eq!(timer.time_on_current_page_seconds(), Some(4.0));
    }

    #[test]
    fn honours_initial_start_time() {
        let clock = ManualClock::new(start());
        let opts = EngineOptions {
            initial_start_time: Some(start() - Duration::seconds(10)),
            ..options("home")
        };
        let timer = ActiveTimer::new(&opts, clock).unwrap();
        assert_eq!(timer.time_on_current_page_seconds(), Some(10.0));
    }

    #[test]
    fn generates_page_name_when_absent() {
        let clock = ManualClock::new(start());
        let timer = ActiveTimer::new(&EngineOptions::default(), clock).unwrap();
        uuid::Uuid::parse_str(timer.current_page_name().as_str()).unwrap();
    }

    #[test]
    fn invalid_options_fail_fast() {
        let clock = ManualClock::new(start());
        let opts = EngineOptions {
            idle_timeout_seconds: f64::NAN,
            ..EngineOptions::default()
        };
        assert!(matches!(
            ActiveTimer::new(&opts, clock),
            Err(EngineError::InvalidIdleDuration { .. })
        ));
    }

    #[test]
    fn idle_after_timeout_then_single_activity_returns() {
        let clock = ManualClock::new(start());
        let mut timer = ActiveTimer::new(&options("home"), clock.clone()).unwrap();
        let (left, left_cb) = counter();
        let (back, back_cb) = counter();
        timer.call_when_user_leaves(left_cb, None);
        timer.call_when_user_returns(back_cb, None);

        run_for(&mut timer, &clock, 31_000);
        assert_eq!(timer.presence(), PresenceState::Idle);
        assert_eq!(left.get(), 1);

        // Time stopped accruing when the visitor went idle at 30.5s.
        let frozen = timer.time_on_current_page_seconds().unwrap();
        assert!((frozen - 30.5).abs() < f64::EPSILON, "got {frozen}");

        timer.user_activity_detected();
        assert_eq!(timer.presence(), PresenceState::OnPage);
        assert_eq!(back.get(), 1);
        assert_eq!(timer.idle_detector().countdown_ms(), 0);
        assert_eq!(timer.intervals().series(timer.current_page_name()).unwrap().len(), 2);

        clock.advance_ms(2000);
        assert_eq!(timer.time_on_current_page_seconds(), Some(frozen + 2.0));
    }

    #[test]
    fn idle_fires_once_per_idle_period() {
        let clock = ManualClock::new(start());
        let mut timer = ActiveTimer::new(&options("home"), clock.clone()).unwrap();
        let (idle, idle_cb) = counter();
        timer.call_when_user_goes_idle(idle_cb, None);

        run_for(&mut timer, &clock, 120_000);
        assert_eq!(idle.get(), 1);
    }

    #[test]
    fn activity_while_active_does_not_fire_return() {
        let clock = ManualClock::new(start());
        let mut timer = ActiveTimer::new(&options("home"), clock.clone()).unwrap();
        let (back, back_cb) = counter();
        timer.call_when_user_returns(back_cb, None);

        run_for(&mut timer, &clock, 10_000);
        timer.user_activity_detected();
        assert_eq!(back.get(), 0);
        assert_eq!(timer.idle_detector().countdown_ms(), 0);
    }

    #[test]
    fn hidden_page_pauses_and_visible_resumes() {
        let clock = ManualClock::new(start());
        let mut timer = ActiveTimer::new(&options("home"), clock.clone()).unwrap();

        clock.advance_ms(5000);
        timer.visibility_changed(true);
        clock.advance_ms(60_000);
        timer.visibility_changed(false);
        clock.advance_ms(1000);

        assert_eq!(timer.presence(), PresenceState::OnPage);
        assert_eq!(timer.time_on_current_page_seconds(), Some(6.0));
    }

    #[test]
    fn blur_and_hidden_race_fires_left_once() {
        let clock = ManualClock::new(start());
        let mut timer = ActiveTimer::new(&options("home"), clock.clone()).unwrap();
        let (left, left_cb) = counter();
        timer.call_when_user_leaves_page(left_cb, None);

        timer.window_blurred();
        timer.visibility_changed(true);
        timer.page_unloaded();
        assert_eq!(left.get(), 1);
        assert_eq!(timer.presence(), PresenceState::Left);
    }

    #[test]
    fn activity_does_not_end_a_page_leave() {
        let clock = ManualClock::new(start());
        let mut timer = ActiveTimer::new(&options("home"), clock.clone()).unwrap();
        timer.window_blurred();
        timer.user_activity_detected();
        assert_eq!(timer.presence(), PresenceState::Left);
    }

    #[test]
    fn return_resumes_current_page_after_switch() {
        let clock = ManualClock::new(start());
        let mut timer = ActiveTimer::new(&options("home"), clock.clone()).unwrap();
        let pricing = TimerName::new("pricing").unwrap();

        clock.advance_ms(3000);
        timer.window_blurred();
        timer.set_current_page_name(pricing.clone());
        timer.window_focused();
        clock.advance_ms(2000);

        assert_eq!(timer.time_on_page_seconds(&pricing), Some(2.0));
        assert_eq!(
            timer.time_on_page_seconds(&TimerName::new("home").unwrap()),
            Some(3.0)
        );
        let all = timer.time_on_all_pages();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].page_name.as_str(), "home");
    }

    #[test]
    fn milestones_fire_once_after_threshold() {
        let clock = ManualClock::new(start());
        let mut timer = ActiveTimer::new(&options("home"), clock.clone()).unwrap();
        let (hits, cb) = counter();
        timer.call_after_time_elapsed_seconds(5.0, cb);

        run_for(&mut timer, &clock, 5000);
        assert_eq!(hits.get(), 0);
        run_for(&mut timer, &clock, 250);
        assert_eq!(hits.get(), 1);

        timer.user_activity_detected();
        run_for(&mut timer, &clock, 20_000);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn disabled_idle_tracking_ignores_polls() {
        let clock = ManualClock::new(start());
        let opts = EngineOptions {
            track_when_user_goes_idle: false,
            ..options("home")
        };
        let mut timer = ActiveTimer::new(&opts, clock.clone()).unwrap();
        run_for(&mut timer, &clock, 120_000);
        assert_eq!(timer.presence(), PresenceState::OnPage);
        assert_eq!(timer.time_on_current_page_seconds(), Some(120.0));
    }

    #[test]
    fn disabled_leave_tracking_ignores_visibility() {
        let clock = ManualClock::new(start());
        let opts = EngineOptions {
            track_when_user_leaves_page: false,
            ..options("home")
        };
        let mut timer = ActiveTimer::new(&opts, clock.clone()).unwrap();
        timer.visibility_changed(true);
        timer.window_blurred();
        assert_eq!(timer.presence(), PresenceState::OnPage);
    }

    #[test]
    fn stop_and_restart_explicit_timer() {
        let clock = ManualClock::new(start());
        let mut timer = ActiveTimer::new(&options("home"), clock.clone()).unwrap();
        let element = TimerName::new("signup-form").unwrap();

        timer.start_timer(Some(&element), None);
        clock.advance_ms(1500);
        timer.stop_timer(Some(&element), None);
        clock.advance_ms(1500);
        assert_eq!(timer.time_on_page_millis(&element), Some(1500));

        timer.reset_recorded_page_time(&element);
        assert_eq!(timer.time_on_page_millis(&element), None);
    }

    #[test]
    fn element_time_is_zero_until_entered() {
        let clock = ManualClock::new(start());
        let timer = ActiveTimer::new(&options("home"), clock).unwrap();
        let element = TimerName::new("pricing-table").unwrap();
        assert_eq!(timer.time_on_element_seconds(&element), 0.0);
    }

    #[test]
    fn leaving_stops_elements_and_return_restarts_only_page() {
        let clock = ManualClock::new(start());
        let mut timer = ActiveTimer::new(&options("home"), clock.clone()).unwrap();
        let element = TimerName::new("pricing-table").unwrap();
        let page = TimerName::new("home").unwrap();

        timer.element_entered(&element);
        clock.advance_ms(2000);
        timer.visibility_changed(true);
        assert!(!timer.intervals().is_running(&element));
        assert!(!timer.intervals().is_running(&page));

        clock.advance_ms(5000);
        timer.visibility_changed(false);
        assert!(timer.intervals().is_running(&page));
        assert!(!timer.intervals().is_running(&element));

        clock.advance_ms(1000);
        assert_eq!(timer.time_on_element_seconds(&element), 2.0);
        assert_eq!(timer.time_on_current_page_seconds(), Some(3.0));

        timer.element_entered(&element);
        clock.advance_ms(500);
        timer.element_left(&element);
        clock.advance_ms(500);
        assert_eq!(timer.time_on_element_seconds(&element), 2.5);
    }

    #[test]
    fn set_idle_duration_validates() {
        let clock = ManualClock::new(start());
        let mut timer = ActiveTimer::new(&options("home"), clock).unwrap();
        assert!(timer.set_idle_duration_seconds(-3.0).is_err());
        timer.set_idle_duration_seconds(2.0).unwrap();
        assert_eq!(timer.idle_detector().idle_timeout_ms(), 2000);
    }
}
