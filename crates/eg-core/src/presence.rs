//! Presence state machine.
//!
//! Tracks whether the visitor is on the page and drives the interval
//! accumulator accordingly. Leaving stops every timer; returning restarts the
//! current page's timer. Both transitions are guarded by the current state, so
//! repeated triggers fire callbacks once.
//!
//! Leaving has two causes, [`PresenceEvent::LeftPage`] and
//! [`PresenceEvent::WentIdle`]. Callbacks registered with
//! [`PresenceMachine::on_leave`] fire for either cause; the cause-specific
//! registries fire only for theirs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::idle::IdleDetector;
use crate::interval::IntervalAccumulator;
use crate::types::TimerName;

/// Why the visitor stopped being on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceEvent {
    /// Hidden tab, lost window focus or unload.
    LeftPage,
    /// No activity for longer than the idle threshold.
    WentIdle,
}

/// Current presence of the visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceState {
    #[default]
    OnPage,
    Left,
    Idle,
}

impl PresenceState {
    pub const fn is_on_page(self) -> bool {
        matches!(self, Self::OnPage)
    }

    const fn from_event(event: PresenceEvent) -> Self {
        match event {
            PresenceEvent::LeftPage => Self::Left,
            PresenceEvent::WentIdle => Self::Idle,
        }
    }
}

/// How many more times a callback may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Invocations {
    #[default]
    Unbounded,
    Times(u32),
}

impl Invocations {
    /// Consumes one invocation, returning whether the callback may run.
    const fn take(&mut self) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Times(0) => false,
            Self::Times(n) => {
                *n -= 1;
                true
            }
        }
    }
}

impl From<Option<u32>> for Invocations {
    fn from(times: Option<u32>) -> Self {
        times.map_or(Self::Unbounded, Self::Times)
    }
}

struct Registration {
    callback: Box<dyn FnMut()>,
    remaining: Invocations,
}

/// Callbacks fired on a transition.
///
/// Exhausted registrations stay in place and are skipped.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: Vec<Registration>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("registered", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl CallbackRegistry {
    pub fn register(&mut self, callback: impl FnMut() + 'static, times: Invocations) {
        self.entries.push(Registration {
            callback: Box::new(callback),
            remaining: times,
        });
    }

    /// Runs every live callback in registration order, returning how many ran.
    pub fn fire(&mut self) -> usize {
        let mut fired = 0;
        for entry in &mut self.entries {
            if entry.remaining.take() {
                (entry.callback)();
                fired += 1;
            }
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Owns presence state and transition callbacks.
#[derive(Debug, Default)]
pub struct PresenceMachine {
    state: PresenceState,
    left: CallbackRegistry,
    left_page: CallbackRegistry,
    went_idle: CallbackRegistry,
    returned: CallbackRegistry,
}

impl PresenceMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn state(&self) -> PresenceState {
        self.state
    }

    pub const fn is_on_page(&self) -> bool {
        self.state.is_on_page()
    }

    /// Registers a callback for leaving, whatever the cause.
    pub fn on_leave(&mut self, callback: impl FnMut() + 'static, times: Invocations) {
        self.left.register(callback, times);
    }

    /// Registers a callback for [`PresenceEvent::LeftPage`] only.
    pub fn on_leave_page(&mut self, callback: impl FnMut() + 'static, times: Invocations) {
        self.left_page.register(callback, times);
    }

    /// Registers a callback for [`PresenceEvent::WentIdle`] only.
    pub fn on_idle(&mut self, callback: impl FnMut() + 'static, times: Invocations) {
        self.went_idle.register(callback, times);
    }

    pub fn on_return(&mut self, callback: impl FnMut() + 'static, times: Invocations) {
        self.returned.register(callback, times);
    }

    /// Moves to `Left`/`Idle` and stops all timers at `at`.
    ///
    /// Timers are stopped even when already away. Returns whether the state
    /// changed (and callbacks fired).
    pub fn leave(
        &mut self,
        event: PresenceEvent,
        timers: &mut IntervalAccumulator,
        at: DateTime<Utc>,
    ) -> bool {
        let transitioned = self.state.is_on_page();
        if transitioned {
            self.state = PresenceState::from_event(event);
            let fired = self.left.fire()
                + match event {
                    PresenceEvent::LeftPage => self.left_page.fire(),
                    PresenceEvent::WentIdle => self.went_idle.fire(),
                };
            tracing::debug!(?event, fired, "visitor left");
        }
        timers.stop_all(at);
        transitioned
    }

    /// Moves back to `OnPage` and starts `page`'s timer at `at`.
    ///
    /// The timer start happens even when already on the page, which is a
    /// no-op for a running timer but re-establishes it after a page switch.
    pub fn come_back(
        &mut self,
        timers: &mut IntervalAccumulator,
        idle: &mut IdleDetector,
        page: &TimerName,
        at: DateTime<Utc>,
    ) -> bool {
        let transitioned = !self.state.is_on_page();
        if transitioned {
            self.state = PresenceState::OnPage;
            idle.reset();
            let fired = self.returned.fire();
            tracing::debug!(fired, "visitor returned");
        }
        timers.start(page, at);
        transitioned
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn counter() -> (Rc<Cell<u32>>, impl FnMut() + 'static) {
        let hits = Rc::new(Cell::new(0));
        let handle = Rc::clone(&hits);
        (hits, move || handle.set(handle.get() + 1))
    }

    struct Fixture {
        presence: PresenceMachine,
        timers: IntervalAccumulator,
        idle: IdleDetector,
        page: TimerName,
    }

    impl Fixture {
        fn new() -> Self {
            let page = TimerName::new("home").unwrap();
            let mut timers = IntervalAccumulator::new();
            timers.start(&page, t(0));
            Self {
                presence: PresenceMachine::new(),
                timers,
                idle: IdleDetector::default(),
                page,
            }
        }

        fn leave(&mut self, event: PresenceEvent, at: DateTime<Utc>) -> bool {
            self.presence.leave(event, &mut self.timers, at)
        }

        fn come_back(&mut self, at: DateTime<Utc>) -> bool {
            self.presence
                .come_back(&mut self.timers, &mut self.idle, &self.page, at)
        }
    }

    #[test]
    fn invocations_count_down_to_inert() {
        let mut times = Invocations::Times(2);
        assert!(times.take());
        assert!(times.take());
        assert!(!times.take());
        assert_eq!(times, Invocations::Times(0));

        let mut unbounded = Invocations::Unbounded;
        for _ in 0..100 {
            assert!(unbounded.take());
        }
    }

    #[test]
    fn leave_is_idempotent() {
        let mut fx = Fixture::new();
        let (hits, callback) = counter();
        fx.presence.on_leave(callback, Invocations::Unbounded);

        assert!(fx.leave(PresenceEvent::LeftPage, t(5)));
        assert!(!fx.leave(PresenceEvent::LeftPage, t(6)));
        assert!(!fx.leave(PresenceEvent::WentIdle, t(7)));

        assert_eq!(hits.get(), 1);
        assert_eq!(fx.presence.state(), PresenceState::Left);
        assert_eq!(fx.timers.elapsed_ms(&fx.page, t(100)), Some(5000));
    }

    #[test]
    fn come_back_is_idempotent_and_restarts_timer() {
        let mut fx = Fixture::new();
        let (hits, callback) = counter();
        fx.presence.on_return(callback, Invocations::Unbounded);

        fx.leave(PresenceEvent::LeftPage, t(5));
        assert!(fx.come_back(t(10)));
        assert!(!fx.come_back(t(11)));

        assert_eq!(hits.get(), 1);
        assert!(fx.presence.is_on_page());
        assert_eq!(fx.timers.series(&fx.page).unwrap().len(), 2);
        assert_eq!(fx.timers.elapsed_ms(&fx.page, t(12)), Some(7000));
    }

    #[test]
    fn come_back_resets_idle_detector() {
        let mut fx = Fixture::new();
        fx.idle = IdleDetector::new(0, 250);
        fx.idle.poll();
        fx.idle.poll();
        fx.leave(PresenceEvent::WentIdle, t(1));

        fx.come_back(t(2));
        assert!(!fx.idle.is_idle());
        assert_eq!(fx.idle.countdown_ms(), 0);
    }

    #[test]
    fn limited_callbacks_fire_exactly_twice() {
        let mut fx = Fixture::new();
        let (hits, callback) = counter();
        fx.presence.on_leave(callback, Invocations::Times(2));

        for round in 0..5 {
            fx.leave(PresenceEvent::LeftPage, t(round * 10));
            fx.come_back(t(round * 10 + 5));
        }
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn cause_specific_callbacks_only_fire_for_their_cause() {
        let mut fx = Fixture::new();
        let (any, any_cb) = counter();
        let (page, page_cb) = counter();
        let (idle, idle_cb) = counter();
        fx.presence.on_leave(any_cb, Invocations::Unbounded);
        fx.presence.on_leave_page(page_cb, Invocations::Unbounded);
        fx.presence.on_idle(idle_cb, Invocations::Unbounded);

        fx.leave(PresenceEvent::WentIdle, t(1));
        assert_eq!(fx.presence.state(), PresenceState::Idle);
        fx.come_back(t(2));
        fx.leave(PresenceEvent::LeftPage, t(3));
        fx.come_back(t(4));
        fx.leave(PresenceEvent::LeftPage, t(5));

        assert_eq!(any.get(), 3);
        assert_eq!(page.get(), 2);
        assert_eq!(idle.get(), 1);
    }
}
