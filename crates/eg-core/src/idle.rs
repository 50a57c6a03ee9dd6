//! Idle detection by polling, plus elapsed-time milestones.
//!
//! The detector does not measure wall-clock time. Each poll tick adds one poll
//! interval to the idle countdown, and any qualifying activity resets it. The
//! host is responsible for calling [`IdleDetector::poll`] on a fixed cadence.

use std::fmt;

/// Default idle threshold: 30 seconds without activity.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Default poll cadence.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// What a single poll tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Already idle; only activity can clear it.
    Skipped,
    /// Still active; the countdown advanced by one poll interval.
    Counting,
    /// The threshold was exceeded on this tick.
    WentIdle,
}

/// Flips between active and idle based on an activity countdown.
#[derive(Debug, Clone)]
pub struct IdleDetector {
    idle_timeout_ms: u64,
    poll_interval_ms: u64,
    countdown_ms: u64,
    idle: bool,
}

impl Default for IdleDetector {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS)
    }
}

impl IdleDetector {
    pub const fn new(idle_timeout_ms: u64, poll_interval_ms: u64) -> Self {
        Self {
            idle_timeout_ms,
            poll_interval_ms,
            countdown_ms: 0,
            idle: false,
        }
    }

    pub const fn is_idle(&self) -> bool {
        self.idle
    }

    /// Milliseconds accumulated since the last activity.
    pub const fn countdown_ms(&self) -> u64 {
        self.countdown_ms
    }

    pub const fn idle_timeout_ms(&self) -> u64 {
        self.idle_timeout_ms
    }

    pub const fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    pub const fn set_idle_timeout_ms(&mut self, idle_timeout_ms: u64) {
        self.idle_timeout_ms = idle_timeout_ms;
    }

    /// Records user activity.
    ///
    /// Returns `true` if the detector was idle, meaning the caller must run
    /// the return-from-idle transition.
    pub const fn activity(&mut self) -> bool {
        let was_idle = self.idle;
        self.reset();
        was_idle
    }

    /// Clears the idle flag and zeroes the countdown.
    pub const fn reset(&mut self) {
        self.idle = false;
        self.countdown_ms = 0;
    }

    /// Advances the countdown by one tick.
    ///
    /// The tick that detects the threshold being exceeded does not add to the
    /// countdown.
    pub const fn poll(&mut self) -> PollOutcome {
        if self.idle {
            return PollOutcome::Skipped;
        }
        if self.countdown_ms > self.idle_timeout_ms {
            self.idle = true;
            PollOutcome::WentIdle
        } else {
            self.countdown_ms += self.poll_interval_ms;
            PollOutcome::Counting
        }
    }
}

struct Milestone {
    threshold_seconds: f64,
    callback: Box<dyn FnMut()>,
    fired: bool,
}

/// One-shot callbacks keyed on cumulative active time.
#[derive(Default)]
pub struct Milestones {
    entries: Vec<Milestone>,
}

impl fmt::Debug for Milestones {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Milestones")
            .field("registered", &self.entries.len())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Milestones {
    /// Registers `callback` to run once active time exceeds `threshold_seconds`.
    pub fn register(&mut self, threshold_seconds: f64, callback: impl FnMut() + 'static) {
        self.entries.push(Milestone {
            threshold_seconds,
            callback: Box::new(callback),
            fired: false,
        });
    }

    /// Fires every pending milestone whose threshold `elapsed_seconds` exceeds.
    ///
    /// A timer that was never started (`None`) fires nothing. Returns how many
    /// milestones fired.
    pub fn check(&mut self, elapsed_seconds: Option<f64>) -> usize {
        let Some(elapsed) = elapsed_seconds else {
            return 0;
        };
        let mut fired = 0;
        for milestone in self.entries.iter_mut().filter(|m| !m.fired) {
            if elapsed > milestone.threshold_seconds {
                (milestone.callback)();
                milestone.fired = true;
                fired += 1;
            }
        }
        fired
    }

    /// Number of milestones that have not fired yet.
    pub fn pending(&self) -> usize {
        self.entries.iter().filter(|m| !m.fired).count()
    }
}
