//! One page load, from initialization to unload.
//!
//! [`PageSession`] is the explicit owned instance a host creates when the page
//! loads and feeds with [`BrowserSignal`]s and poll ticks until it unloads.
//! All mutation happens through `&mut self` on the host's single event thread.

use crate::clock::Clock;
use crate::dispatch::{DispatchOutcome, DispatchTrigger, Dispatcher, Transport};
use crate::error::EngineError;
use crate::identity::{Identity, KeyValueStore};
use crate::idle::PollOutcome;
use crate::options::EngineOptions;
use crate::page::PageContext;
use crate::signal::BrowserSignal;
use crate::timer::ActiveTimer;
use crate::tracker::EngagementTracker;
use crate::types::ClientId;

/// Engagement tracking for a single page load.
#[derive(Debug)]
pub struct PageSession<C, T> {
    tracker: EngagementTracker<C>,
    dispatcher: Dispatcher<T>,
}

impl<C: Clock, T: Transport> PageSession<C, T> {
    /// Initializes tracking for a page load.
    ///
    /// Options are validated before anything else happens, so an invalid
    /// configuration leaves the store untouched. On success the page timer
    /// is running and the initial snapshot has been dispatched.
    pub fn start<S: KeyValueStore + ?Sized>(
        options: &EngineOptions,
        clock: C,
        store: &mut S,
        transport: T,
        client_id: ClientId,
        page: PageContext,
    ) -> Result<Self, EngineError> {
        let timer = ActiveTimer::new(options, clock)?;
        let identity = Identity::resolve(store, &client_id, &page.referrer, timer.now())?;
        tracing::info!(
            client = %client_id,
            page_id = %page.page_id,
            path = %page.url_path,
            session_hit = identity.session_hit_num,
            "page session started"
        );

        let mut session = Self {
            tracker: EngagementTracker::new(client_id, page, identity, timer),
            dispatcher: Dispatcher::new(transport),
        };
        session.dispatch(DispatchTrigger::Initial);
        Ok(session)
    }

    pub const fn tracker(&self) -> &EngagementTracker<C> {
        &self.tracker
    }

    pub const fn tracker_mut(&mut self) -> &mut EngagementTracker<C> {
        &mut self.tracker
    }

    pub const fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }

    /// Number of snapshots dispatched so far, including failed attempts.
    pub const fn dispatch_count(&self) -> u64 {
        self.dispatcher.attempts()
    }

    /// Applies one browser signal.
    ///
    /// Returns the dispatch outcome when the signal triggered a dispatch.
    pub fn handle(&mut self, signal: &BrowserSignal) -> Option<DispatchOutcome> {
        if signal.is_activity() {
            self.tracker.timer_mut().user_activity_detected();
        }

        match signal {
            BrowserSignal::MouseMove | BrowserSignal::KeyUp | BrowserSignal::TouchStart => None,
            BrowserSignal::Scroll {
                offset,
                content_height,
            } => {
                self.tracker.sample_scroll_depth(*offset, *content_height);
                None
            }
            BrowserSignal::VisibilityChange { hidden } => {
                self.tracker.timer_mut().visibility_changed(*hidden);
                hidden.then(|| self.dispatch(DispatchTrigger::Hidden))
            }
            BrowserSignal::Focus => {
                self.tracker.timer_mut().window_focused();
                None
            }
            BrowserSignal::Blur => {
                self.tracker.timer_mut().window_blurred();
                None
            }
            BrowserSignal::PageHide => {
                self.tracker.timer_mut().page_unloaded();
                Some(self.dispatch(DispatchTrigger::PageHide))
            }
            BrowserSignal::ElementEnter { id } => {
                self.tracker.timer_mut().element_entered(id);
                None
            }
            BrowserSignal::ElementLeave { id } => {
                self.tracker.timer_mut().element_left(id);
                None
            }
            BrowserSignal::Event { name } => {
                self.tracker.record_event(name);
                None
            }
            BrowserSignal::EventValue { name, value } => {
                self.tracker.record_event_with_value(name, value.clone());
                None
            }
        }
    }

    /// One tick of the recurring idle check; the host calls this every poll
    /// interval.
    pub fn poll(&mut self) -> PollOutcome {
        self.tracker.timer_mut().poll()
    }

    /// Builds the current snapshot and attempts delivery once.
    pub fn dispatch(&mut self, trigger: DispatchTrigger) -> DispatchOutcome {
        let snapshot = self.tracker.build_snapshot();
        self.dispatcher.dispatch(&snapshot, trigger)
    }
}
