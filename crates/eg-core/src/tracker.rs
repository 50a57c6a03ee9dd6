//! Per-page-load engagement aggregation.

use std::collections::BTreeMap;

use crate::clock::Clock;
use crate::identity::Identity;
use crate::page::PageContext;
use crate::snapshot::EngagementSnapshot;
use crate::timer::ActiveTimer;
use crate::types::ClientId;

/// Upper bound on reported active seconds.
///
/// Guards against clock anomalies; tracking itself is not capped.
pub const MAX_REPORTED_SECONDS: f64 = 3600.0;

/// Clamps raw active seconds into \[0, [`MAX_REPORTED_SECONDS`]\].
pub fn clamp_active_seconds(raw: f64) -> f64 {
    raw.clamp(0.0, MAX_REPORTED_SECONDS)
}

/// Combines active time, scroll depth and custom events for one page load.
#[derive(Debug)]
pub struct EngagementTracker<C> {
    client_id: ClientId,
    page: PageContext,
    identity: Identity,
    timer: ActiveTimer<C>,
    max_depth: Option<f64>,
    event_counts: BTreeMap<String, u64>,
    event_values: BTreeMap<String, Vec<String>>,
}

impl<C: Clock> EngagementTracker<C> {
    pub fn new(
        client_id: ClientId,
        page: PageContext,
        identity: Identity,
        timer: ActiveTimer<C>,
    ) -> Self {
        Self {
            client_id,
            page,
            identity,
            timer,
            max_depth: None,
            event_counts: BTreeMap::new(),
            event_values: BTreeMap::new(),
        }
    }

    pub const fn timer(&self) -> &ActiveTimer<C> {
        &self.timer
    }

    pub const fn timer_mut(&mut self) -> &mut ActiveTimer<C> {
        &mut self.timer
    }

    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    pub const fn page(&self) -> &PageContext {
        &self.page
    }

    /// Active seconds on the current page, clamped for reporting.
    pub fn current_active_seconds(&self) -> Option<f64> {
        self.timer
            .time_on_current_page_seconds()
            .map(clamp_active_seconds)
    }

    /// Samples the scroll position and returns the current depth fraction.
    ///
    /// The stored maximum only ever grows. Returns `None` and records nothing
    /// when the content height is not positive or either input is not finite.
    pub fn sample_scroll_depth(&mut self, offset: f64, content_height: f64) -> Option<f64> {
        if !offset.is_finite() || !content_height.is_finite() || content_height <= 0.0 {
            return None;
        }
        let depth = (offset / content_height).clamp(0.0, 1.0);
        if self.max_depth.is_none_or(|max| depth >= max) {
            self.max_depth = Some(depth);
        }
        Some(depth)
    }

    pub const fn max_scroll_depth(&self) -> Option<f64> {
        self.max_depth
    }

    /// Increments the counter for `name`.
    pub fn record_event(&mut self, name: &str) {
        *self.event_counts.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Appends `value` to the value list for `name`.
    pub fn record_event_with_value(&mut self, name: &str, value: impl Into<String>) {
        self.event_values
            .entry(name.to_string())
            .or_default()
            .push(value.into());
    }

    pub const fn event_counts(&self) -> &BTreeMap<String, u64> {
        &self.event_counts
    }

    pub const fn event_values(&self) -> &BTreeMap<String, Vec<String>> {
        &self.event_values
    }

    /// Assembles a snapshot from the current state.
    pub fn build_snapshot(&self) -> EngagementSnapshot {
        let identity = &self.identity;
        let page = &self.page;
        EngagementSnapshot {
            client_id: self.client_id.to_string(),
            url_path: page.url_path.clone(),
            page_id: page.page_id.clone(),
            is_mobile: page.is_mobile,
            resolution: page.resolution.clone(),
            visitor_id: identity.visitor_id.clone(),
            session_id: identity.session_id.clone(),
            referrer: identity.referrer.clone(),
            referrer_host: identity.referrer_host.clone(),
            session_referrer: identity.session_referrer.clone(),
            first_ever_session: identity.first_ever_session,
            first_ever_pageview: identity.first_ever_pageview,
            num_lifetime_pageviews: identity.lifetime_pageviews,
            num_lifetime_sessions: identity.lifetime_sessions,
            session_hit_num: identity.session_hit_num,
            active_last_24_hrs: identity.active_last_24_hrs,
            active_last_7_days: identity.active_last_7_days,
            time_spent: self.current_active_seconds(),
            max_depth: self.max_depth,
            event_counts: self.event_counts.clone(),
            event_values: self.event_values.clone(),
            source: page.attribution.source.clone(),
            campaign: page.attribution.campaign.clone(),
            medium: page.attribution.medium.clone(),
        }
    }
}
