//! The payload sent to the collection endpoint.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Full engagement state at one dispatch.
///
/// Built fresh for every dispatch and never retained afterwards. Each
/// dispatch carries the whole state rather than a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementSnapshot {
    pub client_id: String,
    pub url_path: String,
    pub page_id: String,
    pub is_mobile: bool,
    pub resolution: String,
    #[serde(rename = "uuid")]
    pub visitor_id: String,
    pub session_id: String,
    pub referrer: String,
    pub referrer_host: String,
    pub session_referrer: String,
    pub first_ever_session: bool,
    pub first_ever_pageview: bool,
    pub num_lifetime_pageviews: u64,
    pub num_lifetime_sessions: u64,
    pub session_hit_num: u64,
    pub active_last_24_hrs: bool,
    pub active_last_7_days: bool,
    /// Active seconds on the page, clamped to \[0, 3600\]. `None` if the page
    /// timer never started.
    pub time_spent: Option<f64>,
    /// Deepest vertical scroll position reached, as a fraction of the page.
    pub max_depth: Option<f64>,
    pub event_counts: BTreeMap<String, u64>,
    #[serde(rename = "eventNames")]
    pub event_values: BTreeMap<String, Vec<String>>,
    pub source: Option<String>,
    pub campaign: Option<String>,
    pub medium: Option<String>,
}

impl EngagementSnapshot {
    /// Serializes to the JSON body sent over the wire.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
