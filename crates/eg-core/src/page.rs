//! Facts about the current page load supplied by the host.

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Campaign attribution read from `utm_*` query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub source: Option<String>,
    pub campaign: Option<String>,
    pub medium: Option<String>,
}

impl Attribution {
    pub fn from_url(url: &Url) -> Self {
        let mut attribution = Self::default();
        for (key, value) in url.query_pairs() {
            let slot = match key.as_ref() {
                "utm_source" => &mut attribution.source,
                "utm_campaign" => &mut attribution.campaign,
                "utm_medium" => &mut attribution.medium,
                _ => continue,
            };
            // First occurrence wins, as with URLSearchParams.get.
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        attribution
    }
}

/// Screen dimensions in CSS pixels plus the device pixel ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_pixel_ratio")]
    pub pixel_ratio: f64,
}

const fn default_pixel_ratio() -> f64 {
    1.0
}

impl Screen {
    /// Physical resolution as `"{width}x{height}"`, truncated to whole pixels.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "truncation to whole pixels is the reported format"
    )]
    pub fn resolution(&self) -> String {
        let w = (self.width * self.pixel_ratio).trunc() as i64;
        let h = (self.height * self.pixel_ratio).trunc() as i64;
        format!("{w}x{h}")
    }
}

/// Everything about the page load that does not change while it is open.
#[derive(Debug, Clone, PartialEq)]
pub struct PageContext {
    /// Unique id of this page load.
    pub page_id: String,
    pub url_path: String,
    /// Raw `document.referrer`; empty for direct visits.
    pub referrer: String,
    pub is_mobile: bool,
    pub resolution: String,
    pub attribution: Attribution,
}

impl PageContext {
    pub fn from_url(url: &Url, referrer: impl Into<String>, is_mobile: bool, screen: Screen) -> Self {
        Self {
            page_id: Uuid::new_v4().to_string(),
            url_path: url.path().to_string(),
            referrer: referrer.into(),
            is_mobile,
            resolution: screen.resolution(),
            attribution: Attribution::from_url(url),
        }
    }
}
