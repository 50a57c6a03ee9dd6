//! Browser events the engine reacts to.

use serde::{Deserialize, Serialize};

use crate::types::TimerName;

/// An event observed by the host page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserSignal {
    MouseMove,
    KeyUp,
    TouchStart,
    /// Window scroll, with the vertical offset and the content height.
    Scroll { offset: f64, content_height: f64 },
    VisibilityChange { hidden: bool },
    Focus,
    Blur,
    PageHide,
    /// The pointer entered, or keyboard focus moved into, a tracked element.
    ElementEnter { id: TimerName },
    /// The pointer left a tracked element.
    ElementLeave { id: TimerName },
    /// A counted custom event.
    Event { name: String },
    /// A custom event carrying a value.
    EventValue { name: String, value: String },
}

impl BrowserSignal {
    /// Whether the signal counts as user activity for idle detection.
    pub const fn is_activity(&self) -> bool {
        matches!(
            self,
            Self::MouseMove | Self::KeyUp | Self::TouchStart | Self::Scroll { .. }
        )
    }
}
