//! Engine configuration recognised at initialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::idle::{DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS};
use crate::types::TimerName;

/// Options for an [`ActiveTimer`](crate::ActiveTimer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Seconds without activity before the visitor counts as idle.
    pub idle_timeout_seconds: f64,
    /// How often the idle detector is polled.
    pub poll_interval_ms: u64,
    /// Timer name for this page load. Generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page_name: Option<TimerName>,
    /// React to visibility, focus and unload signals.
    pub track_when_user_leaves_page: bool,
    /// React to activity signals and poll ticks.
    pub track_when_user_goes_idle: bool,
    /// Start of the first interval. Defaults to the clock's now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_start_time: Option<DateTime<Utc>>,
}

impl Default for EngineOptions {
    #[expect(
        clippy::cast_precision_loss,
        reason = "default timeout is a small constant"
    )]
    fn default() -> Self {
        Self {
            idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_MS as f64 / 1000.0,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            current_page_name: None,
            track_when_user_leaves_page: true,
            track_when_user_goes_idle: true,
            initial_start_time: None,
        }
    }
}

impl EngineOptions {
    /// Checks every option, failing on the first invalid one.
    pub fn validate(&self) -> Result<(), EngineError> {
        idle_timeout_ms(self.idle_timeout_seconds)?;
        if self.poll_interval_ms == 0 {
            return Err(EngineError::InvalidPollInterval);
        }
        Ok(())
    }
}

/// Converts an idle duration in seconds to whole milliseconds.
///
/// Rejects NaN, infinities, zero and negative values.
#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "value is checked finite and positive; sub-millisecond precision is dropped"
)]
pub(crate) fn idle_timeout_ms(seconds: f64) -> Result<u64, EngineError> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(EngineError::InvalidIdleDuration { value: seconds });
    }
    Ok((seconds * 1000.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = EngineOptions::default();
        assert!((options.idle_timeout_seconds - 30.0).abs() < f64::EPSILON);
        assert_eq!(options.poll_interval_ms, 250);
        assert!(options.track_when_user_leaves_page);
        assert!(options.track_when_user_goes_idle);
        assert!(options.current_page_name.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn rejects_bad_idle_durations() {
        for value in [f64::NAN, f64::INFINITY, -1.0, 0.0] {
            let options = EngineOptions {
                idle_timeout_seconds: value,
                ..EngineOptions::default()
            };
            assert!(
                matches!(options.validate(), Err(EngineError::InvalidIdleDuration { .. })),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let options = EngineOptions {
            poll_interval_ms: 0,
            ..EngineOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(EngineError::InvalidPollInterval)
        ));
    }

    #[test]
    fn converts_fractional_seconds() {
        assert_eq!(idle_timeout_ms(1.5).unwrap(), 1500);
        assert_eq!(idle_timeout_ms(30.0).unwrap(), 30_000);
    }

    #[test]
    fn deserializes_partial_options() {
        let options: EngineOptions =
            serde_json::from_str(r#"{"idle_timeout_seconds": 10, "current_page_name": "home"}"#)
                .unwrap();
        assert_eq!(idle_timeout_ms(options.idle_timeout_seconds).unwrap(), 10_000);
        assert_eq!(options.current_page_name.unwrap().as_str(), "home");
        assert!(options.track_when_user_goes_idle);
    }

    #[test]
    fn non_numeric_idle_duration_fails_to_parse() {
        let result: Result<EngineOptions, _> =
            serde_json::from_str(r#"{"idle_timeout_seconds": "soon"}"#);
        assert!(result.is_err());
    }
}
