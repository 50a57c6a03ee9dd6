//! Engine error types.

use thiserror::Error;

use crate::types::ValidationError;

/// Errors raised while configuring or starting the engine.
///
/// Redundant transitions (double start, double stop, repeated leave or
/// return) are never errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The idle duration was not a finite, positive number of seconds.
    #[error("an invalid idle duration ({value}) was provided")]
    InvalidIdleDuration { value: f64 },
    /// The poll interval was zero.
    #[error("poll interval must be at least 1ms")]
    InvalidPollInterval,
    /// An identifier failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The identity store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure reported by a [`KeyValueStore`](crate::KeyValueStore) implementation.
#[derive(Debug, Error)]
#[error("identity store error: {message}")]
pub struct StoreError {
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an implementation error, keeping it as the source.
    pub fn wrap(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Failure reported by a [`Transport`](crate::Transport) implementation.
///
/// The dispatcher logs these and moves on; they never reach engine state.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The preferred and fallback delivery paths are both unavailable.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    /// The delivery attempt failed.
    #[error("delivery failed: {0}")]
    Failed(String),
}
