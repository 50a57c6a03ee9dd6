//! Best-effort snapshot delivery.
//!
//! Each trigger serializes the current snapshot and makes exactly one delivery
//! attempt. Nothing is awaited, retried or queued: a failed attempt is logged
//! and the snapshot is dropped.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::snapshot::EngagementSnapshot;

/// Delivers serialized snapshots.
///
/// Implementations must return without waiting for the endpoint to
/// acknowledge. An `Err` reports that the attempt could not be made or failed
/// immediately.
pub trait Transport {
    fn send(&self, payload: &str) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, payload: &str) -> Result<(), TransportError> {
        (**self).send(payload)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, payload: &str) -> Result<(), TransportError> {
        (**self).send(payload)
    }
}

/// What caused a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchTrigger {
    /// Right after initialization, so a bounce still yields data.
    Initial,
    /// The page became hidden.
    Hidden,
    /// The page is being unloaded or hidden by navigation.
    PageHide,
}

impl fmt::Display for DispatchTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::Hidden => "hidden",
            Self::PageHide => "page_hide",
        };
        f.write_str(s)
    }
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Failed,
}

/// Hands snapshots to a [`Transport`].
#[derive(Debug)]
pub struct Dispatcher<T> {
    transport: T,
    attempts: u64,
    failures: u64,
}

impl<T: Transport> Dispatcher<T> {
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            attempts: 0,
            failures: 0,
        }
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of dispatch attempts so far.
    pub const fn attempts(&self) -> u64 {
        self.attempts
    }

    pub const fn failures(&self) -> u64 {
        self.failures
    }

    /// Serializes `snapshot` and attempts delivery once.
    pub fn dispatch(
        &mut self,
        snapshot: &EngagementSnapshot,
        trigger: DispatchTrigger,
    ) -> DispatchOutcome {
        self.attempts += 1;
        let result = snapshot
            .to_payload()
            .map_err(|err| TransportError::Failed(format!("failed to serialize snapshot: {err}")))
            .and_then(|payload| self.transport.send(&payload));

        match result {
            Ok(()) => {
                tracing::debug!(%trigger, attempt = self.attempts, "snapshot dispatched");
                DispatchOutcome::Sent
            }
            Err(err) => {
                self.failures += 1;
                tracing::warn!(%trigger, attempt = self.attempts, %err, "snapshot delivery failed");
                DispatchOutcome::Failed
            }
        }
    }
}
