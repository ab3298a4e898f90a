//! Crate-wide error types.
//!
//! Only [`ConcurrencyError::ConfigInvalid`] is fatal to startup. Everything
//! else the control loop encounters at runtime (probe failures, dispatcher
//! query failures, worker-start failures) is caught at the tick boundary,
//! logged, and swallowed -- see `concurrency::manager`.

use std::fmt;

/// Startup-time configuration failure. The only error in this crate that is
/// meant to propagate out of `main`.
#[derive(Debug, thiserror::Error)]
pub enum ConcurrencyError {
    #[error("invalid worker concurrency configuration: {0}")]
    ConfigInvalid(String),
}

/// Error returned by a [`crate::worker_channel::WorkerChannel`] probe.
///
/// Transient by construction: every probe failure is expected to be
/// swallowed by the monitor rather than surfaced to a caller.
#[derive(Debug, Clone)]
pub struct ProbeError(pub String);

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "probe failed: {}", self.0)
    }
}

impl std::error::Error for ProbeError {}

/// Error returned by the [`crate::dispatcher::Dispatcher`] collaborator.
#[derive(Debug, Clone)]
pub enum DispatcherError {
    QueryFailed(String),
    StartWorkerFailed(String),
}

impl fmt::Display for DispatcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueryFailed(msg) => write!(f, "failed to query worker statuses: {msg}"),
            Self::StartWorkerFailed(msg) => write!(f, "failed to start worker channel: {msg}"),
        }
    }
}

impl std::error::Error for DispatcherError {}
