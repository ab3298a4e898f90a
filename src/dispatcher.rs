//! The dispatcher collaborator: owns the worker pool and can grow it. Its
//! RPC transport and routing logic live elsewhere -- the manager only ever
//! calls through this trait.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DispatcherError;

/// Flattened per-worker snapshot handed to the manager each tick. Distinct
/// from [`crate::worker_channel::ProbeResult`], which is a single probe's
/// raw result rather than the aggregated history the manager reasons over.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub is_ready: bool,
    pub latency_history: Vec<Duration>,
}

/// Host component that owns the worker pool, routes invocations, and can
/// grow the pool on request.
///
/// `supports_dynamic_concurrency` is a tagged capability rather than a type
/// check against a specific dispatcher implementation, so the manager never
/// needs to downcast.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn worker_statuses(&self) -> Result<HashMap<String, WorkerStatus>, DispatcherError>;

    /// Launch one additional worker asynchronously. Resolves once the
    /// worker is considered "added".
    async fn start_worker_channel(&self) -> Result<(), DispatcherError>;

    fn supports_dynamic_concurrency(&self) -> bool;
}
