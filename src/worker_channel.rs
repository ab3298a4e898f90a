//! The worker-channel collaborator: one out-of-process language worker,
//! reached over RPC. The transport itself lives outside this crate -- this
//! crate only depends on the ability to probe it.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProbeError;

/// Result of a single RPC status probe against a worker channel.
#[derive(Debug, Clone, Copy)]
pub struct ProbeResult {
    /// The worker has finished initialization and may serve invocations.
    pub is_ready: bool,
    /// Round-trip time of this probe.
    pub latency: Duration,
}

/// A handle to one worker process reached over RPC.
///
/// Implementations must be safe to call concurrently with invocation
/// traffic; probe failures are expected during normal shutdown and must
/// not panic.
#[async_trait]
pub trait WorkerChannel: Send + Sync {
    async fn get_status(&self) -> Result<ProbeResult, ProbeError>;
}
