//! Dynamic worker-pool concurrency control loop for an out-of-process
//! function-hosting runtime.
//!
//! The only piece of real engineering content is the scaling loop in
//! [`concurrency`]: per-worker latency probes ([`concurrency::monitor`])
//! feeding a process-wide decision ([`concurrency::manager`]) about whether
//! to launch another worker. RPC transport, process launching and the
//! dispatcher's routing logic are external collaborators, modeled here as
//! the [`dispatcher`] and [`worker_channel`] traits.

pub mod concurrency;
pub mod dispatcher;
pub mod error;
pub mod testkit;
pub mod worker_channel;

pub use concurrency::{ConcurrencyManager, ConcurrencyOptions, WorkerChannelMonitor};
pub use dispatcher::{Dispatcher, WorkerStatus};
pub use error::ConcurrencyError;
pub use worker_channel::{ProbeResult, WorkerChannel};
