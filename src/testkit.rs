//! In-memory [`Dispatcher`]/[`WorkerChannel`] implementations.
//!
//! The real RPC transport and process launcher live outside this crate;
//! this module exists so the control loop is exercisable in tests and in
//! the demo binary without either.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::concurrency::{ConcurrencyOptions, WorkerChannelMonitor};
use crate::dispatcher::{Dispatcher, WorkerStatus};
use crate::error::{DispatcherError, ProbeError};
use crate::worker_channel::{ProbeResult, WorkerChannel};

/// A worker channel whose reported latency and readiness can be adjusted
/// from the test driving it.
pub struct ControllableWorkerChannel {
    latency: Mutex<Duration>,
    is_ready: AtomicBool,
    fail_next: AtomicBool,
}

impl ControllableWorkerChannel {
    pub fn new(latency: Duration, is_ready: bool) -> Arc<Self> {
        Arc::new(Self {
            latency: Mutex::new(latency),
            is_ready: AtomicBool::new(is_ready),
            fail_next: AtomicBool::new(false),
        })
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn set_ready(&self, ready: bool) {
        self.is_ready.store(ready, Ordering::Release);
    }

    pub fn fail_next_probe(&self) {
        self.fail_next.store(true, Ordering::Release);
    }
}

#[async_trait]
impl WorkerChannel for ControllableWorkerChannel {
    async fn get_status(&self) -> Result<ProbeResult, ProbeError> {
        if self.fail_next.swap(false, Ordering::AcqRel) {
            return Err(ProbeError("simulated transient failure".into()));
        }
        Ok(ProbeResult {
            is_ready: self.is_ready.load(Ordering::Acquire),
            latency: *self.latency.lock(),
        })
    }
}

struct Worker {
    channel: Arc<ControllableWorkerChannel>,
    monitor: Arc<WorkerChannelMonitor>,
}

/// A dispatcher that owns an in-process set of [`ControllableWorkerChannel`]s.
pub struct InMemoryDispatcher {
    options: Arc<ConcurrencyOptions>,
    workers: DashMap<String, Worker>,
    next_id: AtomicUsize,
    http_mode: bool,
    default_latency: Duration,
}

impl InMemoryDispatcher {
    pub fn new(options: Arc<ConcurrencyOptions>) -> Arc<Self> {
        Arc::new(Self {
            options,
            workers: DashMap::new(),
            next_id: AtomicUsize::new(0),
            http_mode: false,
            default_latency: Duration::from_millis(1),
        })
    }

    /// Construct the HTTP-mode variant the manager must refuse to scale.
    pub fn new_http(options: Arc<ConcurrencyOptions>) -> Arc<Self> {
        Arc::new(Self {
            options,
            workers: DashMap::new(),
            next_id: AtomicUsize::new(0),
            http_mode: true,
            default_latency: Duration::from_millis(1),
        })
    }

    pub fn new_with_default_latency(options: Arc<ConcurrencyOptions>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            options,
            workers: DashMap::new(),
            next_id: AtomicUsize::new(0),
            http_mode: false,
            default_latency: latency,
        })
    }

    /// HTTP-mode variant seeded with a non-default latency, so a test can
    /// show the manager refuses to scale even against an overloaded worker.
    pub fn new_http_with_default_latency(
        options: Arc<ConcurrencyOptions>,
        latency: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            options,
            workers: DashMap::new(),
            next_id: AtomicUsize::new(0),
            http_mode: true,
            default_latency: latency,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn channel(&self, worker_id: &str) -> Option<Arc<ControllableWorkerChannel>> {
        self.workers.get(worker_id).map(|w| w.channel.clone())
    }

    fn spawn_worker(&self, ready: bool) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let worker_id = format!("worker-{id}");
        let channel = ControllableWorkerChannel::new(self.default_latency, ready);
        let monitor = WorkerChannelMonitor::new(channel.clone(), self.options.clone());
        self.workers.insert(
            worker_id.clone(),
            Worker {
                channel,
                monitor,
            },
        );
        worker_id
    }

    /// Seed the dispatcher with `count` ready workers, bypassing the normal
    /// one-at-a-time `start_worker_channel` path (test setup helper).
    pub fn seed_workers(&self, count: usize) {
        for _ in 0..count {
            self.spawn_worker(true);
        }
    }

    /// Seed one worker that has not finished initializing.
    pub fn seed_not_ready_worker(&self) -> String {
        self.spawn_worker(false)
    }
}

#[async_trait]
impl Dispatcher for InMemoryDispatcher {
    async fn worker_statuses(&self) -> Result<std::collections::HashMap<String, WorkerStatus>, DispatcherError> {
        let mut out = std::collections::HashMap::new();
        for entry in self.workers.iter() {
            let stats = entry.value().monitor.stats().await;
            out.insert(
                entry.key().clone(),
                WorkerStatus {
                    is_ready: stats.is_ready,
                    latency_history: stats.latency_history,
                },
            );
        }
        Ok(out)
    }

    async fn start_worker_channel(&self) -> Result<(), DispatcherError> {
        self.spawn_worker(true);
        Ok(())
    }

    fn supports_dynamic_concurrency(&self) -> bool {
        !self.http_mode
    }
}

impl Drop for InMemoryDispatcher {
    fn drop(&mut self) {
        for entry in self.workers.iter() {
            entry.value().monitor.dispose();
        }
    }
}
