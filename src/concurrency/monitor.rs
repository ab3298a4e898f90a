//! `WorkerChannelMonitor`: a bounded, time-ordered history of RPC probe
//! latencies for exactly one worker channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::concurrency::options::ConcurrencyOptions;
use crate::worker_channel::WorkerChannel;

/// Snapshot returned by [`WorkerChannelMonitor::stats`]. A copy, never a
/// live view, so it is safe to read while a probe is in flight.
#[derive(Debug, Clone, Default)]
pub struct MonitorStats {
    pub latency_history: Vec<Duration>,
    pub is_ready: bool,
}

pub struct WorkerChannelMonitor {
    channel: Arc<dyn WorkerChannel>,
    options: Arc<ConcurrencyOptions>,
    history: Mutex<VecDeque<Duration>>,
    is_ready: AtomicBool,
    started: AtomicBool,
    disposed: Arc<AtomicBool>,
    stop: Arc<Notify>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl WorkerChannelMonitor {
    pub fn new(channel: Arc<dyn WorkerChannel>, options: Arc<ConcurrencyOptions>) -> Arc<Self> {
        Arc::new(Self {
            channel,
            options,
            history: Mutex::new(VecDeque::new()),
            is_ready: AtomicBool::new(false),
            started: AtomicBool::new(false),
            disposed: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(Notify::new()),
            task: parking_lot::Mutex::new(None),
        })
    }

    /// Idempotent; a no-op when disabled. Schedules a non-reentrant
    /// periodic probe with period `options.check_interval` the first time
    /// it is called.
    pub fn ensure_started(self: &Arc<Self>) {
        if !self.options.enabled {
            return;
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.probe_loop().await });
        *self.task.lock() = Some(handle);
    }

    /// Snapshot of the current history, oldest first, plus the worker's
    /// last observed readiness. Lazily activates the probe.
    pub async fn stats(self: &Arc<Self>) -> MonitorStats {
        self.ensure_started();
        let history = self.history.lock().await;
        MonitorStats {
            latency_history: history.iter().copied().collect(),
            is_ready: self.is_ready.load(Ordering::Acquire),
        }
    }

    /// Stops the periodic task and releases timer resources. Safe to call
    /// multiple times and from any thread.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop.notify_waiters();
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    async fn probe_loop(self: Arc<Self>) {
        loop {
            if self.disposed.load(Ordering::Acquire) {
                return;
            }

            match self.channel.get_status().await {
                Ok(result) => {
                    self.is_ready.store(result.is_ready, Ordering::Release);
                    let mut history = self.history.lock().await;
                    if history.len() >= self.options.history_size {
                        history.pop_front();
                    }
                    history.push_back(result.latency);
                }
                Err(e) => {
                    // Expected during channel shutdown; no history entry.
                    log::debug!("worker probe failed, swallowing: {e}");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.options.check_interval) => {}
                _ = self.stop.notified() => return,
            }
        }
    }
}
