//! `ConcurrencyManager`: the process-wide control loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::concurrency::options::ConcurrencyOptions;
use crate::dispatcher::{Dispatcher, WorkerStatus};

/// Debug-level worker state dump is emitted at most this often, except it
/// is always emitted alongside an add-decision.
const LOG_STATE_INTERVAL: Duration = Duration::from_secs(60);

pub struct ConcurrencyManager {
    options: Arc<ConcurrencyOptions>,
    dispatcher: Arc<dyn Dispatcher>,
    last_add_time: RwLock<Instant>,
    last_log_state_time: RwLock<Instant>,
    stopped: Arc<AtomicBool>,
    disposed: Arc<AtomicBool>,
    stop: Arc<Notify>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ConcurrencyManager {
    pub fn new(options: Arc<ConcurrencyOptions>, dispatcher: Arc<dyn Dispatcher>) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            options,
            dispatcher,
            last_add_time: RwLock::new(now),
            last_log_state_time: RwLock::new(now),
            stopped: Arc::new(AtomicBool::new(false)),
            disposed: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(Notify::new()),
            task: parking_lot::Mutex::new(None),
        })
    }

    /// Called during host startup. Disabled and HTTP-dispatcher cases are
    /// terminal and logged once; otherwise waits one `adjustmentPeriod`
    /// before the first decision (cold-start damping) and arms the tick.
    pub async fn start(self: &Arc<Self>) {
        if !self.options.enabled {
            log::info!("dynamic worker concurrency manager disabled");
            return;
        }
        if !self.dispatcher.supports_dynamic_concurrency() {
            log::warn!("dynamic worker concurrency unsupported by this dispatcher (HTTP mode)");
            return;
        }

        log::debug!(
            "dynamic worker concurrency manager warming up for {:?}",
            self.options.adjustment_period
        );
        tokio::select! {
            _ = tokio::time::sleep(self.options.adjustment_period) => {}
            _ = self.stop.notified() => return,
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.tick_loop().await });
        *self.task.lock() = Some(handle);
    }

    /// Stops the tick. Safe if never started. Sets a flag `tick_loop` checks
    /// on every iteration, since `Notify::notify_waiters` only wakes waiters
    /// already parked on it -- a call landing while a tick's dispatcher RPC
    /// is in flight would otherwise be lost and the loop would keep running.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.stop.notify_waiters();
    }

    /// Releases timer resources.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.stopped.store(true, Ordering::Release);
        self.stop.notify_waiters();
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    async fn tick_loop(self: Arc<Self>) {
        loop {
            if self.disposed.load(Ordering::Acquire) || self.stopped.load(Ordering::Acquire) {
                return;
            }
            self.tick().await;
            tokio::select! {
                _ = tokio::time::sleep(self.options.check_interval) => {}
                _ = self.stop.notified() => return,
            }
        }
    }

    async fn tick(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }

        let statuses = match self.dispatcher.worker_statuses().await {
            Ok(s) => s,
            Err(e) => {
                log::error!("failed to query worker statuses: {e}");
                return;
            }
        };

        let since_last_add = Instant::now().duration_since(*self.last_add_time.read().await);
        let should_add = decide(&self.options, &statuses, since_last_add);

        let now = Instant::now();
        {
            let mut last_log = self.last_log_state_time.write().await;
            if should_add || now.duration_since(*last_log) >= LOG_STATE_INTERVAL {
                log_worker_state(&self.options, &statuses);
                *last_log = now;
            }
        }

        if should_add {
            match self.dispatcher.start_worker_channel().await {
                Ok(()) => {
                    *self.last_add_time.write().await = Instant::now();
                    log::debug!("New worker is added.");
                }
                Err(e) => {
                    // lastAddTime is NOT advanced; a retry may occur next tick.
                    log::error!("failed to start worker channel: {e}");
                }
            }
        }
    }
}

/// Per-worker overload predicate. Order-independent: only the
/// count of samples at/above threshold matters, not their position.
pub fn is_overloaded(options: &ConcurrencyOptions, history: &[Duration]) -> bool {
    if history.len() < options.history_size {
        return false;
    }
    let over = history
        .iter()
        .filter(|sample| **sample >= options.latency_threshold)
        .count();
    (over as f64 / options.history_size as f64) >= options.history_threshold
}

/// The scale-up decision predicate.
pub fn decide(
    options: &ConcurrencyOptions,
    statuses: &HashMap<String, WorkerStatus>,
    since_last_add: Duration,
) -> bool {
    if since_last_add < options.adjustment_period {
        return false;
    }
    if statuses.values().any(|s| !s.is_ready) {
        return false;
    }
    if statuses.len() >= options.max_worker_count {
        return false;
    }
    statuses
        .values()
        .any(|s| is_overloaded(options, &s.latency_history))
}

fn log_worker_state(options: &ConcurrencyOptions, statuses: &HashMap<String, WorkerStatus>) {
    for (worker_id, status) in statuses {
        let max = status.latency_history.iter().max().copied().unwrap_or_default();
        let sum: Duration = status.latency_history.iter().sum();
        let avg = if status.latency_history.is_empty() {
            Duration::ZERO
        } else {
            sum / status.latency_history.len() as u32
        };
        let overloaded = is_overloaded(options, &status.latency_history);
        log::debug!(
            "worker {worker_id}: overloaded={overloaded} history={:?} avg={:?} max={:?}",
            status.latency_history,
            avg,
            max,
        );
    }
}
