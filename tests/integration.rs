//! End-to-end exercise of the control loop against the in-memory test
//! doubles, covering cross-cutting behavior that only makes sense once
//! manager and monitor are wired together.

use std::sync::Arc;
use std::time::Duration;

use dynamic_concurrency_manager::concurrency::ConcurrencyManager;
use dynamic_concurrency_manager::concurrency::ConcurrencyOptions;
use dynamic_concurrency_manager::testkit::InMemoryDispatcher;

fn options(max_worker_count: usize) -> Arc<ConcurrencyOptions> {
    Arc::new(ConcurrencyOptions {
        enabled: true,
        check_interval: Duration::from_secs(1),
        adjustment_period: Duration::from_secs(0),
        history_size: 5,
        history_threshold: 1.0,
        latency_threshold: Duration::from_secs(2),
        max_worker_count,
    })
}

/// One overloaded worker causes the dispatcher to grow to its cap. Uses a
/// paused clock instead of a literal wall-clock sleep -- the manager's own
/// timers are the only thing driving forward progress, so fast-forwarding
/// the clock is equivalent to waiting.
#[tokio::test(start_paused = true)]
async fn overloaded_worker_scales_up_to_cap() {
    let options = options(2);
    let dispatcher = InMemoryDispatcher::new_with_default_latency(
        options.clone(),
        Duration::from_secs(3),
    );
    dispatcher.seed_workers(1);

    let manager = ConcurrencyManager::new(options.clone(), dispatcher.clone());
    manager.start().await;

    // Drive the manager's own ticks forward; no real wall-clock time passes
    // under `start_paused = true`, but registered timers still fire in order.
    for _ in 0..(options.history_size + 5) {
        tokio::time::advance(options.check_interval).await;
        tokio::task::yield_now().await;
    }

    assert_eq!(dispatcher.worker_count(), 2, "pool should have grown to the cap");
    manager.stop();
    manager.dispose();
}

/// Between any two successful scale-ups, elapsed time is at least
/// `adjustmentPeriod`. With `adjustmentPeriod` set high relative to
/// `checkInterval`, the manager must not exceed the configured cap inside
/// one period even though the workers stay overloaded forever.
#[tokio::test(start_paused = true)]
async fn adjustment_period_bounds_scale_up_rate() {
    let mut opts = ConcurrencyOptions {
        enabled: true,
        check_interval: Duration::from_millis(100),
        adjustment_period: Duration::from_secs(5),
        history_size: 3,
        history_threshold: 1.0,
        latency_threshold: Duration::from_secs(1),
        max_worker_count: 10,
    };
    opts.adjustment_period = Duration::from_secs(5);
    let options = Arc::new(opts);

    let dispatcher = InMemoryDispatcher::new_with_default_latency(
        options.clone(),
        Duration::from_secs(2),
    );
    dispatcher.seed_workers(1);

    let manager = ConcurrencyManager::new(options.clone(), dispatcher.clone());
    manager.start().await;

    tokio::time::advance(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;
    let after_one_period = dispatcher.worker_count();
    assert!(after_one_period <= 2, "at most one scale-up per adjustment period");

    manager.stop();
    manager.dispose();
}

/// A not-ready worker holds the pool at its current size even while another
/// worker in the pool is clearly overloaded.
#[tokio::test(start_paused = true)]
async fn warming_up_worker_blocks_scale_up() {
    let options = options(5);
    let dispatcher = InMemoryDispatcher::new_with_default_latency(
        options.clone(),
        Duration::from_secs(3),
    );
    dispatcher.seed_workers(1);
    dispatcher.seed_not_ready_worker();

    let manager = ConcurrencyManager::new(options.clone(), dispatcher.clone());
    manager.start().await;

    for _ in 0..10 {
        tokio::time::advance(options.check_interval).await;
        tokio::task::yield_now().await;
    }

    assert_eq!(dispatcher.worker_count(), 2, "must not scale while any worker is warming up");
    manager.stop();
    manager.dispose();
}

/// An HTTP-mode dispatcher reports `supports_dynamic_concurrency() == false`;
/// the manager must refuse to arm its tick against it at all, even with an
/// overloaded, ready worker already seeded.
#[tokio::test(start_paused = true)]
async fn http_dispatcher_never_scales() {
    let options = options(5);
    let dispatcher = InMemoryDispatcher::new_http_with_default_latency(
        options.clone(),
        Duration::from_secs(3),
    );
    dispatcher.seed_workers(1);
    assert!(!dispatcher.supports_dynamic_concurrency());

    let manager = ConcurrencyManager::new(options.clone(), dispatcher.clone());
    manager.start().await;

    for _ in 0..(options.history_size + 10) {
        tokio::time::advance(options.check_interval).await;
        tokio::task::yield_now().await;
    }

    assert_eq!(
        dispatcher.worker_count(),
        1,
        "HTTP-mode dispatcher must never grow its worker pool"
    );
    manager.stop();
    manager.dispose();
}
