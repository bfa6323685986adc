use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(30);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters used to derive runtime metrics.
#[derive(Default, Debug)]
pub struct Telemetry {
    processed_blocks: AtomicU64,
    empty_blocks: AtomicU64,
    indexed_height: AtomicU64,
    skipped_txs: AtomicU64,
    skipped_events: AtomicU64,
    block_failures: AtomicU64,
    rpc_errors: AtomicU64,
    rpc_timeouts: AtomicU64,
    queue_fetches: AtomicU64,
    queue_failures: AtomicU64,
    queue_dead_letters: AtomicU64,
    reconciliations: AtomicU64,
}

impl Telemetry {
    pub fn record_block(&self, height: u64, empty: bool) {
        self.processed_blocks.fetch_add(1, Ordering::Relaxed);
        if empty {
            self.empty_blocks.fetch_add(1, Ordering::Relaxed);
        }
        self.indexed_height.fetch_max(height, Ordering::Relaxed);
    }

    pub fn record_skipped_txs(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.skipped_txs.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_skipped_events(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.skipped_events.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_block_failure(&self) {
        self.block_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rpc_error(&self) {
        self.rpc_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rpc_timeout(&self) {
        self.rpc_timeouts.fetch_add(1, Ordering::Relaxed);
        self.rpc_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_fetch(&self, succeeded: bool) {
        self.queue_fetches.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.queue_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_dead_letter(&self) {
        self.queue_dead_letters.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconciliation(&self) {
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed_blocks(&self) -> u64 {
        self.processed_blocks.load(Ordering::Relaxed)
    }

    pub fn indexed_height(&self) -> u64 {
        self.indexed_height.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            processed_blocks: self.processed_blocks.load(Ordering::Relaxed),
            empty_blocks: self.empty_blocks.load(Ordering::Relaxed),
            indexed_height: self.indexed_height.load(Ordering::Relaxed),
            skipped_txs: self.skipped_txs.load(Ordering::Relaxed),
            skipped_events: self.skipped_events.load(Ordering::Relaxed),
            block_failures: self.block_failures.load(Ordering::Relaxed),
            rpc_errors: self.rpc_errors.load(Ordering::Relaxed),
            rpc_timeouts: self.rpc_timeouts.load(Ordering::Relaxed),
            queue_fetches: self.queue_fetches.load(Ordering::Relaxed),
            queue_failures: self.queue_failures.load(Ordering::Relaxed),
            queue_dead_letters: self.queue_dead_letters.load(Ordering::Relaxed),
            reconciliations: self.reconciliations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub processed_blocks: u64,
    pub empty_blocks: u64,
    pub indexed_height: u64,
    pub skipped_txs: u64,
    pub skipped_events: u64,
    pub block_failures: u64,
    pub rpc_errors: u64,
    pub rpc_timeouts: u64,
    pub queue_fetches: u64,
    pub queue_failures: u64,
    pub queue_dead_letters: u64,
    pub reconciliations: u64,
}

/// Spawns a background task that periodically logs indexing throughput, queue
/// activity and RPC errors.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "badge_indexer::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let processed_delta = current_snapshot
                        .processed_blocks
                        .saturating_sub(last_snapshot.processed_blocks);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        processed_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "badge_indexer::metrics",
                        throughput = format!("{throughput:.2}"),
                        height = current_snapshot.indexed_height,
                        processed = current_snapshot.processed_blocks,
                        empty = current_snapshot.empty_blocks,
                        skipped_txs = current_snapshot.skipped_txs,
                        skipped_events = current_snapshot.skipped_events,
                        block_failures = current_snapshot.block_failures,
                        queue_fetches = current_snapshot.queue_fetches,
                        queue_failures = current_snapshot.queue_failures,
                        dead_letters = current_snapshot.queue_dead_letters,
                        reconciliations = current_snapshot.reconciliations,
                        rpc_errors = current_snapshot.rpc_errors,
                        rpc_timeouts = current_snapshot.rpc_timeouts,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn telemetry_records_counters() {
        let telemetry = Telemetry::default();
        telemetry.record_block(10, false);
        telemetry.record_block(11, true);
        telemetry.record_skipped_txs(2);
        telemetry.record_skipped_events(0);
        telemetry.record_rpc_error();
        telemetry.record_rpc_timeout();
        telemetry.record_queue_fetch(true);
        telemetry.record_queue_fetch(false);
        telemetry.record_dead_letter();

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.processed_blocks, 2);
        assert_eq!(snapshot.empty_blocks, 1);
        assert_eq!(snapshot.indexed_height, 11);
        assert_eq!(snapshot.skipped_txs, 2);
        assert_eq!(snapshot.skipped_events, 0);
        assert_eq!(snapshot.rpc_errors, 2);
        assert_eq!(snapshot.rpc_timeouts, 1);
        assert_eq!(snapshot.queue_fetches, 2);
        assert_eq!(snapshot.queue_failures, 1);
        assert_eq!(snapshot.queue_dead_letters, 1);
    }

    #[tokio::test]
    async fn metrics_reporter_logs_until_shutdown() {
        let telemetry = Arc::new(Telemetry::default());
        telemetry.record_block(1, false);

        let shutdown = CancellationToken::new();
        let handle = spawn_metrics_reporter(telemetry, shutdown.clone(), Duration::from_millis(10));

        shutdown.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter should stop promptly")
            .expect("task should not panic");
    }
}
