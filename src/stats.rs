//! Usage-stats queue writer
//!
//! Hot-path callers enqueue per-user usage events without waiting on
//! storage. A single background task wakes on a fixed interval, drains the
//! whole queue, aggregates counts per user and commits them in one batch
//! transaction. If the queue is full, events are dropped and counted rather
//! than blocking the producer; usage stats are best-effort.

use crate::store::SqliteStore;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default flush interval for the background writer
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(33);

/// Default bound on the in-memory event queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 8192;

/// A usage event: messages published by one user
#[derive(Debug, Clone)]
pub struct StatsEvent {
    pub username: String,
    pub messages: u64,
}

/// Producer handle to the stats queue
///
/// Enqueueing never blocks; a full queue drops the event and bumps a
/// counter instead.
#[derive(Clone)]
pub struct StatsQueue {
    tx: mpsc::Sender<StatsEvent>,
    dropped: Arc<AtomicU64>,
    flush_failures: Arc<AtomicU64>,
}

impl StatsQueue {
    pub fn enqueue(&self, event: StatsEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events discarded because the queue was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Batches lost to storage write failures
    pub fn flush_failures(&self) -> u64 {
        self.flush_failures.load(Ordering::Relaxed)
    }
}

/// Handle to the background writer task
pub struct StatsWriter {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl StatsWriter {
    /// Signal the writer and wait for its final drain-and-flush
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// Spawn the writer task; must be called within a tokio runtime
pub fn start(
    store: SqliteStore,
    flush_interval: Duration,
    queue_capacity: usize,
) -> (StatsQueue, StatsWriter) {
    let (tx, mut rx) = mpsc::channel::<StatsEvent>(queue_capacity);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let flush_failures = Arc::new(AtomicU64::new(0));

    let queue = StatsQueue {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
        flush_failures: flush_failures.clone(),
    };

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    flush(&store, &mut rx, &flush_failures);
                }
                _ = shutdown_rx.changed() => {
                    flush(&store, &mut rx, &flush_failures);
                    debug!("Stats writer stopped");
                    break;
                }
            }
        }
    });

    (
        queue,
        StatsWriter {
            handle,
            shutdown: shutdown_tx,
        },
    )
}

/// Drain everything queued, aggregate per user and write one batch
///
/// A failed batch is dropped and counted; it is never re-enqueued.
fn flush(store: &SqliteStore, rx: &mut mpsc::Receiver<StatsEvent>, flush_failures: &AtomicU64) {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    while let Ok(event) = rx.try_recv() {
        *counts.entry(event.username).or_insert(0) += event.messages;
    }
    if counts.is_empty() {
        return;
    }

    let users = counts.len();
    match store.add_message_stats(&counts) {
        Ok(()) => debug!(users, "Flushed usage stats"),
        Err(e) => {
            flush_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, users, "Failed to flush usage stats, batch dropped");
        }
    }
}
