//! Queue processors.
//!
//! One [`QueueProcessor`] consumes each change event queue. Records go to
//! the [`Emitter`]; an EOF marker retires its segment once every queue has
//! passed the marker. A failed event is logged and dropped, never requeued.

use super::emitter::Emitter;
use super::event::{EofEvent, Event};
use super::queue::ChangeEventQueue;
use super::segment::{CommitLogRelocator, ErroneousSegments, RelocationOutcome, RetirementDestination};
use crate::common::{Result, SharedMetrics};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Per-processor counters.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    events_processed: AtomicU64,
    events_failed: AtomicU64,
    batches_processed: AtomicU64,
    segments_retired: AtomicU64,
}

impl ProcessorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProcessorStatsSnapshot {
        ProcessorStatsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            segments_retired: self.segments_retired.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorStatsSnapshot {
    pub events_processed: u64,
    pub events_failed: u64,
    pub batches_processed: u64,
    pub segments_retired: u64,
}

pub struct QueueProcessor {
    queue: Arc<ChangeEventQueue>,
    emitter: Arc<dyn Emitter>,
    relocator: CommitLogRelocator,
    erroneous: ErroneousSegments,
    poll_interval: Duration,
    heartbeat_interval: Option<Duration>,
    last_heartbeat: Mutex<Instant>,
    stats: ProcessorStats,
    metrics: SharedMetrics,
}

impl QueueProcessor {
    pub fn new(
        queue: Arc<ChangeEventQueue>,
        emitter: Arc<dyn Emitter>,
        relocator: CommitLogRelocator,
        erroneous: ErroneousSegments,
        poll_interval: Duration,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            queue,
            emitter,
            relocator,
            erroneous,
            poll_interval,
            heartbeat_interval: None,
            last_heartbeat: Mutex::new(Instant::now()),
            stats: ProcessorStats::new(),
            metrics,
        }
    }

    /// Emit a heartbeat whenever `interval` passes; zero disables heartbeats.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn queue(&self) -> &Arc<ChangeEventQueue> {
        &self.queue
    }

    pub fn stats(&self) -> ProcessorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Prepare the relocation directories. Failure is fatal.
    pub async fn initialize(&self) -> Result<()> {
        self.relocator.initialize().await
    }

    /// Wait up to the poll interval for a batch and process it.
    pub async fn process(&self) -> usize {
        let batch = self.queue.poll(self.poll_interval).await;
        let count = batch.len();
        self.process_batch(batch).await;
        self.tick().await;
        count
    }

    /// Process until `shutdown` flips or the queue is closed, then drain
    /// whatever is left.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Queue processor {} started", self.queue.id());

        loop {
            if *shutdown.borrow() {
                break;
            }
            let batch = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Shutdown sender dropped for queue {}", self.queue.id());
                    }
                    break;
                }
                batch = self.queue.poll(self.poll_interval) => batch,
            };
            self.process_batch(batch).await;
            self.tick().await;

            if self.queue.is_closed() && self.queue.is_empty() {
                break;
            }
        }

        loop {
            let batch = self.queue.drain();
            if batch.is_empty() {
                break;
            }
            self.process_batch(batch).await;
        }

        info!("Queue processor {} stopped", self.queue.id());
    }

    /// Close the emitter, flushing offsets.
    pub async fn destroy(&self) -> Result<()> {
        self.emitter.close().await
    }

    async fn process_batch(&self, batch: Vec<Event>) {
        if batch.is_empty() {
            return;
        }
        self.stats.batches_processed.fetch_add(1, Ordering::Relaxed);

        for event in batch {
            self.stats.events_processed.fetch_add(1, Ordering::Relaxed);
            match event {
                Event::Record(record) => {
                    if let Err(e) = self.emitter.emit(&record).await {
                        self.stats.events_failed.fetch_add(1, Ordering::Relaxed);
                        error!(
                            "Failed to emit {} record for {} at {}: {}",
                            record.op().code(),
                            record.table(),
                            record.position(),
                            e
                        );
                    }
                }
                Event::Eof(eof) => self.handle_eof(eof).await,
            }
        }

        self.metrics
            .set_queue_depth(self.queue.id(), self.queue.len());
    }

    async fn handle_eof(&self, eof: EofEvent) {
        if !eof.complete() {
            debug!(
                "Queue {} done with {}, waiting on other queues",
                self.queue.id(),
                eof.file_name()
            );
            return;
        }

        let to_error = self.erroneous.contains(eof.file_name());
        let destination = if to_error {
            RetirementDestination::Error
        } else {
            RetirementDestination::Archive
        };

        match self.relocator.move_segment(&eof.segment, destination).await {
            Ok(RelocationOutcome::Moved(_)) => {
                self.stats.segments_retired.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_segment_retired(to_error);
                self.erroneous.clear(eof.file_name());
            }
            Ok(RelocationOutcome::AlreadyMoved(existing)) => {
                debug!(
                    "Segment {} already in {}",
                    eof.file_name(),
                    existing.dir_name()
                );
            }
            Ok(RelocationOutcome::Missing) => {}
            Err(e) => {
                error!("Failed to retire segment {}: {}", eof.file_name(), e);
            }
        }
    }

    /// Periodic work after every poll, whether or not it returned events.
    async fn tick(&self) {
        if let Err(e) = self.emitter.maybe_flush_offsets().await {
            warn!("Offset flush from queue {} failed: {}", self.queue.id(), e);
        }
        self.maybe_heartbeat().await;
    }

    async fn maybe_heartbeat(&self) {
        let Some(interval) = self.heartbeat_interval else {
            return;
        };
        {
            let mut last = self.last_heartbeat.lock();
            if last.elapsed() < interval {
                return;
            }
            *last = Instant::now();
        }
        if let Err(e) = self.emitter.emit_heartbeat().await {
            warn!("Heartbeat from queue {} failed: {}", self.queue.id(), e);
        }
    }
}
