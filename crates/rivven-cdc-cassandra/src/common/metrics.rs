//! # Commit Log CDC Metrics
//!
//! Counters for the commit log pipeline, kept as atomics for lock-free
//! updates and mirrored to the `metrics` crate facade, so any installed
//! exporter (Prometheus, StatsD, ...) picks them up.
//!
//! ## Usage
//!
//! ```rust
//! use rivven_cdc_cassandra::common::CommitLogMetrics;
//!
//! let metrics = CommitLogMetrics::new("cassandra-cdc");
//! metrics.set_commit_log("CommitLog-7-1.log", 42);
//! metrics.record_mutation();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.mutations_processed, 1);
//! assert_eq!(snapshot.commit_log_position, 42);
//! ```

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector shared by the reader, the handler and every queue processor.
#[derive(Debug)]
pub struct CommitLogMetrics {
    connector_name: String,

    // Reader progress
    commit_log_filename: RwLock<Option<String>>,
    commit_log_position: AtomicU64,
    segments_read: AtomicU64,

    // Handler
    mutations_processed: AtomicU64,
    mutations_skipped: AtomicU64,
    decode_errors: AtomicU64,
    unrecoverable_errors: AtomicU64,

    // Emission
    changes_emitted: AtomicU64,
    tombstones_emitted: AtomicU64,
    emit_errors: AtomicU64,
    offsets_flushed: AtomicU64,

    // Retirement
    segments_archived: AtomicU64,
    segments_errored: AtomicU64,
}

impl CommitLogMetrics {
    /// Create a new metrics collector.
    pub fn new(connector_name: &str) -> Self {
        Self {
            connector_name: connector_name.to_string(),
            commit_log_filename: RwLock::new(None),
            commit_log_position: AtomicU64::new(0),
            segments_read: AtomicU64::new(0),
            mutations_processed: AtomicU64::new(0),
            mutations_skipped: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            unrecoverable_errors: AtomicU64::new(0),
            changes_emitted: AtomicU64::new(0),
            tombstones_emitted: AtomicU64::new(0),
            emit_errors: AtomicU64::new(0),
            offsets_flushed: AtomicU64::new(0),
            segments_archived: AtomicU64::new(0),
            segments_errored: AtomicU64::new(0),
        }
    }

    /// Record the segment and position the reader is currently at.
    pub fn set_commit_log(&self, filename: &str, position: u64) {
        {
            let mut current = self.commit_log_filename.write();
            if current.as_deref() != Some(filename) {
                *current = Some(filename.to_string());
            }
        }
        self.commit_log_position.store(position, Ordering::Relaxed);

        metrics::gauge!(
            "rivven_cdc_cassandra_commit_log_position",
            "connector" => self.connector_name.clone()
        )
        .set(position as f64);
    }

    /// Record a segment handed to the reader.
    pub fn record_segment_read(&self) {
        self.segments_read.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_cdc_cassandra_segments_read_total",
            "connector" => self.connector_name.clone()
        )
        .increment(1);
    }

    /// Record a mutation turned into an event.
    #[inline]
    pub fn record_mutation(&self) {
        self.mutations_processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_cdc_cassandra_mutations_total",
            "connector" => self.connector_name.clone()
        )
        .increment(1);
    }

    /// Record a mutation dropped without an error (untracked table, already processed).
    #[inline]
    pub fn record_skipped(&self) {
        self.mutations_skipped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_cdc_cassandra_mutations_skipped_total",
            "connector" => self.connector_name.clone()
        )
        .increment(1);
    }

    /// Record a cell or mutation that failed to decode.
    #[inline]
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_cdc_cassandra_errors_total",
            "connector" => self.connector_name.clone(),
            "type" => "decode"
        )
        .increment(1);
    }

    /// Record a failure that lost a whole mutation or segment.
    #[inline]
    pub fn record_unrecoverable_error(&self) {
        self.unrecoverable_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_cdc_cassandra_errors_total",
            "connector" => self.connector_name.clone(),
            "type" => "unrecoverable"
        )
        .increment(1);
    }

    /// Record an emitted change record.
    #[inline]
    pub fn record_change_emitted(&self) {
        self.changes_emitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_cdc_cassandra_events_emitted_total",
            "connector" => self.connector_name.clone(),
            "kind" => "change"
        )
        .increment(1);
    }

    /// Record an emitted tombstone record.
    #[inline]
    pub fn record_tombstone_emitted(&self) {
        self.tombstones_emitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_cdc_cassandra_events_emitted_total",
            "connector" => self.connector_name.clone(),
            "kind" => "tombstone"
        )
        .increment(1);
    }

    /// Record a failed emission.
    #[inline]
    pub fn record_emit_error(&self) {
        self.emit_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_cdc_cassandra_errors_total",
            "connector" => self.connector_name.clone(),
            "type" => "emit"
        )
        .increment(1);
    }

    /// Record an offset flush.
    pub fn record_offset_flush(&self) {
        self.offsets_flushed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "rivven_cdc_cassandra_offset_flushes_total",
            "connector" => self.connector_name.clone()
        )
        .increment(1);
    }

    /// Record a segment retirement.
    pub fn record_segment_retired(&self, to_error: bool) {
        let destination = if to_error {
            self.segments_errored.fetch_add(1, Ordering::Relaxed);
            "error"
        } else {
            self.segments_archived.fetch_add(1, Ordering::Relaxed);
            "archive"
        };
        metrics::counter!(
            "rivven_cdc_cassandra_segments_retired_total",
            "connector" => self.connector_name.clone(),
            "destination" => destination
        )
        .increment(1);
    }

    /// Set queue depth for one change event queue.
    pub fn set_queue_depth(&self, queue: usize, depth: usize) {
        metrics::gauge!(
            "rivven_cdc_cassandra_queue_depth",
            "connector" => self.connector_name.clone(),
            "queue" => queue.to_string()
        )
        .set(depth as f64);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connector_name: self.connector_name.clone(),
            commit_log_filename: self.commit_log_filename.read().clone(),
            commit_log_position: self.commit_log_position.load(Ordering::Relaxed),
            segments_read: self.segments_read.load(Ordering::Relaxed),
            mutations_processed: self.mutations_processed.load(Ordering::Relaxed),
            mutations_skipped: self.mutations_skipped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unrecoverable_errors: self.unrecoverable_errors.load(Ordering::Relaxed),
            changes_emitted: self.changes_emitted.load(Ordering::Relaxed),
            tombstones_emitted: self.tombstones_emitted.load(Ordering::Relaxed),
            emit_errors: self.emit_errors.load(Ordering::Relaxed),
            offsets_flushed: self.offsets_flushed.load(Ordering::Relaxed),
            segments_archived: self.segments_archived.load(Ordering::Relaxed),
            segments_errored: self.segments_errored.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CommitLogMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connector_name: String,
    pub commit_log_filename: Option<String>,
    pub commit_log_position: u64,
    pub segments_read: u64,
    pub mutations_processed: u64,
    pub mutations_skipped: u64,
    pub decode_errors: u64,
    pub unrecoverable_errors: u64,
    pub changes_emitted: u64,
    pub tombstones_emitted: u64,
    pub emit_errors: u64,
    pub offsets_flushed: u64,
    pub segments_archived: u64,
    pub segments_errored: u64,
}

impl MetricsSnapshot {
    /// Total events handed to the broker.
    pub fn events_emitted(&self) -> u64 {
        self.changes_emitted + self.tombstones_emitted
    }

    /// Export as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Shared metrics handle.
pub type SharedMetrics = Arc<CommitLogMetrics>;
