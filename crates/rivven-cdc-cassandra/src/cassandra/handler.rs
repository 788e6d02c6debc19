//! Commit log read handler.
//!
//! The reader collaborator decodes a segment and calls back into a
//! [`MutationHandler`] for every mutation, then once at the end of the
//! segment. [`CommitLogReadHandler`] resolves the table schema, builds the
//! record and routes it to the queue that owns the table.
//!
//! Per-mutation problems (unknown table, undecodable key) are logged and
//! counted; only [`CdcError::Cancelled`] propagates back to the reader.

use super::event::{EofEvent, EofLatch, Event};
use super::offset::OffsetTracker;
use super::position::CommitLogSegment;
use super::queue::ChangeEventQueues;
use super::record::{RawMutation, RecordMaker};
use super::schema::{SchemaCatalog, TableSchema};
use super::segment::ErroneousSegments;
use crate::cassandra::position::KeyspaceTable;
use crate::common::{CdcError, Result, SharedMetrics};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Callbacks driven by a commit log reader.
#[async_trait]
pub trait MutationHandler: Send + Sync {
    async fn handle_mutation(
        &self,
        segment: &CommitLogSegment,
        mutation: RawMutation,
        is_deletion: bool,
    ) -> Result<()>;

    /// Every mutation of `segment` has been handed over.
    async fn handle_segment_end(&self, segment: &CommitLogSegment) -> Result<()>;

    /// The segment could not be read to completion.
    async fn handle_unreadable_segment(
        &self,
        segment: &CommitLogSegment,
        error: CdcError,
    ) -> Result<()>;
}

/// Extra schema lookups before a mutation for an unknown table is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchemaRetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

pub struct CommitLogReadHandler {
    schemas: Arc<dyn SchemaCatalog>,
    maker: RecordMaker,
    queues: ChangeEventQueues,
    offsets: Arc<OffsetTracker>,
    erroneous: ErroneousSegments,
    schema_retry: SchemaRetryPolicy,
    metrics: SharedMetrics,
}

impl CommitLogReadHandler {
    pub fn new(
        schemas: Arc<dyn SchemaCatalog>,
        maker: RecordMaker,
        queues: ChangeEventQueues,
        offsets: Arc<OffsetTracker>,
        erroneous: ErroneousSegments,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            schemas,
            maker,
            queues,
            offsets,
            erroneous,
            schema_retry: SchemaRetryPolicy::default(),
            metrics,
        }
    }

    pub fn with_schema_retry(mut self, policy: SchemaRetryPolicy) -> Self {
        self.schema_retry = policy;
        self
    }

    async fn lookup_schema(&self, table: &KeyspaceTable) -> Option<Arc<TableSchema>> {
        for attempt in 0..=self.schema_retry.retries {
            if let Some(schema) = self.schemas.lookup(table) {
                return Some(schema);
            }
            if attempt < self.schema_retry.retries {
                tokio::time::sleep(self.schema_retry.backoff).await;
            }
        }
        None
    }
}

#[async_trait]
impl MutationHandler for CommitLogReadHandler {
    async fn handle_mutation(
        &self,
        segment: &CommitLogSegment,
        mutation: RawMutation,
        is_deletion: bool,
    ) -> Result<()> {
        self.metrics
            .set_commit_log(segment.file_name(), mutation.position.position);

        let Some(schema) = self.lookup_schema(&mutation.table).await else {
            debug!(
                "No schema for {}, skipping mutation at {}",
                mutation.table, mutation.position
            );
            self.metrics.record_skipped();
            return Ok(());
        };

        if self.offsets.is_processed(&mutation.table, mutation.position) {
            debug!(
                "Mutation on {} at {} precedes resumed offset {}",
                mutation.table,
                mutation.position,
                self.offsets.resumed_position(&mutation.table)
            );
            self.metrics.record_skipped();
            return Ok(());
        }

        let record = match self.maker.make(segment, &schema, &mutation, is_deletion) {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.metrics.record_skipped();
                return Ok(());
            }
            Err(e) => {
                warn!(
                    "Dropping mutation on {} at {} in {}: {}",
                    mutation.table,
                    mutation.position,
                    segment.file_name(),
                    e
                );
                self.metrics.record_unrecoverable_error();
                return Ok(());
            }
        };

        let queue = self.queues.queue_for(&mutation.table);
        queue.offer(Event::Record(record)).await?;
        self.metrics.record_mutation();
        self.metrics.set_queue_depth(queue.id(), queue.len());
        Ok(())
    }

    async fn handle_segment_end(&self, segment: &CommitLogSegment) -> Result<()> {
        let latch = EofLatch::new(self.queues.len());
        for queue in self.queues.iter() {
            queue
                .offer(Event::Eof(EofEvent::new(segment.clone(), latch.clone())))
                .await?;
        }
        debug!("Queued end of segment {}", segment.file_name());
        Ok(())
    }

    async fn handle_unreadable_segment(
        &self,
        segment: &CommitLogSegment,
        error: CdcError,
    ) -> Result<()> {
        error!(
            "Failed to read commit log {}: {}",
            segment.file_name(),
            error
        );
        self.erroneous.mark(segment.file_name());
        self.metrics.record_unrecoverable_error();
        self.handle_segment_end(segment).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassandra::event::{Operation, Record};
    use crate::cassandra::filter::FieldFilter;
    use crate::cassandra::offset::{MemoryOffsetStore, OffsetFlushPolicy};
    use crate::cassandra::position::CommitLogPosition;
    use crate::cassandra::schema::MemorySchemaCatalog;
    use crate::cassandra::types::{CellValue, CqlType, TypeRegistry};
    use crate::common::CommitLogMetrics;

    struct Fixture {
        catalog: Arc<MemorySchemaCatalog>,
        queues: ChangeEventQueues,
        offsets: Arc<OffsetTracker>,
        erroneous: ErroneousSegments,
        metrics: SharedMetrics,
        handler: CommitLogReadHandler,
    }

    fn fixture(queue_count: usize, capacity: usize) -> Fixture {
        let offsets = OffsetTracker::new(
            Arc::new(MemoryOffsetStore::new()),
            OffsetFlushPolicy::default(),
        );
        fixture_with_offsets(queue_count, capacity, offsets)
    }

    fn fixture_with_offsets(
        queue_count: usize,
        capacity: usize,
        offsets: OffsetTracker,
    ) -> Fixture {
        let catalog = Arc::new(MemorySchemaCatalog::new());
        catalog.register(
            TableSchema::builder("shop", "orders")
                .partition_key("id", CqlType::Int)
                .regular("name", CqlType::Text)
                .build(),
        );
        let queues = ChangeEventQueues::new(queue_count, capacity, 1000);
        let offsets = Arc::new(offsets);
        let erroneous = ErroneousSegments::new();
        let metrics: SharedMetrics = Arc::new(CommitLogMetrics::new("test"));
        let maker = RecordMaker::new(
            "cluster1",
            Arc::new(TypeRegistry::new()),
            FieldFilter::allow_all(),
            true,
            metrics.clone(),
        );
        let handler = CommitLogReadHandler::new(
            catalog.clone(),
            maker,
            queues.clone(),
            offsets.clone(),
            erroneous.clone(),
            metrics.clone(),
        );
        Fixture {
            catalog,
            queues,
            offsets,
            erroneous,
            metrics,
            handler,
        }
    }

    fn segment() -> CommitLogSegment {
        CommitLogSegment::from_path("/cdc/CommitLog-7-2.log").unwrap()
    }

    fn orders_mutation(id: i32, position: u64) -> RawMutation {
        RawMutation::new(
            KeyspaceTable::new("shop", "orders"),
            CommitLogPosition::new(2, position),
            position as i64,
        )
        .cell("id", id.to_be_bytes().to_vec())
        .cell("name", format!("row-{}", id).into_bytes())
        .with_row_liveness(true)
    }

    #[tokio::test]
    async fn test_events_keep_position_order() {
        let f = fixture(1, 100);
        for (i, position) in [10u64, 20, 30, 40].into_iter().enumerate() {
            f.handler
                .handle_mutation(&segment(), orders_mutation(i as i32, position), false)
                .await
                .unwrap();
        }
        f.handler.handle_segment_end(&segment()).await.unwrap();

        let events = f.queues.get(0).unwrap().drain();
        let positions: Vec<u64> = events
            .iter()
            .filter_map(|e| e.position())
            .map(|p| p.position)
            .collect();
        assert_eq!(positions, vec![10, 20, 30, 40]);
        assert!(events.last().is_some_and(|e| e.is_eof()));
        assert_eq!(f.metrics.snapshot().mutations_processed, 4);
    }

    #[tokio::test]
    async fn test_unknown_table_is_skipped() {
        let f = fixture(1, 10);
        let mutation = RawMutation::new(
            KeyspaceTable::new("shop", "unknown"),
            CommitLogPosition::new(2, 1),
            1,
        );
        f.handler
            .handle_mutation(&segment(), mutation, false)
            .await
            .unwrap();
        assert!(f.queues.get(0).unwrap().is_empty());
        assert_eq!(f.metrics.snapshot().mutations_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_retry_sees_late_table() {
        let f = fixture(1, 10);
        let handler = f.handler.with_schema_retry(SchemaRetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(100),
        });

        let catalog = f.catalog.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            catalog.register(
                TableSchema::builder("shop", "late")
                    .partition_key("id", CqlType::Int)
                    .build(),
            );
        });

        let mutation = RawMutation::new(
            KeyspaceTable::new("shop", "late"),
            CommitLogPosition::new(2, 1),
            1,
        )
        .cell("id", 1i32.to_be_bytes().to_vec());
        handler
            .handle_mutation(&segment(), mutation, false)
            .await
            .unwrap();
        assert_eq!(f.queues.total_len(), 1);
    }

    #[tokio::test]
    async fn test_mutations_before_resumed_offset_are_skipped() {
        let table = KeyspaceTable::new("shop", "orders");
        let store = Arc::new(MemoryOffsetStore::with_offsets(
            [(table, CommitLogPosition::new(2, 20))].into_iter().collect(),
        ));
        let offsets = OffsetTracker::load(store, OffsetFlushPolicy::default())
            .await
            .unwrap();
        let f = fixture_with_offsets(1, 10, offsets);

        for (id, position) in [(1, 19), (2, 20), (3, 21)] {
            f.handler
                .handle_mutation(&segment(), orders_mutation(id, position), false)
                .await
                .unwrap();
        }

        let positions: Vec<_> = f
            .queues
            .get(0)
            .unwrap()
            .drain()
            .iter()
            .filter_map(|e| e.position())
            .collect();
        assert_eq!(
            positions,
            vec![CommitLogPosition::new(2, 20), CommitLogPosition::new(2, 21)]
        );
        assert_eq!(f.metrics.snapshot().mutations_skipped, 1);
    }

    #[tokio::test]
    async fn test_rows_sharing_a_position_survive_emitted_offset() {
        let f = fixture(1, 10);
        let table = KeyspaceTable::new("shop", "orders");

        f.handler
            .handle_mutation(&segment(), orders_mutation(1, 20), false)
            .await
            .unwrap();
        assert_eq!(f.queues.get(0).unwrap().drain().len(), 1);
        // The first row was acknowledged before the reader reached the second
        assert!(f.offsets.advance(&table, CommitLogPosition::new(2, 20)));

        f.handler
            .handle_mutation(&segment(), orders_mutation(2, 20), false)
            .await
            .unwrap();
        let events = f.queues.get(0).unwrap().drain();
        assert_eq!(events.len(), 1);
        let Event::Record(record) = &events[0] else {
            panic!("expected record");
        };
        assert_eq!(record.key()[0].value, CellValue::Int(2));
    }

    #[tokio::test]
    async fn test_bad_mutation_is_counted_not_propagated() {
        let f = fixture(1, 10);
        let mutation = RawMutation::new(
            KeyspaceTable::new("shop", "orders"),
            CommitLogPosition::new(2, 1),
            1,
        )
        .cell("id", vec![0xFF]);
        f.handler
            .handle_mutation(&segment(), mutation, false)
            .await
            .unwrap();
        assert!(f.queues.get(0).unwrap().is_empty());
        assert_eq!(f.metrics.snapshot().unrecoverable_errors, 1);
    }

    #[tokio::test]
    async fn test_deletion_becomes_tombstone() {
        let f = fixture(1, 10);
        f.handler
            .handle_mutation(&segment(), orders_mutation(1, 5), true)
            .await
            .unwrap();
        let events = f.queues.get(0).unwrap().drain();
        assert!(matches!(
            &events[0],
            Event::Record(Record::Tombstone(t)) if t.key.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_insert_operation() {
        let f = fixture(1, 10);
        f.handler
            .handle_mutation(&segment(), orders_mutation(1, 5), false)
            .await
            .unwrap();
        let events = f.queues.get(0).unwrap().drain();
        let Event::Record(record) = &events[0] else {
            panic!("expected record");
        };
        assert_eq!(record.op(), Operation::Insert);
    }

    #[tokio::test]
    async fn test_segment_end_reaches_every_queue() {
        let f = fixture(4, 10);
        f.handler.handle_segment_end(&segment()).await.unwrap();

        let mut markers = Vec::new();
        for queue in f.queues.iter() {
            let events = queue.drain();
            assert_eq!(events.len(), 1);
            if let Event::Eof(eof) = &events[0] {
                markers.push(eof.clone());
            }
        }
        let completions: Vec<bool> = markers.iter().map(|m| m.complete()).collect();
        assert_eq!(completions.iter().filter(|c| **c).count(), 1);
        assert_eq!(completions.last(), Some(&true));
    }

    #[tokio::test]
    async fn test_unreadable_segment_marked_and_ended() {
        let f = fixture(1, 10);
        f.handler
            .handle_unreadable_segment(&segment(), CdcError::replication("corrupt header"))
            .await
            .unwrap();
        assert!(f.erroneous.contains("CommitLog-7-2.log"));
        assert!(f.queues.get(0).unwrap().drain()[0].is_eof());
    }

    #[tokio::test]
    async fn test_closed_queue_cancels() {
        let f = fixture(1, 10);
        f.queues.close_all();
        let result = f
            .handler
            .handle_mutation(&segment(), orders_mutation(1, 5), false)
            .await;
        assert!(matches!(result, Err(CdcError::Cancelled)));
        assert!(matches!(
            f.handler.handle_segment_end(&segment()).await,
            Err(CdcError::Cancelled)
        ));
    }
}
