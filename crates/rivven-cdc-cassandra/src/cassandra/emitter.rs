//! Emission of records to the broker.
//!
//! [`RecordEmitter`] turns records into keyed JSON messages, hands them to a
//! [`RecordProducer`] and, once the producer acknowledges, advances the
//! table's offset. Records are sent one at a time so offsets never run ahead
//! of acknowledged messages.
//!
//! ## Topics
//!
//! | Message | Topic |
//! |---------|-------|
//! | Change / delete | `<kafka_topic_prefix>.<keyspace>.<table>` |
//! | Heartbeat | `<heartbeat_topics_prefix>.<kafka_topic_prefix>` |
//!
//! ## Value envelope
//!
//! ```json
//! {"op": "c", "ts_ms": 1700000000000, "source": {...}, "after": {"id": 1, "name": "a"}}
//! ```
//!
//! A deleted row is sent as an `"op": "d"` envelope holding only the key,
//! followed by a message with the same key and no value so log compaction
//! can drop the key.

use super::event::{columns_to_json, ChangeRecord, Record, TombstoneRecord};
use super::offset::OffsetTracker;
use super::position::KeyspaceTable;
use super::segment::ErroneousSegments;
use crate::common::{CdcError, Result, SharedMetrics};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A message ready for the broker. `value: None` is a compaction tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub topic: String,
    pub key: Bytes,
    pub value: Option<Bytes>,
}

impl ProducerRecord {
    /// Key decoded as JSON; for tests and logging.
    pub fn key_json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.key)?)
    }

    /// Value decoded as JSON; `None` for a tombstone.
    pub fn value_json(&self) -> Result<Option<Value>> {
        self.value
            .as_ref()
            .map(|v| serde_json::from_slice(v).map_err(CdcError::from))
            .transpose()
    }
}

/// Broker client boundary.
#[async_trait]
pub trait RecordProducer: Send + Sync {
    /// Send one message; returns once the broker acknowledged it.
    async fn send(&self, record: ProducerRecord) -> Result<()>;

    async fn flush(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Sink for records dequeued by a queue processor.
#[async_trait]
pub trait Emitter: Send + Sync {
    async fn emit(&self, record: &Record) -> Result<()>;

    /// Signal liveness on the heartbeat topic.
    async fn emit_heartbeat(&self) -> Result<()>;

    /// Flush offsets if the flush policy says so; true when a flush ran.
    async fn maybe_flush_offsets(&self) -> Result<bool>;

    /// Flush outstanding offsets and release the producer.
    async fn close(&self) -> Result<()>;
}

/// Topic naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNamer {
    prefix: String,
    heartbeat_prefix: String,
}

impl TopicNamer {
    pub fn new(prefix: impl Into<String>, heartbeat_prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            heartbeat_prefix: heartbeat_prefix.into(),
        }
    }

    pub fn topic_for(&self, table: &KeyspaceTable) -> String {
        format!("{}.{}.{}", self.prefix, table.keyspace, table.table)
    }

    pub fn heartbeat_topic(&self) -> String {
        format!("{}.{}", self.heartbeat_prefix, self.prefix)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn change_envelope(record: &ChangeRecord) -> Value {
    let mut after = columns_to_json(&record.key);
    if let (Value::Object(after), Value::Object(rest)) = (&mut after, columns_to_json(&record.columns))
    {
        after.extend(rest);
    }
    json!({
        "op": record.op.code(),
        "ts_ms": now_millis(),
        "source": record.source.to_json(),
        "after": after,
    })
}

fn delete_envelope(record: &TombstoneRecord) -> Value {
    json!({
        "op": "d",
        "ts_ms": now_millis(),
        "source": record.source.to_json(),
        "after": columns_to_json(&record.key),
    })
}

/// Emitter writing JSON messages through a [`RecordProducer`].
pub struct RecordEmitter {
    producer: Arc<dyn RecordProducer>,
    topics: TopicNamer,
    offsets: Arc<OffsetTracker>,
    erroneous: ErroneousSegments,
    emit_timeout: Duration,
    metrics: SharedMetrics,
    closed: AtomicBool,
}

impl RecordEmitter {
    pub fn new(
        producer: Arc<dyn RecordProducer>,
        topics: TopicNamer,
        offsets: Arc<OffsetTracker>,
        erroneous: ErroneousSegments,
        emit_timeout: Duration,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            producer,
            topics,
            offsets,
            erroneous,
            emit_timeout,
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    pub fn topics(&self) -> &TopicNamer {
        &self.topics
    }

    async fn send(&self, record: ProducerRecord) -> Result<()> {
        let topic = record.topic.clone();
        tokio::time::timeout(self.emit_timeout, self.producer.send(record))
            .await
            .map_err(|_| {
                CdcError::timeout(format!(
                    "No acknowledgement from broker for topic {} within {:?}",
                    topic, self.emit_timeout
                ))
            })?
    }
}

#[async_trait]
impl Emitter for RecordEmitter {
    async fn emit(&self, record: &Record) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CdcError::invalid_state("Emitter is closed"));
        }

        let topic = self.topics.topic_for(record.table());
        let key = Bytes::from(serde_json::to_vec(&columns_to_json(record.key()))?);

        let result = match record {
            Record::Change(change) => {
                let value = serde_json::to_vec(&change_envelope(change))?;
                self.send(ProducerRecord {
                    topic,
                    key,
                    value: Some(Bytes::from(value)),
                })
                .await
            }
            Record::Tombstone(tombstone) => {
                let value = serde_json::to_vec(&delete_envelope(tombstone))?;
                let delete = ProducerRecord {
                    topic: topic.clone(),
                    key: key.clone(),
                    value: Some(Bytes::from(value)),
                };
                match self.send(delete).await {
                    Ok(()) => {
                        self.send(ProducerRecord {
                            topic,
                            key,
                            value: None,
                        })
                        .await
                    }
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = result {
            self.metrics.record_emit_error();
            return Err(e);
        }

        if record.is_tombstone() {
            self.metrics.record_tombstone_emitted();
        } else {
            self.metrics.record_change_emitted();
        }

        // Progress inside a segment that failed is not trusted for resume
        let source = record.source();
        if !self.erroneous.contains(&source.commit_log_file) {
            self.offsets.advance(record.table(), record.position());
            if let Err(e) = self.offsets.maybe_flush().await {
                warn!("Offset flush failed after emitting to {}: {}", record.table(), e);
            }
        }
        Ok(())
    }

    async fn emit_heartbeat(&self) -> Result<()> {
        let key = json!({ "serverName": self.topics.prefix() });
        let value = json!({ "ts_ms": now_millis() });
        self.send(ProducerRecord {
            topic: self.topics.heartbeat_topic(),
            key: Bytes::from(serde_json::to_vec(&key)?),
            value: Some(Bytes::from(serde_json::to_vec(&value)?)),
        })
        .await
    }

    async fn maybe_flush_offsets(&self) -> Result<bool> {
        self.offsets.maybe_flush().await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let flushed = self.offsets.flush().await;
        let producer_flushed = self.producer.flush().await;
        let producer_closed = self.producer.close().await;
        debug!("Emitter closed");
        flushed.and(producer_flushed).and(producer_closed)
    }
}

/// Producer keeping messages in memory.
#[derive(Debug, Default)]
pub struct MemoryProducer {
    records: Mutex<Vec<ProducerRecord>>,
    fail_sends: AtomicUsize,
    send_delay: Mutex<Option<Duration>>,
    closed: AtomicBool,
}

impl MemoryProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ProducerRecord> {
        self.records.lock().clone()
    }

    pub fn records_for(&self, topic: &str) -> Vec<ProducerRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.topic == topic)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Fail the next `n` sends.
    pub fn fail_next(&self, n: usize) {
        self.fail_sends.store(n, Ordering::SeqCst);
    }

    /// Delay every send, to exercise timeouts.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        *self.send_delay.lock() = delay;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordProducer for MemoryProducer {
    async fn send(&self, record: ProducerRecord) -> Result<()> {
        if self.is_closed() {
            return Err(CdcError::emit("Producer is closed"));
        }
        let delay = *self.send_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .fail_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CdcError::emit(format!("Broker rejected {}", record.topic)));
        }
        self.records.lock().push(record);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
