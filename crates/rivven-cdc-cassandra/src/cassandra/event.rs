//! Events flowing from the commit log handler to the queue processors.
//!
//! An [`Event`] is either a [`Record`] bound for the broker or an
//! [`EofEvent`] marking the end of a segment. Events are immutable once
//! built and are moved into exactly one queue.

use super::position::{CommitLogPosition, CommitLogSegment, KeyspaceTable};
use super::types::CellValue;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// Single-letter code used in the message envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Operation::Insert => "c",
            Operation::Update => "u",
            Operation::Delete => "d",
        }
    }
}

/// Where a record came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub cluster: String,
    #[serde(rename = "file")]
    pub commit_log_file: String,
    #[serde(skip)]
    pub position: CommitLogPosition,
    pub keyspace: String,
    pub table: String,
    /// Mutation write time in microseconds
    #[serde(rename = "ts_micro")]
    pub timestamp_micros: i64,
}

impl SourceInfo {
    pub fn new(
        cluster: impl Into<String>,
        segment: &CommitLogSegment,
        position: CommitLogPosition,
        table: &KeyspaceTable,
        timestamp_micros: i64,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            commit_log_file: segment.file_name().to_string(),
            position,
            keyspace: table.keyspace.clone(),
            table: table.table.clone(),
            timestamp_micros,
        }
    }

    /// JSON form for the message envelope, including the byte offset.
    pub fn to_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(ref mut map) = value {
            map.insert("connector".into(), Value::from("cassandra"));
            map.insert("segment_id".into(), Value::from(self.position.segment_id));
            map.insert("pos".into(), Value::from(self.position.position));
        }
        value
    }
}

/// A named column value.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub value: CellValue,
}

impl Column {
    pub fn new(name: impl Into<String>, value: CellValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// JSON object of columns in declaration order.
pub fn columns_to_json(columns: &[Column]) -> Value {
    let mut map = Map::with_capacity(columns.len());
    for column in columns {
        map.insert(column.name.clone(), column.value.to_json());
    }
    Value::Object(map)
}

/// An inserted or updated row.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub source: SourceInfo,
    pub table: KeyspaceTable,
    /// Partition and clustering key columns
    pub key: Vec<Column>,
    /// Regular and static columns that survived filtering
    pub columns: Vec<Column>,
    pub op: Operation,
    pub timestamp_micros: i64,
}

/// A deleted row; carries only the key.
#[derive(Debug, Clone, PartialEq)]
pub struct TombstoneRecord {
    pub source: SourceInfo,
    pub table: KeyspaceTable,
    pub key: Vec<Column>,
    pub timestamp_micros: i64,
}

/// A record bound for the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Change(ChangeRecord),
    Tombstone(TombstoneRecord),
}

impl Record {
    pub fn source(&self) -> &SourceInfo {
        match self {
            Record::Change(r) => &r.source,
            Record::Tombstone(r) => &r.source,
        }
    }

    pub fn table(&self) -> &KeyspaceTable {
        match self {
            Record::Change(r) => &r.table,
            Record::Tombstone(r) => &r.table,
        }
    }

    pub fn key(&self) -> &[Column] {
        match self {
            Record::Change(r) => &r.key,
            Record::Tombstone(r) => &r.key,
        }
    }

    pub fn position(&self) -> CommitLogPosition {
        self.source().position
    }

    pub fn op(&self) -> Operation {
        match self {
            Record::Change(r) => r.op,
            Record::Tombstone(_) => Operation::Delete,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Record::Tombstone(_))
    }
}

/// Countdown shared by the EOF markers of one segment.
///
/// With several queues each receives its own marker; the processor that
/// completes the last one retires the segment.
#[derive(Debug)]
pub struct EofLatch {
    remaining: AtomicUsize,
}

impl EofLatch {
    pub fn new(markers: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(markers),
        })
    }

    /// Count one marker down. Returns true exactly once, for the last marker.
    pub fn complete(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|previous| previous == 1)
            .unwrap_or(false)
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}

/// End of a commit log segment.
#[derive(Debug, Clone)]
pub struct EofEvent {
    pub segment: CommitLogSegment,
    latch: Arc<EofLatch>,
}

impl EofEvent {
    pub fn new(segment: CommitLogSegment, latch: Arc<EofLatch>) -> Self {
        Self { segment, latch }
    }

    /// Marker for a single-queue pipeline.
    pub fn single(segment: CommitLogSegment) -> Self {
        Self::new(segment, EofLatch::new(1))
    }

    pub fn file_name(&self) -> &str {
        self.segment.file_name()
    }

    /// Mark this marker consumed; true if the segment is now fully processed.
    pub fn complete(&self) -> bool {
        self.latch.complete()
    }
}

impl PartialEq for EofEvent {
    fn eq(&self, other: &Self) -> bool {
        self.segment == other.segment
    }
}

/// Unit of work carried by a change event queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Record(Record),
    Eof(EofEvent),
}

impl Event {
    pub fn change(record: ChangeRecord) -> Self {
        Event::Record(Record::Change(record))
    }

    pub fn tombstone(record: TombstoneRecord) -> Self {
        Event::Record(Record::Tombstone(record))
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, Event::Eof(_))
    }

    /// Table of a record event; `None` for EOF.
    pub fn table(&self) -> Option<&KeyspaceTable> {
        match self {
            Event::Record(record) => Some(record.table()),
            Event::Eof(_) => None,
        }
    }

    /// Position of a record event; `None` for EOF.
    pub fn position(&self) -> Option<CommitLogPosition> {
        match self {
            Event::Record(record) => Some(record.position()),
            Event::Eof(_) => None,
        }
    }
}
