//! # Cassandra commit log CDC
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────────┐   ┌──────────────────────┐
//! │  cdc_raw/    │──▶│ CommitLogProcessor  │──▶│ CommitLogReadHandler │
//! │  segments    │   │ (CommitLogReader)   │   │ schema + RecordMaker │
//! └──────────────┘   └─────────────────────┘   └──────────┬───────────┘
//!                                                         │ per table
//!                                                         ▼
//!                                              ┌──────────────────────┐
//!                                              │ ChangeEventQueue × N │
//!                                              └──────────┬───────────┘
//!                                                         ▼
//! ┌──────────────┐   ┌─────────────────────┐   ┌──────────────────────┐
//! │ archive/     │◀──│ CommitLogRelocator  │◀──│ QueueProcessor × N   │
//! │ error/       │   │ (on EOF)            │   │ RecordEmitter        │
//! └──────────────┘   └─────────────────────┘   └──────────┬───────────┘
//!                                                         ▼
//!                                              RecordProducer + offsets
//! ```
//!
//! Records of one table always travel through the same queue, so they reach
//! the broker in commit log order. A segment is moved out of the CDC
//! directory only after every queue has handled its end-of-file marker.

pub mod commit_log;
pub mod config;
pub mod connector;
pub mod emitter;
pub mod event;
pub mod filter;
pub mod handler;
pub mod offset;
pub mod position;
pub mod processor;
pub mod queue;
pub mod record;
pub mod schema;
pub mod segment;
pub mod types;

pub use commit_log::{CommitLogProcessor, CommitLogReader, MemoryCommitLogReader};
pub use config::{CassandraCdcConfig, CassandraCdcConfigBuilder};
pub use connector::CassandraCdc;
pub use emitter::{
    Emitter, MemoryProducer, ProducerRecord, RecordEmitter, RecordProducer, TopicNamer,
};
pub use event::{
    ChangeRecord, Column, EofEvent, EofLatch, Event, Operation, Record, SourceInfo,
    TombstoneRecord,
};
pub use filter::FieldFilter;
pub use handler::{CommitLogReadHandler, MutationHandler, SchemaRetryPolicy};
pub use offset::{
    FileOffsetStore, MemoryOffsetStore, OffsetFlushPolicy, OffsetMap, OffsetStore,
    OffsetTracker,
};
pub use position::{CommitLogPosition, CommitLogSegment, KeyspaceTable};
pub use processor::{ProcessorStats, ProcessorStatsSnapshot, QueueProcessor};
pub use queue::{ChangeEventQueue, ChangeEventQueues};
pub use record::{RawCell, RawMutation, RecordMaker};
pub use schema::{
    ColumnDefinition, ColumnKind, MemorySchemaCatalog, SchemaCatalog, TableSchema,
    TableSchemaBuilder,
};
pub use segment::{
    CommitLogRelocator, ErroneousSegments, RelocationOutcome, RetirementDestination,
};
pub use types::{CellValue, CqlType, TypeDeserializer, TypeRegistry};
