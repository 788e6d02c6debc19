//! # rivven-cdc-cassandra - Cassandra Change Data Capture for Rivven
//!
//! Streams row changes out of Cassandra's CDC commit log directory
//! (`cdc_raw`) into broker topics, one JSON message per mutation.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────┐
//! │ Commit log    │───▶│ Read handler │───▶│ Change event │───▶│ Emitter  │
//! │ segments      │    │ (per table)  │    │ queues       │    │ + offsets│
//! └───────────────┘    └──────────────┘    └──────────────┘    └────┬─────┘
//!         ▲                                                         │
//!         └──────────── archive / error after EOF ◀─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> rivven_cdc_cassandra::Result<()> {
//! use std::sync::Arc;
//! use rivven_cdc_cassandra::cassandra::{
//!     CassandraCdc, CassandraCdcConfig, MemoryCommitLogReader, MemoryProducer,
//!     MemorySchemaCatalog,
//! };
//! use rivven_cdc_cassandra::CdcSource;
//!
//! let config = CassandraCdcConfig::from_file("cassandra-cdc.yaml").await?;
//! let mut cdc = CassandraCdc::new(
//!     config,
//!     Arc::new(MemorySchemaCatalog::new()),
//!     Arc::new(MemoryProducer::new()),
//!     Arc::new(MemoryCommitLogReader::new()),
//! )?;
//! cdc.start().await?;
//! // ...
//! cdc.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! The schema catalog, broker producer and commit log reader are
//! collaborators behind traits ([`cassandra::SchemaCatalog`],
//! [`cassandra::RecordProducer`], [`cassandra::CommitLogReader`]); the
//! in-memory implementations above are meant for tests and embedding.

pub mod cassandra;
pub mod common;

pub use cassandra::{CassandraCdc, CassandraCdcConfig, ChangeRecord, Event, Record, TombstoneRecord};
pub use common::{CdcConfig, CdcError, CdcSource, CommitLogMetrics, ErrorCategory, Result};
