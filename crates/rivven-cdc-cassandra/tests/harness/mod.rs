//! Test harness for commit log pipeline tests
//!
//! Provides a throwaway directory layout (`cdc_raw`, relocation root, offset
//! store), a registered `shop.orders` table and mutation builders.

#![allow(dead_code)]

use async_trait::async_trait;
use rivven_cdc_cassandra::cassandra::{
    CassandraCdc, CassandraCdcConfig, CommitLogPosition, CqlType, KeyspaceTable,
    MemoryCommitLogReader, MemoryProducer, MemorySchemaCatalog, ProducerRecord, RawMutation,
    RecordProducer, TableSchema,
};
use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;

pub const SEGMENT_1: &str = "CommitLog-7-1.log";
pub const SEGMENT_2: &str = "CommitLog-7-2.log";

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("rivven_cdc_cassandra=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn orders_schema() -> TableSchema {
    TableSchema::builder("shop", "orders")
        .partition_key("id", CqlType::Int)
        .regular("name", CqlType::Text)
        .regular("secret", CqlType::Text)
        .build()
}

fn orders() -> KeyspaceTable {
    KeyspaceTable::new("shop", "orders")
}

/// INSERT into `shop.orders`.
pub fn insert(segment_id: u64, position: u64, id: i32, name: &str) -> RawMutation {
    RawMutation::new(
        orders(),
        CommitLogPosition::new(segment_id, position),
        position as i64 * 1_000,
    )
    .cell("id", id.to_be_bytes().to_vec())
    .cell("name", name.to_string())
    .with_row_liveness(true)
}

/// Row deletion in `shop.orders`.
pub fn delete(segment_id: u64, position: u64, id: i32) -> RawMutation {
    RawMutation::new(
        orders(),
        CommitLogPosition::new(segment_id, position),
        position as i64 * 1_000,
    )
    .cell("id", id.to_be_bytes().to_vec())
}

/// Poll `condition` until it holds; panics after five seconds.
pub async fn wait_for(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within 5s");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Producer that survives pipeline restarts; `close` is a no-op.
pub struct SharedProducer(pub Arc<MemoryProducer>);

#[async_trait]
impl RecordProducer for SharedProducer {
    async fn send(&self, record: ProducerRecord) -> rivven_cdc_cassandra::Result<()> {
        self.0.send(record).await
    }

    async fn flush(&self) -> rivven_cdc_cassandra::Result<()> {
        self.0.flush().await
    }

    async fn close(&self) -> rivven_cdc_cassandra::Result<()> {
        Ok(())
    }
}

pub struct TestEnv {
    root: TempDir,
    pub catalog: Arc<MemorySchemaCatalog>,
    pub producer: Arc<MemoryProducer>,
    pub reader: Arc<MemoryCommitLogReader>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(root.path().join("cdc_raw"))
            .await
            .unwrap();

        let catalog = Arc::new(MemorySchemaCatalog::new());
        catalog.register(orders_schema());

        Self {
            root,
            catalog,
            producer: Arc::new(MemoryProducer::new()),
            reader: Arc::new(MemoryCommitLogReader::new()),
        }
    }

    pub fn cdc_dir(&self) -> PathBuf {
        self.root.path().join("cdc_raw")
    }

    pub fn relocation_dir(&self) -> PathBuf {
        self.root.path().join("relocation")
    }

    pub fn offsets_dir(&self) -> PathBuf {
        self.root.path().join("offsets")
    }

    pub async fn write_segment(&self, name: &str) {
        tokio::fs::write(self.cdc_dir().join(name), b"")
            .await
            .unwrap();
    }

    pub fn config(&self, queues: usize) -> CassandraCdcConfig {
        CassandraCdcConfig::builder()
            .cluster_name("cluster1")
            .commit_log_dir(self.cdc_dir())
            .commit_log_relocation_dir(self.relocation_dir())
            .offset_backing_store_dir(self.offsets_dir())
            .kafka_topic_prefix("test")
            .num_of_change_event_queues(queues)
            .commit_log_poll_interval(Duration::from_millis(10))
            .poll_interval(Duration::from_millis(10))
            .emit_timeout(Duration::from_secs(1))
            .build()
            .unwrap()
    }

    pub fn source(&self, config: CassandraCdcConfig) -> CassandraCdc {
        CassandraCdc::new(
            config,
            self.catalog.clone(),
            Arc::new(SharedProducer(self.producer.clone())),
            self.reader.clone(),
        )
        .unwrap()
    }

    pub fn retired_path(&self, folder: &str, name: &str) -> PathBuf {
        self.relocation_dir().join(folder).join(name)
    }

    pub fn retired(&self, folder: &str, name: &str) -> bool {
        self.retired_path(folder, name).exists()
    }

    pub fn archived(&self, name: &str) -> bool {
        self.retired("archive", name)
    }

    /// Contents of `offsets.json`, or `{}` before the first flush.
    pub async fn saved_offsets(&self) -> serde_json::Value {
        match tokio::fs::read_to_string(self.offsets_dir().join("offsets.json")).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap(),
            Err(_) => serde_json::json!({}),
        }
    }
}
