//! Cassandra CDC source: wires the reader, queues and processors together.

use super::commit_log::{CommitLogProcessor, CommitLogReader};
use super::config::CassandraCdcConfig;
use super::emitter::{RecordEmitter, RecordProducer, TopicNamer};
use super::filter::FieldFilter;
use super::handler::CommitLogReadHandler;
use super::offset::{FileOffsetStore, OffsetStore, OffsetTracker};
use super::processor::{ProcessorStatsSnapshot, QueueProcessor};
use super::queue::ChangeEventQueues;
use super::record::RecordMaker;
use super::schema::SchemaCatalog;
use super::segment::{CommitLogRelocator, ErroneousSegments};
use super::types::TypeRegistry;
use crate::common::{
    CdcConfig, CdcError, CdcSource, CommitLogMetrics, Result, SharedMetrics,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

struct Running {
    shutdown: watch::Sender<bool>,
    queues: ChangeEventQueues,
    offsets: Arc<OffsetTracker>,
    processors: Vec<Arc<QueueProcessor>>,
    reader_task: JoinHandle<()>,
    processor_tasks: Vec<JoinHandle<()>>,
}

/// Cassandra commit log CDC source
///
/// One reader task walks the commit log directory and fills the change event
/// queues; one processor task per queue emits records and retires segments.
///
/// ```rust,no_run
/// # async fn example() -> rivven_cdc_cassandra::common::Result<()> {
/// use std::sync::Arc;
/// use rivven_cdc_cassandra::cassandra::{
///     CassandraCdc, CassandraCdcConfig, MemoryCommitLogReader, MemoryProducer,
///     MemorySchemaCatalog,
/// };
/// use rivven_cdc_cassandra::CdcSource;
///
/// let config = CassandraCdcConfig::builder()
///     .commit_log_dir("/var/lib/cassandra/cdc_raw")
///     .commit_log_relocation_dir("/var/lib/rivven/relocation")
///     .offset_backing_store_dir("/var/lib/rivven/offsets")
///     .kafka_topic_prefix("prod")
///     .build()?;
///
/// let mut cdc = CassandraCdc::new(
///     config,
///     Arc::new(MemorySchemaCatalog::new()),
///     Arc::new(MemoryProducer::new()),
///     Arc::new(MemoryCommitLogReader::new()),
/// )?;
/// cdc.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct CassandraCdc {
    config: CassandraCdcConfig,
    schemas: Arc<dyn SchemaCatalog>,
    producer: Arc<dyn RecordProducer>,
    reader: Arc<dyn CommitLogReader>,
    registry: Arc<TypeRegistry>,
    offset_store: Arc<dyn OffsetStore>,
    metrics: SharedMetrics,
    running: Option<Running>,
}

impl CassandraCdc {
    /// Create a source; the configuration is validated here.
    pub fn new(
        config: CassandraCdcConfig,
        schemas: Arc<dyn SchemaCatalog>,
        producer: Arc<dyn RecordProducer>,
        reader: Arc<dyn CommitLogReader>,
    ) -> Result<Self> {
        config.validate()?;
        let offset_store: Arc<dyn OffsetStore> =
            Arc::new(FileOffsetStore::new(&config.offset_backing_store_dir));
        let metrics = Arc::new(CommitLogMetrics::new(&config.connector_name));
        Ok(Self {
            config,
            schemas,
            producer,
            reader,
            registry: Arc::new(TypeRegistry::new()),
            offset_store,
            metrics,
            running: None,
        })
    }

    /// Use a registry with additional or replaced deserializers.
    pub fn with_type_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Persist offsets somewhere other than `offset_backing_store_dir`.
    pub fn with_offset_store(mut self, store: Arc<dyn OffsetStore>) -> Self {
        self.offset_store = store;
        self
    }

    pub fn config(&self) -> &CassandraCdcConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Queues of the running pipeline.
    pub fn queues(&self) -> Option<&ChangeEventQueues> {
        self.running.as_ref().map(|r| &r.queues)
    }

    /// Offsets of the running pipeline.
    pub fn offsets(&self) -> Option<Arc<OffsetTracker>> {
        self.running.as_ref().map(|r| r.offsets.clone())
    }

    pub fn processor_stats(&self) -> Vec<ProcessorStatsSnapshot> {
        self.running
            .as_ref()
            .map(|r| r.processors.iter().map(|p| p.stats()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CdcSource for CassandraCdc {
    async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(CdcError::invalid_state("Cassandra CDC already started"));
        }
        let config = &self.config;
        info!(
            "Starting Cassandra CDC {} on {}",
            config.connector_name,
            config.commit_log_dir.display()
        );

        let commit_log_dir_ok = tokio::fs::metadata(&config.commit_log_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !commit_log_dir_ok {
            return Err(CdcError::config(format!(
                "commit_log_dir {} is not a directory",
                config.commit_log_dir.display()
            )));
        }

        let offsets = Arc::new(
            OffsetTracker::load(self.offset_store.clone(), config.offset_flush_policy())
                .await?
                .with_metrics(self.metrics.clone()),
        );
        let filter = FieldFilter::new(&config.field_exclude_list)?;
        let maker = RecordMaker::new(
            config.cluster_name.clone(),
            self.registry.clone(),
            filter,
            config.tombstones_on_delete,
            self.metrics.clone(),
        );
        let queues = ChangeEventQueues::new(
            config.num_of_change_event_queues,
            config.max_queue_size,
            config.max_batch_size,
        );
        let erroneous = ErroneousSegments::new();
        let relocator = CommitLogRelocator::new(&config.commit_log_relocation_dir);
        let topics = TopicNamer::new(
            config.kafka_topic_prefix.clone(),
            config.heartbeat_topics_prefix.clone(),
        );

        let mut processors = Vec::with_capacity(queues.len());
        for queue in queues.iter() {
            let emitter = Arc::new(RecordEmitter::new(
                self.producer.clone(),
                topics.clone(),
                offsets.clone(),
                erroneous.clone(),
                config.emit_timeout(),
                self.metrics.clone(),
            ));
            let processor = QueueProcessor::new(
                queue.clone(),
                emitter,
                relocator.clone(),
                erroneous.clone(),
                config.poll_interval(),
                self.metrics.clone(),
            )
            .with_heartbeat_interval(config.heartbeat_interval());
            processor.initialize().await?;
            processors.push(Arc::new(processor));
        }

        let handler = Arc::new(
            CommitLogReadHandler::new(
                self.schemas.clone(),
                maker,
                queues.clone(),
                offsets.clone(),
                erroneous,
                self.metrics.clone(),
            )
            .with_schema_retry(config.schema_retry_policy()),
        );
        let commit_log = CommitLogProcessor::new(
            &config.commit_log_dir,
            self.reader.clone(),
            handler,
            config.commit_log_poll_interval(),
            self.metrics.clone(),
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let processor_tasks = processors
            .iter()
            .map(|processor| {
                let processor = processor.clone();
                let rx = shutdown_rx.clone();
                tokio::spawn(async move { processor.run(rx).await })
            })
            .collect();
        let reader_task = tokio::spawn(async move { commit_log.run(shutdown_rx).await });

        self.running = Some(Running {
            shutdown,
            queues,
            offsets,
            processors,
            reader_task,
            processor_tasks,
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        info!("Stopping Cassandra CDC {}", self.config.connector_name);

        // Closing the queues cancels a reader blocked on a full queue
        running.queues.close_all();
        let _ = running.shutdown.send(true);

        if let Err(e) = running.reader_task.await {
            error!("Commit log reader task failed: {}", e);
        }
        for task in running.processor_tasks {
            if let Err(e) = task.await {
                error!("Queue processor task failed: {}", e);
            }
        }

        let mut result = Ok(());
        for processor in &running.processors {
            if let Err(e) = processor.destroy().await {
                warn!("Failed to close queue processor {}: {}", processor.queue().id(), e);
                result = Err(e);
            }
        }
        info!("Cassandra CDC {} stopped", self.config.connector_name);
        result
    }

    async fn is_healthy(&self) -> bool {
        match &self.running {
            Some(running) => {
                !running.reader_task.is_finished()
                    && running.processor_tasks.iter().all(|t| !t.is_finished())
            }
            None => false,
        }
    }
}

impl Drop for CassandraCdc {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.queues.close_all();
            let _ = running.shutdown.send(true);
        }
    }
}
