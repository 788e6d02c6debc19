//! Connector configuration.
//!
//! [`CassandraCdcConfig`] deserializes from YAML with `${VAR}` and
//! `${VAR:-default}` environment expansion, or is assembled with
//! [`CassandraCdcConfigBuilder`].

use super::handler::SchemaRetryPolicy;
use super::offset::OffsetFlushPolicy;
use crate::common::{CdcConfig, CdcError, FieldPatternSet, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

fn default_connector_name() -> String {
    "rivven-cassandra".to_string()
}

fn default_cluster_name() -> String {
    "cassandra".to_string()
}

fn default_commit_log_poll_interval_ms() -> u64 {
    10_000
}

fn default_offset_flush_interval_ms() -> u64 {
    1_000
}

fn default_max_offset_flush_size() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_topics_prefix() -> String {
    "__rivven-heartbeat".to_string()
}

fn default_num_of_change_event_queues() -> usize {
    1
}

fn default_max_queue_size() -> usize {
    8192
}

fn default_max_batch_size() -> usize {
    2048
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_emit_timeout_ms() -> u64 {
    30_000
}

fn default_schema_lookup_backoff_ms() -> u64 {
    1_000
}

/// Cassandra commit log CDC configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CassandraCdcConfig {
    /// Name used in emitted source info and metric labels
    #[serde(default = "default_connector_name")]
    pub connector_name: String,

    /// Cluster name reported in source info
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Directory Cassandra writes CDC segments to (`cdc_raw`)
    pub commit_log_dir: PathBuf,

    /// Root of the `archive` and `error` folders
    pub commit_log_relocation_dir: PathBuf,

    /// How often the commit log directory is scanned for new segments
    #[serde(default = "default_commit_log_poll_interval_ms")]
    pub commit_log_poll_interval_ms: u64,

    /// Directory holding `offsets.json`
    pub offset_backing_store_dir: PathBuf,

    #[serde(default = "default_offset_flush_interval_ms")]
    pub offset_flush_interval_ms: u64,

    /// Advances accumulated before a flush is forced
    #[serde(default = "default_max_offset_flush_size")]
    pub max_offset_flush_size: usize,

    /// `keyspace.table.column` patterns (`*` wildcards) left out of records
    #[serde(default)]
    pub field_exclude_list: Vec<String>,

    /// Emit a tombstone for deletions; otherwise deletions are dropped
    #[serde(default = "default_true")]
    pub tombstones_on_delete: bool,

    /// Change topics are named `<prefix>.<keyspace>.<table>`
    pub kafka_topic_prefix: String,

    #[serde(default = "default_heartbeat_topics_prefix")]
    pub heartbeat_topics_prefix: String,

    /// Heartbeat period; 0 disables heartbeats
    #[serde(default)]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_num_of_change_event_queues")]
    pub num_of_change_event_queues: usize,

    /// Capacity of each change event queue
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Most events handed to the emitter per poll
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// How long a queue processor waits for events before polling again
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on one broker send
    #[serde(default = "default_emit_timeout_ms")]
    pub emit_timeout_ms: u64,

    /// Extra schema lookups before a mutation of an unknown table is dropped
    #[serde(default)]
    pub schema_lookup_retries: u32,

    #[serde(default = "default_schema_lookup_backoff_ms")]
    pub schema_lookup_backoff_ms: u64,
}

impl CassandraCdcConfig {
    /// Create a new configuration builder
    pub fn builder() -> CassandraCdcConfigBuilder {
        CassandraCdcConfigBuilder::default()
    }

    /// Parse YAML, expanding environment variables first.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            CdcError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn commit_log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.commit_log_poll_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn emit_timeout(&self) -> Duration {
        Duration::from_millis(self.emit_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn offset_flush_policy(&self) -> OffsetFlushPolicy {
        OffsetFlushPolicy {
            interval: Duration::from_millis(self.offset_flush_interval_ms),
            max_size: self.max_offset_flush_size,
        }
    }

    pub fn schema_retry_policy(&self) -> SchemaRetryPolicy {
        SchemaRetryPolicy {
            retries: self.schema_lookup_retries,
            backoff: Duration::from_millis(self.schema_lookup_backoff_ms),
        }
    }
}

impl CdcConfig for CassandraCdcConfig {
    fn source_type(&self) -> &'static str {
        "cassandra"
    }

    fn validate(&self) -> Result<()> {
        if self.connector_name.trim().is_empty() {
            return Err(CdcError::config("connector_name is required"));
        }
        if self.commit_log_dir.as_os_str().is_empty() {
            return Err(CdcError::config("commit_log_dir is required"));
        }
        if self.commit_log_relocation_dir.as_os_str().is_empty() {
            return Err(CdcError::config("commit_log_relocation_dir is required"));
        }
        if self.commit_log_relocation_dir == self.commit_log_dir {
            return Err(CdcError::config(
                "commit_log_relocation_dir must differ from commit_log_dir",
            ));
        }
        if self.offset_backing_store_dir.as_os_str().is_empty() {
            return Err(CdcError::config("offset_backing_store_dir is required"));
        }
        if self.kafka_topic_prefix.trim().is_empty() {
            return Err(CdcError::config("kafka_topic_prefix is required"));
        }
        if self.num_of_change_event_queues == 0 {
            return Err(CdcError::config(
                "num_of_change_event_queues must be at least 1",
            ));
        }
        if self.max_queue_size == 0 {
            return Err(CdcError::config("max_queue_size must be at least 1"));
        }
        if self.max_batch_size == 0 || self.max_batch_size > self.max_queue_size {
            return Err(CdcError::config(format!(
                "max_batch_size must be between 1 and max_queue_size ({})",
                self.max_queue_size
            )));
        }
        if self.max_offset_flush_size == 0 {
            return Err(CdcError::config("max_offset_flush_size must be at least 1"));
        }
        if self.emit_timeout_ms == 0 {
            return Err(CdcError::config("emit_timeout_ms must be positive"));
        }
        FieldPatternSet::from_patterns(&self.field_exclude_list)
            .map_err(|e| CdcError::config(format!("Invalid field_exclude_list: {}", e)))?;
        Ok(())
    }
}

/// Expand environment variables in the format ${VAR} or ${VAR:-default}
fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());

            std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
        })
        .to_string()
}

/// Builder for CassandraCdcConfig
#[derive(Debug, Clone)]
pub struct CassandraCdcConfigBuilder {
    config: CassandraCdcConfig,
}

impl Default for CassandraCdcConfigBuilder {
    fn default() -> Self {
        Self {
            config: CassandraCdcConfig {
                connector_name: default_connector_name(),
                cluster_name: default_cluster_name(),
                commit_log_dir: PathBuf::new(),
                commit_log_relocation_dir: PathBuf::new(),
                commit_log_poll_interval_ms: default_commit_log_poll_interval_ms(),
                offset_backing_store_dir: PathBuf::new(),
                offset_flush_interval_ms: default_offset_flush_interval_ms(),
                max_offset_flush_size: default_max_offset_flush_size(),
                field_exclude_list: Vec::new(),
                tombstones_on_delete: true,
                kafka_topic_prefix: String::new(),
                heartbeat_topics_prefix: default_heartbeat_topics_prefix(),
                heartbeat_interval_ms: 0,
                num_of_change_event_queues: default_num_of_change_event_queues(),
                max_queue_size: default_max_queue_size(),
                max_batch_size: default_max_batch_size(),
                poll_interval_ms: default_poll_interval_ms(),
                emit_timeout_ms: default_emit_timeout_ms(),
                schema_lookup_retries: 0,
                schema_lookup_backoff_ms: default_schema_lookup_backoff_ms(),
            },
        }
    }
}

impl CassandraCdcConfigBuilder {
    pub fn connector_name(mut self, name: impl Into<String>) -> Self {
        self.config.connector_name = name.into();
        self
    }

    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.config.cluster_name = name.into();
        self
    }

    pub fn commit_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.commit_log_dir = dir.into();
        self
    }

    pub fn commit_log_relocation_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.commit_log_relocation_dir = dir.into();
        self
    }

    pub fn commit_log_poll_interval(mut self, interval: Duration) -> Self {
        self.config.commit_log_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn offset_backing_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.offset_backing_store_dir = dir.into();
        self
    }

    pub fn offset_flush_interval(mut self, interval: Duration) -> Self {
        self.config.offset_flush_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn max_offset_flush_size(mut self, size: usize) -> Self {
        self.config.max_offset_flush_size = size;
        self
    }

    pub fn exclude_field(mut self, pattern: impl Into<String>) -> Self {
        self.config.field_exclude_list.push(pattern.into());
        self
    }

    pub fn tombstones_on_delete(mut self, enabled: bool) -> Self {
        self.config.tombstones_on_delete = enabled;
        self
    }

    pub fn kafka_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.kafka_topic_prefix = prefix.into();
        self
    }

    pub fn heartbeat_topics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.heartbeat_topics_prefix = prefix.into();
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn num_of_change_event_queues(mut self, count: usize) -> Self {
        self.config.num_of_change_event_queues = count;
        self
    }

    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.config.max_queue_size = size;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.max_batch_size = size;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn emit_timeout(mut self, timeout: Duration) -> Self {
        self.config.emit_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn schema_lookup_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.config.schema_lookup_retries = retries;
        self.config.schema_lookup_backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<CassandraCdcConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
