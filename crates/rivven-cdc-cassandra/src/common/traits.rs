//! Traits for CDC sources
//!
//! Lifecycle and configuration contracts shared by CDC source implementations.

use crate::common::Result;
use async_trait::async_trait;

/// Trait for CDC source implementations
#[async_trait]
pub trait CdcSource: Send + Sync {
    /// Start capturing changes
    ///
    /// Spawns the background tasks that read the source and emit events.
    async fn start(&mut self) -> Result<()>;

    /// Stop capturing changes
    ///
    /// Signals every background task to stop, lets in-flight events drain and
    /// waits for the tasks to finish.
    async fn stop(&mut self) -> Result<()>;

    /// Check if the source is healthy
    ///
    /// Returns true while the source is running and processing events.
    async fn is_healthy(&self) -> bool;
}

/// Configuration trait for CDC sources
pub trait CdcConfig: Send + Sync {
    /// Get the source type name (e.g., "cassandra")
    fn source_type(&self) -> &'static str;

    /// Validate the configuration
    fn validate(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassandra::CassandraCdcConfig;
    use crate::common::CdcError;

    fn cassandra_config() -> CassandraCdcConfig {
        CassandraCdcConfig::builder()
            .commit_log_dir("/var/lib/cassandra/cdc_raw")
            .commit_log_relocation_dir("/var/lib/rivven/relocation")
            .offset_backing_store_dir("/var/lib/rivven/offsets")
            .kafka_topic_prefix("prod")
            .build()
            .unwrap()
    }

    #[test]
    fn test_cassandra_config_as_cdc_config() {
        let config = cassandra_config();
        let dyn_config: &dyn CdcConfig = &config;

        assert_eq!(dyn_config.source_type(), "cassandra");
        assert!(dyn_config.validate().is_ok());
    }

    #[test]
    fn test_cassandra_config_validation_through_trait() {
        let mut config = cassandra_config();
        config.commit_log_relocation_dir = config.commit_log_dir.clone();
        let dyn_config: &dyn CdcConfig = &config;
        assert!(matches!(dyn_config.validate(), Err(CdcError::Config(_))));

        let mut config = cassandra_config();
        config.num_of_change_event_queues = 0;
        assert!(matches!(
            (&config as &dyn CdcConfig).validate(),
            Err(CdcError::Config(_))
        ));
    }
}
