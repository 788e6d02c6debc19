//! Commit log directory scanning.
//!
//! [`CommitLogProcessor`] lists the segments in the CDC directory, oldest
//! first, and hands each one exactly once to the [`CommitLogReader`]. A
//! segment the reader fails on is still ended, so it is retired to the
//! error folder instead of blocking the directory.

use super::handler::MutationHandler;
use super::position::{list_segments, CommitLogSegment};
use super::record::RawMutation;
use crate::common::{CdcError, Result, SharedMetrics};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Decoder of commit log segment files.
#[async_trait]
pub trait CommitLogReader: Send + Sync {
    /// Feed every mutation of `segment` to `handler`, in file order.
    ///
    /// An error means the segment could not be read to the end.
    async fn read_segment(
        &self,
        segment: &CommitLogSegment,
        handler: &dyn MutationHandler,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
enum ScriptedSegment {
    Mutations(Vec<(RawMutation, bool)>),
    Unreadable { after: Vec<(RawMutation, bool)>, reason: String },
}

/// Reader replaying mutations registered per segment file name.
///
/// Segments with no script read as empty.
#[derive(Debug, Default)]
pub struct MemoryCommitLogReader {
    scripts: Mutex<HashMap<String, ScriptedSegment>>,
}

impl MemoryCommitLogReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutations returned for `file_name`; the flag marks deletions.
    pub fn script(&self, file_name: impl Into<String>, mutations: Vec<(RawMutation, bool)>) {
        self.scripts
            .lock()
            .insert(file_name.into(), ScriptedSegment::Mutations(mutations));
    }

    /// Replay `mutations`, then fail with `reason`.
    pub fn script_failure(
        &self,
        file_name: impl Into<String>,
        mutations: Vec<(RawMutation, bool)>,
        reason: impl Into<String>,
    ) {
        self.scripts.lock().insert(
            file_name.into(),
            ScriptedSegment::Unreadable {
                after: mutations,
                reason: reason.into(),
            },
        );
    }
}

#[async_trait]
impl CommitLogReader for MemoryCommitLogReader {
    async fn read_segment(
        &self,
        segment: &CommitLogSegment,
        handler: &dyn MutationHandler,
    ) -> Result<()> {
        let script = self.scripts.lock().get(segment.file_name()).cloned();
        let (mutations, failure) = match script {
            None => (Vec::new(), None),
            Some(ScriptedSegment::Mutations(mutations)) => (mutations, None),
            Some(ScriptedSegment::Unreadable { after, reason }) => (after, Some(reason)),
        };

        for (mutation, is_deletion) in mutations {
            handler.handle_mutation(segment, mutation, is_deletion).await?;
        }
        match failure {
            Some(reason) => Err(CdcError::replication(reason)),
            None => Ok(()),
        }
    }
}

/// Drives the reader over the commit log directory.
pub struct CommitLogProcessor {
    commit_log_dir: PathBuf,
    reader: Arc<dyn CommitLogReader>,
    handler: Arc<dyn MutationHandler>,
    poll_interval: Duration,
    dispatched: Mutex<BTreeSet<u64>>,
    metrics: SharedMetrics,
}

impl CommitLogProcessor {
    pub fn new(
        commit_log_dir: impl AsRef<Path>,
        reader: Arc<dyn CommitLogReader>,
        handler: Arc<dyn MutationHandler>,
        poll_interval: Duration,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            commit_log_dir: commit_log_dir.as_ref().to_path_buf(),
            reader,
            handler,
            poll_interval,
            dispatched: Mutex::new(BTreeSet::new()),
            metrics,
        }
    }

    pub fn commit_log_dir(&self) -> &Path {
        &self.commit_log_dir
    }

    /// Read one segment and end it, whatever the outcome.
    ///
    /// Only [`CdcError::Cancelled`] is returned; read failures are routed to
    /// [`MutationHandler::handle_unreadable_segment`].
    pub async fn process_segment(&self, segment: &CommitLogSegment) -> Result<()> {
        info!("Reading commit log {}", segment.file_name());
        self.metrics.record_segment_read();

        match self.reader.read_segment(segment, self.handler.as_ref()).await {
            Ok(()) => self.handler.handle_segment_end(segment).await,
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => self.handler.handle_unreadable_segment(segment, e).await,
        }
    }

    /// Process every segment not seen before. Returns how many were read.
    pub async fn process_available(&self) -> Result<usize> {
        let segments = list_segments(&self.commit_log_dir).await?;

        // Forget segments that have left the directory
        {
            let present: BTreeSet<u64> = segments.iter().map(|s| s.segment_id()).collect();
            self.dispatched.lock().retain(|id| present.contains(id));
        }

        let mut processed = 0;
        for segment in segments {
            if !self.dispatched.lock().insert(segment.segment_id()) {
                continue;
            }
            self.process_segment(&segment).await?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Scan the directory every poll interval until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Watching commit log directory {}",
            self.commit_log_dir.display()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.process_available().await {
                Ok(0) => {}
                Ok(n) => debug!("Processed {} commit log segments", n),
                Err(CdcError::Cancelled) => break,
                Err(e) => {
                    error!(
                        "Failed to scan {}: {}",
                        self.commit_log_dir.display(),
                        e
                    );
                    self.metrics.record_unrecoverable_error();
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Commit log processor stopped");
    }
}
