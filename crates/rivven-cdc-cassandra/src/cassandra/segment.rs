//! Retirement of fully processed commit log segments.
//!
//! Once every event of a segment has been handled the segment leaves the
//! CDC directory for `<relocation dir>/archive`, or for
//! `<relocation dir>/error` when any of its mutations could not be read.
//! Each segment lands in exactly one of the two; asking to move it again is
//! a no-op.

use super::position::CommitLogSegment;
use crate::common::Result;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ARCHIVE_DIR: &str = "archive";
pub const ERROR_DIR: &str = "error";

/// File names of segments that failed processing, shared by the reader and
/// every queue processor.
#[derive(Debug, Clone, Default)]
pub struct ErroneousSegments {
    names: Arc<RwLock<HashSet<String>>>,
}

impl ErroneousSegments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the name was not already recorded.
    pub fn mark(&self, file_name: impl Into<String>) -> bool {
        self.names.write().insert(file_name.into())
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.names.read().contains(file_name)
    }

    /// Forget a segment after it has been retired.
    pub fn clear(&self, file_name: &str) -> bool {
        self.names.write().remove(file_name)
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }
}

/// Where a segment went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetirementDestination {
    Archive,
    Error,
}

impl RetirementDestination {
    pub fn dir_name(&self) -> &'static str {
        match self {
            RetirementDestination::Archive => ARCHIVE_DIR,
            RetirementDestination::Error => ERROR_DIR,
        }
    }
}

/// Result of a move request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocationOutcome {
    Moved(PathBuf),
    /// Already in one of the destination folders.
    AlreadyMoved(RetirementDestination),
    /// Neither at its source nor in a destination folder.
    Missing,
}

/// Moves segments into the archive and error folders.
#[derive(Debug, Clone)]
pub struct CommitLogRelocator {
    root: PathBuf,
}

impl CommitLogRelocator {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, destination: RetirementDestination) -> PathBuf {
        self.root.join(destination.dir_name())
    }

    /// Create the root, archive and error directories if missing.
    pub async fn initialize(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.dir(RetirementDestination::Archive),
            self.dir(RetirementDestination::Error),
        ] {
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                warn!("Cannot create relocation directory {}: {}", dir.display(), e);
                e
            })?;
        }
        debug!("Relocation directories ready under {}", self.root.display());
        Ok(())
    }

    /// Where the segment already lives, if it was retired before.
    pub async fn retired_to(&self, segment: &CommitLogSegment) -> Option<RetirementDestination> {
        for destination in [RetirementDestination::Archive, RetirementDestination::Error] {
            let path = self.dir(destination).join(segment.file_name());
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(destination);
            }
        }
        None
    }

    /// Move a segment, and its CDC index file if present, to `destination`.
    pub async fn move_segment(
        &self,
        segment: &CommitLogSegment,
        destination: RetirementDestination,
    ) -> Result<RelocationOutcome> {
        if let Some(existing) = self.retired_to(segment).await {
            if existing != destination {
                warn!(
                    "Segment {} already retired to {}, not moving to {}",
                    segment.file_name(),
                    existing.dir_name(),
                    destination.dir_name()
                );
            }
            return Ok(RelocationOutcome::AlreadyMoved(existing));
        }

        let target_dir = self.dir(destination);
        let target = target_dir.join(segment.file_name());
        match tokio::fs::rename(segment.path(), &target).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Segment {} vanished before retirement", segment.path().display());
                return Ok(RelocationOutcome::Missing);
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(parent) = segment.path().parent() {
            let index = parent.join(segment.index_file_name());
            match tokio::fs::rename(&index, target_dir.join(segment.index_file_name())).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to move CDC index {}: {}", index.display(), e),
            }
        }

        info!(
            "Moved commit log {} to {}",
            segment.file_name(),
            target_dir.display()
        );
        Ok(RelocationOutcome::Moved(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn segment_in(dir: &Path, name: &str) -> CommitLogSegment {
        let path = dir.join(name);
        tokio::fs::write(&path, b"segment").await.unwrap();
        CommitLogSegment::from_path(path).unwrap()
    }

    #[test]
    fn test_erroneous_segments() {
        let set = ErroneousSegments::new();
        let shared = set.clone();
        assert!(set.mark("CommitLog-7-1.log"));
        assert!(!shared.mark("CommitLog-7-1.log"));
        assert!(shared.contains("CommitLog-7-1.log"));
        assert_eq!(set.len(), 1);
        assert!(set.clear("CommitLog-7-1.log"));
        assert!(shared.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let relocator = CommitLogRelocator::new(dir.path().join("relocation"));
        relocator.initialize().await.unwrap();
        relocator.initialize().await.unwrap();

        assert!(dir.path().join("relocation/archive").is_dir());
        assert!(dir.path().join("relocation/error").is_dir());
    }

    #[tokio::test]
    async fn test_initialize_fails_on_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        tokio::fs::write(&blocker, b"x").await.unwrap();

        let relocator = CommitLogRelocator::new(&blocker);
        assert!(relocator.initialize().await.is_err());
    }

    #[tokio::test]
    async fn test_move_is_exclusive_and_idempotent() {
        let cdc = tempfile::tempdir().unwrap();
        let relocation = tempfile::tempdir().unwrap();
        let relocator = CommitLogRelocator::new(relocation.path());
        relocator.initialize().await.unwrap();

        let segment = segment_in(cdc.path(), "CommitLog-7-5.log").await;
        tokio::fs::write(cdc.path().join("CommitLog-7-5_cdc.idx"), b"5\nCOMPLETED")
            .await
            .unwrap();

        let outcome = relocator
            .move_segment(&segment, RetirementDestination::Archive)
            .await
            .unwrap();
        assert!(matches!(outcome, RelocationOutcome::Moved(_)));
        assert!(relocation.path().join("archive/CommitLog-7-5.log").exists());
        assert!(relocation.path().join("archive/CommitLog-7-5_cdc.idx").exists());
        assert!(!segment.path().exists());

        // Second attempt, even to the other folder, is a no-op
        let again = relocator
            .move_segment(&segment, RetirementDestination::Error)
            .await
            .unwrap();
        assert_eq!(
            again,
            RelocationOutcome::AlreadyMoved(RetirementDestination::Archive)
        );
        assert!(!relocation.path().join("error/CommitLog-7-5.log").exists());
    }

    #[tokio::test]
    async fn test_move_missing_segment() {
        let cdc = tempfile::tempdir().unwrap();
        let relocation = tempfile::tempdir().unwrap();
        let relocator = CommitLogRelocator::new(relocation.path());
        relocator.initialize().await.unwrap();

        let segment = CommitLogSegment::from_path(cdc.path().join("CommitLog-7-9.log")).unwrap();
        assert_eq!(
            relocator
                .move_segment(&segment, RetirementDestination::Error)
                .await
                .unwrap(),
            RelocationOutcome::Missing
        );
    }
}
