//! Table identity, commit log positions and segment files.
//!
//! ## Commit log file naming
//!
//! Cassandra names segments `CommitLog-<version>-<segment id>.log`. Segment ids
//! are allocated in increasing order, so `(segment_id, position)` orders every
//! mutation across segments as well as within one.
//!
//! Cassandra 4 additionally writes a `CommitLog-<version>-<id>_cdc.idx` file
//! next to each segment in `cdc_raw`; it travels with the segment on
//! retirement.

use crate::common::{CdcError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const COMMIT_LOG_PREFIX: &str = "CommitLog-";
const COMMIT_LOG_SUFFIX: &str = ".log";
const CDC_INDEX_SUFFIX: &str = "_cdc.idx";

/// `(keyspace, table)` pair used as the schema lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyspaceTable {
    pub keyspace: String,
    pub table: String,
}

impl KeyspaceTable {
    pub fn new(keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
        }
    }

    /// `keyspace.table`
    pub fn name(&self) -> String {
        format!("{}.{}", self.keyspace, self.table)
    }
}

impl fmt::Display for KeyspaceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.keyspace, self.table)
    }
}

impl FromStr for KeyspaceTable {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((keyspace, table)) if !keyspace.is_empty() && !table.is_empty() => {
                Ok(Self::new(keyspace, table))
            }
            _ => Err(CdcError::config(format!(
                "Invalid table name '{}', expected keyspace.table",
                s
            ))),
        }
    }
}

/// Position of a mutation in the commit log.
///
/// Ordered by segment id first, then by byte offset within the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitLogPosition {
    pub segment_id: u64,
    pub position: u64,
}

impl CommitLogPosition {
    /// Sentinel for "nothing consumed yet"; orders before every real position.
    pub const START: CommitLogPosition = CommitLogPosition {
        segment_id: 0,
        position: 0,
    };

    pub fn new(segment_id: u64, position: u64) -> Self {
        Self {
            segment_id,
            position,
        }
    }

    pub fn is_start(&self) -> bool {
        *self == Self::START
    }
}

impl fmt::Display for CommitLogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment_id, self.position)
    }
}

/// A commit log segment file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitLogSegment {
    path: PathBuf,
    file_name: String,
    version: u32,
    segment_id: u64,
}

impl CommitLogSegment {
    /// Build a segment from a path, parsing the id from its file name.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                CdcError::replication(format!("Invalid commit log path: {}", path.display()))
            })?;
        let (version, segment_id) = parse_segment_name(file_name).ok_or_else(|| {
            CdcError::replication(format!("Not a commit log segment: {}", file_name))
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            file_name: file_name.to_string(),
            version,
            segment_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn segment_id(&self) -> u64 {
        self.segment_id
    }

    /// Position of a byte offset inside this segment.
    pub fn position(&self, offset: u64) -> CommitLogPosition {
        CommitLogPosition::new(self.segment_id, offset)
    }

    /// File name of the Cassandra 4 CDC index that accompanies the segment.
    pub fn index_file_name(&self) -> String {
        let stem = self
            .file_name
            .strip_suffix(COMMIT_LOG_SUFFIX)
            .unwrap_or(&self.file_name);
        format!("{}{}", stem, CDC_INDEX_SUFFIX)
    }
}

impl fmt::Display for CommitLogSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name)
    }
}

/// Parse `CommitLog-<version>-<id>.log` into `(version, id)`.
pub fn parse_segment_name(file_name: &str) -> Option<(u32, u64)> {
    let body = file_name
        .strip_prefix(COMMIT_LOG_PREFIX)?
        .strip_suffix(COMMIT_LOG_SUFFIX)?;
    let (version, id) = body.split_once('-')?;
    Some((version.parse().ok()?, id.parse().ok()?))
}

/// List commit log segments in `dir`, ordered by segment id.
///
/// Files that are not segments (CDC index files, temp files) are ignored.
pub async fn list_segments(dir: &Path) -> Result<Vec<CommitLogSegment>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut segments = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if let Ok(segment) = CommitLogSegment::from_path(entry.path()) {
            segments.push(segment);
        }
    }

    segments.sort_by_key(|s| s.segment_id);
    Ok(segments)
}
