//! Per-table commit log offsets.
//!
//! The tracker keeps the last emitted [`CommitLogPosition`] of every table in
//! memory and persists snapshots through an [`OffsetStore`]. Positions only
//! move forward. Snapshots are written when the flush interval has elapsed
//! or enough advances have accumulated, and on shutdown. The time-based
//! check runs on every emit and on every queue processor poll, so an idle
//! pipeline still flushes once the interval passes.
//!
//! Rows of one Cassandra mutation share a commit log position. Restart
//! dedup therefore compares against the offsets loaded at startup only, and
//! strictly: the boundary position itself is read again (at-least-once).
//!
//! On disk, offsets live in `<offset_backing_store_dir>/offsets.json`:
//!
//! ```json
//! {
//!   "shop.orders": { "segment_id": 1646094405659, "position": 4096 }
//! }
//! ```

use super::position::{CommitLogPosition, KeyspaceTable};
use crate::common::{CdcError, Result, SharedMetrics};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const OFFSETS_FILE: &str = "offsets.json";

pub type OffsetMap = HashMap<KeyspaceTable, CommitLogPosition>;

/// Durable storage for offset snapshots.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Read the last saved snapshot; empty if nothing was saved yet.
    async fn load(&self) -> Result<OffsetMap>;

    /// Replace the saved snapshot.
    async fn save(&self, offsets: &OffsetMap) -> Result<()>;
}

fn to_persisted(offsets: &OffsetMap) -> BTreeMap<String, CommitLogPosition> {
    offsets.iter().map(|(t, p)| (t.name(), *p)).collect()
}

fn from_persisted(persisted: BTreeMap<String, CommitLogPosition>) -> Result<OffsetMap> {
    persisted
        .into_iter()
        .map(|(name, position)| Ok((name.parse::<KeyspaceTable>()?, position)))
        .collect()
}

/// JSON file store written with temp file, fsync and rename.
#[derive(Debug, Clone)]
pub struct FileOffsetStore {
    dir: PathBuf,
    fsync: bool,
}

impl FileOffsetStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            fsync: true,
        }
    }

    /// Skip fsync; for tests and throwaway pipelines.
    pub fn without_fsync(mut self) -> Self {
        self.fsync = false;
        self
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(OFFSETS_FILE)
    }
}

#[async_trait]
impl OffsetStore for FileOffsetStore {
    async fn load(&self) -> Result<OffsetMap> {
        let path = self.path();
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(OffsetMap::new()),
            Err(e) => return Err(e.into()),
        };

        let persisted: BTreeMap<String, CommitLogPosition> = serde_json::from_str(&contents)
            .map_err(|e| {
                CdcError::serialization(format!("Corrupt offsets file {}: {}", path.display(), e))
            })?;
        let offsets = from_persisted(persisted)?;
        debug!("Loaded {} table offsets from {}", offsets.len(), path.display());
        Ok(offsets)
    }

    async fn save(&self, offsets: &OffsetMap) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path();
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&to_persisted(offsets))?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        if self.fsync {
            file.sync_all().await?;
        }
        drop(file);

        tokio::fs::rename(&temp_path, &path).await?;

        if self.fsync {
            // Make the rename itself durable; not every platform supports it
            if let Ok(dir) = tokio::fs::File::open(&self.dir).await {
                let _ = dir.sync_all().await;
            }
        }
        Ok(())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    saved: Mutex<OffsetMap>,
    saves: Mutex<usize>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with offsets, as if saved by an earlier run.
    pub fn with_offsets(offsets: OffsetMap) -> Self {
        Self {
            saved: Mutex::new(offsets),
            saves: Mutex::new(0),
        }
    }

    pub fn saved(&self) -> OffsetMap {
        self.saved.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

#[async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn load(&self) -> Result<OffsetMap> {
        Ok(self.saved.lock().clone())
    }

    async fn save(&self, offsets: &OffsetMap) -> Result<()> {
        *self.saved.lock() = offsets.clone();
        *self.saves.lock() += 1;
        Ok(())
    }
}

/// When accumulated advances are written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetFlushPolicy {
    pub interval: Duration,
    /// Unflushed advances that force a flush; 1 flushes after every advance.
    pub max_size: usize,
}

impl Default for OffsetFlushPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_size: 100,
        }
    }
}

#[derive(Debug)]
struct TrackerState {
    offsets: OffsetMap,
    unflushed: usize,
    last_flush: Instant,
}

/// Monotonic per-table offsets with batched persistence.
pub struct OffsetTracker {
    store: Arc<dyn OffsetStore>,
    policy: OffsetFlushPolicy,
    state: Mutex<TrackerState>,
    /// Offsets this tracker was loaded with; never updated afterwards.
    resumed: OffsetMap,
    /// Serializes flushes so an older snapshot never lands after a newer one.
    flush_lock: tokio::sync::Mutex<()>,
    metrics: Option<SharedMetrics>,
}

impl OffsetTracker {
    /// Tracker with no recorded offsets.
    pub fn new(store: Arc<dyn OffsetStore>, policy: OffsetFlushPolicy) -> Self {
        Self::with_offsets(store, policy, OffsetMap::new())
    }

    /// Tracker resumed from the offsets saved in `store`.
    pub async fn load(store: Arc<dyn OffsetStore>, policy: OffsetFlushPolicy) -> Result<Self> {
        let offsets = store.load().await?;
        if !offsets.is_empty() {
            info!("Resuming from offsets of {} tables", offsets.len());
        }
        Ok(Self::with_offsets(store, policy, offsets))
    }

    fn with_offsets(
        store: Arc<dyn OffsetStore>,
        policy: OffsetFlushPolicy,
        offsets: OffsetMap,
    ) -> Self {
        Self {
            store,
            policy,
            resumed: offsets.clone(),
            state: Mutex::new(TrackerState {
                offsets,
                unflushed: 0,
                last_flush: Instant::now(),
            }),
            flush_lock: tokio::sync::Mutex::new(()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> OffsetFlushPolicy {
        self.policy
    }

    /// Record `position` for `table` if it is past the current one.
    pub fn advance(&self, table: &KeyspaceTable, position: CommitLogPosition) -> bool {
        let mut state = self.state.lock();
        let advanced = match state.offsets.get_mut(table) {
            Some(current) if position <= *current => false,
            Some(current) => {
                *current = position;
                true
            }
            None => {
                state.offsets.insert(table.clone(), position);
                true
            }
        };
        if advanced {
            state.unflushed += 1;
        }
        advanced
    }

    /// Last recorded position, or [`CommitLogPosition::START`].
    pub fn current_position(&self, table: &KeyspaceTable) -> CommitLogPosition {
        self.state
            .lock()
            .offsets
            .get(table)
            .copied()
            .unwrap_or(CommitLogPosition::START)
    }

    /// True when `position` lies strictly before the offset `table` was
    /// resumed from. Advances made during this run never count.
    pub fn is_processed(&self, table: &KeyspaceTable, position: CommitLogPosition) -> bool {
        self.resumed
            .get(table)
            .is_some_and(|resumed| position < *resumed)
    }

    /// Offset `table` was resumed from, or [`CommitLogPosition::START`].
    pub fn resumed_position(&self, table: &KeyspaceTable) -> CommitLogPosition {
        self.resumed
            .get(table)
            .copied()
            .unwrap_or(CommitLogPosition::START)
    }

    pub fn snapshot(&self) -> OffsetMap {
        self.state.lock().offsets.clone()
    }

    pub fn unflushed(&self) -> usize {
        self.state.lock().unflushed
    }

    fn should_flush(&self) -> bool {
        let state = self.state.lock();
        state.unflushed > 0
            && (state.unflushed >= self.policy.max_size
                || state.last_flush.elapsed() >= self.policy.interval)
    }

    /// Flush if the interval elapsed or enough advances piled up.
    pub async fn maybe_flush(&self) -> Result<bool> {
        if !self.should_flush() {
            return Ok(false);
        }
        self.flush().await?;
        Ok(true)
    }

    /// Persist the current offsets if any advanced since the last flush.
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().await;

        let (snapshot, pending) = {
            let mut state = self.state.lock();
            if state.unflushed == 0 {
                return Ok(());
            }
            let pending = state.unflushed;
            state.unflushed = 0;
            state.last_flush = Instant::now();
            (state.offsets.clone(), pending)
        };

        if let Err(e) = self.store.save(&snapshot).await {
            warn!("Failed to flush offsets: {}", e);
            self.state.lock().unflushed += pending;
            return Err(e);
        }

        debug!("Flushed offsets for {} tables", snapshot.len());
        if let Some(metrics) = &self.metrics {
            metrics.record_offset_flush();
        }
        Ok(())
    }
}

impl std::fmt::Debug for OffsetTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OffsetTracker")
            .field("tables", &state.offsets.len())
            .field("unflushed", &state.unflushed)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> KeyspaceTable {
        KeyspaceTable::new("shop", name)
    }

    fn tracker(max_size: usize) -> (OffsetTracker, Arc<MemoryOffsetStore>) {
        let store = Arc::new(MemoryOffsetStore::new());
        let tracker = OffsetTracker::new(
            store.clone(),
            OffsetFlushPolicy {
                interval: Duration::from_secs(3600),
                max_size,
            },
        );
        (tracker, store)
    }

    #[test]
    fn test_advance_is_monotonic() {
        let (tracker, _) = tracker(100);
        let orders = table("orders");

        assert_eq!(tracker.current_position(&orders), CommitLogPosition::START);
        assert!(tracker.advance(&orders, CommitLogPosition::new(5, 100)));
        assert!(!tracker.advance(&orders, CommitLogPosition::new(5, 50)));
        assert!(!tracker.advance(&orders, CommitLogPosition::new(5, 100)));
        assert!(!tracker.advance(&orders, CommitLogPosition::new(4, 999)));
        assert!(tracker.advance(&orders, CommitLogPosition::new(6, 0)));

        assert_eq!(tracker.current_position(&orders), CommitLogPosition::new(6, 0));
        assert_eq!(tracker.unflushed(), 2);
    }

    #[tokio::test]
    async fn test_is_processed_uses_resumed_offsets() {
        let orders = table("orders");
        let store = Arc::new(MemoryOffsetStore::with_offsets(OffsetMap::from([(
            orders.clone(),
            CommitLogPosition::new(1, 10),
        )])));
        let tracker = OffsetTracker::load(store, OffsetFlushPolicy::default())
            .await
            .unwrap();

        assert_eq!(tracker.resumed_position(&orders), CommitLogPosition::new(1, 10));
        assert!(tracker.is_processed(&orders, CommitLogPosition::new(1, 9)));
        assert!(tracker.is_processed(&orders, CommitLogPosition::new(0, 99)));
        // The boundary is read again
        assert!(!tracker.is_processed(&orders, CommitLogPosition::new(1, 10)));
        assert!(!tracker.is_processed(&orders, CommitLogPosition::new(1, 11)));
        assert!(!tracker.is_processed(&table("users"), CommitLogPosition::new(1, 1)));

        // Advances of this run do not hide later rows at the same position
        tracker.advance(&orders, CommitLogPosition::new(1, 20));
        assert!(!tracker.is_processed(&orders, CommitLogPosition::new(1, 20)));
        assert!(!tracker.is_processed(&orders, CommitLogPosition::new(1, 15)));
        assert_eq!(tracker.resumed_position(&orders), CommitLogPosition::new(1, 10));
    }

    #[tokio::test]
    async fn test_flush_by_size() {
        let (tracker, store) = tracker(2);
        let orders = table("orders");

        tracker.advance(&orders, CommitLogPosition::new(1, 1));
        assert!(!tracker.maybe_flush().await.unwrap());
        assert_eq!(store.save_count(), 0);

        tracker.advance(&orders, CommitLogPosition::new(1, 2));
        assert!(tracker.maybe_flush().await.unwrap());
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.saved()[&orders], CommitLogPosition::new(1, 2));
        assert_eq!(tracker.unflushed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_by_interval() {
        let store = Arc::new(MemoryOffsetStore::new());
        let tracker = OffsetTracker::new(
            store.clone(),
            OffsetFlushPolicy {
                interval: Duration::from_millis(500),
                max_size: 1000,
            },
        );
        let orders = table("orders");

        tracker.advance(&orders, CommitLogPosition::new(1, 1));
        assert!(!tracker.maybe_flush().await.unwrap());

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(tracker.maybe_flush().await.unwrap());
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_flush_without_changes_is_noop() {
        let (tracker, store) = tracker(1);
        tracker.flush().await.unwrap();
        assert!(!tracker.maybe_flush().await.unwrap());
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_file_store_round_trip_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let orders = table("orders");
        let users = table("users");

        {
            let store: Arc<dyn OffsetStore> = Arc::new(FileOffsetStore::new(dir.path()));
            let tracker = OffsetTracker::load(store, OffsetFlushPolicy::default())
                .await
                .unwrap();
            tracker.advance(&orders, CommitLogPosition::new(3, 40));
            tracker.advance(&users, CommitLogPosition::new(2, 7));
            tracker.flush().await.unwrap();
        }

        assert!(dir.path().join("offsets.json").exists());
        assert!(!dir.path().join("offsets.json.tmp").exists());

        let store: Arc<dyn OffsetStore> = Arc::new(FileOffsetStore::new(dir.path()));
        let tracker = OffsetTracker::load(store, OffsetFlushPolicy::default())
            .await
            .unwrap();
        assert_eq!(tracker.current_position(&orders), CommitLogPosition::new(3, 40));
        assert_eq!(tracker.current_position(&users), CommitLogPosition::new(2, 7));

        // No regression after restart
        assert!(!tracker.advance(&orders, CommitLogPosition::new(3, 39)));
    }

    #[tokio::test]
    async fn test_file_store_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOffsetStore::new(dir.path()).without_fsync();
        assert!(store.load().await.unwrap().is_empty());

        tokio::fs::write(store.path(), b"{not json").await.unwrap();
        assert!(matches!(
            store.load().await,
            Err(CdcError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_flushes_keep_latest() {
        let (tracker, store) = tracker(1);
        let tracker = Arc::new(tracker);
        let orders = table("orders");

        let mut handles = Vec::new();
        for i in 1..=20u64 {
            let tracker = tracker.clone();
            let orders = orders.clone();
            handles.push(tokio::spawn(async move {
                tracker.advance(&orders, CommitLogPosition::new(1, i));
                tracker.flush().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        tracker.flush().await.unwrap();

        assert_eq!(store.saved()[&orders], tracker.current_position(&orders));
    }
}
