//! Temp-file backed store with in-memory ordered indexes.
//!
//! [`IndexedStore`] is the default engine. Each record is encoded once and
//! appended to a private data file; its `(offset, length)` span is appended to
//! a sibling index file and inserted into every declared index. Reads resolve
//! positions through the indexes and decode the bytes back with positional
//! reads, so any number of readers share the files with the single writer.
//!
//! Locking: the writer holds the write half of one `RwLock` while it appends a
//! record and updates the indexes; readers hold the read half while they
//! resolve positions and read bytes. A reader never sees a position whose
//! bytes are not fully written.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};
use verdant_core::{FieldSpec, IndexKey, Position, StoreKey, TelemetryRecord};

use super::{primary_index, secondary_indexes};
use crate::error::{StoreError, StoreResult};
use crate::storage::codec;
use crate::storage::file_io::{read_exact_at, write_all_at};
use crate::storage::index::IndexSet;
use crate::storage::record_store::{CleanupHook, EngineState, ManagedStore, RecordStore};
use crate::storage::writer::{Pipeline, RecordSink};

/// Data and index files of one store. Deleted on drop or [`close()`](Self::close).
struct BackingFiles {
    data: NamedTempFile,
    index: NamedTempFile,
}

impl BackingFiles {
    fn create(record_type: &str) -> StoreResult<Self> {
        let prefix = format!("verdant-{record_type}-");
        let create = |suffix: &str| {
            tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(suffix)
                .tempfile()
                .map_err(|e| StoreError::io(std::env::temp_dir(), e))
        };
        Ok(Self {
            data: create(".data")?,
            index: create(".index")?,
        })
    }

    /// Writes `bytes` at `position` and records the span as index entry `entry`.
    fn append(&self, bytes: &[u8], position: Position, entry: u64) -> StoreResult<()> {
        write_all_at(self.data.as_file(), bytes, position.offset)
            .map_err(|e| StoreError::io(self.data.path(), e))?;
        let entry_offset = entry * Position::ENCODED_LEN as u64;
        write_all_at(self.index.as_file(), &position.to_bytes(), entry_offset)
            .map_err(|e| StoreError::io(self.index.path(), e))
    }

    fn read(&self, position: Position) -> StoreResult<Vec<u8>> {
        let mut buf = vec![0u8; position.length as usize];
        read_exact_at(self.data.as_file(), &mut buf, position.offset)
            .map_err(|e| StoreError::io(self.data.path(), e))?;
        Ok(buf)
    }

    fn read_entry(&self, entry: u64) -> StoreResult<Position> {
        let mut buf = [0u8; Position::ENCODED_LEN];
        read_exact_at(
            self.index.as_file(),
            &mut buf,
            entry * Position::ENCODED_LEN as u64,
        )
        .map_err(|e| StoreError::io(self.index.path(), e))?;
        Ok(Position::from_bytes(&buf))
    }

    fn close(self, key: &StoreKey) {
        for file in [self.data, self.index] {
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                warn!(store = %key, path = %path.display(), error = %e, "failed to delete backing file");
            }
        }
    }
}

/// State guarded by the store lock.
struct WriteState {
    /// `None` once cleanup has run.
    files: Option<BackingFiles>,
    /// Bytes of the data file covered by complete records.
    cursor: u64,
    /// Index-file entries written, one per record.
    entries: u64,
    indexes: IndexSet,
}

/// Shared half of the store: what the writer task needs.
struct IndexedInner<T> {
    key: StoreKey,
    fields: Vec<FieldSpec<T>>,
    state: RwLock<WriteState>,
    count: AtomicU64,
    data_path: PathBuf,
    index_path: PathBuf,
}

impl<T: TelemetryRecord> IndexedInner<T> {
    fn closed(&self) -> StoreError {
        StoreError::Closed {
            store: self.key.to_string(),
        }
    }

    /// Resolves positions through `select` and decodes the records they point at.
    fn read_with(
        &self,
        select: impl FnOnce(&IndexSet) -> StoreResult<Vec<Position>>,
    ) -> StoreResult<Vec<T>> {
        let state = self.state.read();
        let files = state.files.as_ref().ok_or_else(|| self.closed())?;
        select(&state.indexes)?
            .into_iter()
            .map(|position| decode_at(files, state.cursor, position))
            .collect()
    }

    fn replay_positions(&self, from: u64, limit: usize) -> StoreResult<Vec<Position>> {
        let state = self.state.read();
        let files = state.files.as_ref().ok_or_else(|| self.closed())?;
        let end = state.entries.min(from.saturating_add(limit as u64));
        (from..end).map(|entry| files.read_entry(entry)).collect()
    }
}

fn decode_at<T: TelemetryRecord>(files: &BackingFiles, cursor: u64, position: Position) -> StoreResult<T> {
    if position.end() > cursor {
        return Err(StoreError::CorruptRead {
            offset: position.offset,
            length: position.length,
            file_len: cursor,
        });
    }
    codec::decode(&files.read(position)?)
}

impl<T: TelemetryRecord> RecordSink<T> for IndexedInner<T> {
    fn write(&self, record: T) {
        let bytes = match codec::encode(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(store = %self.key, error = %e, "failed to encode record; dropped");
                return;
            }
        };
        let Ok(length) = u32::try_from(bytes.len()) else {
            error!(store = %self.key, bytes = bytes.len(), "record too large; dropped");
            return;
        };
        let keys: Vec<_> = self
            .fields
            .iter()
            .map(|spec| (spec.field, spec.index_name(), spec.key_of(&record)))
            .collect();

        let mut guard = self.state.write();
        let state = &mut *guard;
        let Some(files) = state.files.as_ref() else {
            debug!(store = %self.key, "store closed; record dropped");
            return;
        };
        let position = Position {
            offset: state.cursor,
            length,
        };
        // A failed append leaves the cursor alone, so the next record
        // overwrites whatever partial bytes made it to disk.
        if let Err(e) = files.append(&bytes, position, state.entries) {
            error!(store = %self.key, error = %e, "failed to append record; dropped");
            return;
        }
        state.cursor = position.end();
        state.entries += 1;
        self.count.fetch_add(1, Ordering::Release);

        for (field, index, key) in keys {
            match key {
                Some(key) => state.indexes.insert(index, key, position),
                None => warn!(store = %self.key, field, index, "indexed field is null; skipped"),
            }
        }
    }

    fn cleanup(&self) {
        let mut state = self.state.write();
        if let Some(files) = state.files.take() {
            files.close(&self.key);
        }
        state.indexes.clear();
        debug!(
            store = %self.key,
            records = self.count.load(Ordering::Acquire),
            "backing files removed"
        );
    }
}

/// Default store engine: temp files plus ordered in-memory indexes.
pub struct IndexedStore<T: TelemetryRecord> {
    pipeline: Pipeline<T>,
    inner: Arc<IndexedInner<T>>,
    primary: &'static str,
}

impl<T: TelemetryRecord> IndexedStore<T> {
    /// Creates the store and its backing files. The writer is not started
    /// until [`initialize()`](RecordStore::initialize).
    ///
    /// # Errors
    ///
    /// [`StoreError::Schema`] if `T` does not declare exactly one primary
    /// index; [`StoreError::Io`] if the temp files cannot be created.
    pub fn create(session_id: &str, ttl: Duration, poll_interval: Duration) -> StoreResult<Self> {
        let key = StoreKey::new(session_id, T::TYPE_NAME);
        let fields = T::index_fields();
        let primary = primary_index(&fields)?;
        let indexes = IndexSet::new(primary, secondary_indexes(&fields));
        let files = BackingFiles::create(T::TYPE_NAME)?;
        debug!(
            store = %key,
            data = %files.data.path().display(),
            index = %files.index.path().display(),
            "backing files created"
        );

        let inner = IndexedInner {
            data_path: files.data.path().to_path_buf(),
            index_path: files.index.path().to_path_buf(),
            key: key.clone(),
            fields,
            state: RwLock::new(WriteState {
                files: Some(files),
                cursor: 0,
                entries: 0,
                indexes,
            }),
            count: AtomicU64::new(0),
        };
        Ok(Self {
            pipeline: Pipeline::new(key, ttl, poll_interval),
            inner: Arc::new(inner),
            primary,
        })
    }

    /// Path of the data file. The file is gone once the store is closed.
    #[must_use]
    pub fn data_path(&self) -> &Path {
        &self.inner.data_path
    }

    /// Path of the index file. The file is gone once the store is closed.
    #[must_use]
    pub fn index_path(&self) -> &Path {
        &self.inner.index_path
    }

    /// Reads up to `limit` records in write order, starting at the `from`-th
    /// record, by walking the index file.
    ///
    /// # Errors
    ///
    /// `Closed` after cleanup; `Io`, `CorruptRead` or `Decode` if the backing
    /// files do not hold what the index file says.
    pub fn replay(&self, from: u64, limit: usize) -> StoreResult<Vec<T>> {
        self.pipeline.touch();
        let positions = self.inner.replay_positions(from, limit)?;
        self.inner.read_with(|_| Ok(positions))
    }
}

#[async_trait]
impl<T: TelemetryRecord> ManagedStore for IndexedStore<T> {
    fn key(&self) -> &StoreKey {
        self.pipeline.key()
    }

    fn state(&self) -> EngineState {
        self.pipeline.state()
    }

    fn count(&self) -> u64 {
        self.inner.count.load(Ordering::Acquire)
    }

    async fn expire(&self, force: bool) -> bool {
        self.pipeline.expire(self.inner.as_ref(), force).await
    }
}

impl<T: TelemetryRecord> RecordStore<T> for IndexedStore<T> {
    fn initialize(&self, on_cleanup: Option<CleanupHook>) -> StoreResult<()> {
        self.pipeline.start(Arc::clone(&self.inner), on_cleanup)
    }

    fn store(&self, record: T) {
        self.pipeline.submit(record);
    }

    fn primary_index(&self) -> &str {
        self.primary
    }

    fn page(&self, index: Option<&str>, page_number: u32, page_size: u32) -> StoreResult<Vec<T>> {
        self.pipeline.touch();
        self.inner
            .read_with(|indexes| indexes.page(index, page_number, page_size))
    }

    fn find(&self, index: &str, value: &IndexKey, limit: usize) -> StoreResult<Vec<T>> {
        self.pipeline.touch();
        self.inner
            .read_with(|indexes| indexes.find(index, value, limit))
    }

    fn find_any(&self, value: &IndexKey, limit: usize) -> StoreResult<Vec<T>> {
        self.pipeline.touch();
        self.inner.read_with(|indexes| indexes.find_any(value, limit))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use verdant_core::{EnvironmentSnapshot, OrganismPerformance};

    use super::*;
    use crate::storage::impls::test_records::{NoPrimary, TwoPrimaries};

    const POLL: Duration = Duration::from_millis(10);

    fn organism(id: i64, fitness: i64) -> OrganismPerformance {
        OrganismPerformance {
            organism_id: id,
            epoch: u32::try_from(id % 3).unwrap(),
            birth_tick: 10 * u64::try_from(id).unwrap(),
            death_tick: (id % 2 == 0).then(|| 10 * u64::try_from(id).unwrap() + 5),
            fitness,
            genome: format!("ACGT-{id}"),
            cell_count: 4,
            energy: 1.5,
        }
    }

    fn started<T: TelemetryRecord>(ttl: Duration) -> IndexedStore<T> {
        let store = IndexedStore::<T>::create("session-1", ttl, POLL).unwrap();
        store.initialize(None).unwrap();
        store
    }

    async fn wait_for_count<T: TelemetryRecord>(store: &IndexedStore<T>, n: u64) {
        for _ in 0..400 {
            if store.count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("store wrote {} of {n} records", store.count());
    }

    #[tokio::test]
    async fn stored_record_reads_back_by_primary_key() {
        let store = started::<OrganismPerformance>(Duration::from_secs(60));
        let record = organism(42, 7);
        store.store(record.clone());
        wait_for_count(&store, 1).await;

        let found = store
            .find("organismId", &IndexKey::from(42), 1)
            .unwrap();
        assert_eq!(found, vec![record]);
        assert_eq!(store.primary_index(), "organismId");
    }

    #[tokio::test]
    async fn page_orders_by_index_descending() {
        let store = started::<OrganismPerformance>(Duration::from_secs(60));
        for (id, fitness) in [(1, 30), (2, 10), (3, 50), (4, 20)] {
            store.store(organism(id, fitness));
        }
        wait_for_count(&store, 4).await;

        let by_fitness: Vec<i64> = store
            .page(Some("fitness"), 0, 10)
            .unwrap()
            .iter()
            .map(|r| r.fitness)
            .collect();
        assert_eq!(by_fitness, vec![50, 30, 20, 10]);

        let by_id: Vec<i64> = store
            .page(None, 0, 2)
            .unwrap()
            .iter()
            .map(|r| r.organism_id)
            .collect();
        assert_eq!(by_id, vec![4, 3]);
        assert_eq!(store.page(None, 1, 2).unwrap().len(), 2);
        assert!(store.page(None, 2, 2).unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_errors_surface() {
        let store = started::<OrganismPerformance>(Duration::from_secs(60));
        assert!(matches!(
            store.page(Some("height"), 0, 5),
            Err(StoreError::IndexNotFound { .. })
        ));
        assert!(matches!(
            store.page(None, 0, 0),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.find("fitness", &IndexKey::from(1), 0),
            Err(StoreError::InvalidArgument(_))
        ));
        // Empty store: no records, no error.
        assert!(store.page(None, 0, 5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_with_mismatched_type_is_empty() {
        let store = started::<OrganismPerformance>(Duration::from_secs(60));
        store.store(organism(1, 5));
        wait_for_count(&store, 1).await;
        assert!(store
            .find("fitness", &IndexKey::from("5"), 10)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn find_any_searches_every_index() {
        let store = started::<EnvironmentSnapshot>(Duration::from_secs(60));
        store.store(EnvironmentSnapshot {
            tick: 2,
            epoch: 7,
            population: 9,
            total_energy: 0.0,
            mean_fitness: 0.0,
        });
        store.store(EnvironmentSnapshot {
            tick: 7,
            epoch: 1,
            population: 7,
            total_energy: 0.0,
            mean_fitness: 0.0,
        });
        wait_for_count(&store, 2).await;

        let ticks: HashSet<u64> = store
            .find_any(&IndexKey::from(7), 10)
            .unwrap()
            .into_iter()
            .map(|s| s.tick)
            .collect();
        assert_eq!(ticks, HashSet::from([2, 7]));
    }

    #[tokio::test]
    async fn null_secondary_key_is_skipped_for_that_index_only() {
        let store = started::<OrganismPerformance>(Duration::from_secs(60));
        // Odd ids are still alive: no death tick.
        store.store(organism(1, 5));
        store.store(organism(2, 6));
        wait_for_count(&store, 2).await;

        assert_eq!(store.page(Some("deathTick"), 0, 10).unwrap().len(), 1);
        assert_eq!(store.page(Some("fitness"), 0, 10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn replay_walks_index_file_in_write_order() {
        let store = started::<OrganismPerformance>(Duration::from_secs(60));
        for id in [5, 3, 9, 1] {
            store.store(organism(id, 0));
        }
        wait_for_count(&store, 4).await;

        let ids: Vec<i64> = store
            .replay(0, 10)
            .unwrap()
            .iter()
            .map(|r| r.organism_id)
            .collect();
        assert_eq!(ids, vec![5, 3, 9, 1]);
        let tail: Vec<i64> = store
            .replay(2, 1)
            .unwrap()
            .iter()
            .map(|r| r.organism_id)
            .collect();
        assert_eq!(tail, vec![9]);
        assert!(store.replay(10, 5).unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_get_disjoint_positions() {
        const PRODUCERS: i64 = 8;
        const PER_PRODUCER: i64 = 50;

        let store = Arc::new(started::<OrganismPerformance>(Duration::from_secs(60)));
        let tasks: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    for i in 0..PER_PRODUCER {
                        store.store(organism(p * PER_PRODUCER + i, i));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        let total = u64::try_from(PRODUCERS * PER_PRODUCER).unwrap();
        wait_for_count(&store, total).await;

        let mut positions = store
            .inner
            .replay_positions(0, usize::try_from(total).unwrap())
            .unwrap();
        assert_eq!(positions.len() as u64, total);
        positions.sort_by_key(|p| p.offset);
        for pair in positions.windows(2) {
            assert!(pair[0].end() <= pair[1].offset, "{pair:?} overlap");
        }

        let ids: HashSet<i64> = store
            .page(None, 0, u32::try_from(total).unwrap())
            .unwrap()
            .iter()
            .map(|r| r.organism_id)
            .collect();
        assert_eq!(ids.len() as u64, total);
    }

    #[tokio::test]
    async fn forced_expire_deletes_files_and_closes() {
        let store = started::<OrganismPerformance>(Duration::from_secs(60));
        store.store(organism(1, 1));
        wait_for_count(&store, 1).await;
        let data = store.data_path().to_path_buf();
        let index = store.index_path().to_path_buf();
        assert!(data.exists());
        assert!(index.exists());

        assert!(!store.expire(true).await);
        assert_eq!(store.state(), EngineState::Closed);
        assert!(!data.exists());
        assert!(!index.exists());
        assert!(matches!(store.page(None, 0, 1), Err(StoreError::Closed { .. })));

        // Records after close are dropped without error.
        store.store(organism(2, 2));
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn idle_store_expires_on_its_own() {
        let store = started::<OrganismPerformance>(Duration::from_millis(40));
        store.store(organism(1, 1));
        wait_for_count(&store, 1).await;

        for _ in 0..100 {
            if store.state() == EngineState::Closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.state(), EngineState::Closed);
        assert!(!store.data_path().exists());
        assert!(store.expire(false).await);
    }

    #[tokio::test]
    async fn unexpired_store_keeps_running_on_sweep() {
        let store = started::<OrganismPerformance>(Duration::from_secs(60));
        assert!(!store.expire(false).await);
        assert_eq!(store.state(), EngineState::Running);
    }

    #[tokio::test]
    async fn expire_of_uninitialized_store_removes_files() {
        let store =
            IndexedStore::<OrganismPerformance>::create("s", Duration::from_secs(60), POLL).unwrap();
        let data = store.data_path().to_path_buf();
        assert!(store.expire(true).await);
        assert!(!data.exists());
    }

    #[test]
    fn invalid_index_tables_are_rejected() {
        let ttl = Duration::from_secs(1);
        assert!(matches!(
            IndexedStore::<NoPrimary>::create("s", ttl, POLL),
            Err(StoreError::Schema { .. })
        ));
        assert!(matches!(
            IndexedStore::<TwoPrimaries>::create("s", ttl, POLL),
            Err(StoreError::Schema { .. })
        ));
    }

    #[test]
    fn corrupt_position_is_detected() {
        let files = BackingFiles::create("Probe").unwrap();
        let err = decode_at::<EnvironmentSnapshot>(
            &files,
            4,
            Position {
                offset: 0,
                length: 8,
            },
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::CorruptRead { file_len: 4, .. }));
    }
}
