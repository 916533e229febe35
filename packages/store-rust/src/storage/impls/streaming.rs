//! Streaming store: every record goes straight to a compressed export file.
//!
//! Selected per type with `metadata.<Type>.export.enabled`. Nothing is
//! indexed on disk; reads are answered from a bounded cache of the most
//! recent records, so `page()` and `find()` only see that window. The export
//! file is finalized on cleanup and kept.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::RwLock;
use tracing::{debug, error, info};
use verdant_core::{FieldSpec, IndexKey, Position, StoreKey, TelemetryRecord};

use super::{primary_index, secondary_indexes};
use crate::config::ExportConfig;
use crate::error::{StoreError, StoreResult};
use crate::export::export_file_name;
use crate::storage::codec;
use crate::storage::index::IndexSet;
use crate::storage::record_store::{CleanupHook, EngineState, ManagedStore, RecordStore};
use crate::storage::writer::{Pipeline, RecordSink};

type Output = GzEncoder<BufWriter<File>>;

/// A recent record kept for reads.
struct CachedRecord {
    bytes: Vec<u8>,
    keys: Vec<(&'static str, IndexKey)>,
}

struct StreamState {
    /// `None` once the file has been finalized.
    output: Option<Output>,
    cache: VecDeque<CachedRecord>,
}

struct StreamingInner<T> {
    key: StoreKey,
    fields: Vec<FieldSpec<T>>,
    primary: &'static str,
    path: PathBuf,
    cache_size: usize,
    state: RwLock<StreamState>,
    count: AtomicU64,
}

impl<T: TelemetryRecord> StreamingInner<T> {
    /// Indexes the cache snapshot; positions are cache slots.
    fn snapshot(&self, cache: &VecDeque<CachedRecord>) -> IndexSet {
        let mut indexes = IndexSet::new(self.primary, secondary_indexes(&self.fields));
        for (slot, entry) in cache.iter().enumerate() {
            let position = Position {
                offset: slot as u64,
                length: u32::try_from(entry.bytes.len()).unwrap_or(u32::MAX),
            };
            for (index, key) in &entry.keys {
                indexes.insert(index, key.clone(), position);
            }
        }
        indexes
    }

    fn read_with(
        &self,
        select: impl FnOnce(&IndexSet) -> StoreResult<Vec<Position>>,
    ) -> StoreResult<Vec<T>> {
        let state = self.state.read();
        if state.output.is_none() {
            return Err(StoreError::Closed {
                store: self.key.to_string(),
            });
        }
        select(&self.snapshot(&state.cache))?
            .into_iter()
            .filter_map(|position| usize::try_from(position.offset).ok())
            .filter_map(|slot| state.cache.get(slot))
            .map(|entry| codec::decode(&entry.bytes))
            .collect()
    }
}

impl<T: TelemetryRecord> RecordSink<T> for StreamingInner<T> {
    fn write(&self, record: T) {
        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(e) => {
                error!(store = %self.key, error = %e, "failed to serialize record; dropped");
                return;
            }
        };
        line.push(b'\n');
        let bytes = match codec::encode(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(store = %self.key, error = %e, "failed to encode record; dropped");
                return;
            }
        };
        let keys = self
            .fields
            .iter()
            .filter_map(|spec| spec.key_of(&record).map(|key| (spec.index_name(), key)))
            .collect();

        let mut state = self.state.write();
        let Some(output) = state.output.as_mut() else {
            debug!(store = %self.key, "export finalized; record dropped");
            return;
        };
        if let Err(e) = output.write_all(&line) {
            error!(store = %self.key, path = %self.path.display(), error = %e, "failed to stream record");
            return;
        }
        self.count.fetch_add(1, Ordering::Release);

        state.cache.push_back(CachedRecord { bytes, keys });
        while state.cache.len() > self.cache_size {
            state.cache.pop_front();
        }
    }

    fn cleanup(&self) {
        let mut state = self.state.write();
        state.cache.clear();
        let Some(output) = state.output.take() else {
            return;
        };
        let finished = output
            .finish()
            .and_then(|buffered| buffered.into_inner().map_err(std::io::IntoInnerError::into_error))
            .and_then(|file| file.sync_all());
        match finished {
            Ok(()) => info!(
                store = %self.key,
                path = %self.path.display(),
                records = self.count.load(Ordering::Acquire),
                "export finalized"
            ),
            Err(e) => error!(store = %self.key, path = %self.path.display(), error = %e, "failed to finalize export"),
        }
    }
}

/// Store engine that streams records to a gzip JSON-lines export file.
pub struct StreamingStore<T: TelemetryRecord> {
    pipeline: Pipeline<T>,
    inner: Arc<StreamingInner<T>>,
}

impl<T: TelemetryRecord> StreamingStore<T> {
    /// Creates the export file (truncating an earlier one) under `export.path`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Schema`] for an invalid index table; [`StoreError::Io`]
    /// if the export directory or file cannot be created.
    pub fn create(
        session_id: &str,
        ttl: Duration,
        poll_interval: Duration,
        export: &ExportConfig,
    ) -> StoreResult<Self> {
        let key = StoreKey::new(session_id, T::TYPE_NAME);
        let fields = T::index_fields();
        let primary = primary_index(&fields)?;

        fs::create_dir_all(&export.path).map_err(|e| StoreError::io(&export.path, e))?;
        let path = export.path.join(export_file_name(
            T::TYPE_NAME,
            session_id,
            export.postfix.as_deref(),
        ));
        let file = File::create(&path).map_err(|e| StoreError::io(&path, e))?;
        debug!(store = %key, path = %path.display(), "export file created");

        let inner = StreamingInner {
            key: key.clone(),
            fields,
            primary,
            path,
            cache_size: export.cache_size,
            state: RwLock::new(StreamState {
                output: Some(GzEncoder::new(BufWriter::new(file), Compression::default())),
                cache: VecDeque::with_capacity(export.cache_size),
            }),
            count: AtomicU64::new(0),
        };
        Ok(Self {
            pipeline: Pipeline::new(key, ttl, poll_interval),
            inner: Arc::new(inner),
        })
    }

    /// Path of the export file. Kept after the store closes.
    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.inner.path
    }
}

#[async_trait]
impl<T: TelemetryRecord> ManagedStore for StreamingStore<T> {
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

    fn output_path(&self) -> Option<&Path> {
        Some(&self.inner.path)
    }
}

impl<T: TelemetryRecord> RecordStore<T> for StreamingStore<T> {
    fn initialize(&self, on_cleanup: Option<CleanupHook>) -> StoreResult<()> {
        self.pipeline.start(Arc::clone(&self.inner), on_cleanup)
    }

    fn store(&self, record: T) {
        self.pipeline.submit(record);
    }

    fn primary_index(&self) -> &str {
        self.inner.primary
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
