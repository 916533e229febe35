//! No-op store for record types disabled by configuration.
//!
//! [`NullStore`] never allocates files, never spawns a writer, discards every
//! record and answers every read with an empty result. Producers keep calling
//! `store()` unconditionally; disabling a type costs nothing at the call site.

use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::debug;
use verdant_core::{IndexKey, StoreKey, TelemetryRecord};

use crate::error::StoreResult;
use crate::storage::record_store::{CleanupHook, EngineState, ManagedStore, RecordStore};

/// Store engine for a disabled record type.
pub struct NullStore<T> {
    key: StoreKey,
    primary: &'static str,
    _record: PhantomData<fn() -> T>,
}

impl<T: TelemetryRecord> NullStore<T> {
    /// Creates a disabled store for `T` in `session_id`.
    #[must_use]
    pub fn new(session_id: &str) -> Self {
        let primary = T::index_fields()
            .iter()
            .find(|spec| spec.is_primary())
            .map_or("", |spec| spec.index_name());
        Self {
            key: StoreKey::new(session_id, T::TYPE_NAME),
            primary,
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<T: TelemetryRecord> ManagedStore for NullStore<T> {
    fn key(&self) -> &StoreKey {
        &self.key
    }

    fn state(&self) -> EngineState {
        EngineState::Disabled
    }

    fn count(&self) -> u64 {
        0
    }

    async fn expire(&self, _force: bool) -> bool {
        true
    }
}

impl<T: TelemetryRecord> RecordStore<T> for NullStore<T> {
    fn initialize(&self, _on_cleanup: Option<CleanupHook>) -> StoreResult<()> {
        debug!(store = %self.key, "record type disabled; store is a no-op");
        Ok(())
    }

    fn store(&self, _record: T) {}

    fn primary_index(&self) -> &str {
        self.primary
    }

    fn page(&self, _index: Option<&str>, _page_number: u32, _page_size: u32) -> StoreResult<Vec<T>> {
        Ok(Vec::new())
    }

    fn find(&self, _index: &str, _value: &IndexKey, _limit: usize) -> StoreResult<Vec<T>> {
        Ok(Vec::new())
    }

    fn find_any(&self, _value: &IndexKey, _limit: usize) -> StoreResult<Vec<T>> {
        Ok(Vec::new())
    }
}
