//! Factory that picks and builds the engine for a record type.
//!
//! [`StoreFactory`] is the single place where configuration turns into an
//! engine mode:
//!
//! - type disabled (or never configured): [`NullStore`]
//! - `export.enabled`: [`StreamingStore`]
//! - otherwise: [`IndexedStore`]

use std::sync::Arc;

use tracing::info;
use verdant_core::TelemetryRecord;

use crate::config::MetadataConfig;
use crate::error::StoreResult;
use crate::storage::impls::{IndexedStore, NullStore, StreamingStore};
use crate::storage::record_store::{ManagedStore, RecordStore, StoreHandle};

/// A freshly created engine, viewed both typed and type-erased.
pub struct CreatedStore<T> {
    /// Typed handle for producers and readers.
    pub typed: StoreHandle<T>,
    /// Lifecycle handle for groups and the registry.
    pub managed: Arc<dyn ManagedStore>,
}

impl<T: TelemetryRecord> CreatedStore<T> {
    fn from_engine<S: RecordStore<T> + 'static>(engine: S) -> Self {
        let engine = Arc::new(engine);
        Self {
            typed: Arc::clone(&engine) as StoreHandle<T>,
            managed: engine,
        }
    }
}

/// Creates store engines according to a shared [`MetadataConfig`].
#[derive(Debug, Clone)]
pub struct StoreFactory {
    config: Arc<MetadataConfig>,
}

impl StoreFactory {
    #[must_use]
    pub fn new(config: Arc<MetadataConfig>) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &MetadataConfig {
        &self.config
    }

    /// Creates an uninitialized engine for `T` in `session_id`.
    ///
    /// # Errors
    ///
    /// `Schema` if `T`'s index table is invalid, `Io` if backing or export
    /// files cannot be created. Disabled types never fail.
    pub fn create<T: TelemetryRecord>(&self, session_id: &str) -> StoreResult<CreatedStore<T>> {
        let type_config = self.config.type_config(T::TYPE_NAME);
        if !type_config.enabled {
            return Ok(CreatedStore::from_engine(NullStore::<T>::new(session_id)));
        }

        let ttl = self.config.ttl_for(T::TYPE_NAME);
        let poll = self.config.poll_interval;
        if type_config.export_enabled {
            let engine = StreamingStore::<T>::create(session_id, ttl, poll, &self.config.export)?;
            info!(
                record_type = T::TYPE_NAME,
                session_id,
                path = %engine.output_path().display(),
                "streaming store created"
            );
            Ok(CreatedStore::from_engine(engine))
        } else {
            let engine = IndexedStore::<T>::create(session_id, ttl, poll)?;
            info!(
                record_type = T::TYPE_NAME,
                session_id,
                ttl_secs = ttl.as_secs(),
                "indexed store created"
            );
            Ok(CreatedStore::from_engine(engine))
        }
    }
}
