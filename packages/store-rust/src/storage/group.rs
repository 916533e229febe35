//! Per-session store group.
//!
//! A [`StoreGroup`] caches exactly one engine per record type for its
//! session. Engines are created and started lazily on the first
//! [`get()`](StoreGroup::get) for their type, and evicted by
//! [`expire()`](StoreGroup::expire) once they report stopped.
//!
//! A group that the registry drops, or that is shut down, is retired: it
//! refuses new engines, so no engine can outlive the registry's view of it.

use std::any::Any;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;
use verdant_core::TelemetryRecord;

use crate::error::{StoreError, StoreResult};
use crate::storage::factory::{CreatedStore, StoreFactory};
use crate::storage::record_store::{EngineState, ManagedStore, RecordStore, StoreHandle};

struct GroupEntry {
    managed: Arc<dyn ManagedStore>,
    /// A `StoreHandle<T>` for the entry's record type.
    typed: Arc<dyn Any + Send + Sync>,
}

impl GroupEntry {
    fn new<T: TelemetryRecord>(created: CreatedStore<T>) -> Self {
        Self {
            managed: created.managed,
            typed: Arc::new(created.typed),
        }
    }

    fn handle<T: TelemetryRecord>(&self) -> StoreResult<StoreHandle<T>> {
        self.typed
            .downcast_ref::<StoreHandle<T>>()
            .cloned()
            .ok_or_else(|| StoreError::TypeConflict {
                record_type: T::TYPE_NAME.to_string(),
            })
    }

    fn is_closed(&self) -> bool {
        self.managed.state() == EngineState::Closed
    }
}

/// The store engines of one session, one per record type.
pub struct StoreGroup {
    session_id: String,
    factory: StoreFactory,
    stores: DashMap<&'static str, GroupEntry>,
    /// Held shared while `get()` may insert, exclusively to retire.
    retired: RwLock<bool>,
}

impl StoreGroup {
    #[must_use]
    pub fn new(session_id: impl Into<String>, factory: StoreFactory) -> Self {
        Self {
            session_id: session_id.into(),
            factory,
            stores: DashMap::new(),
            retired: RwLock::new(false),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Returns the engine for `T`, creating and starting it on first use.
    ///
    /// Every call for the same type returns the same engine until it closes;
    /// a closed engine is replaced by a fresh one.
    ///
    /// # Errors
    ///
    /// `SessionRetired` once the group is retired; `TypeConflict` if another
    /// Rust type already claimed `T::TYPE_NAME` in this group; any error from
    /// creating or initializing the engine.
    pub fn get<T: TelemetryRecord>(&self) -> StoreResult<StoreHandle<T>> {
        let retired = self.retired.read();
        if *retired {
            return Err(StoreError::SessionRetired {
                session_id: self.session_id.clone(),
            });
        }
        if let Some(entry) = self.stores.get(T::TYPE_NAME) {
            if !entry.is_closed() {
                return entry.handle::<T>();
            }
        }

        match self.stores.entry(T::TYPE_NAME) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_closed() {
                    debug!(
                        session_id = %self.session_id,
                        record_type = T::TYPE_NAME,
                        "replacing closed store"
                    );
                    occupied.insert(self.start::<T>()?);
                }
                occupied.get().handle::<T>()
            }
            Entry::Vacant(vacant) => vacant.insert(self.start::<T>()?).handle::<T>(),
        }
    }

    fn start<T: TelemetryRecord>(&self) -> StoreResult<GroupEntry> {
        let created = self.factory.create::<T>(&self.session_id)?;
        created.typed.initialize(None)?;
        Ok(GroupEntry::new(created))
    }

    /// Number of cached engines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    #[must_use]
    pub fn is_retired(&self) -> bool {
        *self.retired.read()
    }

    /// Retires the group if it holds no engines. Returns whether it is retired.
    pub(crate) fn retire_if_empty(&self) -> bool {
        let mut retired = self.retired.write();
        if !*retired && self.stores.is_empty() {
            *retired = true;
            debug!(session_id = %self.session_id, "store group retired");
        }
        *retired
    }

    fn snapshot(&self) -> Vec<(&'static str, Arc<dyn ManagedStore>)> {
        self.stores
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(&entry.value().managed)))
            .collect()
    }

    /// Runs a non-forced expire on every engine and evicts those that report
    /// stopped. Returns the number evicted.
    pub async fn expire(&self) -> usize {
        let mut evicted = 0;
        for (record_type, store) in self.snapshot() {
            if !store.expire(false).await {
                continue;
            }
            // Only evict the engine we checked; a fresh one may have replaced it.
            let removed = self
                .stores
                .remove_if(record_type, |_, entry| Arc::ptr_eq(&entry.managed, &store));
            if removed.is_some() {
                debug!(session_id = %self.session_id, record_type, "evicted stopped store");
                evicted += 1;
            }
        }
        evicted
    }

    /// Retires the group, then force-expires and drops every engine,
    /// waiting for each cleanup.
    pub async fn shutdown(&self) {
        *self.retired.write() = true;
        for (record_type, store) in self.snapshot() {
            store.expire(true).await;
            self.stores
                .remove_if(record_type, |_, entry| Arc::ptr_eq(&entry.managed, &store));
        }
        debug!(session_id = %self.session_id, "store group shut down");
    }
}

impl std::fmt::Debug for StoreGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreGroup")
            .field("session_id", &self.session_id)
            .field("stores", &self.stores.len())
            .finish_non_exhaustive()
    }
}
