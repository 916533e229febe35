//! Store engine traits.
//!
//! [`RecordStore`] is the typed API domain code uses: fire-and-forget
//! [`store()`](RecordStore::store) on the producer side, [`page()`](RecordStore::page)
//! and [`find()`](RecordStore::find) on the consumer side. [`ManagedStore`]
//! is the type-erased lifecycle view that store groups and the registry use
//! to expire engines of any record type.
//!
//! Both are implemented by every engine mode (indexed, streaming, disabled).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use verdant_core::{IndexKey, StoreKey, TelemetryRecord};

use crate::error::StoreResult;

/// Callback run once when a store finishes cleanup.
pub type CleanupHook = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle state of a store engine.
///
/// Normal engines move `Uninitialized -> Running -> Expiring -> Closed`.
/// An engine disabled by configuration is `Disabled` for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created; writer not started yet.
    Uninitialized,
    /// Writer running and accepting records.
    Running,
    /// Stop requested; writer finishing up.
    Expiring,
    /// Cleanup done, backing files gone. Terminal.
    Closed,
    /// Disabled by configuration; every operation is a no-op.
    Disabled,
}

/// Type-erased lifecycle operations shared by every store engine.
#[async_trait]
pub trait ManagedStore: Send + Sync {
    /// The `(session, record type)` pair this engine serves.
    fn key(&self) -> &StoreKey;

    /// Current lifecycle state.
    fn state(&self) -> EngineState;

    /// Number of records fully written. Queued records are not counted.
    fn count(&self) -> u64;

    /// Expires the engine, returning `true` iff it was already not running.
    ///
    /// With `force == false` this applies the TTL check, flips the stop flag
    /// if the engine is idle past its TTL, and returns without waiting.
    /// With `force == true` it stops the writer and waits until the writer
    /// has exited and cleanup (file deletion, index clearing, cleanup hook)
    /// has completed.
    async fn expire(&self, force: bool) -> bool;

    /// File this engine streams its records into, if it writes one that
    /// outlives it.
    fn output_path(&self) -> Option<&Path> {
        None
    }
}

/// Typed store engine for one record type within one session.
///
/// Used as `Arc<dyn RecordStore<T>>` (see [`StoreHandle`]).
pub trait RecordStore<T: TelemetryRecord>: ManagedStore {
    /// Starts the background writer. Repeated calls, or calls after close,
    /// log a warning and do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoRuntime`](crate::StoreError::NoRuntime) when
    /// called outside a tokio runtime.
    fn initialize(&self, on_cleanup: Option<CleanupHook>) -> StoreResult<()>;

    /// Queues a record for writing. Never blocks and never fails; a no-op
    /// once the engine stops or when it is disabled.
    fn store(&self, record: T);

    /// Name of the primary index, used by [`page()`](RecordStore::page) when
    /// no index is named.
    fn primary_index(&self) -> &str;

    /// Returns page `page_number` of `page_size` records, walking the keys of
    /// `index` (primary if `None`) in descending order.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero page size, `IndexNotFound` for an
    /// undeclared index, `Closed` once the engine has been cleaned up.
    fn page(&self, index: Option<&str>, page_number: u32, page_size: u32) -> StoreResult<Vec<T>>;

    /// Returns up to `limit` records whose `index` key equals `value`, in
    /// write order. A value of a different type than the index keys yields
    /// an empty result.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero limit, `IndexNotFound` for an undeclared
    /// index, `Closed` once the engine has been cleaned up.
    fn find(&self, index: &str, value: &IndexKey, limit: usize) -> StoreResult<Vec<T>>;

    /// Returns up to `limit` records matching `value` in any index.
    ///
    /// Costs one lookup per declared index; prefer [`find()`](RecordStore::find)
    /// when the index is known.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero limit, `Closed` once the engine has been
    /// cleaned up.
    fn find_any(&self, value: &IndexKey, limit: usize) -> StoreResult<Vec<T>>;
}

/// Shared handle to a typed store engine.
pub type StoreHandle<T> = Arc<dyn RecordStore<T>>;
