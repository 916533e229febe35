//! Store engine implementations, one per mode.
//!
//! - [`IndexedStore`]: temp-file backed, indexed, the default
//! - [`StreamingStore`]: compressed export file plus a bounded recent cache
//! - [`NullStore`]: disabled type, every call a no-op

pub mod indexed;
pub mod null;
pub mod streaming;

pub use indexed::IndexedStore;
pub use null::NullStore;
pub use streaming::StreamingStore;

use verdant_core::{FieldSpec, TelemetryRecord};

use crate::error::{StoreError, StoreResult};

/// Name of the single primary index declared by `fields`.
///
/// # Errors
///
/// [`StoreError::Schema`] when no field, or more than one, is primary.
pub(crate) fn primary_index<T: TelemetryRecord>(fields: &[FieldSpec<T>]) -> StoreResult<&'static str> {
    let mut primaries = fields.iter().filter(|f| f.is_primary());
    let Some(primary) = primaries.next() else {
        return Err(StoreError::Schema {
            record_type: T::TYPE_NAME.to_string(),
            message: "no primary index field declared".to_string(),
        });
    };
    if let Some(extra) = primaries.next() {
        return Err(StoreError::Schema {
            record_type: T::TYPE_NAME.to_string(),
            message: format!(
                "more than one primary index field ({} and {})",
                primary.field, extra.field
            ),
        });
    }
    Ok(primary.index_name())
}

/// Index names other than the primary, duplicates included.
pub(crate) fn secondary_indexes<T>(fields: &[FieldSpec<T>]) -> impl Iterator<Item = &'static str> + '_ {
    fields
        .iter()
        .filter(|f| !f.is_primary())
        .map(FieldSpec::index_name)
}
