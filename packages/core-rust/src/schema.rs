//! Declared index layout of telemetry record types.
//!
//! Every record type lists its indexed fields once, as a table of
//! [`FieldSpec`]s, and the store derives its indexes from that table.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::IndexKey;

/// Role a field plays in a record type's index layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexRole {
    /// The single mandatory ordering field. Its index is named after the field.
    Primary,
    /// An additional searchable field, grouped under `index` (or
    /// [`IndexRole::DEFAULT_INDEX`] when unnamed).
    Secondary {
        /// Explicit index name. Several fields may share one.
        index: Option<&'static str>,
    },
}

impl IndexRole {
    /// Index name used by secondary fields that do not name one.
    pub const DEFAULT_INDEX: &'static str = "default";
}

/// One row of a record type's index table.
pub struct FieldSpec<T> {
    /// Field name, used for the primary index name and in log output.
    pub field: &'static str,
    /// Primary or secondary.
    pub role: IndexRole,
    /// Reads the key from a record. `None` means the field is null.
    pub extract: fn(&T) -> Option<IndexKey>,
}

impl<T> FieldSpec<T> {
    /// Declares the primary field.
    #[must_use]
    pub fn primary(field: &'static str, extract: fn(&T) -> Option<IndexKey>) -> Self {
        Self {
            field,
            role: IndexRole::Primary,
            extract,
        }
    }

    /// Declares a secondary field in the default index.
    #[must_use]
    pub fn secondary(field: &'static str, extract: fn(&T) -> Option<IndexKey>) -> Self {
        Self {
            field,
            role: IndexRole::Secondary { index: None },
            extract,
        }
    }

    /// Declares a secondary field in a named index.
    #[must_use]
    pub fn secondary_named(
        field: &'static str,
        index: &'static str,
        extract: fn(&T) -> Option<IndexKey>,
    ) -> Self {
        Self {
            field,
            role: IndexRole::Secondary { index: Some(index) },
            extract,
        }
    }

    /// Name of the index this field feeds.
    #[must_use]
    pub fn index_name(&self) -> &'static str {
        match self.role {
            IndexRole::Primary => self.field,
            IndexRole::Secondary { index } => index.unwrap_or(IndexRole::DEFAULT_INDEX),
        }
    }

    /// Whether this is the primary field.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.role == IndexRole::Primary
    }

    /// Extracts this field's key from `record`.
    pub fn key_of(&self, record: &T) -> Option<IndexKey> {
        (self.extract)(record)
    }
}

// Manual impls: a derive would demand `T: Clone`, but only the fn pointer is stored.
impl<T> Clone for FieldSpec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FieldSpec<T> {}

impl<T> std::fmt::Debug for FieldSpec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldSpec")
            .field("field", &self.field)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// A record type the telemetry store can persist.
///
/// Implementors are plain serde types plus a name and an index table.
/// Exactly one entry of [`index_fields()`](TelemetryRecord::index_fields)
/// must be [`IndexRole::Primary`]; the store rejects the type otherwise.
pub trait TelemetryRecord: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type name. Used in configuration keys, store keys, and export
    /// file names.
    const TYPE_NAME: &'static str;

    /// The index table for this type.
    fn index_fields() -> Vec<FieldSpec<Self>>;
}
