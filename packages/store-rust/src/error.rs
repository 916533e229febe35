//! Error type for telemetry store operations.
//!
//! Construction-time problems (bad configuration, bad index tables, file
//! allocation) and per-call usage errors are surfaced to callers. Producer
//! calls (`store()`) never return errors; writer failures are logged instead.

use std::path::PathBuf;

/// Errors returned by the telemetry store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A configuration option has a malformed or out-of-range value.
    #[error("invalid configuration for {key}: {message}")]
    Config { key: String, message: String },
    /// A record type's index table is unusable (missing or duplicate primary).
    #[error("invalid index layout for record type {record_type}: {message}")]
    Schema {
        record_type: String,
        message: String,
    },
    /// Backing file creation, write, or read failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A page or limit argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The requested index was never declared for this record type.
    #[error("index not found: {index}")]
    IndexNotFound { index: String },
    /// The store has been closed and its backing files deleted.
    #[error("store closed: {store}")]
    Closed { store: String },
    /// A position points outside the data written so far.
    #[error("corrupt read at offset {offset} (length {length}, data file holds {file_len} bytes)")]
    CorruptRead {
        offset: u64,
        length: u32,
        file_len: u64,
    },
    /// A record could not be encoded.
    #[error("failed to encode record: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    /// Stored bytes could not be decoded back into a record.
    #[error("failed to decode record: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    /// Two different Rust types were registered under the same type name.
    #[error("record type {record_type} is already registered with a different Rust type")]
    TypeConflict { record_type: String },
    /// An export would overwrite the file a streaming store writes to.
    #[error("{} is the output file of streaming store {store}", path.display())]
    OutputInUse { path: PathBuf, store: String },
    /// A session group was retired by a sweep or shutdown.
    #[error("session {session_id} has been retired")]
    SessionRetired { session_id: String },
    /// A writer task could not be spawned because no tokio runtime is active.
    #[error("no tokio runtime available to run the writer for {store}")]
    NoRuntime { store: String },
}

impl StoreError {
    /// Wraps an I/O error with the path it occurred on.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a configuration error for `key`.
    pub(crate) fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Result alias for telemetry store operations.
pub type StoreResult<T> = Result<T, StoreError>;
