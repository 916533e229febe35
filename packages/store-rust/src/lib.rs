//! Verdant telemetry store: per-session, per-record-type engines that accept
//! fire-and-forget writes from the simulation and serve indexed reads, with
//! TTL-driven cleanup and compressed export.

pub mod config;
pub mod error;
pub mod export;
pub mod storage;

pub use config::{ExportConfig, MetadataConfig, TypeConfig};
pub use error::{StoreError, StoreResult};
pub use export::{export_file_name, read_export, BulkExporter, ExportSummary};
pub use storage::{
    EngineState, ManagedStore, RecordStore, StoreFactory, StoreGroup, StoreHandle, StoreRegistry,
};
