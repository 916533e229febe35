//! Telemetry storage engines and their lifecycle management.
//!
//! - **Engines** ([`RecordStore`]): one per `(session, record type)`,
//!   fire-and-forget writes through a background writer, indexed reads
//! - **Groups** ([`StoreGroup`]): the engines of one session, created lazily
//! - **Registry** ([`StoreRegistry`]): every session's group plus a coarse
//!   idle sweeper
//!
//! [`StoreFactory`] decides which engine mode a record type gets.

pub(crate) mod codec;
pub mod factory;
pub(crate) mod file_io;
pub mod group;
pub mod impls;
pub(crate) mod index;
pub(crate) mod lifecycle;
pub mod record_store;
pub mod registry;
pub(crate) mod writer;

pub use factory::{CreatedStore, StoreFactory};
pub use group::StoreGroup;
pub use impls::{IndexedStore, NullStore, StreamingStore};
pub use record_store::*;
pub use registry::{StoreRegistry, SweepReport};
