//! `Verdant` Core — telemetry record model and the simulation's record types.

pub mod records;
pub mod schema;
pub mod types;

pub use records::{EnvironmentSnapshot, OrganismPerformance};
pub use schema::{FieldSpec, IndexRole, TelemetryRecord};
pub use types::{IndexKey, IndexKind, Position, StoreKey};
