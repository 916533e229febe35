//! Binary record encoding.
//!
//! Records are stored as named `MsgPack` maps via `rmp_serde`. The encoder is
//! stateless, so the writer and any number of readers share it freely.

use verdant_core::TelemetryRecord;

use crate::error::StoreResult;

/// Encodes a record to its on-disk bytes.
pub(crate) fn encode<T: TelemetryRecord>(record: &T) -> StoreResult<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(record)?)
}

/// Decodes bytes produced by [`encode`].
pub(crate) fn decode<T: TelemetryRecord>(bytes: &[u8]) -> StoreResult<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}
