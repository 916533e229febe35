use std::fmt;

use ordered_float::OrderedFloat;

/// Value of an indexed record field.
///
/// Keys are totally ordered so they can live in a `BTreeMap`. Keys of the
/// same kind compare by value; keys of different kinds compare by kind in
/// declaration order (`Bool < Int < Float < Str`). Floats use
/// [`OrderedFloat`] so `NaN` has a defined position instead of breaking the
/// ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    /// Boolean key.
    Bool(bool),
    /// Signed 64-bit integer key. Narrower integers widen into this.
    Int(i64),
    /// 64-bit float key.
    Float(OrderedFloat<f64>),
    /// UTF-8 string key.
    Str(String),
}

/// Discriminant of an [`IndexKey`], used to check that a lookup value has
/// the same type as the keys already held by an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// [`IndexKey::Bool`].
    Bool,
    /// [`IndexKey::Int`].
    Int,
    /// [`IndexKey::Float`].
    Float,
    /// [`IndexKey::Str`].
    Str,
}

impl IndexKey {
    /// Returns the kind of this key.
    #[must_use]
    pub fn kind(&self) -> IndexKind {
        match self {
            Self::Bool(_) => IndexKind::Bool,
            Self::Int(_) => IndexKind::Int,
            Self::Float(_) => IndexKind::Float,
            Self::Str(_) => IndexKind::Str,
        }
    }

    /// Convenience constructor for float keys.
    #[must_use]
    pub fn float(value: f64) -> Self {
        Self::Float(OrderedFloat(value))
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{}", v.0),
            Self::Str(v) => write!(f, "{v:?}"),
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "string",
        };
        f.write_str(name)
    }
}

impl From<bool> for IndexKey {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for IndexKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for IndexKey {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for IndexKey {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for IndexKey {
    fn from(value: f64) -> Self {
        Self::float(value)
    }
}

impl From<f32> for IndexKey {
    fn from(value: f32) -> Self {
        Self::float(f64::from(value))
    }
}

impl From<&str> for IndexKey {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Exact byte span of one serialized record inside a store's data file.
///
/// Positions are handed out in write order and never overlap: the next
/// record always starts at or after [`end()`](Position::end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    /// Byte offset of the first byte of the record.
    pub offset: u64,
    /// Length of the serialized record in bytes.
    pub length: u32,
}

impl Position {
    /// Size of one encoded index-file entry: 8-byte offset + 4-byte length.
    pub const ENCODED_LEN: usize = 12;

    /// Offset one past the last byte of the record.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.length)
    }

    /// Encodes the position as a little-endian index-file entry.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Decodes an index-file entry produced by [`to_bytes()`](Position::to_bytes).
    #[must_use]
    pub fn from_bytes(bytes: &[u8; Self::ENCODED_LEN]) -> Self {
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&bytes[..8]);
        let mut length = [0u8; 4];
        length.copy_from_slice(&bytes[8..]);
        Self {
            offset: u64::from_le_bytes(offset),
            length: u32::from_le_bytes(length),
        }
    }
}

/// Identifies one store engine: a record type within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    /// Simulation run the records belong to.
    pub session_id: String,
    /// `TYPE_NAME` of the record type.
    pub record_type: String,
}

impl StoreKey {
    /// Creates a key for the given session and record type.
    #[must_use]
    pub fn new(session_id: impl Into<String>, record_type: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            record_type: record_type.into(),
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.record_type, self.session_id)
    }
}
