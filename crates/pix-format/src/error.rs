//! Error types for the record format and containers

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while encoding, decoding or storing records
#[derive(Debug, Error)]
pub enum FormatError {
    /// Requested version is not acceptable for the stored version
    #[error("incompatible versions: existing {stored}, specified {requested}")]
    VersionMismatch { stored: String, requested: String },

    /// Version string not in the registry, or not `major.minor`
    #[error("unknown format version: {0}")]
    UnknownVersion(String),

    /// Packet kind has no representation in the target version
    #[error("{packet} packets cannot be stored in format version {version}")]
    InvalidPacketForVersion {
        version: String,
        packet: &'static str,
    },

    /// Message record references a row past the message dataset
    #[error("message index {index} out of range ({count} messages stored)")]
    MessageIndexOutOfRange { index: u64, count: u64 },

    /// Byte string longer than its fixed-width column
    #[error("field {field} is {len} bytes but its column holds {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// Byte string ending in NUL, which column padding cannot preserve
    #[error("field {field} ends in a NUL byte")]
    TrailingNul { field: &'static str },

    /// Integer wider than its column
    #[error("field {field} value {value} exceeds column maximum {max}")]
    ValueOutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },

    /// Version that can be read but never written
    #[error("format version {0} is read-only")]
    ReadOnlyVersion(String),

    /// Container was opened for reading only
    #[error("container {} was opened read-only", .0.display())]
    NotWritable(PathBuf),

    /// Path exists but holds no container header
    #[error("not a packet container: {}", .0.display())]
    NotAContainer(PathBuf),

    /// Container files disagree with the header
    #[error("corrupt container: {0}")]
    CorruptContainer(String),

    /// Stored packet type code outside the known set
    #[error("invalid packet type code {0} in record")]
    InvalidPacketType(u64),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header (de)serialization error
    #[error("header error: {0}")]
    Header(#[from] serde_json::Error),
}

/// Result type for format operations
pub type Result<T> = std::result::Result<T, FormatError>;
