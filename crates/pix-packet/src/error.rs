//! Error types for packet parsing and encoding

use thiserror::Error;

/// Errors that can occur while building, parsing or framing packets
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// A chip key could not be built because required fields were absent
    #[error("missing fields required to generate chip key: {}", missing.join(", "))]
    MissingChipKeyFields { missing: Vec<&'static str> },

    /// A chip key was present but malformed
    #[error("invalid chip key: {0}")]
    InvalidChipKey(String),

    /// Packet word with the wrong number of bytes for its generation
    #[error("packet word must be {expected} bytes, got {actual}")]
    WordLength { expected: usize, actual: usize },

    /// Unknown packet type code
    #[error("invalid packet type code: {0}")]
    InvalidPacketType(u8),

    /// Malformed board command line
    #[error("invalid board command: {0}")]
    InvalidCommand(String),

    /// Malformed stream message
    #[error("invalid stream message: {0}")]
    InvalidStreamMessage(String),

    /// Stream message framing version this crate cannot decode
    #[error("unsupported stream message version {major}.{minor}")]
    UnsupportedMessageVersion { major: u8, minor: u8 },
}
