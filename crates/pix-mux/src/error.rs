//! Error types for the multiplexer

use thiserror::Error;

/// Errors that can occur in the multiplexer
#[derive(Debug, Error)]
pub enum MuxError {
    /// Listening state transition repeated
    #[error("already {0}")]
    EndpointState(&'static str),

    /// Address not among the configured endpoints
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Chip key names an io-group no endpoint serves
    #[error("no endpoint serves io-group {0}")]
    UnknownIoGroup(u8),

    /// Packet kind that cannot be sent to a board
    #[error("{0} packets cannot be sent")]
    Unsendable(&'static str),

    /// Board reply that could not be interpreted
    #[error("invalid reply from {address}: {reply:?}")]
    InvalidReply { address: String, reply: String },

    /// Peer closed the command connection
    #[error("connection to {0} closed")]
    ChannelClosed(String),

    /// Packet model error
    #[error("packet error: {0}")]
    Packet(#[from] pix_packet::PacketError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid multiplexer configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MuxError>;
