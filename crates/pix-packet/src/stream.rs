//! Stream messages published by a front-end board
//!
//! Each message travels as a little-endian `u32` length prefix followed by
//! the payload:
//!
//! ```text
//! header (8 bytes):  [major=1, minor=0, kind, 0, unix_time: u32 LE]
//! word   (16 bytes): [io_chain, word_kind, 0, 0, receipt_time: u32 LE, word: u64 LE]
//! ```
//!
//! `kind` is `D` for data and `H` for heartbeat. A data message carries any
//! number of words; `word_kind` is `D` for an ASIC packet and `T` for a global
//! timestamp.

use tracing::{trace, warn};

use crate::error::PacketError;
use crate::key::ChipKey;
use crate::packet::{Direction, Packet, PacketV1, PacketV2, TimestampPacket};
use crate::Generation;

/// Length prefix size
pub const FRAME_HEADER_LEN: usize = 4;
/// Largest payload accepted behind a length prefix
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
/// Message header size
pub const MESSAGE_HEADER_LEN: usize = 8;
/// Size of one word record
pub const WORD_LEN: usize = 16;
/// Message format version written and accepted
pub const MESSAGE_VERSION: (u8, u8) = (1, 0);

/// Kind of stream message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StreamMessageKind {
    /// Carries packet words
    Data,
    /// Keep-alive without words
    Heartbeat,
}

impl StreamMessageKind {
    fn code(self) -> u8 {
        match self {
            Self::Data => b'D',
            Self::Heartbeat => b'H',
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            b'D' => Some(Self::Data),
            b'H' => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// Kind of word inside a data message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StreamWordKind {
    /// ASIC packet word
    Packet,
    /// Global timestamp
    Timestamp,
}

impl StreamWordKind {
    fn code(self) -> u8 {
        match self {
            Self::Packet => b'D',
            Self::Timestamp => b'T',
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            b'D' => Some(Self::Packet),
            b'T' => Some(Self::Timestamp),
            _ => None,
        }
    }
}

/// One word record of a data message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamWord {
    pub io_chain: u8,
    pub kind: StreamWordKind,
    /// Board receipt time, seconds
    pub receipt_time: u32,
    pub word: u64,
}

impl StreamWord {
    /// An ASIC packet word received on `io_chain`
    pub fn packet(io_chain: u8, receipt_time: u32, word: u64) -> Self {
        Self {
            io_chain,
            kind: StreamWordKind::Packet,
            receipt_time,
            word,
        }
    }

    /// A global timestamp
    pub fn timestamp(receipt_time: u32, timestamp: u64) -> Self {
        Self {
            io_chain: 0,
            kind: StreamWordKind::Timestamp,
            receipt_time,
            word: timestamp,
        }
    }
}

/// A parsed stream message
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StreamMessage {
    pub kind: StreamMessageKind,
    pub unix_time: u32,
    pub words: Vec<StreamWord>,
}

impl StreamMessage {
    /// A data message
    pub fn data(unix_time: u32, words: Vec<StreamWord>) -> Self {
        Self {
            kind: StreamMessageKind::Data,
            unix_time,
            words,
        }
    }

    /// A heartbeat
    pub fn heartbeat(unix_time: u32) -> Self {
        Self {
            kind: StreamMessageKind::Heartbeat,
            unix_time,
            words: Vec::new(),
        }
    }

    /// Message payload, without the length prefix
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MESSAGE_HEADER_LEN + self.words.len() * WORD_LEN);
        out.extend_from_slice(&[MESSAGE_VERSION.0, MESSAGE_VERSION.1, self.kind.code(), 0]);
        out.extend_from_slice(&self.unix_time.to_le_bytes());
        for word in &self.words {
            out.extend_from_slice(&[word.io_chain, word.kind.code(), 0, 0]);
            out.extend_from_slice(&word.receipt_time.to_le_bytes());
            out.extend_from_slice(&word.word.to_le_bytes());
        }
        out
    }

    /// Parse a message payload
    pub fn parse(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() < MESSAGE_HEADER_LEN {
            return Err(PacketError::InvalidStreamMessage(format!(
                "{} bytes is shorter than the message header",
                payload.len()
            )));
        }
        let (header, body) = payload.split_at(MESSAGE_HEADER_LEN);
        if (header[0], header[1]) != MESSAGE_VERSION {
            return Err(PacketError::UnsupportedMessageVersion {
                major: header[0],
                minor: header[1],
            });
        }
        let kind = StreamMessageKind::from_code(header[2]).ok_or_else(|| {
            PacketError::InvalidStreamMessage(format!("unknown message kind {:#04x}", header[2]))
        })?;
        let unix_time = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if body.len() % WORD_LEN != 0 {
            return Err(PacketError::InvalidStreamMessage(format!(
                "body of {} bytes is not a whole number of words",
                body.len()
            )));
        }

        let mut words = Vec::with_capacity(body.len() / WORD_LEN);
        for chunk in body.chunks_exact(WORD_LEN) {
            let kind = StreamWordKind::from_code(chunk[1]).ok_or_else(|| {
                PacketError::InvalidStreamMessage(format!("unknown word kind {:#04x}", chunk[1]))
            })?;
            let mut receipt = [0u8; 4];
            receipt.copy_from_slice(&chunk[4..8]);
            let mut word = [0u8; 8];
            word.copy_from_slice(&chunk[8..16]);
            words.push(StreamWord {
                io_chain: chunk[0],
                kind,
                receipt_time: u32::from_le_bytes(receipt),
                word: u64::from_le_bytes(word),
            });
        }

        if kind == StreamMessageKind::Heartbeat && !words.is_empty() {
            return Err(PacketError::InvalidStreamMessage(
                "heartbeat carries words".to_string(),
            ));
        }

        Ok(Self {
            kind,
            unix_time,
            words,
        })
    }
}

/// Prefix a payload with its little-endian length
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Turns stream messages from one endpoint into packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDecoder {
    /// io-group of the endpoint the messages came from
    pub io_group: u8,
    /// Generation of the ASICs behind the endpoint
    pub generation: Generation,
    /// Whether generation-2 chips run with FIFO diagnostics
    pub fifo_diagnostics: bool,
}

impl StreamDecoder {
    /// Create a decoder for an endpoint
    pub fn new(io_group: u8, generation: Generation) -> Self {
        Self {
            io_group,
            generation,
            fifo_diagnostics: false,
        }
    }

    /// Decode generation-2 data words with the diagnostic layout
    pub fn with_fifo_diagnostics(mut self, enabled: bool) -> Self {
        self.fifo_diagnostics = enabled;
        self
    }

    /// Decode one message payload into received packets
    ///
    /// Only a malformed message header is an error. Words that fail to decode
    /// are logged and skipped, and the rest of the message is returned.
    pub fn decode(&self, payload: &[u8]) -> Result<Vec<Packet>, PacketError> {
        let message = StreamMessage::parse(payload)?;
        if message.kind == StreamMessageKind::Heartbeat {
            trace!(io_group = self.io_group, "heartbeat at {}", message.unix_time);
            return Ok(Vec::new());
        }

        let packets = message
            .words
            .iter()
            .filter_map(|word| match self.decode_word(word) {
                Ok(packet) => Some(packet),
                Err(e) => {
                    warn!(
                        io_group = self.io_group,
                        io_chain = word.io_chain,
                        "skipping undecodable word {:#018x}: {}",
                        word.word,
                        e
                    );
                    None
                }
            })
            .collect();
        Ok(packets)
    }

    fn decode_word(&self, word: &StreamWord) -> Result<Packet, PacketError> {
        if word.kind == StreamWordKind::Timestamp {
            return Ok(Packet::Timestamp(TimestampPacket {
                timestamp: word.word,
            }));
        }

        let packet = match self.generation {
            Generation::V1 => {
                let mut packet = PacketV1::from_word(word.word, String::new());
                packet.chip_key =
                    ChipKey::from_io_chain(self.io_group, word.io_chain, packet.chip_id)?
                        .to_string();
                packet.direction = Direction::Received;
                Packet::V1(packet)
            }
            Generation::V2 => {
                let key = ChipKey::from_io_chain(self.io_group, word.io_chain, 0)?;
                let mut packet = PacketV2::from_word(
                    word.word,
                    key.io_group,
                    key.io_channel,
                    self.fifo_diagnostics,
                );
                packet.direction = Direction::Received;
                Packet::V2(packet)
            }
        };
        Ok(packet)
    }
}
