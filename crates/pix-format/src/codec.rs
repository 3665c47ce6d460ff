//! Packet to record translation
//!
//! Encoding walks the target schema's columns and takes each value from the
//! packet's exported fields, substituting the column's zero value for any
//! field the packet does not export. Decoding dispatches on the version's
//! packet-type column; message rows hold an index into the message dataset
//! in their `counter` column.

use pix_packet::{Encodable, FieldValue, MessagePacket, Packet, PacketType};
use tracing::trace;

use crate::error::{FormatError, Result};
use crate::record::Record;
use crate::schema::{schema, DatasetSchema, VersionSchema};

/// Column of a message row that points into the message dataset
pub const MESSAGE_INDEX_FIELD: &str = "counter";

/// Resolves message indices stored in packet rows
pub trait MessageLookup {
    /// Text of the message at `index`
    fn message(&mut self, index: u64) -> Result<String>;
}

/// A decoded row of the message dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub message: String,
    pub timestamp: u64,
    /// Absolute row position within the message dataset
    pub index: u32,
}

impl MessageRecord {
    /// Encode into the message dataset of `version`
    pub fn to_record(&self, version: &str) -> Result<Record> {
        let dataset = message_dataset(schema(version)?)?;
        let mut record = Record::new(dataset);
        record.set("message", FieldValue::Bytes(self.message.as_bytes().to_vec()))?;
        record.set("timestamp", FieldValue::Uint(self.timestamp))?;
        record.set("index", FieldValue::Uint(self.index.into()))?;
        Ok(record)
    }

    /// Decode a message dataset row
    pub fn from_record(record: &Record) -> Self {
        let message = record
            .value("message")
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default();
        Self {
            message,
            timestamp: record.uint("timestamp"),
            index: record.uint("index") as u32,
        }
    }
}

impl MessageLookup for Vec<MessageRecord> {
    fn message(&mut self, index: u64) -> Result<String> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.get(i))
            .map(|m| m.message.clone())
            .ok_or(FormatError::MessageIndexOutOfRange {
                index,
                count: self.len() as u64,
            })
    }
}

fn message_dataset(schema: &'static VersionSchema) -> Result<&'static DatasetSchema> {
    schema
        .messages
        .as_ref()
        .ok_or_else(|| FormatError::InvalidPacketForVersion {
            version: schema.version.to_string(),
            packet: PacketType::Message.name(),
        })
}

fn check_packet_fits(packet: &Packet, schema: &'static VersionSchema) -> Result<()> {
    let invalid = || FormatError::InvalidPacketForVersion {
        version: schema.version.to_string(),
        packet: match packet.generation() {
            Some(g) => g.name(),
            None => packet.packet_type().name(),
        },
    };

    if let Some(generation) = packet.generation() {
        if generation != schema.generation {
            return Err(invalid());
        }
    }
    if let Packet::Message(message) = packet {
        let dataset = message_dataset(schema)?;
        let max = dataset
            .index_of("message")
            .map(|i| dataset.fields[i].ty.width())
            .unwrap_or(0);
        if message.message.len() > max {
            return Err(FormatError::FieldTooLong {
                field: "message",
                len: message.message.len(),
                max,
            });
        }
    }
    Ok(())
}

/// Encode a packet into a row of the packet dataset of `version`
///
/// The packet-type column is always written from the packet's own type, and
/// a message packet's index column is left at 0 for the store to fill in.
pub fn encode(packet: &Packet, version: &str) -> Result<Record> {
    let schema = schema(version)?;
    check_packet_fits(packet, schema)?;

    let dataset = &schema.packets;
    let mut record = Record::new(dataset);
    for (column, field) in dataset.fields.iter().enumerate() {
        if let Some(value) = packet.field(field.name) {
            record.set_column(column, value)?;
        }
    }
    record.set(
        schema.type_field,
        FieldValue::Uint(packet.packet_type().code().into()),
    )?;
    Ok(record)
}

/// Decode a row of the packet dataset of `version`
pub fn decode<M: MessageLookup + ?Sized>(
    record: &Record,
    version: &str,
    messages: &mut M,
) -> Result<Packet> {
    let schema = schema(version)?;
    let code = record.uint(schema.type_field);
    let packet_type = u8::try_from(code)
        .ok()
        .and_then(|c| PacketType::from_code(c).ok())
        .ok_or(FormatError::InvalidPacketType(code))?;

    let message = match packet_type {
        PacketType::Message => Some(messages.message(record.uint(MESSAGE_INDEX_FIELD))?),
        _ => None,
    };
    trace!(version, ?packet_type, "decoding record");

    Ok(Packet::decode_from(
        record,
        schema.generation,
        packet_type,
        message.as_deref(),
    ))
}

/// Rows produced by encoding one batch
#[derive(Debug, Clone, Default)]
pub struct EncodedBatch {
    pub packets: Vec<Record>,
    pub messages: Vec<Record>,
}

/// Encode a whole batch before anything is written
///
/// Message packets get consecutive message indices starting at
/// `first_message_index`, written both into their packet row and into the
/// matching message row.
pub fn encode_batch(
    packets: &[Packet],
    version: &str,
    first_message_index: u64,
) -> Result<EncodedBatch> {
    let mut batch = EncodedBatch::default();
    for packet in packets {
        let mut record = encode(packet, version)?;
        if let Packet::Message(MessagePacket { message, timestamp }) = packet {
            let index = first_message_index + batch.messages.len() as u64;
            let stored = u32::try_from(index).map_err(|_| FormatError::ValueOutOfRange {
                field: MESSAGE_INDEX_FIELD,
                value: index,
                max: u32::MAX.into(),
            })?;
            record.set(MESSAGE_INDEX_FIELD, FieldValue::Uint(index))?;
            let row = MessageRecord {
                message: message.clone(),
                timestamp: *timestamp,
                index: stored,
            };
            batch.messages.push(row.to_record(version)?);
        }
        batch.packets.push(record);
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pix_packet::{
        Direction, PacketV1, PacketV2, TimestampPacket, V1Payload, V2Data, V2Payload,
    };

    fn v1_data() -> Packet {
        Packet::V1(PacketV1 {
            chip_key: "1-1-5".into(),
            chip_id: 5,
            direction: Direction::Received,
            payload: V1Payload::Data {
                channel: 10,
                timestamp: 1234,
                adc_counts: 99,
                fifo_half: false,
                fifo_full: true,
            },
            ..Default::default()
        })
    }

    #[test]
    fn test_v1_data_zero_fills_config_columns() {
        let record = encode(&v1_data(), "1.0").unwrap();
        assert_eq!(record.uint("register"), 0);
        assert_eq!(record.uint("value"), 0);
        assert_eq!(record.uint("adc_counts"), 99);
        assert_eq!(record.uint("direction"), 1);
        assert_eq!(record.value("chip_key").unwrap().as_bytes(), b"1-1-5");
    }

    #[test]
    fn test_generation_mismatch() {
        assert!(matches!(
            encode(&v1_data(), "2.0"),
            Err(FormatError::InvalidPacketForVersion { .. })
        ));
        let v2 = Packet::V2(PacketV2::default());
        assert!(matches!(
            encode(&v2, "1.0"),
            Err(FormatError::InvalidPacketForVersion { .. })
        ));
    }

    #[test]
    fn test_message_needs_message_dataset() {
        let msg = Packet::Message(MessagePacket {
            message: "hello".into(),
            timestamp: 1,
        });
        assert!(matches!(
            encode(&msg, "0.0"),
            Err(FormatError::InvalidPacketForVersion { .. })
        ));
        assert!(encode(&msg, "1.0").is_ok());
    }

    #[test]
    fn test_timestamp_forces_packet_type() {
        let ts = Packet::Timestamp(TimestampPacket { timestamp: 77 });
        let record = encode(&ts, "2.0").unwrap();
        assert_eq!(record.uint("packet_type"), 4);
        assert_eq!(record.uint("timestamp"), 77);
        assert_eq!(record.uint("io_group"), 0);
    }

    #[test]
    fn test_fifo_diagnostics_flag_column() {
        let packet = Packet::V2(PacketV2 {
            payload: V2Payload::Data(V2Data {
                local_fifo: 7,
                shared_fifo: 12,
                timestamp: 500,
                fifo_diagnostics_enabled: true,
                ..Default::default()
            }),
            ..Default::default()
        });
        let record = encode(&packet, "2.0").unwrap();
        assert_eq!(record.uint("fifo_diagnostics_enabled"), 1);
        assert_eq!(record.uint("local_fifo_events"), 7);
        assert_eq!(record.uint("local_fifo"), 0);
    }

    #[test]
    fn test_batch_assigns_message_indices() {
        let packets = vec![
            Packet::Message(MessagePacket {
                message: "a".into(),
                timestamp: 1,
            }),
            Packet::Timestamp(TimestampPacket { timestamp: 2 }),
            Packet::Message(MessagePacket {
                message: "b".into(),
                timestamp: 3,
            }),
        ];
        let batch = encode_batch(&packets, "2.0", 4).unwrap();
        assert_eq!(batch.packets.len(), 3);
        assert_eq!(batch.messages.len(), 2);
        assert_eq!(batch.packets[0].uint("counter"), 4);
        assert_eq!(batch.packets[2].uint("counter"), 5);
        assert_eq!(MessageRecord::from_record(&batch.messages[1]).index, 5);
    }

    #[test]
    fn test_batch_rejects_index_past_column() {
        let msg = Packet::Message(MessagePacket {
            message: "late".into(),
            timestamp: 1,
        });
        let first = u64::from(u32::MAX);
        assert_eq!(encode_batch(&[msg.clone()], "2.0", first).unwrap().messages.len(), 1);
        assert!(matches!(
            encode_batch(&[msg], "2.0", first + 1),
            Err(FormatError::ValueOutOfRange {
                field: MESSAGE_INDEX_FIELD,
                ..
            })
        ));
    }

    #[test]
    fn test_message_text_with_trailing_nul() {
        let msg = Packet::Message(MessagePacket {
            message: "end\0".into(),
            timestamp: 1,
        });
        assert!(matches!(
            encode_batch(&[msg], "2.0", 0),
            Err(FormatError::TrailingNul { field: "message" })
        ));
    }

    #[test]
    fn test_decode_message_out_of_range() {
        let msg = Packet::Message(MessagePacket {
            message: "lost".into(),
            timestamp: 1,
        });
        let batch = encode_batch(&[msg], "2.0", 3).unwrap();
        let mut messages: Vec<MessageRecord> = Vec::new();
        assert!(matches!(
            decode(&batch.packets[0], "2.0", &mut messages),
            Err(FormatError::MessageIndexOutOfRange { index: 3, count: 0 })
        ));
    }

    #[test]
    fn test_decode_invalid_type_code() {
        let mut record = encode(&v1_data(), "1.0").unwrap();
        record.set("type", FieldValue::Uint(9)).unwrap();
        let mut messages: Vec<MessageRecord> = Vec::new();
        assert!(matches!(
            decode(&record, "1.0", &mut messages),
            Err(FormatError::InvalidPacketType(9))
        ));
    }
}
