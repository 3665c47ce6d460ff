//! Normalized packet representation
//!
//! [`Packet`] is the common representation shared by the record format and
//! the board transport. ASIC packets come in two hardware generations whose
//! field sets differ; timestamp and message packets are generation-neutral
//! bookkeeping entries that never travel to a chip.
//!
//! Every variant exposes its fields by name through [`Encodable`]. Fields that
//! carry no meaning for a packet's type are reported as absent, so consumers
//! substitute the type default (0 or an empty byte string).

use std::fmt;

use crate::error::PacketError;
use crate::key::ChipKey;
use crate::Generation;

/// Packet type codes, shared by both generations and the record format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum PacketType {
    /// ADC conversion result
    Data = 0,
    /// Test counter packet
    Test = 1,
    /// Configuration register write
    ConfigWrite = 2,
    /// Configuration register read
    ConfigRead = 3,
    /// Global clock value
    Timestamp = 4,
    /// Free-text run annotation
    Message = 5,
}

impl PacketType {
    /// All packet types in code order
    pub const ALL: [PacketType; 6] = [
        PacketType::Data,
        PacketType::Test,
        PacketType::ConfigWrite,
        PacketType::ConfigRead,
        PacketType::Timestamp,
        PacketType::Message,
    ];

    /// Numeric type code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a packet type by its numeric code
    pub fn from_code(code: u8) -> Result<Self, PacketError> {
        Self::ALL
            .get(code as usize)
            .copied()
            .ok_or(PacketError::InvalidPacketType(code))
    }

    /// Human-readable name, as written into packet-type lookup tables
    pub fn name(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Test => "test",
            Self::ConfigWrite => "config write",
            Self::ConfigRead => "config read",
            Self::Timestamp => "timestamp",
            Self::Message => "message",
        }
    }

    /// Whether this type is produced by an ASIC (as opposed to bookkeeping)
    pub fn is_asic(self) -> bool {
        !matches!(self, Self::Timestamp | Self::Message)
    }
}

/// Whether a packet was sent to the ASICs or received from them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// Written to the ASICs
    #[default]
    Sent,
    /// Read back from the ASICs
    Received,
}

impl Direction {
    /// Numeric direction code (Sent=0, Received=1)
    pub fn code(self) -> u8 {
        match self {
            Self::Sent => 0,
            Self::Received => 1,
        }
    }

    /// Decode a direction code; any nonzero value means received
    pub fn from_code(code: u64) -> Self {
        if code == 0 {
            Self::Sent
        } else {
            Self::Received
        }
    }
}

/// A single exported field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Unsigned integer (flags are exported as 0/1)
    Uint(u64),
    /// Raw byte string (chip keys, message text)
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Integer view; byte strings read as 0
    pub fn as_u64(&self) -> u64 {
        match self {
            Self::Uint(v) => *v,
            Self::Bytes(_) => 0,
        }
    }

    /// Byte string view; integers read as empty
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Uint(_) => &[],
            Self::Bytes(b) => b,
        }
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        Self::Uint(v.into())
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        Self::Uint(v.into())
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Uint(v.into())
    }
}

/// Export a packet's fields by name
pub trait Encodable {
    /// Value of the named field, or `None` when the field does not apply
    fn field(&self, name: &str) -> Option<FieldValue>;
}

/// Read access to a named field set (a stored record, a decoded row)
pub trait FieldSource {
    /// Value of the named field, or `None` when the source lacks it
    fn get(&self, name: &str) -> Option<FieldValue>;

    /// Integer value of the named field, defaulting to 0
    fn uint(&self, name: &str) -> u64 {
        self.get(name).map(|v| v.as_u64()).unwrap_or(0)
    }
}

/// Field names exported by generation-1 packets, in record column order
pub const V1_FIELDS: &[&str] = &[
    "chip_key",
    "type",
    "chipid",
    "parity",
    "valid_parity",
    "channel",
    "timestamp",
    "adc_counts",
    "fifo_half",
    "fifo_full",
    "register",
    "value",
    "counter",
    "direction",
];

/// Field names exported by generation-2 packets, in record column order
pub const V2_FIELDS: &[&str] = &[
    "io_group",
    "io_channel",
    "chip_id",
    "packet_type",
    "downstream_marker",
    "parity",
    "valid_parity",
    "channel_id",
    "timestamp",
    "dataword",
    "trigger_type",
    "local_fifo",
    "shared_fifo",
    "register_address",
    "register_data",
    "direction",
    "local_fifo_events",
    "shared_fifo_events",
    "counter",
    "fifo_diagnostics_enabled",
];

// ============================================================================
// Generation 1
// ============================================================================

/// Type-specific contents of a generation-1 packet
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum V1Payload {
    /// ADC conversion
    Data {
        channel: u8,
        timestamp: u64,
        adc_counts: u8,
        fifo_half: bool,
        fifo_full: bool,
    },
    /// Test counter
    Test { counter: u32 },
    /// Register write
    ConfigWrite { register: u8, value: u8 },
    /// Register read
    ConfigRead { register: u8, value: u8 },
}

impl Default for V1Payload {
    fn default() -> Self {
        Self::Data {
            channel: 0,
            timestamp: 0,
            adc_counts: 0,
            fifo_half: false,
            fifo_full: false,
        }
    }
}

/// Generation-1 ASIC packet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PacketV1 {
    /// Opaque chip key string (at most 32 bytes when stored)
    pub chip_key: String,
    pub chip_id: u8,
    pub parity: u8,
    pub valid_parity: bool,
    pub direction: Direction,
    pub payload: V1Payload,
}

impl PacketV1 {
    /// Packet type implied by the payload
    pub fn packet_type(&self) -> PacketType {
        match self.payload {
            V1Payload::Data { .. } => PacketType::Data,
            V1Payload::Test { .. } => PacketType::Test,
            V1Payload::ConfigWrite { .. } => PacketType::ConfigWrite,
            V1Payload::ConfigRead { .. } => PacketType::ConfigRead,
        }
    }

    /// Parse the opaque chip key string
    pub fn parsed_chip_key(&self) -> Result<ChipKey, PacketError> {
        self.chip_key.parse()
    }
}

impl Encodable for PacketV1 {
    fn field(&self, name: &str) -> Option<FieldValue> {
        let common = match name {
            "chip_key" => Some(FieldValue::Bytes(self.chip_key.as_bytes().to_vec())),
            "type" => Some(self.packet_type().code().into()),
            "chipid" => Some(self.chip_id.into()),
            "parity" => Some(self.parity.into()),
            "valid_parity" => Some(self.valid_parity.into()),
            "direction" => Some(self.direction.code().into()),
            _ => None,
        };
        if common.is_some() {
            return common;
        }

        match (&self.payload, name) {
            (V1Payload::Data { channel, .. }, "channel") => Some((*channel).into()),
            (V1Payload::Data { timestamp, .. }, "timestamp") => Some((*timestamp).into()),
            (V1Payload::Data { adc_counts, .. }, "adc_counts") => Some((*adc_counts).into()),
            (V1Payload::Data { fifo_half, .. }, "fifo_half") => Some((*fifo_half).into()),
            (V1Payload::Data { fifo_full, .. }, "fifo_full") => Some((*fifo_full).into()),
            (V1Payload::Test { counter }, "counter") => Some((*counter).into()),
            (
                V1Payload::ConfigWrite { register, .. } | V1Payload::ConfigRead { register, .. },
                "register",
            ) => Some((*register).into()),
            (
                V1Payload::ConfigWrite { value, .. } | V1Payload::ConfigRead { value, .. },
                "value",
            ) => Some((*value).into()),
            _ => None,
        }
    }
}

// ============================================================================
// Generation 2
// ============================================================================

/// Data payload of a generation-2 packet
///
/// `local_fifo` and `shared_fifo` are FIFO status flags unless
/// `fifo_diagnostics_enabled` is set, in which case they are event counts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct V2Data {
    pub channel_id: u8,
    pub timestamp: u64,
    pub dataword: u8,
    pub trigger_type: u8,
    pub local_fifo: u8,
    pub shared_fifo: u8,
    pub fifo_diagnostics_enabled: bool,
}

/// Type-specific contents of a generation-2 packet
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum V2Payload {
    /// ADC conversion
    Data(V2Data),
    /// Test counter
    Test { counter: u32 },
    /// Register write
    ConfigWrite {
        register_address: u8,
        register_data: u8,
    },
    /// Register read
    ConfigRead {
        register_address: u8,
        register_data: u8,
    },
}

impl Default for V2Payload {
    fn default() -> Self {
        Self::Data(V2Data::default())
    }
}

/// Generation-2 ASIC packet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PacketV2 {
    pub io_group: u8,
    /// Daisy chain position, numbered from 1
    pub io_channel: u8,
    pub chip_id: u8,
    pub downstream_marker: u8,
    pub parity: u8,
    pub valid_parity: bool,
    pub direction: Direction,
    pub payload: V2Payload,
}

impl PacketV2 {
    /// Packet type implied by the payload
    pub fn packet_type(&self) -> PacketType {
        match self.payload {
            V2Payload::Data(_) => PacketType::Data,
            V2Payload::Test { .. } => PacketType::Test,
            V2Payload::ConfigWrite { .. } => PacketType::ConfigWrite,
            V2Payload::ConfigRead { .. } => PacketType::ConfigRead,
        }
    }

    /// Chip key naming this packet's ASIC
    pub fn chip_key(&self) -> ChipKey {
        ChipKey::new(self.io_group, self.io_channel, self.chip_id)
    }

    /// Whether the FIFO fields hold event counts
    pub fn fifo_diagnostics_enabled(&self) -> bool {
        matches!(
            &self.payload,
            V2Payload::Data(V2Data {
                fifo_diagnostics_enabled: true,
                ..
            })
        )
    }
}

impl Encodable for PacketV2 {
    fn field(&self, name: &str) -> Option<FieldValue> {
        let common = match name {
            "io_group" => Some(self.io_group.into()),
            "io_channel" => Some(self.io_channel.into()),
            "chip_id" => Some(self.chip_id.into()),
            "packet_type" => Some(self.packet_type().code().into()),
            "downstream_marker" => Some(self.downstream_marker.into()),
            "parity" => Some(self.parity.into()),
            "valid_parity" => Some(self.valid_parity.into()),
            "direction" => Some(self.direction.code().into()),
            _ => None,
        };
        if common.is_some() {
            return common;
        }

        match &self.payload {
            V2Payload::Data(data) => {
                let diag = data.fifo_diagnostics_enabled;
                match name {
                    "channel_id" => Some(data.channel_id.into()),
                    "timestamp" => Some(data.timestamp.into()),
                    "dataword" => Some(data.dataword.into()),
                    "trigger_type" => Some(data.trigger_type.into()),
                    "local_fifo" if !diag => Some(data.local_fifo.into()),
                    "shared_fifo" if !diag => Some(data.shared_fifo.into()),
                    "local_fifo_events" if diag => Some(data.local_fifo.into()),
                    "shared_fifo_events" if diag => Some(data.shared_fifo.into()),
                    "fifo_diagnostics_enabled" => Some(diag.into()),
                    _ => None,
                }
            }
            V2Payload::Test { counter } => match name {
                "counter" => Some((*counter).into()),
                _ => None,
            },
            V2Payload::ConfigWrite {
                register_address,
                register_data,
            }
            | V2Payload::ConfigRead {
                register_address,
                register_data,
            } => match name {
                "register_address" => Some((*register_address).into()),
                "register_data" => Some((*register_data).into()),
                _ => None,
            },
        }
    }
}

// ============================================================================
// Bookkeeping packets
// ============================================================================

/// Global clock value recorded alongside ASIC packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimestampPacket {
    pub timestamp: u64,
}

impl Encodable for TimestampPacket {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "type" => Some(PacketType::Timestamp.code().into()),
            "timestamp" => Some(self.timestamp.into()),
            _ => None,
        }
    }
}

/// Free-text annotation recorded alongside ASIC packets
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MessagePacket {
    /// Message text (at most 64 bytes when stored)
    pub message: String,
    pub timestamp: u64,
}

impl Encodable for MessagePacket {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "type" => Some(PacketType::Message.code().into()),
            "timestamp" => Some(self.timestamp.into()),
            _ => None,
        }
    }
}

// ============================================================================
// Packet
// ============================================================================

/// Any packet handled by the system
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Packet {
    /// Generation-1 ASIC packet
    V1(PacketV1),
    /// Generation-2 ASIC packet
    V2(PacketV2),
    /// Global timestamp
    Timestamp(TimestampPacket),
    /// Run annotation
    Message(MessagePacket),
}

impl Packet {
    /// Packet type code of this packet
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::V1(p) => p.packet_type(),
            Self::V2(p) => p.packet_type(),
            Self::Timestamp(_) => PacketType::Timestamp,
            Self::Message(_) => PacketType::Message,
        }
    }

    /// Hardware generation for ASIC packets
    pub fn generation(&self) -> Option<Generation> {
        match self {
            Self::V1(_) => Some(Generation::V1),
            Self::V2(_) => Some(Generation::V2),
            Self::Timestamp(_) | Self::Message(_) => None,
        }
    }

    /// Whether the FIFO fields of a generation-2 data packet hold event counts
    pub fn fifo_diagnostics_enabled(&self) -> bool {
        match self {
            Self::V2(p) => p.fifo_diagnostics_enabled(),
            _ => false,
        }
    }

    /// The semantically overloaded timestamp: ASIC-local for data packets,
    /// the global clock for timestamp packets, the annotation time for messages
    pub fn timestamp(&self) -> Option<u64> {
        match self {
            Self::V1(PacketV1 {
                payload: V1Payload::Data { timestamp, .. },
                ..
            }) => Some(*timestamp),
            Self::V2(PacketV2 {
                payload: V2Payload::Data(data),
                ..
            }) => Some(data.timestamp),
            Self::Timestamp(p) => Some(p.timestamp),
            Self::Message(p) => Some(p.timestamp),
            _ => None,
        }
    }

    /// Chip key of an ASIC packet
    pub fn chip_key(&self) -> Result<ChipKey, PacketError> {
        match self {
            Self::V1(p) => p.parsed_chip_key(),
            Self::V2(p) => Ok(p.chip_key()),
            Self::Timestamp(_) | Self::Message(_) => Err(PacketError::InvalidChipKey(format!(
                "{} packets carry no chip key",
                self.packet_type().name()
            ))),
        }
    }

    /// Ordered `(name, value)` pairs for every field this packet exports
    pub fn encode_fields(&self) -> Vec<(&'static str, FieldValue)> {
        let names = match self {
            Self::V2(_) => V2_FIELDS,
            _ => V1_FIELDS,
        };
        names
            .iter()
            .filter_map(|name| self.field(name).map(|value| (*name, value)))
            .collect()
    }

    /// Rebuild a packet from a named field set
    ///
    /// Timestamp and message packets bypass the generation layout entirely:
    /// only `timestamp` is read, plus the already resolved `message` text.
    /// Generation-2 data packets are read twice: once generically, then, if
    /// `fifo_diagnostics_enabled` is set, the FIFO fields are replaced by the
    /// event counts and the timestamp is re-read from the diagnostic path.
    pub fn decode_from<F: FieldSource + ?Sized>(
        fields: &F,
        generation: Generation,
        packet_type: PacketType,
        message: Option<&str>,
    ) -> Packet {
        match packet_type {
            PacketType::Timestamp => Packet::Timestamp(TimestampPacket {
                timestamp: fields.uint("timestamp"),
            }),
            PacketType::Message => Packet::Message(MessagePacket {
                message: message.unwrap_or_default().to_string(),
                timestamp: fields.uint("timestamp"),
            }),
            PacketType::Data
            | PacketType::Test
            | PacketType::ConfigWrite
            | PacketType::ConfigRead => match generation {
                Generation::V1 => Packet::V1(decode_v1(fields, packet_type)),
                Generation::V2 => Packet::V2(decode_v2(fields, packet_type)),
            },
        }
    }
}

impl Encodable for Packet {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match self {
            Self::V1(p) => p.field(name),
            Self::V2(p) => p.field(name),
            Self::Timestamp(p) => p.field(name),
            Self::Message(p) => p.field(name),
        }
    }
}

impl From<PacketV1> for Packet {
    fn from(p: PacketV1) -> Self {
        Self::V1(p)
    }
}

impl From<PacketV2> for Packet {
    fn from(p: PacketV2) -> Self {
        Self::V2(p)
    }
}

impl From<TimestampPacket> for Packet {
    fn from(p: TimestampPacket) -> Self {
        Self::Timestamp(p)
    }
}

impl From<MessagePacket> for Packet {
    fn from(p: MessagePacket) -> Self {
        Self::Message(p)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1(p) => write!(
                f,
                "[v1 {} | key {:?} | chip {} | {:?}]",
                p.packet_type().name(),
                p.chip_key,
                p.chip_id,
                p.payload
            ),
            Self::V2(p) => write!(
                f,
                "[v2 {} | key {} | {:?}]",
                p.packet_type().name(),
                p.chip_key(),
                p.payload
            ),
            Self::Timestamp(p) => write!(f, "[timestamp | {}]", p.timestamp),
            Self::Message(p) => write!(f, "[message | {} | {:?}]", p.timestamp, p.message),
        }
    }
}

fn flag(value: u64) -> bool {
    value != 0
}

fn decode_v1<F: FieldSource + ?Sized>(fields: &F, packet_type: PacketType) -> PacketV1 {
    let payload = match packet_type {
        PacketType::Test => V1Payload::Test {
            counter: fields.uint("counter") as u32,
        },
        PacketType::ConfigWrite => V1Payload::ConfigWrite {
            register: fields.uint("register") as u8,
            value: fields.uint("value") as u8,
        },
        PacketType::ConfigRead => V1Payload::ConfigRead {
            register: fields.uint("register") as u8,
            value: fields.uint("value") as u8,
        },
        _ => V1Payload::Data {
            channel: fields.uint("channel") as u8,
            timestamp: fields.uint("timestamp"),
            adc_counts: fields.uint("adc_counts") as u8,
            fifo_half: flag(fields.uint("fifo_half")),
            fifo_full: flag(fields.uint("fifo_full")),
        },
    };

    let chip_key = fields
        .get("chip_key")
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default();

    PacketV1 {
        chip_key,
        chip_id: fields.uint("chipid") as u8,
        parity: fields.uint("parity") as u8,
        valid_parity: flag(fields.uint("valid_parity")),
        direction: Direction::from_code(fields.uint("direction")),
        payload,
    }
}

fn decode_v2<F: FieldSource + ?Sized>(fields: &F, packet_type: PacketType) -> PacketV2 {
    let payload = match packet_type {
        PacketType::Test => V2Payload::Test {
            counter: fields.uint("counter") as u32,
        },
        PacketType::ConfigWrite => V2Payload::ConfigWrite {
            register_address: fields.uint("register_address") as u8,
            register_data: fields.uint("register_data") as u8,
        },
        PacketType::ConfigRead => V2Payload::ConfigRead {
            register_address: fields.uint("register_address") as u8,
            register_data: fields.uint("register_data") as u8,
        },
        _ => {
            let mut data = V2Data {
                channel_id: fields.uint("channel_id") as u8,
                timestamp: fields.uint("timestamp"),
                dataword: fields.uint("dataword") as u8,
                trigger_type: fields.uint("trigger_type") as u8,
                local_fifo: fields.uint("local_fifo") as u8,
                shared_fifo: fields.uint("shared_fifo") as u8,
                fifo_diagnostics_enabled: false,
            };
            if flag(fields.uint("fifo_diagnostics_enabled")) {
                data.fifo_diagnostics_enabled = true;
                data.local_fifo = fields.uint("local_fifo_events") as u8;
                data.shared_fifo = fields.uint("shared_fifo_events") as u8;
                data.timestamp = fields.uint("timestamp");
            }
            V2Payload::Data(data)
        }
    };

    PacketV2 {
        io_group: fields.uint("io_group") as u8,
        io_channel: fields.uint("io_channel") as u8,
        chip_id: fields.uint("chip_id") as u8,
        downstream_marker: fields.uint("downstream_marker") as u8,
        parity: fields.uint("parity") as u8,
        valid_parity: flag(fields.uint("valid_parity")),
        direction: Direction::from_code(fields.uint("direction")),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    impl FieldSource for HashMap<&'static str, FieldValue> {
        fn get(&self, name: &str) -> Option<FieldValue> {
            HashMap::get(self, name).cloned()
        }
    }

    fn export(packet: &Packet) -> HashMap<&'static str, FieldValue> {
        packet.encode_fields().into_iter().collect()
    }

    fn v2_data(diag: bool) -> PacketV2 {
        PacketV2 {
            io_group: 1,
            io_channel: 2,
            chip_id: 5,
            direction: Direction::Received,
            payload: V2Payload::Data(V2Data {
                channel_id: 3,
                timestamp: 123_456,
                dataword: 200,
                trigger_type: 2,
                local_fifo: 7,
                shared_fifo: 4,
                fifo_diagnostics_enabled: diag,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_packet_type_codes() {
        for (code, ty) in PacketType::ALL.iter().enumerate() {
            assert_eq!(ty.code() as usize, code);
            assert_eq!(PacketType::from_code(code as u8).unwrap(), *ty);
        }
        assert_eq!(
            PacketType::from_code(6),
            Err(PacketError::InvalidPacketType(6))
        );
        assert_eq!(PacketType::ConfigWrite.name(), "config write");
    }

    #[test]
    fn test_v1_data_omits_config_fields() {
        let packet = Packet::V1(PacketV1 {
            chip_key: "1-3-2".into(),
            chip_id: 2,
            payload: V1Payload::Data {
                channel: 10,
                timestamp: 123_456,
                adc_counts: 180,
                fifo_half: true,
                fifo_full: false,
            },
            ..Default::default()
        });

        assert_eq!(packet.field("adc_counts"), Some(FieldValue::Uint(180)));
        assert_eq!(packet.field("fifo_half"), Some(FieldValue::Uint(1)));
        assert_eq!(packet.field("register"), None);
        assert_eq!(packet.field("value"), None);
        assert_eq!(packet.field("counter"), None);
        assert_eq!(
            packet.field("chip_key"),
            Some(FieldValue::Bytes(b"1-3-2".to_vec()))
        );
    }

    #[test]
    fn test_v1_config_exports_register() {
        let packet = Packet::V1(PacketV1 {
            chip_id: 10,
            payload: V1Payload::ConfigRead {
                register: 51,
                value: 2,
            },
            ..Default::default()
        });

        assert_eq!(packet.field("type"), Some(FieldValue::Uint(3)));
        assert_eq!(packet.field("register"), Some(FieldValue::Uint(51)));
        assert_eq!(packet.field("value"), Some(FieldValue::Uint(2)));
        assert_eq!(packet.field("timestamp"), None);
    }

    #[test]
    fn test_v2_fifo_fields_switch_meaning() {
        let flags = Packet::V2(v2_data(false));
        assert_eq!(flags.field("local_fifo"), Some(FieldValue::Uint(7)));
        assert_eq!(flags.field("local_fifo_events"), None);
        assert_eq!(flags.field("fifo_diagnostics_enabled"), Some(FieldValue::Uint(0)));

        let counts = Packet::V2(v2_data(true));
        assert_eq!(counts.field("local_fifo"), None);
        assert_eq!(counts.field("local_fifo_events"), Some(FieldValue::Uint(7)));
        assert_eq!(counts.field("shared_fifo_events"), Some(FieldValue::Uint(4)));
        assert!(counts.fifo_diagnostics_enabled());
    }

    #[test]
    fn test_decode_from_export_roundtrip() {
        let packets = vec![
            Packet::V1(PacketV1 {
                chip_key: "2-1-10".into(),
                chip_id: 10,
                parity: 1,
                valid_parity: true,
                direction: Direction::Received,
                payload: V1Payload::Test { counter: 32_838 },
            }),
            Packet::V2(v2_data(false)),
            Packet::V2(v2_data(true)),
            Packet::V2(PacketV2 {
                io_group: 3,
                io_channel: 4,
                chip_id: 11,
                payload: V2Payload::ConfigWrite {
                    register_address: 12,
                    register_data: 255,
                },
                ..Default::default()
            }),
            Packet::Timestamp(TimestampPacket { timestamp: 99 }),
        ];

        for packet in packets {
            let fields = export(&packet);
            let generation = packet.generation().unwrap_or(Generation::V1);
            let decoded =
                Packet::decode_from(&fields, generation, packet.packet_type(), None);
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_decode_message_uses_resolved_text() {
        let packet = Packet::Message(MessagePacket {
            message: "run start".into(),
            timestamp: 1_700_000_000,
        });
        let fields = export(&packet);
        let decoded = Packet::decode_from(
            &fields,
            Generation::V2,
            PacketType::Message,
            Some("run start"),
        );
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_decode_diagnostics_overrides_flags() {
        let mut fields: HashMap<&'static str, FieldValue> = HashMap::new();
        fields.insert("packet_type", 0u8.into());
        fields.insert("timestamp", 5_000u64.into());
        fields.insert("local_fifo", 1u8.into());
        fields.insert("shared_fifo", 3u8.into());
        fields.insert("local_fifo_events", 7u8.into());
        fields.insert("shared_fifo_events", 9u8.into());
        fields.insert("fifo_diagnostics_enabled", 1u8.into());

        let decoded = Packet::decode_from(&fields, Generation::V2, PacketType::Data, None);
        match decoded {
            Packet::V2(PacketV2 {
                payload: V2Payload::Data(data),
                ..
            }) => {
                assert!(data.fifo_diagnostics_enabled);
                assert_eq!(data.local_fifo, 7);
                assert_eq!(data.shared_fifo, 9);
                assert_eq!(data.timestamp, 5_000);
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_chip_key_of_bookkeeping_packet() {
        let packet = Packet::Timestamp(TimestampPacket { timestamp: 1 });
        assert!(matches!(
            packet.chip_key(),
            Err(PacketError::InvalidChipKey(_))
        ));
        assert_eq!(packet.timestamp(), Some(1));
    }
}
