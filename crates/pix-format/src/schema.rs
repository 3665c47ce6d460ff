//! Record schemas per format version
//!
//! The registry is built once on first use and never mutated. Each version
//! has a packet dataset and, from `1.0` on, a message dataset; each dataset is
//! an ordered list of fixed-width fields plus a name-to-column lookup.

use std::collections::HashMap;
use std::sync::LazyLock;

use pix_packet::Generation;

use crate::error::{FormatError, Result};

/// Version written when the caller names none
pub const LATEST_VERSION: &str = "2.0";

/// Packet dataset name for versions `1.0` and later
pub const PACKETS_DATASET: &str = "packets";
/// Packet dataset name for the legacy `0.0` version
pub const RAW_PACKET_DATASET: &str = "raw_packet";
/// Message dataset name
pub const MESSAGES_DATASET: &str = "messages";

/// Storage type of a single column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Unsigned byte
    U8,
    /// Unsigned 32-bit little-endian integer
    U32,
    /// Unsigned 64-bit little-endian integer
    U64,
    /// Zero-padded byte string of fixed length
    Bytes(usize),
}

impl FieldType {
    /// Bytes occupied in a row
    pub fn width(&self) -> usize {
        match self {
            FieldType::U8 => 1,
            FieldType::U32 => 4,
            FieldType::U64 => 8,
            FieldType::Bytes(n) => *n,
        }
    }

    /// Type code as written into container headers (`u1`, `u4`, `u8`, `S32`)
    pub fn code(&self) -> String {
        match self {
            FieldType::U8 => "u1".to_string(),
            FieldType::U32 => "u4".to_string(),
            FieldType::U64 => "u8".to_string(),
            FieldType::Bytes(n) => format!("S{}", n),
        }
    }

    /// Parse a header type code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "u1" => Some(FieldType::U8),
            "u4" => Some(FieldType::U32),
            "u8" => Some(FieldType::U64),
            _ => code.strip_prefix('S')?.parse().ok().map(FieldType::Bytes),
        }
    }
}

/// A named column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
}

const fn field(name: &'static str, ty: FieldType) -> Field {
    Field { name, ty }
}

/// Ordered columns of one dataset with derived offsets and lookup
#[derive(Debug, PartialEq, Eq)]
pub struct DatasetSchema {
    pub name: &'static str,
    pub fields: &'static [Field],
    index: HashMap<&'static str, usize>,
    offsets: Vec<usize>,
    width: usize,
}

impl DatasetSchema {
    fn new(name: &'static str, fields: &'static [Field]) -> Self {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut width = 0;
        for f in fields {
            offsets.push(width);
            width += f.ty.width();
        }
        let index = fields.iter().enumerate().map(|(i, f)| (f.name, i)).collect();
        Self {
            name,
            fields,
            index,
            offsets,
            width,
        }
    }

    /// Column index of a field
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Byte offset of a column within a row
    pub fn offset(&self, column: usize) -> usize {
        self.offsets[column]
    }

    /// Row width in bytes
    pub fn width(&self) -> usize {
        self.width
    }

    /// `(name, type code)` pairs as recorded in container headers
    pub fn describe(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|f| (f.name.to_string(), f.ty.code()))
            .collect()
    }
}

/// Everything the codec needs to know about one format version
#[derive(Debug)]
pub struct VersionSchema {
    pub version: &'static str,
    pub packets: DatasetSchema,
    pub messages: Option<DatasetSchema>,
    /// Column holding the packet type code
    pub type_field: &'static str,
    /// ASIC generation whose packets the version stores
    pub generation: Generation,
    /// Whether new data may be written at this version
    pub writable: bool,
}

const V0_0_RAW_PACKET: &[Field] = &[
    field("chip_key", FieldType::Bytes(32)),
    field("type", FieldType::U8),
    field("chipid", FieldType::U8),
    field("parity", FieldType::U8),
    field("valid_parity", FieldType::U8),
    field("counter", FieldType::U32),
    field("channel", FieldType::U8),
    field("timestamp", FieldType::U64),
    field("adc_counts", FieldType::U8),
    field("fifo_half", FieldType::U8),
    field("fifo_full", FieldType::U8),
    field("register", FieldType::U8),
    field("value", FieldType::U8),
];

const V1_0_PACKETS: &[Field] = &[
    field("chip_key", FieldType::Bytes(32)),
    field("type", FieldType::U8),
    field("chipid", FieldType::U8),
    field("parity", FieldType::U8),
    field("valid_parity", FieldType::U8),
    field("channel", FieldType::U8),
    field("timestamp", FieldType::U64),
    field("adc_counts", FieldType::U8),
    field("fifo_half", FieldType::U8),
    field("fifo_full", FieldType::U8),
    field("register", FieldType::U8),
    field("value", FieldType::U8),
    field("counter", FieldType::U32),
    field("direction", FieldType::U8),
];

const V2_0_PACKETS: &[Field] = &[
    field("io_group", FieldType::U8),
    field("io_channel", FieldType::U8),
    field("chip_id", FieldType::U8),
    field("packet_type", FieldType::U8),
    field("downstream_marker", FieldType::U8),
    field("parity", FieldType::U8),
    field("valid_parity", FieldType::U8),
    field("channel_id", FieldType::U8),
    field("timestamp", FieldType::U64),
    field("dataword", FieldType::U8),
    field("trigger_type", FieldType::U8),
    field("local_fifo", FieldType::U8),
    field("shared_fifo", FieldType::U8),
    field("register_address", FieldType::U8),
    field("register_data", FieldType::U8),
    field("direction", FieldType::U8),
    field("local_fifo_events", FieldType::U8),
    field("shared_fifo_events", FieldType::U8),
    field("counter", FieldType::U32),
    field("fifo_diagnostics_enabled", FieldType::U8),
];

const MESSAGES: &[Field] = &[
    field("message", FieldType::Bytes(64)),
    field("timestamp", FieldType::U64),
    field("index", FieldType::U32),
];

static REGISTRY: LazyLock<HashMap<&'static str, VersionSchema>> = LazyLock::new(|| {
    let versions = [
        VersionSchema {
            version: "0.0",
            packets: DatasetSchema::new(RAW_PACKET_DATASET, V0_0_RAW_PACKET),
            messages: None,
            type_field: "type",
            generation: Generation::V1,
            writable: false,
        },
        VersionSchema {
            version: "1.0",
            packets: DatasetSchema::new(PACKETS_DATASET, V1_0_PACKETS),
            messages: Some(DatasetSchema::new(MESSAGES_DATASET, MESSAGES)),
            type_field: "type",
            generation: Generation::V1,
            writable: true,
        },
        VersionSchema {
            version: "2.0",
            packets: DatasetSchema::new(PACKETS_DATASET, V2_0_PACKETS),
            messages: Some(DatasetSchema::new(MESSAGES_DATASET, MESSAGES)),
            type_field: "packet_type",
            generation: Generation::V2,
            writable: true,
        },
    ];
    versions.into_iter().map(|v| (v.version, v)).collect()
});

/// Look up the schema of a registered version
pub fn schema(version: &str) -> Result<&'static VersionSchema> {
    REGISTRY
        .get(version)
        .ok_or_else(|| FormatError::UnknownVersion(version.to_string()))
}

/// All registered versions, oldest first
pub fn versions() -> Vec<&'static str> {
    let mut versions: Vec<&'static str> = REGISTRY.keys().copied().collect();
    versions.sort_unstable();
    versions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_versions() {
        assert_eq!(versions(), vec!["0.0", "1.0", "2.0"]);
        assert!(matches!(schema("3.0"), Err(FormatError::UnknownVersion(_))));
        assert!(schema(LATEST_VERSION).unwrap().writable);
        assert!(!schema("0.0").unwrap().writable);
    }

    #[test]
    fn test_column_lookup() {
        let v2 = schema("2.0").unwrap();
        assert_eq!(v2.packets.index_of("io_group"), Some(0));
        assert_eq!(v2.packets.index_of("fifo_diagnostics_enabled"), Some(19));
        assert_eq!(v2.packets.index_of("chip_key"), None);

        let v0 = schema("0.0").unwrap();
        assert_eq!(v0.packets.name, RAW_PACKET_DATASET);
        assert_eq!(v0.packets.index_of("counter"), Some(5));
        assert!(v0.messages.is_none());
    }

    #[test]
    fn test_row_widths() {
        // chip key, one-byte columns, timestamp, counter
        assert_eq!(schema("1.0").unwrap().packets.width(), 32 + 11 + 8 + 4);
        assert_eq!(schema("2.0").unwrap().packets.width(), 18 + 8 + 4);
        let messages = schema("2.0").unwrap().messages.as_ref().unwrap();
        assert_eq!(messages.width(), 64 + 8 + 4);
        assert_eq!(messages.offset(2), 72);
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(FieldType::Bytes(32).code(), "S32");
        assert_eq!(FieldType::from_code("S64"), Some(FieldType::Bytes(64)));
        assert_eq!(FieldType::from_code("u4"), Some(FieldType::U32));
        assert_eq!(FieldType::from_code("f8"), None);
    }
}
