//! Packet Record Format
//!
//! This crate stores packets as fixed-width binary records in versioned,
//! append-only containers.
//!
//! # Versions
//!
//! | Version | Packets       | Datasets                 | Writable |
//! |---------|---------------|--------------------------|----------|
//! | `0.0`   | generation 1  | `raw_packet`             | no       |
//! | `1.0`   | generation 1  | `packets`, `messages`    | yes      |
//! | `2.0`   | generation 2  | `packets`, `messages`    | yes      |
//!
//! Timestamp and message packets fit every version with a message dataset;
//! timestamp packets also fit `0.0`.
//!
//! # Example
//!
//! ```rust,no_run
//! use pix_format::RecordStore;
//! use pix_packet::{MessagePacket, Packet, TimestampPacket};
//!
//! let packets = vec![
//!     Packet::Timestamp(TimestampPacket { timestamp: 1_000 }),
//!     Packet::Message(MessagePacket { message: "run 12 start".into(), timestamp: 1_001 }),
//! ];
//! RecordStore::to_file("run12.pix", &packets, None)?;
//!
//! let contents = RecordStore::from_file("run12.pix", Some("~2.0"), None, None)?;
//! assert_eq!(contents.packets, packets);
//! # Ok::<(), pix_format::FormatError>(())
//! ```

pub mod codec;
pub mod error;
pub mod record;
pub mod schema;
pub mod store;
pub mod version;

pub use codec::{decode, encode, MessageLookup, MessageRecord};
pub use error::{FormatError, Result};
pub use record::{Record, Value};
pub use schema::{schema, FieldType, VersionSchema, LATEST_VERSION};
pub use store::{ContainerHeader, FileContents, PacketReader, RecordStore};
pub use version::{FormatVersion, VersionRequest};
