//! Generation bit layouts
//!
//! Packets are packed into a little-endian bit word: bit 0 is the least
//! significant bit of byte 0. Generation-1 words use 54 bits (7 bytes on the
//! wire), generation-2 words use all 64 bits.
//!
//! Parity is odd. [`PacketV1::assign_parity`] and [`PacketV2::assign_parity`]
//! set the parity bit so the whole word has an odd population count; decoding a
//! word records whether that holds in `valid_parity` without touching any
//! other field.

use crate::error::PacketError;
use crate::packet::{Direction, PacketType, PacketV1, PacketV2, V1Payload, V2Data, V2Payload};

/// Meaningful bits in a generation-1 word
pub const V1_WORD_BITS: u32 = 54;
/// Bytes in a generation-1 word on the wire
pub const V1_WORD_BYTES: usize = 7;
/// Meaningful bits in a generation-2 word
pub const V2_WORD_BITS: u32 = 64;
/// Bytes in a generation-2 word on the wire
pub const V2_WORD_BYTES: usize = 8;

/// Half-open bit range within a packet word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRange {
    pub start: u32,
    pub end: u32,
}

impl BitRange {
    /// Bits `start..end`
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// The single bit `n`
    pub const fn bit(n: u32) -> Self {
        Self { start: n, end: n + 1 }
    }

    /// Number of bits covered
    pub const fn width(&self) -> u32 {
        self.end - self.start
    }

    fn mask(&self) -> u64 {
        if self.width() >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width()) - 1
        }
    }

    /// Extract this range from a word
    pub fn get(&self, word: u64) -> u64 {
        (word >> self.start) & self.mask()
    }

    /// Overwrite this range in a word; excess high bits of `value` are dropped
    pub fn set(&self, word: &mut u64, value: u64) {
        let mask = self.mask();
        *word = (*word & !(mask << self.start)) | ((value & mask) << self.start);
    }
}

/// Generation-1 field positions
pub mod v1 {
    use super::BitRange;

    pub const PACKET_TYPE: BitRange = BitRange::new(0, 2);
    pub const CHIP_ID: BitRange = BitRange::new(2, 10);
    pub const CHANNEL: BitRange = BitRange::new(10, 17);
    pub const TIMESTAMP: BitRange = BitRange::new(17, 41);
    pub const ADC_COUNTS: BitRange = BitRange::new(41, 51);
    pub const FIFO_HALF: BitRange = BitRange::bit(51);
    pub const FIFO_FULL: BitRange = BitRange::bit(52);
    pub const COUNTER: BitRange = BitRange::new(10, 26);
    pub const REGISTER: BitRange = BitRange::new(10, 18);
    pub const VALUE: BitRange = BitRange::new(18, 26);
    pub const PARITY: BitRange = BitRange::bit(53);
}

/// Generation-2 field positions
pub mod v2 {
    use super::BitRange;

    pub const PACKET_TYPE: BitRange = BitRange::new(0, 2);
    pub const CHIP_ID: BitRange = BitRange::new(2, 10);
    pub const CHANNEL_ID: BitRange = BitRange::new(10, 16);
    pub const TIMESTAMP: BitRange = BitRange::new(16, 47);
    pub const DATAWORD: BitRange = BitRange::new(47, 55);
    pub const TRIGGER_TYPE: BitRange = BitRange::new(55, 57);
    pub const LOCAL_FIFO: BitRange = BitRange::new(57, 59);
    pub const SHARED_FIFO: BitRange = BitRange::new(59, 61);
    /// Timestamp slot when FIFO diagnostics are enabled
    pub const DIAG_TIMESTAMP: BitRange = BitRange::new(16, 35);
    pub const SHARED_FIFO_EVENTS: BitRange = BitRange::new(35, 43);
    pub const LOCAL_FIFO_EVENTS: BitRange = BitRange::new(43, 47);
    pub const COUNTER: BitRange = BitRange::new(10, 26);
    pub const REGISTER_ADDRESS: BitRange = BitRange::new(10, 18);
    pub const REGISTER_DATA: BitRange = BitRange::new(18, 26);
    pub const DOWNSTREAM_MARKER: BitRange = BitRange::bit(62);
    pub const PARITY: BitRange = BitRange::bit(63);
}

/// Whether a full word (parity bit included) has odd population count
pub fn has_odd_parity(word: u64) -> bool {
    word.count_ones() % 2 == 1
}

/// Parity bit value that makes `word` odd, given its parity bit is clear
fn odd_parity_bit(word: u64) -> u8 {
    if word.count_ones() % 2 == 0 {
        1
    } else {
        0
    }
}

fn flag(value: u64) -> bool {
    value != 0
}

fn word_from_bytes(bytes: &[u8], expected: usize) -> Result<u64, PacketError> {
    if bytes.len() != expected {
        return Err(PacketError::WordLength {
            expected,
            actual: bytes.len(),
        });
    }
    let mut buf = [0u8; 8];
    buf[..expected].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

// ============================================================================
// Generation 1
// ============================================================================

impl PacketV1 {
    fn word_without_parity(&self) -> u64 {
        let mut word = 0u64;
        v1::PACKET_TYPE.set(&mut word, self.packet_type().code().into());
        v1::CHIP_ID.set(&mut word, self.chip_id.into());
        match &self.payload {
            V1Payload::Data {
                channel,
                timestamp,
                adc_counts,
                fifo_half,
                fifo_full,
            } => {
                v1::CHANNEL.set(&mut word, (*channel).into());
                v1::TIMESTAMP.set(&mut word, *timestamp);
                v1::ADC_COUNTS.set(&mut word, (*adc_counts).into());
                v1::FIFO_HALF.set(&mut word, (*fifo_half).into());
                v1::FIFO_FULL.set(&mut word, (*fifo_full).into());
            }
            V1Payload::Test { counter } => {
                v1::COUNTER.set(&mut word, (*counter).into());
            }
            V1Payload::ConfigWrite { register, value } | V1Payload::ConfigRead { register, value } => {
                v1::REGISTER.set(&mut word, (*register).into());
                v1::VALUE.set(&mut word, (*value).into());
            }
        }
        word
    }

    /// Pack this packet into its 54-bit word, using the stored parity bit
    pub fn to_word(&self) -> u64 {
        let mut word = self.word_without_parity();
        v1::PARITY.set(&mut word, self.parity.into());
        word
    }

    /// Set the parity bit so the packed word has odd parity
    pub fn assign_parity(&mut self) {
        self.parity = odd_parity_bit(self.word_without_parity());
        self.valid_parity = true;
    }

    /// Unpack a 54-bit word; bits above the word are ignored
    pub fn from_word(word: u64, chip_key: impl Into<String>) -> Self {
        let word = word & ((1u64 << V1_WORD_BITS) - 1);
        let payload = match PacketType::from_code(v1::PACKET_TYPE.get(word) as u8) {
            Ok(PacketType::Test) => V1Payload::Test {
                counter: v1::COUNTER.get(word) as u32,
            },
            Ok(PacketType::ConfigWrite) => V1Payload::ConfigWrite {
                register: v1::REGISTER.get(word) as u8,
                value: v1::VALUE.get(word) as u8,
            },
            Ok(PacketType::ConfigRead) => V1Payload::ConfigRead {
                register: v1::REGISTER.get(word) as u8,
                value: v1::VALUE.get(word) as u8,
            },
            _ => V1Payload::Data {
                channel: v1::CHANNEL.get(word) as u8,
                timestamp: v1::TIMESTAMP.get(word),
                adc_counts: v1::ADC_COUNTS.get(word) as u8,
                fifo_half: flag(v1::FIFO_HALF.get(word)),
                fifo_full: flag(v1::FIFO_FULL.get(word)),
            },
        };

        Self {
            chip_key: chip_key.into(),
            chip_id: v1::CHIP_ID.get(word) as u8,
            parity: v1::PARITY.get(word) as u8,
            valid_parity: has_odd_parity(word),
            direction: Direction::default(),
            payload,
        }
    }

    /// Wire bytes (7, least significant first)
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_word().to_le_bytes()[..V1_WORD_BYTES].to_vec()
    }

    /// Parse 7 wire bytes
    pub fn from_bytes(bytes: &[u8], chip_key: impl Into<String>) -> Result<Self, PacketError> {
        let word = word_from_bytes(bytes, V1_WORD_BYTES)?;
        Ok(Self::from_word(word, chip_key))
    }
}

// ============================================================================
// Generation 2
// ============================================================================

impl PacketV2 {
    fn word_without_parity(&self) -> u64 {
        let mut word = 0u64;
        v2::PACKET_TYPE.set(&mut word, self.packet_type().code().into());
        v2::CHIP_ID.set(&mut word, self.chip_id.into());
        v2::DOWNSTREAM_MARKER.set(&mut word, self.downstream_marker.into());
        match &self.payload {
            V2Payload::Data(data) => {
                v2::CHANNEL_ID.set(&mut word, data.channel_id.into());
                v2::DATAWORD.set(&mut word, data.dataword.into());
                v2::TRIGGER_TYPE.set(&mut word, data.trigger_type.into());
                if data.fifo_diagnostics_enabled {
                    v2::DIAG_TIMESTAMP.set(&mut word, data.timestamp);
                    v2::SHARED_FIFO_EVENTS.set(&mut word, data.shared_fifo.into());
                    v2::LOCAL_FIFO_EVENTS.set(&mut word, data.local_fifo.into());
                } else {
                    v2::TIMESTAMP.set(&mut word, data.timestamp);
                    v2::LOCAL_FIFO.set(&mut word, data.local_fifo.into());
                    v2::SHARED_FIFO.set(&mut word, data.shared_fifo.into());
                }
            }
            V2Payload::Test { counter } => {
                v2::COUNTER.set(&mut word, (*counter).into());
            }
            V2Payload::ConfigWrite {
                register_address,
                register_data,
            }
            | V2Payload::ConfigRead {
                register_address,
                register_data,
            } => {
                v2::REGISTER_ADDRESS.set(&mut word, (*register_address).into());
                v2::REGISTER_DATA.set(&mut word, (*register_data).into());
            }
        }
        word
    }

    /// Pack this packet into its 64-bit word, using the stored parity bit
    pub fn to_word(&self) -> u64 {
        let mut word = self.word_without_parity();
        v2::PARITY.set(&mut word, self.parity.into());
        word
    }

    /// Set the parity bit so the packed word has odd parity
    pub fn assign_parity(&mut self) {
        self.parity = odd_parity_bit(self.word_without_parity());
        self.valid_parity = true;
    }

    /// Unpack a 64-bit word
    ///
    /// The word does not say whether FIFO diagnostics were enabled on the
    /// chip, so the caller supplies it; with diagnostics the data timestamp is
    /// the short diagnostic slot and the FIFO fields are event counts.
    pub fn from_word(word: u64, io_group: u8, io_channel: u8, fifo_diagnostics: bool) -> Self {
        let payload = match PacketType::from_code(v2::PACKET_TYPE.get(word) as u8) {
            Ok(PacketType::Test) => V2Payload::Test {
                counter: v2::COUNTER.get(word) as u32,
            },
            Ok(PacketType::ConfigWrite) => V2Payload::ConfigWrite {
                register_address: v2::REGISTER_ADDRESS.get(word) as u8,
                register_data: v2::REGISTER_DATA.get(word) as u8,
            },
            Ok(PacketType::ConfigRead) => V2Payload::ConfigRead {
                register_address: v2::REGISTER_ADDRESS.get(word) as u8,
                register_data: v2::REGISTER_DATA.get(word) as u8,
            },
            _ => {
                let mut data = V2Data {
                    channel_id: v2::CHANNEL_ID.get(word) as u8,
                    timestamp: v2::TIMESTAMP.get(word),
                    dataword: v2::DATAWORD.get(word) as u8,
                    trigger_type: v2::TRIGGER_TYPE.get(word) as u8,
                    local_fifo: v2::LOCAL_FIFO.get(word) as u8,
                    shared_fifo: v2::SHARED_FIFO.get(word) as u8,
                    fifo_diagnostics_enabled: false,
                };
                if fifo_diagnostics {
                    data.fifo_diagnostics_enabled = true;
                    data.timestamp = v2::DIAG_TIMESTAMP.get(word);
                    data.local_fifo = v2::LOCAL_FIFO_EVENTS.get(word) as u8;
                    data.shared_fifo = v2::SHARED_FIFO_EVENTS.get(word) as u8;
                }
                V2Payload::Data(data)
            }
        };

        Self {
            io_group,
            io_channel,
            chip_id: v2::CHIP_ID.get(word) as u8,
            downstream_marker: v2::DOWNSTREAM_MARKER.get(word) as u8,
            parity: v2::PARITY.get(word) as u8,
            valid_parity: has_odd_parity(word),
            direction: Direction::default(),
            payload,
        }
    }

    /// Wire bytes (8, least significant first)
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_word().to_le_bytes().to_vec()
    }

    /// Parse 8 wire bytes
    pub fn from_bytes(
        bytes: &[u8],
        io_group: u8,
        io_channel: u8,
        fifo_diagnostics: bool,
    ) -> Result<Self, PacketError> {
        let word = word_from_bytes(bytes, V2_WORD_BYTES)?;
        Ok(Self::from_word(word, io_group, io_channel, fifo_diagnostics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bit_range_set_get() {
        let mut word = 0u64;
        v2::TIMESTAMP.set(&mut word, 0x7fff_ffff);
        assert_eq!(v2::TIMESTAMP.get(word), 0x7fff_ffff);
        assert_eq!(word, 0x7fff_ffffu64 << 16);

        // Overwide values are truncated to the range
        v1::CHANNEL.set(&mut word, 0xff);
        assert_eq!(v1::CHANNEL.get(word), 0x7f);
    }

    #[test]
    fn test_v1_chip_id_position() {
        let packet = PacketV1 {
            chip_id: 100,
            ..Default::default()
        };
        assert_eq!(packet.to_bytes()[..2], [0x90, 0x01]);
    }

    #[test]
    fn test_v1_assign_parity() {
        let mut packet = PacketV1 {
            chip_id: 3,
            payload: V1Payload::ConfigWrite {
                register: 10,
                value: 0x55,
            },
            ..Default::default()
        };
        packet.assign_parity();
        assert!(has_odd_parity(packet.to_word()));

        let decoded = PacketV1::from_word(packet.to_word(), "");
        assert!(decoded.valid_parity);
        assert_eq!(decoded.parity, packet.parity);
    }

    #[test]
    fn test_bad_parity_keeps_fields() {
        let mut packet = PacketV2 {
            chip_id: 20,
            payload: V2Payload::Test { counter: 1234 },
            ..Default::default()
        };
        packet.assign_parity();
        let flipped = packet.to_word() ^ (1 << 63);

        let decoded = PacketV2::from_word(flipped, 0, 0, false);
        assert!(!decoded.valid_parity);
        assert_eq!(decoded.chip_id, 20);
        assert_eq!(decoded.payload, V2Payload::Test { counter: 1234 });
    }

    #[test]
    fn test_v2_diagnostics_layout() {
        let packet = PacketV2 {
            chip_id: 7,
            payload: V2Payload::Data(V2Data {
                timestamp: 0x4_0001,
                local_fifo: 7,
                shared_fifo: 200,
                fifo_diagnostics_enabled: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        let word = packet.to_word();
        assert_eq!(v2::LOCAL_FIFO_EVENTS.get(word), 7);
        assert_eq!(v2::SHARED_FIFO_EVENTS.get(word), 200);
        assert_eq!(v2::DIAG_TIMESTAMP.get(word), 0x4_0001);

        let decoded = PacketV2::from_word(word, 1, 1, true);
        assert_eq!(decoded.payload, packet.payload);
    }

    #[test]
    fn test_wrong_length() {
        assert_eq!(
            PacketV2::from_bytes(&[0; 7], 1, 1, false),
            Err(PacketError::WordLength {
                expected: 8,
                actual: 7
            })
        );
        assert!(PacketV1::from_bytes(&[0; 8], "").is_err());
    }

    fn v1_payload() -> impl Strategy<Value = V1Payload> {
        prop_oneof![
            (0u8..128, 0u64..(1 << 24), any::<u8>(), any::<bool>(), any::<bool>()).prop_map(
                |(channel, timestamp, adc_counts, fifo_half, fifo_full)| V1Payload::Data {
                    channel,
                    timestamp,
                    adc_counts,
                    fifo_half,
                    fifo_full,
                }
            ),
            (0u32..(1 << 16)).prop_map(|counter| V1Payload::Test { counter }),
            (any::<u8>(), any::<u8>())
                .prop_map(|(register, value)| V1Payload::ConfigWrite { register, value }),
            (any::<u8>(), any::<u8>())
                .prop_map(|(register, value)| V1Payload::ConfigRead { register, value }),
        ]
    }

    fn v2_payload() -> impl Strategy<Value = V2Payload> {
        let flags = (
            0u8..64,
            0u64..(1 << 31),
            any::<u8>(),
            0u8..4,
            0u8..4,
            0u8..4,
        )
            .prop_map(|(channel_id, timestamp, dataword, trigger_type, local, shared)| {
                V2Payload::Data(V2Data {
                    channel_id,
                    timestamp,
                    dataword,
                    trigger_type,
                    local_fifo: local,
                    shared_fifo: shared,
                    fifo_diagnostics_enabled: false,
                })
            });
        prop_oneof![
            flags,
            (0u32..(1 << 16)).prop_map(|counter| V2Payload::Test { counter }),
            (any::<u8>(), any::<u8>()).prop_map(|(a, d)| V2Payload::ConfigWrite {
                register_address: a,
                register_data: d,
            }),
            (any::<u8>(), any::<u8>()).prop_map(|(a, d)| V2Payload::ConfigRead {
                register_address: a,
                register_data: d,
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_v1_word_roundtrip(chip_id in any::<u8>(), payload in v1_payload()) {
            let mut packet = PacketV1 {
                chip_key: "1-1-1".into(),
                chip_id,
                payload,
                ..Default::default()
            };
            packet.assign_parity();

            let decoded = PacketV1::from_bytes(&packet.to_bytes(), "1-1-1").unwrap();
            prop_assert_eq!(decoded, packet);
        }

        #[test]
        fn prop_v2_word_roundtrip(chip_id in any::<u8>(), marker in 0u8..2, payload in v2_payload()) {
            let mut packet = PacketV2 {
                io_group: 1,
                io_channel: 4,
                chip_id,
                downstream_marker: marker,
                payload,
                ..Default::default()
            };
            packet.assign_parity();

            let decoded = PacketV2::from_bytes(&packet.to_bytes(), 1, 4, false).unwrap();
            prop_assert_eq!(decoded, packet);
        }
    }
}
