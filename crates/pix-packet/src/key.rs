//! Chip keys
//!
//! A chip key names one ASIC across the whole system as
//! `<io_group>-<io_channel>-<chip_id>`. The io-channel is numbered from 1 here;
//! board commands address the same daisy chain as `io_channel - 1` (the
//! "io-chain"). [`ChipKey::io_chain`] and [`ChipKey::from_io_chain`] are the only
//! places that offset is applied.

use std::fmt;
use std::str::FromStr;

use crate::error::PacketError;

/// Composite identifier of a single ASIC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChipKey {
    /// Group of io channels served by one endpoint
    pub io_group: u8,
    /// Daisy chain position, numbered from 1
    pub io_channel: u8,
    /// Chip id on that chain
    pub chip_id: u8,
}

impl ChipKey {
    /// Create a new chip key
    pub fn new(io_group: u8, io_channel: u8, chip_id: u8) -> Self {
        Self {
            io_group,
            io_channel,
            chip_id,
        }
    }

    /// Build a key from a transport io-chain (numbered from 0)
    pub fn from_io_chain(io_group: u8, io_chain: u8, chip_id: u8) -> Result<Self, PacketError> {
        let io_channel = io_chain.checked_add(1).ok_or_else(|| {
            PacketError::InvalidChipKey(format!("io chain {io_chain} has no io channel"))
        })?;
        Ok(Self::new(io_group, io_channel, chip_id))
    }

    /// The transport io-chain for this key (`io_channel - 1`)
    pub fn io_chain(&self) -> Result<u8, PacketError> {
        self.io_channel
            .checked_sub(1)
            .ok_or_else(|| {
                PacketError::InvalidChipKey(format!("{}: io channel 0 has no io chain", self))
            })
    }
}

impl fmt::Display for ChipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.io_group, self.io_channel, self.chip_id)
    }
}

impl FromStr for ChipKey {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const NAMES: [&str; 3] = ["io_group", "io_channel", "chip_id"];

        let parts: Vec<&str> = s.trim_end_matches('\0').split('-').collect();
        if parts.len() > NAMES.len() {
            return Err(PacketError::InvalidChipKey(s.to_string()));
        }

        let mut values = [None; 3];
        for (slot, part) in values.iter_mut().zip(&parts) {
            if part.is_empty() {
                continue;
            }
            let value = part
                .parse::<u8>()
                .map_err(|_| PacketError::InvalidChipKey(s.to_string()))?;
            *slot = Some(value);
        }

        let missing: Vec<&'static str> = NAMES
            .iter()
            .zip(values.iter())
            .filter(|(_, v)| v.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(PacketError::MissingChipKeyFields { missing });
        }

        match values {
            [Some(io_group), Some(io_channel), Some(chip_id)] => {
                Ok(Self::new(io_group, io_channel, chip_id))
            }
            _ => Err(PacketError::InvalidChipKey(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse() {
        let key = ChipKey::new(1, 3, 42);
        assert_eq!(key.to_string(), "1-3-42");
        assert_eq!("1-3-42".parse::<ChipKey>().unwrap(), key);
    }

    #[test]
    fn test_io_chain_offset() {
        let key = ChipKey::new(2, 1, 5);
        assert_eq!(key.io_chain().unwrap(), 0);
        assert_eq!(ChipKey::from_io_chain(2, 0, 5).unwrap(), key);
    }

    #[test]
    fn test_io_channel_zero_has_no_chain() {
        let key = ChipKey::new(2, 0, 5);
        assert!(matches!(key.io_chain(), Err(PacketError::InvalidChipKey(_))));
        assert!(ChipKey::from_io_chain(2, 255, 5).is_err());
    }

    #[test]
    fn test_missing_fields() {
        let err = "1--".parse::<ChipKey>().unwrap_err();
        assert_eq!(
            err,
            PacketError::MissingChipKeyFields {
                missing: vec!["io_channel", "chip_id"]
            }
        );

        let err = "".parse::<ChipKey>().unwrap_err();
        assert!(matches!(err, PacketError::MissingChipKeyFields { missing } if missing.len() == 3));
    }

    #[test]
    fn test_invalid_fields() {
        assert!(matches!(
            "a-1-2".parse::<ChipKey>(),
            Err(PacketError::InvalidChipKey(_))
        ));
        assert!(matches!(
            "1-2-3-4".parse::<ChipKey>(),
            Err(PacketError::InvalidChipKey(_))
        ));
        assert!(matches!(
            "1-2-300".parse::<ChipKey>(),
            Err(PacketError::InvalidChipKey(_))
        ));
    }
}
