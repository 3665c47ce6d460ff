//! Board command lines
//!
//! A front-end board accepts one ASCII command per request and answers with a
//! single reply line. The transport adds and strips the line terminator, so
//! the encodings here carry none.
//!
//! | Command      | Wire form                              |
//! |--------------|----------------------------------------|
//! | send word    | `SNDWORD 0x00<word hex, MSB first> <io_chain>` |
//! | reset        | `SYRESET`                              |
//! | clock        | `SETFREQ 0x<freq_khz>`                 |
//! | test pulse   | `SETFTST 0x<divisor>`                  |
//! | packet count | `GETSTAT <io_chain>`                   |
//! | heartbeat    | `PING_HB`                              |

use std::fmt::Write as _;

use crate::error::PacketError;
use crate::EncodeCommand;

/// Reply prefix of a healthy heartbeat
pub const PING_ACK: &[u8] = b"OK";

/// A command understood by a front-end board
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BoardCommand {
    /// Forward a packet word (wire byte order) onto an io-chain
    SendWord { word: Vec<u8>, io_chain: u8 },
    /// Reset the board
    Reset,
    /// Set the ASIC clock frequency in kHz
    SetClock { freq_khz: u32 },
    /// Set the test pulse clock divisor
    SetTestPulse { divisor: u32 },
    /// Query the packet count of an io-chain
    GetStat { io_chain: u8 },
    /// Heartbeat
    Ping,
}

impl BoardCommand {
    /// Command keyword
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendWord { .. } => "SNDWORD",
            Self::Reset => "SYRESET",
            Self::SetClock { .. } => "SETFREQ",
            Self::SetTestPulse { .. } => "SETFTST",
            Self::GetStat { .. } => "GETSTAT",
            Self::Ping => "PING_HB",
        }
    }

    /// Parse a command line, ignoring surrounding whitespace
    pub fn parse(line: &[u8]) -> Result<Self, PacketError> {
        let text = std::str::from_utf8(line)
            .map_err(|_| PacketError::InvalidCommand(String::from_utf8_lossy(line).into_owned()))?;
        let invalid = || PacketError::InvalidCommand(text.trim().to_string());

        let mut parts = text.split_whitespace();
        let keyword = parts.next().ok_or_else(invalid)?;
        let args: Vec<&str> = parts.collect();

        let command = match (keyword, args.as_slice()) {
            ("SNDWORD", [hex, chain]) => {
                let digits = hex.strip_prefix("0x00").ok_or_else(invalid)?;
                let mut word = decode_hex(digits).ok_or_else(invalid)?;
                word.reverse();
                Self::SendWord {
                    word,
                    io_chain: chain.parse().map_err(|_| invalid())?,
                }
            }
            ("SYRESET", []) => Self::Reset,
            ("SETFREQ", [freq]) => Self::SetClock {
                freq_khz: parse_prefixed_hex(freq).ok_or_else(invalid)?,
            },
            ("SETFTST", [divisor]) => Self::SetTestPulse {
                divisor: parse_prefixed_hex(divisor).ok_or_else(invalid)?,
            },
            ("GETSTAT", [chain]) => Self::GetStat {
                io_chain: chain.parse().map_err(|_| invalid())?,
            },
            ("PING_HB", []) => Self::Ping,
            _ => return Err(invalid()),
        };
        Ok(command)
    }
}

impl EncodeCommand for BoardCommand {
    fn encode(&self) -> Vec<u8> {
        let line = match self {
            Self::SendWord { word, io_chain } => {
                let mut hex = String::with_capacity(word.len() * 2);
                for byte in word.iter().rev() {
                    let _ = write!(hex, "{:02x}", byte);
                }
                format!("SNDWORD 0x00{} {}", hex, io_chain)
            }
            Self::Reset => "SYRESET".to_string(),
            Self::SetClock { freq_khz } => format!("SETFREQ {:#x}", freq_khz),
            Self::SetTestPulse { divisor } => format!("SETFTST {:#x}", divisor),
            Self::GetStat { io_chain } => format!("GETSTAT {}", io_chain),
            Self::Ping => "PING_HB".to_string(),
        };
        line.into_bytes()
    }
}

/// Whether a heartbeat reply reports a healthy board
pub fn is_ping_ack(reply: &[u8]) -> bool {
    reply.starts_with(PING_ACK)
}

/// Packet count from a `GETSTAT` reply: the leading decimal token
pub fn parse_packet_count(reply: &[u8]) -> Result<u64, PacketError> {
    let text = String::from_utf8_lossy(reply);
    text.trim()
        .split(' ')
        .next()
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| PacketError::InvalidCommand(format!("bad GETSTAT reply {:?}", text)))
}

fn parse_prefixed_hex(text: &str) -> Option<u32> {
    let digits = text.strip_prefix("0x")?;
    u32::from_str_radix(digits, 16).ok()
}

fn decode_hex(digits: &str) -> Option<Vec<u8>> {
    if digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| digits.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_word_reverses_bytes() {
        let cmd = BoardCommand::SendWord {
            word: vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x88],
            io_chain: 2,
        };
        assert_eq!(cmd.encode(), b"SNDWORD 0x008807060504030201 2".to_vec());
        assert_eq!(BoardCommand::parse(&cmd.encode()).unwrap(), cmd);
    }

    #[test]
    fn test_admin_commands() {
        let cases = [
            (BoardCommand::Reset, "SYRESET"),
            (BoardCommand::SetClock { freq_khz: 10_000 }, "SETFREQ 0x2710"),
            (BoardCommand::SetTestPulse { divisor: 255 }, "SETFTST 0xff"),
            (BoardCommand::GetStat { io_chain: 0 }, "GETSTAT 0"),
            (BoardCommand::Ping, "PING_HB"),
        ];
        for (cmd, wire) in cases {
            assert_eq!(cmd.encode(), wire.as_bytes());
            assert_eq!(BoardCommand::parse(wire.as_bytes()).unwrap(), cmd);
        }
    }

    #[test]
    fn test_parse_tolerates_line_ending() {
        assert_eq!(
            BoardCommand::parse(b"GETSTAT 3\r\n").unwrap(),
            BoardCommand::GetStat { io_chain: 3 }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(BoardCommand::parse(b"").is_err());
        assert!(BoardCommand::parse(b"SNDWORD 0x01ff 1").is_err());
        assert!(BoardCommand::parse(b"SNDWORD 0x00fff 1").is_err());
        assert!(BoardCommand::parse(b"SETFREQ 100").is_err());
        assert!(BoardCommand::parse(b"SYRESET now").is_err());
        assert!(BoardCommand::parse(b"GETSTAT").is_err());
    }

    #[test]
    fn test_packet_count_reply() {
        assert_eq!(parse_packet_count(b"1234 packets").unwrap(), 1234);
        assert_eq!(parse_packet_count(b"17").unwrap(), 17);
        assert!(parse_packet_count(b"none").is_err());
    }

    #[test]
    fn test_ping_ack() {
        assert!(is_ping_ack(b"OK"));
        assert!(is_ping_ack(b"OK heartbeat"));
        assert!(!is_ping_ack(b"ERR"));
    }
}
