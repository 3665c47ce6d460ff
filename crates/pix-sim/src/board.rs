//! Simulated board command responder

use std::collections::HashMap;
use std::io;

use pix_packet::BoardCommand;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// Reply to every accepted command other than `GETSTAT`
pub const REPLY_OK: &[u8] = b"OK";

/// A simulated front-end board
#[derive(Debug, Clone)]
pub struct SimBoard {
    id: String,
    received: Vec<BoardCommand>,
    packet_counts: HashMap<u8, u64>,
    clock_khz: Option<u32>,
    testpulse_divisor: Option<u32>,
    resets: usize,
    healthy: bool,
}

impl SimBoard {
    /// Create a healthy board with no traffic
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            received: Vec::new(),
            packet_counts: HashMap::new(),
            clock_khz: None,
            testpulse_divisor: None,
            resets: 0,
            healthy: true,
        }
    }

    /// Get the board ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Set the count `GETSTAT` reports for an io-chain
    pub fn set_packet_count(&mut self, io_chain: u8, count: u64) {
        self.packet_counts.insert(io_chain, count);
    }

    /// Make heartbeats fail
    pub fn set_healthy(&mut self, healthy: bool) {
        self.healthy = healthy;
    }

    /// Every command accepted so far, in order
    pub fn received_commands(&self) -> &[BoardCommand] {
        &self.received
    }

    /// `(io_chain, word)` of every forwarded packet word
    pub fn sent_words(&self) -> Vec<(u8, Vec<u8>)> {
        self.received
            .iter()
            .filter_map(|cmd| match cmd {
                BoardCommand::SendWord { word, io_chain } => Some((*io_chain, word.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clock_khz(&self) -> Option<u32> {
        self.clock_khz
    }

    pub fn testpulse_divisor(&self) -> Option<u32> {
        self.testpulse_divisor
    }

    pub fn resets(&self) -> usize {
        self.resets
    }

    /// Handle one command line and produce the reply line
    pub fn process_command(&mut self, line: &[u8]) -> Vec<u8> {
        let command = match BoardCommand::parse(line) {
            Ok(command) => command,
            Err(e) => {
                warn!("Sim board {} rejected command: {}", self.id, e);
                return format!("ERR {}", e).into_bytes();
            }
        };
        debug!("Sim board {} processing {:?}", self.id, command);

        let reply = match &command {
            BoardCommand::SendWord { io_chain, .. } => {
                *self.packet_counts.entry(*io_chain).or_insert(0) += 1;
                REPLY_OK.to_vec()
            }
            BoardCommand::Reset => {
                self.resets += 1;
                self.packet_counts.clear();
                REPLY_OK.to_vec()
            }
            BoardCommand::SetClock { freq_khz } => {
                self.clock_khz = Some(*freq_khz);
                REPLY_OK.to_vec()
            }
            BoardCommand::SetTestPulse { divisor } => {
                self.testpulse_divisor = Some(*divisor);
                REPLY_OK.to_vec()
            }
            BoardCommand::GetStat { io_chain } => {
                let count = self.packet_counts.get(io_chain).copied().unwrap_or(0);
                format!("{} packets", count).into_bytes()
            }
            BoardCommand::Ping => {
                if self.healthy {
                    REPLY_OK.to_vec()
                } else {
                    b"ERR unhealthy".to_vec()
                }
            }
        };
        self.received.push(command);
        reply
    }
}

/// Serve newline-terminated command lines until the peer closes the stream
///
/// Returns the board so callers can inspect what it received.
pub async fn run_command_task<S>(stream: S, mut board: SimBoard) -> io::Result<SimBoard>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    info!("Starting sim board command task for {}", board.id());
    let mut stream = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = stream.read_until(b'\n', &mut line).await?;
        if n == 0 {
            debug!("Sim board {} command stream closed", board.id());
            break;
        }

        let mut reply = board.process_command(&line);
        reply.push(b'\n');
        stream.get_mut().write_all(&reply).await?;
        stream.get_mut().flush().await?;
    }

    info!("Sim board command task ended for {}", board.id());
    Ok(board)
}
