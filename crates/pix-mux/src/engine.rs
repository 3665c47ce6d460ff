//! Multiplexer engine
//!
//! Routes packets and administrative commands to the board serving each
//! chip's io-group, and collects published packets from every board.

use std::collections::HashMap;

use pix_packet::command::{is_ping_ack, parse_packet_count};
use pix_packet::{BoardCommand, ChipKey, EncodeCommand, Packet, StreamDecoder};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::channel::{CommandChannel, FramedStreamChannel, LineCommandChannel, StreamChannel};
use crate::config::{EndpointConfig, MultiplexerConfig};
use crate::error::{MuxError, Result};

/// Whether stream channels accept published messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenState {
    #[default]
    NotListening,
    Listening,
}

/// Routing fields of a chip key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipRoute {
    pub chip_id: u8,
    /// Daisy chain on the board, one less than the key's io-channel
    pub io_chain: u8,
    /// Board serving the key's io-group
    pub address: String,
}

/// Output of one [`Multiplexer::drain`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainResult {
    /// Packets decoded from every received message, in receive order
    pub packets: Vec<Packet>,
    /// Concatenated raw payloads of the received messages
    pub bytestream: Vec<u8>,
    /// Number of messages received
    pub messages: usize,
}

struct Endpoint<C, S> {
    config: EndpointConfig,
    command: C,
    stream: S,
    decoder: StreamDecoder,
}

/// The multiplexer engine
///
/// Owns one command channel and one stream channel per configured endpoint.
/// All operations take `&mut self`; commands await each reply before the next
/// request is sent.
pub struct Multiplexer<C = LineCommandChannel<TcpStream>, S = FramedStreamChannel> {
    config: MultiplexerConfig,
    endpoints: Vec<Endpoint<C, S>>,
    by_address: HashMap<String, usize>,
    by_io_group: HashMap<u8, usize>,
    state: ListenState,
    sender_replies: HashMap<String, Vec<Vec<u8>>>,
}

impl Multiplexer {
    /// Connect to every configured endpoint over TCP
    pub async fn connect(config: MultiplexerConfig) -> Result<Self> {
        config.validate()?;
        let mut channels = Vec::with_capacity(config.endpoints.len());
        for endpoint in &config.endpoints {
            let command = LineCommandChannel::connect(&config.command_address(endpoint)).await?;
            let stream = FramedStreamChannel::connect(
                &config.stream_address(endpoint),
                config.high_water_mark,
            )
            .await?;
            channels.push((command, stream));
        }
        Self::with_channels(config, channels)
    }
}

impl<C, S> Multiplexer<C, S>
where
    C: CommandChannel,
    S: StreamChannel,
{
    /// Create over already established channels, one pair per endpoint in
    /// configuration order
    pub fn with_channels(config: MultiplexerConfig, channels: Vec<(C, S)>) -> Result<Self> {
        config.validate()?;
        if channels.len() != config.endpoints.len() {
            return Err(MuxError::Config(format!(
                "{} endpoints configured but {} channel pairs given",
                config.endpoints.len(),
                channels.len()
            )));
        }

        let mut by_address = HashMap::new();
        let mut by_io_group = HashMap::new();
        let mut endpoints = Vec::with_capacity(channels.len());
        for (index, (endpoint, (command, stream))) in
            config.endpoints.iter().zip(channels).enumerate()
        {
            by_address.insert(endpoint.address.clone(), index);
            by_io_group.insert(endpoint.io_group, index);
            let decoder = StreamDecoder::new(endpoint.io_group, config.generation)
                .with_fifo_diagnostics(config.fifo_diagnostics);
            endpoints.push(Endpoint {
                config: endpoint.clone(),
                command,
                stream,
                decoder,
            });
        }
        info!("multiplexer ready with {} endpoints", endpoints.len());

        Ok(Self {
            config,
            endpoints,
            by_address,
            by_io_group,
            state: ListenState::NotListening,
            sender_replies: HashMap::new(),
        })
    }

    /// Get the current configuration
    pub fn config(&self) -> &MultiplexerConfig {
        &self.config
    }

    /// Endpoint addresses in configuration order
    pub fn addresses(&self) -> Vec<&str> {
        self.endpoints
            .iter()
            .map(|e| e.config.address.as_str())
            .collect()
    }

    pub fn listen_state(&self) -> ListenState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == ListenState::Listening
    }

    /// Subscribe every stream channel
    pub fn start_listening(&mut self) -> Result<()> {
        if self.is_listening() {
            return Err(MuxError::EndpointState("listening"));
        }
        for endpoint in &mut self.endpoints {
            endpoint.stream.subscribe();
        }
        self.state = ListenState::Listening;
        debug!("listening on {} streams", self.endpoints.len());
        Ok(())
    }

    /// Unsubscribe every stream channel
    pub fn stop_listening(&mut self) -> Result<()> {
        if !self.is_listening() {
            return Err(MuxError::EndpointState("not listening"));
        }
        for endpoint in &mut self.endpoints {
            endpoint.stream.unsubscribe();
        }
        self.state = ListenState::NotListening;
        debug!("stopped listening");
        Ok(())
    }

    /// Replies to the last [`send`](Self::send), per endpoint address
    pub fn sender_replies(&self) -> &HashMap<String, Vec<Vec<u8>>> {
        &self.sender_replies
    }

    /// Forward packets to the boards serving their chips
    ///
    /// Every packet is routed and encoded before anything is sent, so an
    /// unroutable packet fails the whole call without side effects. Replies
    /// from the previous call are discarded.
    pub async fn send(&mut self, packets: &[Packet]) -> Result<()> {
        let mut requests = Vec::with_capacity(packets.len());
        for packet in packets {
            let (word, key) = match packet {
                Packet::V1(p) => (p.to_bytes(), p.parsed_chip_key()?),
                Packet::V2(p) => (p.to_bytes(), p.chip_key()),
                Packet::Timestamp(_) | Packet::Message(_) => {
                    return Err(MuxError::Unsendable(packet.packet_type().name()))
                }
            };
            let index = self.io_group_index(key.io_group)?;
            let command = BoardCommand::SendWord {
                word,
                io_chain: key.io_chain()?,
            };
            requests.push((index, command.encode()));
        }

        self.sender_replies.clear();
        for (index, message) in requests {
            let endpoint = &mut self.endpoints[index];
            let reply = endpoint.command.request(&message).await?;
            self.sender_replies
                .entry(endpoint.config.address.clone())
                .or_default()
                .push(reply);
        }
        debug!("sent {} packets", packets.len());
        Ok(())
    }

    /// Receive every ready message without waiting
    ///
    /// Polls the stream channels in rounds, taking at most one message per
    /// channel per round, until no channel has a message ready or
    /// `high_water_mark` messages have been received. Messages that fail to
    /// decode contribute their bytes but no packets.
    pub fn drain(&mut self) -> DrainResult {
        let limit = self.config.high_water_mark;
        let mut result = DrainResult::default();

        'rounds: while result.messages < limit {
            let mut received = false;
            for endpoint in &mut self.endpoints {
                if result.messages >= limit {
                    break 'rounds;
                }
                let Some(message) = endpoint.stream.try_recv() else {
                    continue;
                };
                received = true;
                result.messages += 1;
                match endpoint.decoder.decode(&message) {
                    Ok(packets) => result.packets.extend(packets),
                    Err(e) => warn!(
                        "skipping message from {}: {}",
                        endpoint.config.address, e
                    ),
                }
                result.bytestream.extend_from_slice(&message);
            }
            if !received {
                break;
            }
        }

        if result.messages > 0 {
            debug!(
                "drained {} messages, {} packets",
                result.messages,
                result.packets.len()
            );
        }
        result
    }

    /// Messages ready across all stream channels
    pub fn pending(&self) -> usize {
        self.endpoints.iter().map(|e| e.stream.pending()).sum()
    }

    /// Reset the given boards, or all of them
    pub async fn reset(&mut self, addresses: Option<&[&str]>) -> Result<HashMap<String, Vec<u8>>> {
        self.broadcast(&BoardCommand::Reset, addresses).await
    }

    /// Set the ASIC clock frequency of the given boards, or all of them
    pub async fn set_clock(
        &mut self,
        freq_khz: u32,
        addresses: Option<&[&str]>,
    ) -> Result<HashMap<String, Vec<u8>>> {
        self.broadcast(&BoardCommand::SetClock { freq_khz }, addresses)
            .await
    }

    /// Set the test pulse divisor of one board
    pub async fn set_testpulse_freq(&mut self, divisor: u32, address: &str) -> Result<Vec<u8>> {
        let index = self.address_index(address)?;
        self.request(index, &BoardCommand::SetTestPulse { divisor })
            .await
    }

    /// Packets a board has counted on one io-chain
    pub async fn get_packet_count(&mut self, io_chain: u8, address: &str) -> Result<u64> {
        let index = self.address_index(address)?;
        let reply = self
            .request(index, &BoardCommand::GetStat { io_chain })
            .await?;
        parse_packet_count(&reply).map_err(|_| MuxError::InvalidReply {
            address: address.to_string(),
            reply: String::from_utf8_lossy(&reply).into_owned(),
        })
    }

    /// Heartbeat the given boards, or all of them
    ///
    /// A board is healthy when its reply starts with `OK`.
    pub async fn ping(&mut self, addresses: Option<&[&str]>) -> Result<HashMap<String, bool>> {
        let replies = self.broadcast(&BoardCommand::Ping, addresses).await?;
        Ok(replies
            .into_iter()
            .map(|(address, reply)| (address, is_ping_ack(&reply)))
            .collect())
    }

    /// Drop every channel, aborting stream readers
    pub fn close(self) {
        info!("closing {} endpoints", self.endpoints.len());
    }

    /// Chip key for a chip on a board's io-chain
    pub fn generate_chip_key(&self, chip_id: u8, io_chain: u8, address: &str) -> Result<ChipKey> {
        let index = self.address_index(address)?;
        let io_group = self.endpoints[index].config.io_group;
        Ok(ChipKey::from_io_chain(io_group, io_chain, chip_id)?)
    }

    /// Board, io-chain and chip id addressed by a chip key
    pub fn parse_chip_key(&self, key: &ChipKey) -> Result<ChipRoute> {
        let index = self.io_group_index(key.io_group)?;
        Ok(ChipRoute {
            chip_id: key.chip_id,
            io_chain: key.io_chain()?,
            address: self.endpoints[index].config.address.clone(),
        })
    }

    fn address_index(&self, address: &str) -> Result<usize> {
        self.by_address
            .get(address)
            .copied()
            .ok_or_else(|| MuxError::UnknownEndpoint(address.to_string()))
    }

    fn io_group_index(&self, io_group: u8) -> Result<usize> {
        self.by_io_group
            .get(&io_group)
            .copied()
            .ok_or(MuxError::UnknownIoGroup(io_group))
    }

    fn targets(&self, addresses: Option<&[&str]>) -> Result<Vec<usize>> {
        match addresses {
            None => Ok((0..self.endpoints.len()).collect()),
            Some(addresses) => addresses.iter().map(|a| self.address_index(a)).collect(),
        }
    }

    async fn request(&mut self, index: usize, command: &BoardCommand) -> Result<Vec<u8>> {
        let endpoint = &mut self.endpoints[index];
        debug!("{} -> {}", command.name(), endpoint.config.address);
        endpoint.command.request(&command.encode()).await
    }

    async fn broadcast(
        &mut self,
        command: &BoardCommand,
        addresses: Option<&[&str]>,
    ) -> Result<HashMap<String, Vec<u8>>> {
        let mut replies = HashMap::new();
        for index in self.targets(addresses)? {
            let reply = self.request(index, command).await?;
            replies.insert(self.endpoints[index].config.address.clone(), reply);
        }
        Ok(replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Scripted {
        requests: Vec<Vec<u8>>,
    }

    impl CommandChannel for Scripted {
        async fn request(&mut self, message: &[u8]) -> Result<Vec<u8>> {
            self.requests.push(message.to_vec());
            Ok(b"OK".to_vec())
        }
    }

    #[derive(Default)]
    struct Queued {
        messages: VecDeque<Vec<u8>>,
        subscribed: bool,
    }

    impl StreamChannel for Queued {
        fn subscribe(&mut self) {
            self.subscribed = true;
        }

        fn unsubscribe(&mut self) {
            self.subscribed = false;
        }

        fn try_recv(&mut self) -> Option<Vec<u8>> {
            self.messages.pop_front()
        }

        fn pending(&self) -> usize {
            self.messages.len()
        }
    }

    fn mux(groups: &[u8]) -> Multiplexer<Scripted, Queued> {
        let endpoints = groups
            .iter()
            .map(|g| EndpointConfig::new(format!("board-{}", g), *g))
            .collect();
        let channels = groups.iter().map(|_| Default::default()).collect();
        Multiplexer::with_channels(MultiplexerConfig::with_endpoints(endpoints), channels).unwrap()
    }

    #[test]
    fn test_channel_count_must_match() {
        let config = MultiplexerConfig::with_endpoints(vec![EndpointConfig::new("a", 1)]);
        let result = Multiplexer::<Scripted, Queued>::with_channels(config, Vec::new());
        assert!(matches!(result, Err(MuxError::Config(_))));
    }

    #[test]
    fn test_listening_transitions() {
        let mut mux = mux(&[1, 2]);
        assert_eq!(mux.listen_state(), ListenState::NotListening);
        assert!(matches!(
            mux.stop_listening(),
            Err(MuxError::EndpointState(_))
        ));
        mux.start_listening().unwrap();
        assert!(mux.endpoints.iter().all(|e| e.stream.subscribed));
        assert!(matches!(
            mux.start_listening(),
            Err(MuxError::EndpointState(_))
        ));
        mux.stop_listening().unwrap();
        assert!(mux.endpoints.iter().all(|e| !e.stream.subscribed));
        mux.start_listening().unwrap();
    }

    #[test]
    fn test_drain_round_robin_and_cap() {
        let mut mux = mux(&[1, 2]);
        mux.config.high_water_mark = 3;
        mux.endpoints[0].stream.messages = (0..4u8).map(|i| vec![b'a', i]).collect();
        mux.endpoints[1].stream.messages = (0..2u8).map(|i| vec![b'b', i]).collect();

        let first = mux.drain();
        assert_eq!(first.messages, 3);
        assert!(first.packets.is_empty());
        assert_eq!(first.bytestream, vec![b'a', 0, b'b', 0, b'a', 1]);

        let second = mux.drain();
        assert_eq!(second.messages, 3);
        assert_eq!(second.bytestream, vec![b'b', 1, b'a', 2, b'a', 3]);
        assert_eq!(mux.drain(), DrainResult::default());
    }

    #[tokio::test]
    async fn test_send_rejects_before_sending() {
        let mut mux = mux(&[1]);
        let good = Packet::V2(pix_packet::PacketV2 {
            io_group: 1,
            io_channel: 1,
            ..Default::default()
        });
        let stray = Packet::V2(pix_packet::PacketV2 {
            io_group: 9,
            io_channel: 1,
            ..Default::default()
        });
        assert!(matches!(
            mux.send(&[good.clone(), stray]).await,
            Err(MuxError::UnknownIoGroup(9))
        ));
        assert!(mux.endpoints[0].command.requests.is_empty());

        let timestamp = Packet::Timestamp(pix_packet::TimestampPacket { timestamp: 1 });
        assert!(matches!(
            mux.send(&[timestamp]).await,
            Err(MuxError::Unsendable(_))
        ));

        mux.send(&[good]).await.unwrap();
        assert_eq!(
            mux.endpoints[0].command.requests,
            vec![b"SNDWORD 0x000000000000000000 0".to_vec()]
        );
    }
}
