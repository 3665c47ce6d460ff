//! Simulated board stream publisher

use std::io;

use pix_packet::stream::frame;
use pix_packet::{PacketV2, StreamMessage, StreamWord, V2Data, V2Payload};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Writes framed stream messages to a subscriber connection
pub struct StreamPublisher<W> {
    io: W,
    unix_time: u32,
    published: usize,
}

impl<W> StreamPublisher<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(io: W) -> Self {
        Self {
            io,
            unix_time: 0,
            published: 0,
        }
    }

    /// Messages written so far
    pub fn published(&self) -> usize {
        self.published
    }

    /// Publish one message
    pub async fn publish(&mut self, message: &StreamMessage) -> io::Result<()> {
        self.publish_raw(&message.encode()).await
    }

    /// Publish a data message carrying packet words received on `io_chain`
    pub async fn publish_words(&mut self, io_chain: u8, words: &[u64]) -> io::Result<()> {
        self.unix_time += 1;
        let words = words
            .iter()
            .map(|w| StreamWord::packet(io_chain, self.unix_time, *w))
            .collect();
        self.publish(&StreamMessage::data(self.unix_time, words)).await
    }

    /// Publish an arbitrary payload behind a length prefix
    pub async fn publish_raw(&mut self, payload: &[u8]) -> io::Result<()> {
        self.io.write_all(&frame(payload)).await?;
        self.io.flush().await?;
        self.published += 1;
        trace!("published stream message #{} ({} bytes)", self.published, payload.len());
        Ok(())
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.io
    }
}

/// A generation-2 data packet word with valid parity
pub fn data_word(chip_id: u8, channel_id: u8, timestamp: u64, dataword: u8) -> u64 {
    let mut packet = PacketV2 {
        chip_id,
        payload: V2Payload::Data(V2Data {
            channel_id,
            timestamp,
            dataword,
            ..Default::default()
        }),
        ..Default::default()
    };
    packet.assign_parity();
    packet.to_word()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pix_packet::stream::FRAME_HEADER_LEN;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_publish_frames_messages() {
        let (writer, mut reader) = tokio::io::duplex(4096);
        let mut publisher = StreamPublisher::new(writer);
        publisher
            .publish_words(0, &[data_word(1, 2, 3, 4)])
            .await
            .unwrap();
        assert_eq!(publisher.published(), 1);

        let mut len = [0u8; FRAME_HEADER_LEN];
        reader.read_exact(&mut len).await.unwrap();
        let mut payload = vec![0u8; u32::from_le_bytes(len) as usize];
        reader.read_exact(&mut payload).await.unwrap();

        let message = StreamMessage::parse(&payload).unwrap();
        assert_eq!(message.words.len(), 1);
        assert_eq!(message.words[0].word, data_word(1, 2, 3, 4));
    }
}
