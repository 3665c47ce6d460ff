//! Endpoint channels
//!
//! Each board is reached over two channels: a request/reply command channel
//! and a stream channel the board publishes packet messages on. The traits
//! keep the multiplexer independent of the transport; the provided
//! implementations run over any tokio byte stream, TCP in production and
//! in-memory duplex pipes in tests.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pix_packet::stream::{FRAME_HEADER_LEN, MAX_FRAME_LEN};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{MuxError, Result};

/// Request/reply connection to one board
///
/// Exactly one reply is awaited per request; requests are never pipelined.
#[allow(async_fn_in_trait)]
pub trait CommandChannel {
    /// Send one command and wait for its reply
    async fn request(&mut self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Subscription to one board's message stream
pub trait StreamChannel {
    /// Start accepting published messages
    fn subscribe(&mut self);

    /// Stop accepting published messages; later publications are dropped
    fn unsubscribe(&mut self);

    /// Next queued message, or `None` if nothing is ready right now
    fn try_recv(&mut self) -> Option<Vec<u8>>;

    /// Number of messages ready to receive
    fn pending(&self) -> usize;
}

/// Command channel exchanging newline-terminated lines
pub struct LineCommandChannel<T> {
    io: BufReader<T>,
    peer: String,
}

impl<T> LineCommandChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected byte stream
    pub fn new(io: T, peer: impl Into<String>) -> Self {
        Self {
            io: BufReader::new(io),
            peer: peer.into(),
        }
    }

    /// Name of the board this channel talks to
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl LineCommandChannel<TcpStream> {
    /// Connect to a board's command socket at `host:port`
    pub async fn connect(address: &str) -> Result<Self> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        debug!("command channel connected to {}", address);
        Ok(Self::new(stream, address))
    }
}

impl<T> CommandChannel for LineCommandChannel<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    async fn request(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        trace!("-> {}: {}", self.peer, String::from_utf8_lossy(message));
        let writer = self.io.get_mut();
        writer.write_all(message).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut reply = Vec::new();
        if self.io.read_until(b'\n', &mut reply).await? == 0 {
            return Err(MuxError::ChannelClosed(self.peer.clone()));
        }
        if reply.last() == Some(&b'\n') {
            reply.pop();
            if reply.last() == Some(&b'\r') {
                reply.pop();
            }
        }
        trace!("<- {}: {}", self.peer, String::from_utf8_lossy(&reply));
        Ok(reply)
    }
}

/// Stream channel reading length-prefixed messages in a background task
///
/// The reader task keeps at most `high_water_mark` messages queued. When the
/// queue is full it stops reading, leaving further messages in the
/// transport's buffers until the queue is drained. Messages arriving while
/// unsubscribed are read and dropped. Dropping the channel aborts the task.
pub struct FramedStreamChannel {
    rx: mpsc::Receiver<Vec<u8>>,
    subscribed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    peer: String,
    ended: bool,
}

impl FramedStreamChannel {
    /// Start reading messages from `io`; must be called within a tokio runtime
    pub fn spawn<R>(io: R, high_water_mark: usize, peer: impl Into<String>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let peer = peer.into();
        let (tx, rx) = mpsc::channel(high_water_mark.max(1));
        let subscribed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_frames(io, tx, subscribed.clone(), peer.clone()));
        Self {
            rx,
            subscribed,
            reader,
            peer,
            ended: false,
        }
    }

    /// Connect to a board's stream socket at `host:port`
    pub async fn connect(address: &str, high_water_mark: usize) -> Result<Self> {
        let stream = TcpStream::connect(address).await?;
        debug!("stream channel connected to {}", address);
        Ok(Self::spawn(stream, high_water_mark, address))
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }
}

impl StreamChannel for FramedStreamChannel {
    fn subscribe(&mut self) {
        self.subscribed.store(true, Ordering::Release);
    }

    fn unsubscribe(&mut self) {
        self.subscribed.store(false, Ordering::Release);
    }

    fn try_recv(&mut self) -> Option<Vec<u8>> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if !self.ended {
                    debug!("stream from {} ended", self.peer);
                    self.ended = true;
                }
                None
            }
        }
    }

    fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Drop for FramedStreamChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames<R>(
    mut io: R,
    tx: mpsc::Sender<Vec<u8>>,
    subscribed: Arc<AtomicBool>,
    peer: String,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let payload = match read_frame(&mut io).await {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(e) => {
                warn!("stream from {} failed: {}", peer, e);
                break;
            }
        };
        if !subscribed.load(Ordering::Acquire) {
            trace!("dropping {} byte message from {}", payload.len(), peer);
            continue;
        }
        if tx.send(payload).await.is_err() {
            break;
        }
    }
}

/// One length-prefixed payload, or `None` at a clean end of stream
async fn read_frame<R>(io: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    match io.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds {}", len, MAX_FRAME_LEN),
        ));
    }
    let mut payload = vec![0u8; len];
    io.read_exact(&mut payload).await?;
    Ok(Some(payload))
}
