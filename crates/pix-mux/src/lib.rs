//! Readout Board Multiplexer
//!
//! This crate drives a set of front-end readout boards as one system. Each
//! board serves one io-group and is reached over two channels:
//!
//! - a **command channel**, one request and one newline-terminated reply at a
//!   time, carrying `SNDWORD`, `SYRESET`, `SETFREQ`, `SETFTST`, `GETSTAT` and
//!   `PING_HB`
//! - a **stream channel**, on which the board publishes length-prefixed
//!   messages holding the packets it received from its chips
//!
//! Outgoing packets are routed by the io-group of their chip key; incoming
//! messages are decoded and tagged with the io-group of the board they came
//! from.
//!
//! # Example
//!
//! ```rust,no_run
//! use pix_mux::{EndpointConfig, Multiplexer, MultiplexerConfig};
//!
//! # async fn run() -> pix_mux::Result<()> {
//! let config = MultiplexerConfig::with_endpoints(vec![
//!     EndpointConfig::new("10.0.1.6", 1),
//!     EndpointConfig::new("10.0.1.7", 2),
//! ]);
//! let mut mux = Multiplexer::connect(config).await?;
//!
//! let healthy = mux.ping(None).await?;
//! mux.start_listening()?;
//! let drained = mux.drain();
//! println!("{} packets, {:?}", drained.packets.len(), healthy);
//! mux.close();
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod engine;
pub mod error;

pub use channel::{CommandChannel, FramedStreamChannel, LineCommandChannel, StreamChannel};
pub use config::{EndpointConfig, MultiplexerConfig};
pub use engine::{ChipRoute, DrainResult, ListenState, Multiplexer};
pub use error::{MuxError, Result};
