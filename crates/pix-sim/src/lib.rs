//! Readout Board Simulation Library
//!
//! This crate simulates a front-end readout board for testing the multiplexer
//! without hardware. It includes:
//!
//! - **SimBoard**: answers board command lines and records what it was sent
//! - **run_command_task**: serves a `SimBoard` over any async byte stream
//! - **StreamPublisher**: writes length-prefixed stream messages, as a board
//!   publishes received packets
//!
//! # Example
//!
//! ```rust
//! use pix_sim::SimBoard;
//!
//! let mut board = SimBoard::new("board-1");
//! board.set_packet_count(0, 42);
//!
//! assert_eq!(board.process_command(b"GETSTAT 0"), b"42 packets".to_vec());
//! assert_eq!(board.process_command(b"PING_HB"), b"OK".to_vec());
//! assert_eq!(board.process_command(b"BOGUS"), b"ERR invalid board command: BOGUS".to_vec());
//! ```

pub mod board;
pub mod publisher;

pub use board::{run_command_task, SimBoard};
pub use publisher::{data_word, StreamPublisher};
