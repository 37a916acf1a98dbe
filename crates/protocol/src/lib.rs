//! # Padlink Protocol
//!
//! Wire format and data model for the padlink netplay relay.
//!
//! This crate provides:
//! - `Packet` / `PacketReader`: length-prefixed packet building and checked
//!   typed extraction
//! - `FrameDecoder`: incremental framing over a TCP byte stream
//! - `ClientMessage` / `ServerMessage`: one variant per opcode, with
//!   `encode`/`decode`
//! - `Controller`, `ControllerMap` and the netplay slot allocator
//! - Error types for malformed packets
//!
//! ## Example
//!
//! ```
//! use padlink_protocol::{ClientMessage, FrameDecoder};
//!
//! // Encode a message and frame it for the wire
//! let msg = ClientMessage::Input { port: 0, input: 0xDEADBEEF };
//! let frame = msg.encode().into_frame().unwrap();
//!
//! // Decode it back from the byte stream
//! let mut decoder = FrameDecoder::new();
//! decoder.push(&frame);
//! let payload = decoder.next_frame().unwrap();
//! assert_eq!(ClientMessage::decode(payload).unwrap(), msg);
//! ```

pub mod controller;
pub mod error;
pub mod message;
pub mod packet;

pub use controller::{
    allocate_controllers, Controller, ControllerMap, ControllerSet, MAX_PLAYERS,
};
pub use error::{PacketError, PacketResult};
pub use message::{
    opcode, ClientMessage, LatencyEntry, ServerMessage, SERVER_SENDER_ID,
};
pub use packet::{FrameDecoder, Packet, PacketReader, LENGTH_PREFIX_SIZE, MAX_PAYLOAD_SIZE};

/// Protocol version sent as the first frame on every accepted connection
///
/// A client that sees a different value must close the connection.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default TCP port for the relay server
pub const DEFAULT_PORT: u16 = 6400;
