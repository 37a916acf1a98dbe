//! Protocol messages for the netplay relay.
//!
//! Every packet payload starts with a one-byte opcode from [`opcode`].
//! Some opcodes are used in both directions with different payloads (a
//! client announces only its own name; the server attributes names to
//! session ids), so client-bound and server-bound messages are separate
//! enums: [`ClientMessage`] travels client → server, [`ServerMessage`]
//! travels server → client.

use crate::controller::{Controller, ControllerSet, MAX_PLAYERS};
use crate::error::{PacketError, PacketResult as Result};
use crate::packet::{Packet, PacketReader};
use bytes::Bytes;

/// Packet opcodes (first payload byte)
///
/// A stable closed set shared by both sides of the wire.
pub mod opcode {
    /// JOIN (Server → Client): a session entered the lobby
    pub const JOIN: u8 = 0x01;

    /// PROTOCOL_VERSION (Server → Client): first frame on every connection
    pub const PROTOCOL_VERSION: u8 = 0x02;

    /// PING (bidirectional): latency probe carrying a millisecond timestamp
    pub const PING: u8 = 0x03;

    /// PONG (bidirectional): echo of a PING timestamp
    pub const PONG: u8 = 0x04;

    /// LATENCY (Server → Client): measured latency table for all sessions
    pub const LATENCY: u8 = 0x05;

    /// NAME (bidirectional): session display name
    pub const NAME: u8 = 0x06;

    /// MESSAGE (bidirectional): chat text
    pub const MESSAGE: u8 = 0x07;

    /// LAG (bidirectional): frames of buffered input
    pub const LAG: u8 = 0x08;

    /// CONTROLLERS (bidirectional): local controller layout, with the
    /// netplay mapping attached on the server → client leg
    pub const CONTROLLERS: u8 = 0x09;

    /// NETPLAY_CONTROLLERS (Server → Client): the global slot assignment
    pub const NETPLAY_CONTROLLERS: u8 = 0x0A;

    /// START (bidirectional): begin the game
    pub const START: u8 = 0x0B;

    /// INPUT (bidirectional): one frame of input for a netplay port
    pub const INPUT: u8 = 0x0C;

    /// FPS (Client → Server): client-reported frame rate
    pub const FPS: u8 = 0x0D;

    /// QUIT (bidirectional): a session left
    pub const QUIT: u8 = 0x0E;
}

/// Sender id used for server-generated chat messages
pub const SERVER_SENDER_ID: i32 = -1;

/// One row of the LATENCY table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyEntry {
    pub id: u32,
    /// Measured latency in milliseconds, `-1` when not yet known
    pub latency: i32,
}

/// Messages sent by a client to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Latency probe; the server echoes the timestamp back in a `Pong`
    Ping { timestamp: u64 },
    /// Echo of a server `Ping` timestamp
    Pong { timestamp: u64 },
    /// Announce or change the display name
    Name { name: String },
    /// Chat text; the server attributes it to the sending session
    Message { text: String },
    /// Request a new lag value
    Lag { lag: u8 },
    /// Announce or change the local controller layout
    Controllers { controllers: ControllerSet },
    /// Request the game start
    Start,
    /// One frame of input for a netplay port (sender-translated)
    Input { port: u8, input: u32 },
    /// Report the emulator frame rate
    Fps { fps: i32 },
    /// Leave gracefully
    Quit,
}

impl ClientMessage {
    pub fn encode(&self) -> Packet {
        match self {
            Self::Ping { timestamp } => {
                let mut p = Packet::new(opcode::PING);
                p.put_u64(*timestamp);
                p
            }
            Self::Pong { timestamp } => {
                let mut p = Packet::new(opcode::PONG);
                p.put_u64(*timestamp);
                p
            }
            Self::Name { name } => {
                let mut p = Packet::new(opcode::NAME);
                p.put_string(name);
                p
            }
            Self::Message { text } => {
                let mut p = Packet::new(opcode::MESSAGE);
                p.put_string(text);
                p
            }
            Self::Lag { lag } => {
                let mut p = Packet::new(opcode::LAG);
                p.put_u8(*lag);
                p
            }
            Self::Controllers { controllers } => {
                let mut p = Packet::new(opcode::CONTROLLERS);
                for c in controllers {
                    c.write(&mut p);
                }
                p
            }
            Self::Start => Packet::new(opcode::START),
            Self::Input { port, input } => {
                let mut p = Packet::new(opcode::INPUT);
                p.put_u8(*port).put_u32(*input);
                p
            }
            Self::Fps { fps } => {
                let mut p = Packet::new(opcode::FPS);
                p.put_i32(*fps);
                p
            }
            Self::Quit => Packet::new(opcode::QUIT),
        }
    }

    /// Decodes a payload; a wrong-size field list (e.g. a controller array
    /// of the wrong arity) is rejected, not truncated or padded
    pub fn decode(payload: Bytes) -> Result<Self> {
        let mut r = PacketReader::new(payload);
        let op = r.get_u8()?;
        let message = match op {
            opcode::PING => Self::Ping { timestamp: r.get_u64()? },
            opcode::PONG => Self::Pong { timestamp: r.get_u64()? },
            opcode::NAME => Self::Name { name: r.get_string()? },
            opcode::MESSAGE => Self::Message { text: r.get_string()? },
            opcode::LAG => Self::Lag { lag: r.get_u8()? },
            opcode::CONTROLLERS => {
                let mut controllers = ControllerSet::default();
                for slot in controllers.iter_mut() {
                    *slot = Controller::read(&mut r)?;
                }
                Self::Controllers { controllers }
            }
            opcode::START => Self::Start,
            opcode::INPUT => Self::Input {
                port: r.get_u8()?,
                input: r.get_u32()?,
            },
            opcode::FPS => Self::Fps { fps: r.get_i32()? },
            opcode::QUIT => Self::Quit,
            other => return Err(PacketError::UnknownOpcode(other)),
        };
        if r.remaining() > 0 {
            return Err(PacketError::TrailingBytes(r.remaining()));
        }
        Ok(message)
    }
}

/// Messages sent by the server to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// First frame after accept; a mismatched client must close
    ProtocolVersion { version: u32 },
    /// A session (possibly the recipient itself) entered the lobby
    Join { id: u32, name: String },
    /// Latency probe; clients echo the timestamp back in a `Pong`
    Ping { timestamp: u64 },
    /// Echo of a client `Ping` timestamp
    Pong { timestamp: u64 },
    /// Latency table for every session
    Latency { entries: Vec<LatencyEntry> },
    /// A session changed its display name
    Name { id: u32, name: String },
    /// Chat from `sender_id`, or from the server when it is `-1`
    Message { sender_id: i32, text: String },
    /// The lag changed
    Lag { lag: u8 },
    /// A session's local layout and its local → netplay mapping
    Controllers {
        session_id: u32,
        controllers: ControllerSet,
        local_to_netplay: [i8; MAX_PLAYERS],
    },
    /// The global netplay slot assignment
    NetplayControllers { controllers: ControllerSet },
    /// The game is starting
    Start,
    /// One frame of input for a netplay port
    Input { port: u8, input: u32 },
    /// A session left
    Quit { id: u32 },
}

impl ServerMessage {
    pub fn encode(&self) -> Packet {
        match self {
            Self::ProtocolVersion { version } => {
                let mut p = Packet::new(opcode::PROTOCOL_VERSION);
                p.put_u32(*version);
                p
            }
            Self::Join { id, name } => {
                let mut p = Packet::new(opcode::JOIN);
                p.put_u32(*id).put_string(name);
                p
            }
            Self::Ping { timestamp } => {
                let mut p = Packet::new(opcode::PING);
                p.put_u64(*timestamp);
                p
            }
            Self::Pong { timestamp } => {
                let mut p = Packet::new(opcode::PONG);
                p.put_u64(*timestamp);
                p
            }
            Self::Latency { entries } => {
                let mut p = Packet::new(opcode::LATENCY);
                for entry in entries {
                    p.put_u32(entry.id).put_i32(entry.latency);
                }
                p
            }
            Self::Name { id, name } => {
                let mut p = Packet::new(opcode::NAME);
                p.put_u32(*id).put_string(name);
                p
            }
            Self::Message { sender_id, text } => {
                let mut p = Packet::new(opcode::MESSAGE);
                p.put_i32(*sender_id).put_string(text);
                p
            }
            Self::Lag { lag } => {
                let mut p = Packet::new(opcode::LAG);
                p.put_u8(*lag);
                p
            }
            Self::Controllers {
                session_id,
                controllers,
                local_to_netplay,
            } => {
                let mut p = Packet::new(opcode::CONTROLLERS);
                p.put_u32(*session_id);
                for c in controllers {
                    c.write(&mut p);
                }
                for &l2n in local_to_netplay {
                    p.put_i8(l2n);
                }
                p
            }
            Self::NetplayControllers { controllers } => {
                let mut p = Packet::new(opcode::NETPLAY_CONTROLLERS);
                for c in controllers {
                    c.write(&mut p);
                }
                p
            }
            Self::Start => Packet::new(opcode::START),
            Self::Input { port, input } => {
                let mut p = Packet::new(opcode::INPUT);
                p.put_u8(*port).put_u32(*input);
                p
            }
            Self::Quit { id } => {
                let mut p = Packet::new(opcode::QUIT);
                p.put_u32(*id);
                p
            }
        }
    }

    pub fn decode(payload: Bytes) -> Result<Self> {
        let mut r = PacketReader::new(payload);
        let op = r.get_u8()?;
        let message = match op {
            opcode::PROTOCOL_VERSION => Self::ProtocolVersion { version: r.get_u32()? },
            opcode::JOIN => Self::Join {
                id: r.get_u32()?,
                name: r.get_string()?,
            },
            opcode::PING => Self::Ping { timestamp: r.get_u64()? },
            opcode::PONG => Self::Pong { timestamp: r.get_u64()? },
            opcode::LATENCY => {
                let mut entries = Vec::with_capacity(r.remaining() / 8);
                while r.remaining() > 0 {
                    entries.push(LatencyEntry {
                        id: r.get_u32()?,
                        latency: r.get_i32()?,
                    });
                }
                Self::Latency { entries }
            }
            opcode::NAME => Self::Name {
                id: r.get_u32()?,
                name: r.get_string()?,
            },
            opcode::MESSAGE => Self::Message {
                sender_id: r.get_i32()?,
                text: r.get_string()?,
            },
            opcode::LAG => Self::Lag { lag: r.get_u8()? },
            opcode::CONTROLLERS => {
                let session_id = r.get_u32()?;
                let mut controllers = ControllerSet::default();
                for slot in controllers.iter_mut() {
                    *slot = Controller::read(&mut r)?;
                }
                let mut local_to_netplay = [0i8; MAX_PLAYERS];
                for l2n in local_to_netplay.iter_mut() {
                    *l2n = r.get_i8()?;
                }
                Self::Controllers {
                    session_id,
                    controllers,
                    local_to_netplay,
                }
            }
            opcode::NETPLAY_CONTROLLERS => {
                let mut controllers = ControllerSet::default();
                for slot in controllers.iter_mut() {
                    *slot = Controller::read(&mut r)?;
                }
                Self::NetplayControllers { controllers }
            }
            opcode::START => Self::Start,
            opcode::INPUT => Self::Input {
                port: r.get_u8()?,
                input: r.get_u32()?,
            },
            opcode::QUIT => Self::Quit { id: r.get_u32()? },
            other => return Err(PacketError::UnknownOpcode(other)),
        };
        if r.remaining() > 0 {
            return Err(PacketError::TrailingBytes(r.remaining()));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_client(msg: ClientMessage) {
        let payload = msg.encode().freeze();
        let decoded = ClientMessage::decode(payload).expect("decode failed");
        assert_eq!(msg, decoded);
    }

    fn roundtrip_server(msg: ServerMessage) {
        let payload = msg.encode().freeze();
        let decoded = ServerMessage::decode(payload).expect("decode failed");
        assert_eq!(msg, decoded);
    }

    fn sample_controllers() -> ControllerSet {
        let mut set = ControllerSet::default();
        set[0] = Controller {
            plugin: 2,
            present: true,
            raw_data: 1,
        };
        set[2] = Controller {
            plugin: 1,
            present: true,
            raw_data: 0,
        };
        set
    }

    #[test]
    fn test_client_message_roundtrips() {
        roundtrip_client(ClientMessage::Ping { timestamp: 12345 });
        roundtrip_client(ClientMessage::Pong { timestamp: u64::MAX });
        roundtrip_client(ClientMessage::Name {
            name: "Kira".to_string(),
        });
        roundtrip_client(ClientMessage::Message {
            text: "gg".to_string(),
        });
        roundtrip_client(ClientMessage::Lag { lag: 255 });
        roundtrip_client(ClientMessage::Controllers {
            controllers: sample_controllers(),
        });
        roundtrip_client(ClientMessage::Start);
        roundtrip_client(ClientMessage::Input {
            port: 3,
            input: 0xDEADBEEF,
        });
        roundtrip_client(ClientMessage::Fps { fps: 60 });
        roundtrip_client(ClientMessage::Quit);
    }

    #[test]
    fn test_server_message_roundtrips() {
        roundtrip_server(ServerMessage::ProtocolVersion { version: 1 });
        roundtrip_server(ServerMessage::Join {
            id: 7,
            name: "Kira".to_string(),
        });
        roundtrip_server(ServerMessage::Ping { timestamp: 1 });
        roundtrip_server(ServerMessage::Pong { timestamp: 2 });
        roundtrip_server(ServerMessage::Latency {
            entries: vec![
                LatencyEntry { id: 0, latency: 42 },
                LatencyEntry { id: 1, latency: -1 },
            ],
        });
        roundtrip_server(ServerMessage::Name {
            id: 3,
            name: "renamed".to_string(),
        });
        roundtrip_server(ServerMessage::Message {
            sender_id: SERVER_SENDER_ID,
            text: "The server set the lag to 2".to_string(),
        });
        roundtrip_server(ServerMessage::Lag { lag: 0 });
        roundtrip_server(ServerMessage::Controllers {
            session_id: 9,
            controllers: sample_controllers(),
            local_to_netplay: [0, -1, 1, -1],
        });
        roundtrip_server(ServerMessage::NetplayControllers {
            controllers: sample_controllers(),
        });
        roundtrip_server(ServerMessage::Start);
        roundtrip_server(ServerMessage::Input {
            port: 0,
            input: 0,
        });
        roundtrip_server(ServerMessage::Quit { id: 12 });
    }

    #[test]
    fn test_empty_latency_table() {
        roundtrip_server(ServerMessage::Latency { entries: vec![] });
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let mut p = Packet::new(0x7F);
        p.put_u32(0);
        let err = ClientMessage::decode(p.freeze()).unwrap_err();
        assert_eq!(err, PacketError::UnknownOpcode(0x7F));

        let p = Packet::new(0xFF);
        let err = ServerMessage::decode(p.freeze()).unwrap_err();
        assert_eq!(err, PacketError::UnknownOpcode(0xFF));
    }

    #[test]
    fn test_truncated_controllers_rejected() {
        let mut p = Packet::new(opcode::CONTROLLERS);
        // Only two of the four controllers
        p.put_u8(0).put_bool(true).put_u8(0);
        p.put_u8(0).put_bool(false).put_u8(0);
        assert!(matches!(
            ClientMessage::decode(p.freeze()),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn test_oversized_controller_array_rejected() {
        let mut p = Packet::new(opcode::CONTROLLERS);
        // Five controllers where exactly four belong
        for _ in 0..5 {
            p.put_u8(0).put_bool(true).put_u8(0);
        }
        assert_eq!(
            ClientMessage::decode(p.freeze()),
            Err(PacketError::TrailingBytes(3))
        );
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(
            ClientMessage::decode(Bytes::new()),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn test_opcode_values_are_stable() {
        // The wire contract: both sides hard-code these values.
        assert_eq!(opcode::JOIN, 0x01);
        assert_eq!(opcode::PROTOCOL_VERSION, 0x02);
        assert_eq!(opcode::PING, 0x03);
        assert_eq!(opcode::PONG, 0x04);
        assert_eq!(opcode::LATENCY, 0x05);
        assert_eq!(opcode::NAME, 0x06);
        assert_eq!(opcode::MESSAGE, 0x07);
        assert_eq!(opcode::LAG, 0x08);
        assert_eq!(opcode::CONTROLLERS, 0x09);
        assert_eq!(opcode::NETPLAY_CONTROLLERS, 0x0A);
        assert_eq!(opcode::START, 0x0B);
        assert_eq!(opcode::INPUT, 0x0C);
        assert_eq!(opcode::FPS, 0x0D);
        assert_eq!(opcode::QUIT, 0x0E);
    }
}
