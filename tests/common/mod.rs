//! Shared test client: a raw TCP peer speaking the relay protocol.

#![allow(dead_code)]

use padlink::protocol::{
    ClientMessage, Controller, ControllerSet, FrameDecoder, ServerMessage, PROTOCOL_VERSION,
};
use padlink::server::{Server, ServerConfig};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Generous upper bound for any single expected message
pub const WAIT: Duration = Duration::from_secs(5);

/// A config with the periodic tick effectively disabled, so tests can
/// assert exact frame sequences without Ping/Latency noise
pub fn quiet_config() -> ServerConfig {
    ServerConfig {
        autolag: false,
        tick_interval: Duration::from_secs(3600),
        ..ServerConfig::default()
    }
}

/// Binds a server on an OS-chosen port, spawns its event loop, and
/// returns the port
pub async fn start_server(config: ServerConfig) -> u16 {
    let mut server = Server::new(config);
    let port = server.open(0).await.expect("bind failed");
    tokio::spawn(server.run());
    port
}

/// A controller layout with `count` present controllers at local ports 0..
pub fn layout(count: usize) -> ControllerSet {
    let mut set = ControllerSet::default();
    for slot in set.iter_mut().take(count) {
        *slot = Controller {
            plugin: 1,
            present: true,
            raw_data: 0,
        };
    }
    set
}

/// Everything a client observes while joining
pub struct JoinSummary {
    /// JOIN frames in arrival order: the full roster, the newcomer last
    pub roster: Vec<(u32, String)>,
    /// The netplay slot assignment at join time
    pub netplay: ControllerSet,
    /// One CONTROLLERS frame per session, in session order
    pub subjects: Vec<SubjectControllers>,
}

/// One CONTROLLERS frame as seen on the wire
pub struct SubjectControllers {
    pub session_id: u32,
    pub controllers: ControllerSet,
    pub local_to_netplay: [i8; 4],
}

pub struct TestClient {
    stream: TcpStream,
    decoder: FrameDecoder,
}

impl TestClient {
    /// Connects and consumes the server's PROTOCOL_VERSION frame
    pub async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("connect failed");
        let mut client = Self {
            stream,
            decoder: FrameDecoder::new(),
        };
        match client.recv().await {
            ServerMessage::ProtocolVersion { version } => assert_eq!(version, PROTOCOL_VERSION),
            other => panic!("expected ProtocolVersion first, got {other:?}"),
        }
        client
    }

    pub async fn send(&mut self, message: &ClientMessage) {
        let frame = message.encode().into_frame().expect("encode failed");
        self.stream.write_all(&frame).await.expect("write failed");
    }

    /// Writes raw bytes, framing and all, exactly as given
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write failed");
    }

    /// Next message from the server, failing the test after [`WAIT`]
    pub async fn recv(&mut self) -> ServerMessage {
        timeout(WAIT, self.recv_inner())
            .await
            .expect("timed out waiting for a server message")
    }

    async fn recv_inner(&mut self) -> ServerMessage {
        loop {
            if let Some(payload) = self.decoder.next_frame() {
                return ServerMessage::decode(payload).expect("undecodable frame from server");
            }
            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await.expect("read failed");
            assert!(n > 0, "server closed the connection");
            self.decoder.push(&buf[..n]);
        }
    }

    /// Next message within `wait`, or `None` if the server stays quiet
    pub async fn try_recv_for(&mut self, wait: Duration) -> Option<ServerMessage> {
        timeout(wait, self.recv_inner()).await.ok()
    }

    /// Skips messages until `pred` matches, returning the match
    pub async fn recv_matching(
        &mut self,
        pred: impl Fn(&ServerMessage) -> bool,
    ) -> ServerMessage {
        loop {
            let message = self.recv().await;
            if pred(&message) {
                return message;
            }
        }
    }

    /// Completes the handshake and consumes the fixed join sequence:
    /// JOINs for the whole roster, the greeting Ping/Lag/chat, and the
    /// controller allocation broadcast
    pub async fn join(&mut self, name: &str, controllers: ControllerSet) -> JoinSummary {
        self.send(&ClientMessage::Name {
            name: name.to_string(),
        })
        .await;
        self.send(&ClientMessage::Controllers { controllers }).await;

        let mut roster = Vec::new();
        loop {
            match self.recv().await {
                ServerMessage::Join { id, name } => roster.push((id, name)),
                ServerMessage::Ping { .. } => break,
                other => panic!("unexpected message during join: {other:?}"),
            }
        }
        match self.recv().await {
            ServerMessage::Lag { .. } => {}
            other => panic!("expected Lag after join Ping, got {other:?}"),
        }
        match self.recv().await {
            ServerMessage::Message { sender_id, .. } => assert_eq!(sender_id, -1),
            other => panic!("expected server chat after join Lag, got {other:?}"),
        }
        let sessions = roster.len();
        let (netplay, subjects) = self.recv_allocation(sessions).await;
        JoinSummary {
            roster,
            netplay,
            subjects,
        }
    }

    /// Consumes one allocation broadcast: a NETPLAY_CONTROLLERS frame
    /// followed by one CONTROLLERS frame per session
    pub async fn recv_allocation(
        &mut self,
        sessions: usize,
    ) -> (ControllerSet, Vec<SubjectControllers>) {
        let netplay = match self.recv().await {
            ServerMessage::NetplayControllers { controllers } => controllers,
            other => panic!("expected NetplayControllers, got {other:?}"),
        };
        let mut subjects = Vec::new();
        for _ in 0..sessions {
            match self.recv().await {
                ServerMessage::Controllers {
                    session_id,
                    controllers,
                    local_to_netplay,
                } => subjects.push(SubjectControllers {
                    session_id,
                    controllers,
                    local_to_netplay,
                }),
                other => panic!("expected Controllers, got {other:?}"),
            }
        }
        (netplay, subjects)
    }

    /// Waits for the connection to be closed by the server
    pub async fn expect_close(&mut self) {
        timeout(WAIT, async {
            let mut buf = [0u8; 4096];
            loop {
                match self.stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        })
        .await
        .expect("server never closed the connection");
    }
}
