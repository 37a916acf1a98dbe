//! # Padlink Server
//!
//! The netplay relay engine: acceptor, session registry, controller-slot
//! allocation, input/chat/lag fan-out, and the periodic latency tick.
//!
//! All session and server state lives in one event loop task. Sockets are
//! bridged to it by the reader/writer tasks in [`connection`], so the loop
//! mutates state without locks and fan-out order is simply send order.
//!
//! ## Example
//!
//! ```no_run
//! use padlink_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = Server::new(ServerConfig::default());
//!     let port = server.open(6400).await.expect("bind failed");
//!     println!("Listening on port {port}...");
//!     server.run().await;
//! }
//! ```

mod connection;
pub mod error;
pub mod session;

use connection::Connection;
use padlink_protocol::{
    allocate_controllers, ClientMessage, ControllerSet, LatencyEntry, ServerMessage,
    MAX_PLAYERS, PROTOCOL_VERSION, SERVER_SENDER_ID,
};
use session::{Session, SessionState};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use error::ServerError;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Adjust the lag automatically from measured latencies
    pub autolag: bool,

    /// Period of the latency/ping/autolag tick
    pub tick_interval: Duration,

    /// Round-trip samples kept per session
    pub latency_window: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            autolag: true,
            tick_interval: Duration::from_secs(1),
            latency_window: 5,
        }
    }
}

/// Events delivered to the server event loop
#[derive(Debug)]
pub(crate) enum ServerEvent {
    /// The acceptor produced a new socket (TCP_NODELAY already set)
    Accepted(TcpStream),

    /// A peer's reader task decoded a message
    Message { id: u32, message: ClientMessage },

    /// A peer's connection ended: EOF, transport error, or malformed packet
    Closed { id: u32 },
}

/// The relay server
///
/// Owns the joined-session registry (in join order — fan-out iteration order
/// and first-player selection depend on it), the global netplay controller
/// assignment, and the lag controller.
pub struct Server {
    config: ServerConfig,
    /// Joined sessions in join order
    sessions: Vec<Session>,
    /// Accepted sessions still in handshake
    pending: Vec<Session>,
    next_id: u32,
    netplay_controllers: ControllerSet,
    lag: u8,
    started: bool,
    closed: bool,
    start_time: Instant,
    events: mpsc::Sender<ServerEvent>,
    events_rx: mpsc::Receiver<ServerEvent>,
    acceptor: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let (events, events_rx) = mpsc::channel(256);
        Self {
            config,
            sessions: Vec::new(),
            pending: Vec::new(),
            next_id: 0,
            netplay_controllers: ControllerSet::default(),
            lag: 0,
            started: false,
            closed: false,
            start_time: Instant::now(),
            events,
            events_rx,
            acceptor: None,
        }
    }

    /// Binds the listener and starts accepting
    ///
    /// Prefers an IPv6 dual-stack socket and falls back to IPv4 when IPv6 is
    /// unavailable. Returns the OS-resolved port (useful with port 0).
    pub async fn open(&mut self, port: u16) -> Result<u16, ServerError> {
        let listener = bind_listener(port).map_err(|source| ServerError::Bind { port, source })?;
        let local_port = listener.local_addr()?.port();

        self.acceptor = Some(tokio::spawn(accept_loop(listener, self.events.clone())));
        tracing::info!(port = local_port, "listening");
        Ok(local_port)
    }

    /// Runs the event loop until the server closes
    ///
    /// One `select!` multiplexes peer events and the periodic tick; every
    /// state mutation happens here.
    pub async fn run(mut self) {
        let mut tick = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.tick_interval,
            self.config.tick_interval,
        );

        while !self.closed {
            tokio::select! {
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
                _ = tick.tick() => self.on_tick(),
            }
        }
    }

    /// Milliseconds since the server started (monotonic)
    fn time_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Present netplay slots
    pub fn player_count(&self) -> usize {
        self.netplay_controllers.iter().filter(|c| c.present).count()
    }

    fn find_session(&self, id: u32) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id() == id)
    }

    fn find_session_mut(&mut self, id: u32) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id() == id)
    }

    fn broadcast(&self, message: &ServerMessage) {
        for session in &self.sessions {
            session.send(message);
        }
    }

    fn broadcast_except(&self, id: u32, message: &ServerMessage) {
        for session in &self.sessions {
            if session.id() != id {
                session.send(message);
            }
        }
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Accepted(stream) => self.on_accepted(stream),
            ServerEvent::Message { id, message } => self.on_message(id, message),
            ServerEvent::Closed { id } => self.on_closed(id),
        }
    }

    fn on_accepted(&mut self, stream: TcpStream) {
        // The acceptor is aborted on start/close, but a socket may already
        // be in the event queue.
        if self.started || self.closed {
            return;
        }

        let id = self.next_id;
        self.next_id += 1;

        let connection = Connection::spawn(stream, id, self.events.clone());
        connection.send(&ServerMessage::ProtocolVersion {
            version: PROTOCOL_VERSION,
        });

        tracing::debug!(session = id, "handshake started");
        self.pending
            .push(Session::new(id, connection, self.config.latency_window));
    }

    fn on_message(&mut self, id: u32, message: ClientMessage) {
        if let Some(pos) = self.pending.iter().position(|s| s.id() == id) {
            self.on_handshake_message(pos, message);
        } else if self.find_session(id).is_some() {
            self.on_session_message(id, message);
        }
        // Otherwise the session is already gone; drop the late message.
    }

    /// Handshake: the peer must supply its name and controller layout (in
    /// either order) before anything else happens
    fn on_handshake_message(&mut self, pos: usize, message: ClientMessage) {
        match message {
            ClientMessage::Name { name } => {
                if self.pending[pos].set_name(name) {
                    self.promote(pos);
                }
            }
            ClientMessage::Controllers { controllers } => {
                if self.pending[pos].set_controllers(controllers) {
                    self.promote(pos);
                }
            }
            ClientMessage::Ping { timestamp } => {
                self.pending[pos].send(&ServerMessage::Pong { timestamp });
            }
            ClientMessage::Pong { .. } => {}
            ClientMessage::Fps { fps } => self.pending[pos].set_fps(fps),
            ClientMessage::Quit => {
                let session = self.pending.remove(pos);
                session.close();
                tracing::debug!(session = session.id(), "left during handshake");
            }
            other => {
                // Anything else before the handshake completes is a
                // protocol violation; the peer never joined, so nobody is
                // told.
                let session = self.pending.remove(pos);
                session.close();
                tracing::warn!(
                    session = session.id(),
                    message = ?other,
                    "unexpected message during handshake"
                );
            }
        }
    }

    /// Moves a completed handshake into the lobby
    fn promote(&mut self, pos: usize) {
        let mut session = self.pending.remove(pos);
        session.set_state(SessionState::Lobby);
        self.on_session_joined(session);
    }

    fn on_session_message(&mut self, id: u32, message: ClientMessage) {
        match message {
            ClientMessage::Ping { timestamp } => {
                if let Some(session) = self.find_session(id) {
                    session.send(&ServerMessage::Pong { timestamp });
                }
            }
            ClientMessage::Pong { timestamp } => {
                let sample = self
                    .time_ms()
                    .saturating_sub(timestamp)
                    .min(i32::MAX as u64) as i32;
                if let Some(session) = self.find_session_mut(id) {
                    session.push_latency(sample);
                }
            }
            ClientMessage::Name { name } => {
                if let Some(session) = self.find_session_mut(id) {
                    session.set_name(name.clone());
                }
                self.broadcast(&ServerMessage::Name { id, name });
            }
            ClientMessage::Message { text } => {
                self.broadcast_except(
                    id,
                    &ServerMessage::Message {
                        sender_id: id as i32,
                        text,
                    },
                );
            }
            ClientMessage::Lag { lag } => self.set_lag(Some(id), lag),
            ClientMessage::Controllers { controllers } => {
                let Some(session) = self.find_session_mut(id) else {
                    return;
                };
                if session.state() == SessionState::Playing {
                    // Repacking mid-game would renumber netplay ports and
                    // desynchronize the input streams.
                    tracing::debug!(session = id, "ignoring layout change during game");
                    return;
                }
                session.set_controllers(controllers);
                self.update_controllers();
            }
            ClientMessage::Start => self.send_start_game(),
            ClientMessage::Input { port, input } => {
                self.broadcast_except(id, &ServerMessage::Input { port, input });
            }
            ClientMessage::Fps { fps } => {
                if let Some(session) = self.find_session_mut(id) {
                    session.set_fps(fps);
                }
            }
            ClientMessage::Quit => self.on_session_quit(id),
        }
    }

    fn on_closed(&mut self, id: u32) {
        if let Some(pos) = self.pending.iter().position(|s| s.id() == id) {
            // Never joined: no QUIT broadcast, no slot reallocation.
            let session = self.pending.remove(pos);
            session.close();
            tracing::debug!(session = id, "connection lost during handshake");
            return;
        }
        self.on_session_quit(id);
    }

    /// A new session enters the lobby
    fn on_session_joined(&mut self, session: Session) {
        let id = session.id();
        let name = session.name().to_string();

        for existing in &self.sessions {
            existing.send(&ServerMessage::Join {
                id,
                name: name.clone(),
            });
        }
        self.sessions.push(session);

        let roster: Vec<(u32, String)> = self
            .sessions
            .iter()
            .map(|s| (s.id(), s.name().to_string()))
            .collect();
        let now = self.time_ms();
        let lag = self.lag;
        if let Some(newcomer) = self.sessions.last() {
            for (peer_id, peer_name) in roster {
                newcomer.send(&ServerMessage::Join {
                    id: peer_id,
                    name: peer_name,
                });
            }
            newcomer.send(&ServerMessage::Ping { timestamp: now });
            newcomer.send(&ServerMessage::Lag { lag });
            newcomer.send(&ServerMessage::Message {
                sender_id: SERVER_SENDER_ID,
                text: format!("The server set the lag to {lag}"),
            });
        }

        tracing::info!(session = id, name = %name, "session joined");
        self.update_controllers();
    }

    /// Reassigns netplay slots and broadcasts the new mapping
    ///
    /// Every session first sees the packed NETPLAY_CONTROLLERS set, then one
    /// CONTROLLERS frame per session describing that session's layout and
    /// local → netplay mapping.
    fn update_controllers(&mut self) {
        let layouts: Vec<ControllerSet> =
            self.sessions.iter().map(|s| *s.controllers()).collect();
        let (netplay, maps) = allocate_controllers(&layouts);

        self.netplay_controllers = netplay;
        for (session, map) in self.sessions.iter_mut().zip(maps) {
            session.set_controller_map(map);
        }

        self.broadcast(&ServerMessage::NetplayControllers {
            controllers: self.netplay_controllers,
        });

        let frames: Vec<ServerMessage> = self
            .sessions
            .iter()
            .map(|s| ServerMessage::Controllers {
                session_id: s.id(),
                controllers: *s.controllers(),
                local_to_netplay: s.controller_map().local_to_netplay,
            })
            .collect();
        for frame in &frames {
            self.broadcast(frame);
        }
    }

    /// Records a lag change and tells everyone but the instigator
    ///
    /// `from` is the requesting session, or `None` when the server itself
    /// (autolag) adjusts.
    fn set_lag(&mut self, from: Option<u32>, lag: u8) {
        self.lag = lag;

        let who = from
            .and_then(|id| self.find_session(id))
            .map(|s| s.name().to_string())
            .unwrap_or_else(|| "The server".to_string());
        let mut text = format!("{who} set the lag to {lag}");

        let fps = self.fps();
        if fps > 0 {
            let ms = lag as i32 * 1000 / fps;
            text.push_str(&format!(" ({ms} ms)"));
        }

        tracing::debug!(lag, from = ?from, "lag changed");

        let lag_message = ServerMessage::Lag { lag };
        let notice = ServerMessage::Message {
            sender_id: SERVER_SENDER_ID,
            text,
        };
        for session in &self.sessions {
            if Some(session.id()) != from {
                session.send(&lag_message);
                session.send(&notice);
            }
        }
    }

    /// Frame rate reported by the first player in join order, `-1` if none
    fn fps(&self) -> i32 {
        self.sessions
            .iter()
            .find(|s| s.is_player())
            .map(|s| s.fps())
            .unwrap_or(-1)
    }

    /// Sum of the two largest player minimum latencies, `-1` with fewer
    /// than two measured players
    fn total_latency(&self) -> i32 {
        top_two_sum(
            self.sessions
                .iter()
                .filter(|s| s.is_player())
                .map(|s| s.minimum_latency()),
        )
    }

    /// One step of the automatic lag controller
    ///
    /// Moves the lag at most one frame per tick toward the ideal value, so
    /// a latency spike cannot yank the setting around.
    fn auto_adjust_lag(&mut self) {
        let fps = self.fps();
        if fps <= 0 {
            return;
        }
        let latency = self.total_latency();
        if latency < 0 {
            return;
        }

        let ideal = ideal_lag(latency, fps);
        if ideal < self.lag as i32 {
            self.set_lag(None, self.lag - 1);
        } else if ideal > self.lag as i32 {
            self.set_lag(None, self.lag + 1);
        }
    }

    /// Periodic tick: latency table, fresh pings, autolag
    fn on_tick(&mut self) {
        let entries: Vec<LatencyEntry> = self
            .sessions
            .iter()
            .map(|s| LatencyEntry {
                id: s.id(),
                latency: s.latency(),
            })
            .collect();
        self.broadcast(&ServerMessage::Latency { entries });

        let ping = ServerMessage::Ping {
            timestamp: self.time_ms(),
        };
        self.broadcast(&ping);

        if self.config.autolag {
            self.auto_adjust_lag();
        }
    }

    /// A session is gone: tell the others and tear down or repack
    ///
    /// Idempotent — a graceful QUIT followed by the reader's close event
    /// finds the registry entry already removed and does nothing.
    fn on_session_quit(&mut self, id: u32) {
        let Some(pos) = self.sessions.iter().position(|s| s.id() == id) else {
            return;
        };

        self.broadcast(&ServerMessage::Quit { id });

        if self.sessions[pos].is_player() && self.started {
            // Lockstep cannot continue without a player's inputs.
            tracing::info!(session = id, "player left during game, shutting down");
            self.close();
        } else {
            let session = self.sessions.remove(pos);
            session.close();
            tracing::info!(session = id, "session left");
            if !self.started {
                self.update_controllers();
            }
            // During a game a non-player just leaves; slots keep their
            // numbering.
        }
    }

    /// Starts the game: closes the lobby and notifies every session
    pub fn send_start_game(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
        for session in self.pending.drain(..) {
            session.close();
        }
        for session in &mut self.sessions {
            session.set_state(SessionState::Playing);
        }

        self.broadcast(&ServerMessage::Start);
        tracing::info!(players = self.player_count(), "game started");
    }

    /// Shuts everything down: acceptor, tick, every session
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
        for session in &self.sessions {
            session.close();
        }
        self.sessions.clear();
        for session in &self.pending {
            session.close();
        }
        self.pending.clear();

        tracing::info!("server closed");
    }
}

/// `min(⌈latency · fps / 1000⌉, 255)` — frames of lag that cover `latency`
/// milliseconds at `fps`
fn ideal_lag(latency_ms: i32, fps: i32) -> i32 {
    (((latency_ms as i64) * (fps as i64) + 999) / 1000).min(255) as i32
}

/// Sum of the two largest values, `-1` unless at least two are non-negative
fn top_two_sum(values: impl Iterator<Item = i32>) -> i32 {
    let mut max = -1;
    let mut second = -1;
    for value in values {
        if value > second {
            second = value;
        }
        if second > max {
            std::mem::swap(&mut max, &mut second);
        }
    }
    if second >= 0 {
        max + second
    } else {
        -1
    }
}

/// Opens the listen socket, preferring IPv6 dual-stack
///
/// Falls back to IPv4 only when an IPv6 socket cannot be created at all; a
/// failed IPv6 bind (port in use) is a real error either way.
fn bind_listener(port: u16) -> std::io::Result<TcpListener> {
    let backlog = MAX_PLAYERS as u32;
    match TcpSocket::new_v6() {
        Ok(socket) => {
            socket.bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)))?;
            socket.listen(backlog)
        }
        Err(_) => {
            let socket = TcpSocket::new_v4()?;
            socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
            socket.listen(backlog)
        }
    }
}

/// Accepts sockets until the listener is dropped or an accept fails
///
/// A failed accept stops the acceptor but never touches live sessions.
async fn accept_loop(listener: TcpListener, events: mpsc::Sender<ServerEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::warn!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
                    continue;
                }
                tracing::debug!(peer = %peer, "accepted connection");
                if events.send(ServerEvent::Accepted(stream)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed, no longer accepting");
                return;
            }
        }
    }
}
