//! Per-peer session state.
//!
//! A session is created when a connection is accepted, joins the lobby once
//! the handshake (name + controller layout) completes, and lives until the
//! socket fails, the protocol is violated, or the peer quits.

use crate::connection::Connection;
use padlink_protocol::{ControllerMap, ControllerSet, ServerMessage};
use std::collections::VecDeque;

/// Protocol state of one session
///
/// ```text
/// Handshake → Lobby → Playing
///     └────────┴────────┴──→ closed (removed from the registry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// PROTOCOL_VERSION sent; waiting for the peer's name and controllers
    Handshake,
    /// Joined; chat, renames, layout and lag changes flow
    Lobby,
    /// Game running; inputs flow, the lobby is closed
    Playing,
}

/// One connected peer
#[derive(Debug)]
pub struct Session {
    id: u32,
    name: String,
    state: SessionState,
    controllers: ControllerSet,
    controller_map: ControllerMap,
    /// Sliding window of round-trip samples, newest last
    latency_window: VecDeque<i32>,
    window_capacity: usize,
    fps: i32,
    has_name: bool,
    has_controllers: bool,
    connection: Connection,
}

impl Session {
    pub(crate) fn new(id: u32, connection: Connection, window_capacity: usize) -> Self {
        Self {
            id,
            name: String::new(),
            state: SessionState::Handshake,
            controllers: ControllerSet::default(),
            controller_map: ControllerMap::new(),
            latency_window: VecDeque::with_capacity(window_capacity),
            window_capacity,
            fps: -1,
            has_name: false,
            has_controllers: false,
            connection,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn controllers(&self) -> &ControllerSet {
        &self.controllers
    }

    pub fn controller_map(&self) -> &ControllerMap {
        &self.controller_map
    }

    pub(crate) fn set_controller_map(&mut self, map: ControllerMap) {
        self.controller_map = map;
    }

    pub fn fps(&self) -> i32 {
        self.fps
    }

    pub(crate) fn set_fps(&mut self, fps: i32) {
        self.fps = fps;
    }

    /// Records the peer's name; returns true once both handshake fields
    /// have arrived
    pub(crate) fn set_name(&mut self, name: String) -> bool {
        self.name = name;
        self.has_name = true;
        self.has_name && self.has_controllers
    }

    /// Records the peer's controller layout; returns true once both
    /// handshake fields have arrived
    pub(crate) fn set_controllers(&mut self, controllers: ControllerSet) -> bool {
        self.controllers = controllers;
        self.has_controllers = true;
        self.has_name && self.has_controllers
    }

    /// A player owns at least one netplay slot
    pub fn is_player(&self) -> bool {
        self.controller_map.maps_any()
    }

    /// Pushes a round-trip sample, evicting the oldest beyond capacity
    pub(crate) fn push_latency(&mut self, sample: i32) {
        if self.latency_window.len() == self.window_capacity {
            self.latency_window.pop_front();
        }
        self.latency_window.push_back(sample);
    }

    /// Median of the latency window, or `-1` with no samples
    pub fn latency(&self) -> i32 {
        if self.latency_window.is_empty() {
            return -1;
        }
        let mut sorted: Vec<i32> = self.latency_window.iter().copied().collect();
        sorted.sort_unstable();
        sorted[sorted.len() / 2]
    }

    /// Smallest sample in the window, or `-1` with no samples
    ///
    /// The minimum is the best estimate of the true round trip; larger
    /// samples carry queueing noise.
    pub fn minimum_latency(&self) -> i32 {
        self.latency_window.iter().copied().min().unwrap_or(-1)
    }

    pub(crate) fn send(&self, message: &ServerMessage) {
        self.connection.send(message);
    }

    pub(crate) fn close(&self) {
        self.connection.close();
    }
}
