//! # Padlink
//!
//! A netplay relay for multi-console emulators: clients connect over TCP,
//! their local controllers are aggregated into a shared set of netplay
//! controllers, and per-frame inputs, chat, and lag adjustments are relayed
//! so every participant sees an identical input stream.
//!
//! ## Components
//!
//! - `padlink-protocol`: wire format, messages, and the controller model
//! - `padlink-server`: the relay engine and the `padlink-server` binary
//!
//! ## Example
//!
//! See the integration tests in `tests/` for full client/server exchanges.

pub use padlink_protocol as protocol;
pub use padlink_server as server;
