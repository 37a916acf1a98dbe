//! Controller descriptors and the netplay slot allocator.
//!
//! Each client exposes up to four local controllers. The server aggregates
//! all present local controllers into a single global set of netplay
//! controllers, numbered in session insertion order then local port order.
//! [`ControllerMap`] translates between a session's local ports and the
//! global netplay ports.

use crate::error::PacketResult;
use crate::packet::{Packet, PacketReader};

/// Maximum number of netplay controllers, and of local controllers per client
pub const MAX_PLAYERS: usize = 4;

/// One local controller as reported by a client
///
/// `plugin` and `raw_data` are opaque emulator-side settings relayed verbatim;
/// the server only interprets `present`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Controller {
    pub plugin: u8,
    pub present: bool,
    pub raw_data: u8,
}

impl Controller {
    pub(crate) fn write(&self, p: &mut Packet) {
        p.put_u8(self.plugin).put_bool(self.present).put_u8(self.raw_data);
    }

    pub(crate) fn read(r: &mut PacketReader) -> PacketResult<Self> {
        Ok(Self {
            plugin: r.get_u8()?,
            present: r.get_bool()?,
            raw_data: r.get_u8()?,
        })
    }
}

/// A full complement of controller slots, local or netplay
pub type ControllerSet = [Controller; MAX_PLAYERS];

/// Bidirectional local ↔ netplay port translation for one session
///
/// `-1` marks an unmapped port. Whenever `local_to_netplay[l] = n` with
/// `n >= 0`, `netplay_to_local[n] = l` holds for the same session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerMap {
    pub local_to_netplay: [i8; MAX_PLAYERS],
    pub netplay_to_local: [i8; MAX_PLAYERS],
}

impl Default for ControllerMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerMap {
    pub fn new() -> Self {
        Self {
            local_to_netplay: [-1; MAX_PLAYERS],
            netplay_to_local: [-1; MAX_PLAYERS],
        }
    }

    /// Records `local -> netplay`; a negative `netplay` leaves the local
    /// port unmapped
    pub fn insert(&mut self, local: usize, netplay: i8) {
        self.local_to_netplay[local] = netplay;
        if netplay >= 0 {
            self.netplay_to_local[netplay as usize] = local as i8;
        }
    }

    /// True if any local port maps to a netplay slot
    pub fn maps_any(&self) -> bool {
        self.local_to_netplay.iter().any(|&n| n >= 0)
    }
}

/// Assigns netplay slots for the given session controller layouts
///
/// Pure function of the layouts in session insertion order: present local
/// controllers claim netplay ports `0, 1, 2, ...` until all four are taken,
/// visiting sessions in order and local ports `0..=3` within each session.
/// Returns the packed netplay set and one fresh [`ControllerMap`] per input
/// layout.
pub fn allocate_controllers(layouts: &[ControllerSet]) -> (ControllerSet, Vec<ControllerMap>) {
    let mut netplay = ControllerSet::default();
    let mut maps = Vec::with_capacity(layouts.len());
    let mut netplay_port = 0usize;

    for locals in layouts {
        let mut map = ControllerMap::new();
        for (local_port, controller) in locals.iter().enumerate() {
            if controller.present && netplay_port < MAX_PLAYERS {
                netplay[netplay_port] = *controller;
                map.insert(local_port, netplay_port as i8);
                netplay_port += 1;
            } else {
                map.insert(local_port, -1);
            }
        }
        maps.push(map);
    }

    (netplay, maps)
}
