//! Identifiers used across the wire protocol and the player registry.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Opaque, monotonically assigned identifier for a player, stable for the
/// lifetime of the server process. `0` is reserved to mean "none" on the
/// wire (see [`PlayerId::NONE`]); it is never minted for a real player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u32);

impl PlayerId {
    pub const NONE: PlayerId = PlayerId(0);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mints fresh, never-reused [`PlayerId`]s for a single server lifetime.
///
/// Not re-entrant by design: `AddPlayer` is the single writer and runs on
/// the tick thread, so a plain atomic counter is enough — there is never
/// contention, only a guarantee that IDs never repeat.
pub struct PlayerIdAllocator {
    next: AtomicU32,
}

impl Default for PlayerIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerIdAllocator {
    pub fn new() -> Self {
        // Start at 1: 0 is reserved for PlayerId::NONE.
        Self {
            next: AtomicU32::new(1),
        }
    }

    pub fn allocate(&self) -> PlayerId {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        PlayerId(id)
    }
}

/// Transport-layer opaque handle for a single peer connection.
///
/// Transports are free to recycle handles once a peer disconnects, so a
/// `ConnectionHandle` carries no game meaning by itself — it is only useful
/// as a key into [`crate::player::PlayerRegistryIndex`]-style maps while the
/// connection is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_never_repeat_and_skip_zero() {
        let alloc = PlayerIdAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert_ne!(a, b);
        assert!(!a.is_none());
        assert_eq!(PlayerId::NONE.0, 0);
    }

    #[test]
    fn player_id_ordering_is_assignment_order() {
        let alloc = PlayerIdAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert!(a < b);
    }
}
