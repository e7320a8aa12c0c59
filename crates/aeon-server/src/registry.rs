//! Player registry — §4.3. Two maps, `PlayerId -> Player` and
//! `ConnectionHandle -> PlayerId`, behind one lock so they can never
//! observe each other out of sync.
//!
//! `add_player` mints a fresh id from [`PlayerIdAllocator`] and is meant to
//! be called only from the tick thread; every other method may be called
//! from any thread that does not hold the lock across a blocking call.

use std::collections::HashMap;

use aeon_common::ids::{ConnectionHandle, PlayerId, PlayerIdAllocator};
use aeon_common::player::Player;
use parking_lot::Mutex;

struct RegistryInner {
    players: HashMap<PlayerId, Player>,
    by_connection: HashMap<ConnectionHandle, PlayerId>,
}

pub struct PlayerRegistry {
    allocator: PlayerIdAllocator,
    inner: Mutex<RegistryInner>,
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self {
            allocator: PlayerIdAllocator::new(),
            inner: Mutex::new(RegistryInner {
                players: HashMap::new(),
                by_connection: HashMap::new(),
            }),
        }
    }

    /// Mints a PlayerId, inserts a freshly-connecting [`Player`], and wires
    /// both maps. Not re-entrant: calling this twice for the same
    /// connection before the first is removed would orphan the first entry.
    pub fn add_player(&self, connection: ConnectionHandle, ip: String) -> PlayerId {
        let id = self.allocator.allocate();
        let player = Player::new_connecting(id, connection, ip);
        let mut inner = self.inner.lock();
        inner.by_connection.insert(connection, id);
        inner.players.insert(id, player);
        id
    }

    pub fn remove_by_connection(&self, connection: ConnectionHandle) -> Option<Player> {
        let mut inner = self.inner.lock();
        let id = inner.by_connection.remove(&connection)?;
        inner.players.remove(&id)
    }

    pub fn remove_by_id(&self, id: PlayerId) -> Option<Player> {
        let mut inner = self.inner.lock();
        let player = inner.players.remove(&id)?;
        inner.by_connection.remove(&player.connection);
        Some(player)
    }

    pub fn get(&self, id: PlayerId) -> Option<Player> {
        self.inner.lock().players.get(&id).cloned()
    }

    pub fn get_by_connection(&self, connection: ConnectionHandle) -> Option<Player> {
        let inner = self.inner.lock();
        let id = inner.by_connection.get(&connection)?;
        inner.players.get(id).cloned()
    }

    pub fn id_for_connection(&self, connection: ConnectionHandle) -> Option<PlayerId> {
        self.inner.lock().by_connection.get(&connection).copied()
    }

    /// Applies `f` to the live player under the lock, returning its result.
    /// Used for in-place state mutations (JoinGame, HPDiff, respawn).
    pub fn with_mut<R>(&self, id: PlayerId, f: impl FnOnce(&mut Player) -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        inner.players.get_mut(&id).map(f)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots every player before invoking `f`, so `f` may safely remove
    /// or mutate registry entries without deadlocking or corrupting
    /// iteration order (§4.3).
    pub fn for_each(&self, mut f: impl FnMut(&Player)) {
        let snapshot: Vec<Player> = self.inner.lock().players.values().cloned().collect();
        for player in &snapshot {
            f(player);
        }
    }

    pub fn for_each_ingame(&self, mut f: impl FnMut(&Player)) {
        let snapshot: Vec<Player> = self
            .inner
            .lock()
            .players
            .values()
            .filter(|p| p.is_ingame)
            .cloned()
            .collect();
        for player in &snapshot {
            f(player);
        }
    }

    pub fn snapshot_ingame(&self) -> Vec<Player> {
        self.inner
            .lock()
            .players
            .values()
            .filter(|p| p.is_ingame)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_are_inverses_for_every_live_player() {
        let reg = PlayerRegistry::new();
        let conn = ConnectionHandle(1);
        let id = reg.add_player(conn, "127.0.0.1".into());
        assert_eq!(reg.id_for_connection(conn), Some(id));
        let player = reg.get(id).unwrap();
        assert_eq!(player.connection, conn);
    }

    #[test]
    fn ids_never_repeat_across_add_player_calls() {
        let reg = PlayerRegistry::new();
        let a = reg.add_player(ConnectionHandle(1), "1.1.1.1".into());
        let b = reg.add_player(ConnectionHandle(2), "2.2.2.2".into());
        assert_ne!(a, b);
    }

    #[test]
    fn remove_by_connection_clears_both_maps() {
        let reg = PlayerRegistry::new();
        let conn = ConnectionHandle(5);
        let id = reg.add_player(conn, "1.2.3.4".into());
        let removed = reg.remove_by_connection(conn).unwrap();
        assert_eq!(removed.id, id);
        assert!(reg.get(id).is_none());
        assert!(reg.id_for_connection(conn).is_none());
    }

    #[test]
    fn remove_by_id_clears_both_maps() {
        let reg = PlayerRegistry::new();
        let conn = ConnectionHandle(9);
        let id = reg.add_player(conn, "9.9.9.9".into());
        reg.remove_by_id(id);
        assert!(reg.get_by_connection(conn).is_none());
    }

    #[test]
    fn for_each_ingame_only_visits_joined_players() {
        let reg = PlayerRegistry::new();
        let a = reg.add_player(ConnectionHandle(1), "1.1.1.1".into());
        let _b = reg.add_player(ConnectionHandle(2), "2.2.2.2".into());
        reg.with_mut(a, |p| p.is_ingame = true);

        let mut seen = Vec::new();
        reg.for_each_ingame(|p| seen.push(p.id));
        assert_eq!(seen, vec![a]);
    }

    #[test]
    fn for_each_snapshot_allows_removal_during_iteration() {
        let reg = PlayerRegistry::new();
        let a = reg.add_player(ConnectionHandle(1), "1.1.1.1".into());
        let b = reg.add_player(ConnectionHandle(2), "2.2.2.2".into());
        let mut visited = 0;
        reg.for_each(|_| {
            visited += 1;
            // Safe: iterating over a pre-collected snapshot, not the live map.
            reg.remove_by_id(a);
            reg.remove_by_id(b);
        });
        assert_eq!(visited, 2);
        assert!(reg.is_empty());
    }

    #[test]
    fn with_mut_returns_none_for_unknown_player() {
        let reg = PlayerRegistry::new();
        assert!(reg.with_mut(PlayerId(999), |_| ()).is_none());
    }
}
