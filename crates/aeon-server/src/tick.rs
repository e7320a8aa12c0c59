//! The server heartbeat — §4.4, grounded in `GameServer::Run()`
//! (`gmp-server/lib/game_server.cpp`): pulse the transport, advance the
//! game clock, drain scripting timers, resolve respawns, then (gated on
//! `tick_rate_ms`) fan out position/state updates by pairwise distance.

use std::time::{Duration, Instant};

use aeon_common::clock::GameClock;
use aeon_common::ids::PlayerId;
use aeon_protocol::packets::{frame, PlayerStateUpdatePacket, PositionUpdatePacket, RespawnPacket};
use aeon_protocol::{Opcode, Priority, Reliability, TransportAdapter};
use aeon_script::ResourceHost;

use crate::combat;
use crate::registry::PlayerRegistry;

/// Players closer than this (world units, full 3D distance) exchange full
/// `PlayerStateUpdate` packets; farther apart they only get `PositionUpdate`.
pub const HIGH_DETAIL_RADIUS: f32 = 5000.0;

pub struct TickEngine {
    last_fanout: Instant,
    tick_rate: Duration,
}

impl TickEngine {
    pub fn new(tick_rate_ms: u32) -> Self {
        Self {
            // Starts already-elapsed so the very first tick fans out immediately.
            last_fanout: Instant::now() - Duration::from_millis(tick_rate_ms as u64),
            tick_rate: Duration::from_millis(tick_rate_ms as u64),
        }
    }

    /// Runs one iteration of the loop. `dt` is the wall-clock time elapsed
    /// since the previous call, used to advance `clock`.
    #[allow(clippy::too_many_arguments)]
    pub fn run_once(
        &mut self,
        registry: &PlayerRegistry,
        transport: &dyn TransportAdapter,
        host: &ResourceHost,
        clock: &mut GameClock,
        class_table: &[i16],
        respawn_time_seconds: i64,
        now_ms: u64,
        dt: Duration,
    ) {
        clock.advance(dt);
        host.timers.process_timers(host.lua());

        // A negative grace period means respawning is disabled entirely,
        // matching the original's early return in `ProcessRespawns`.
        if respawn_time_seconds >= 0 {
            for respawned in combat::process_respawns(registry, class_table, respawn_time_seconds, now_ms)
            {
                broadcast_respawn(transport, respawned);
            }
        }

        if self.last_fanout.elapsed() >= self.tick_rate {
            self.last_fanout = Instant::now();
            self.fan_out(registry, transport);
        }
    }

    /// §4.4 step 5: for every unordered pair of in-game players, send each
    /// the other's full state if within [`HIGH_DETAIL_RADIUS`], otherwise
    /// just their position.
    fn fan_out(&self, registry: &PlayerRegistry, transport: &dyn TransportAdapter) {
        let players = registry.snapshot_ingame();
        for i in 0..players.len() {
            for j in (i + 1)..players.len() {
                let a = &players[i];
                let b = &players[j];
                let distance = a.state.position.distance(b.state.position);

                if distance < HIGH_DETAIL_RADIUS {
                    send_state_update(transport, a, b.connection);
                    send_state_update(transport, b, a.connection);
                } else {
                    send_position_update(transport, a, b.connection);
                    send_position_update(transport, b, a.connection);
                }
            }
        }
    }
}

fn send_state_update(
    transport: &dyn TransportAdapter,
    player: &aeon_common::player::Player,
    to: aeon_common::ids::ConnectionHandle,
) {
    let mut state = player.state;
    state.health_points = player.health;
    let packet = PlayerStateUpdatePacket {
        player_id: Some(player.id),
        state,
    };
    let bytes = frame(Opcode::PlayerStateUpdate, &packet);
    transport.send(to, &bytes, Priority::Immediate, Reliability::Unreliable);
}

fn send_position_update(
    transport: &dyn TransportAdapter,
    player: &aeon_common::player::Player,
    to: aeon_common::ids::ConnectionHandle,
) {
    let packet = PositionUpdatePacket {
        player_id: Some(player.id),
        position: player.state.position,
    };
    let bytes = frame(Opcode::PositionUpdate, &packet);
    transport.send(to, &bytes, Priority::Immediate, Reliability::Unreliable);
}

fn broadcast_respawn(transport: &dyn TransportAdapter, respawned: PlayerId) {
    let packet = RespawnPacket { respawned };
    let bytes = frame(Opcode::Respawn, &packet);
    transport.broadcast(&bytes, Priority::Medium, Reliability::ReliableOrdered);
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeon_common::ids::ConnectionHandle;
    use aeon_common::vec3::Vec3;
    use aeon_protocol::InboundEvent;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeTransport {
        sent: StdMutex<Vec<(ConnectionHandle, u8)>>,
        broadcasts: StdMutex<Vec<u8>>,
    }

    impl TransportAdapter for FakeTransport {
        fn send(&self, to: ConnectionHandle, bytes: &[u8], _p: Priority, _r: Reliability) {
            self.sent.lock().unwrap().push((to, bytes[0]));
        }
        fn broadcast(&self, bytes: &[u8], _p: Priority, _r: Reliability) {
            self.broadcasts.lock().unwrap().push(bytes[0]);
        }
        fn poll_events(&mut self) -> Vec<InboundEvent> {
            Vec::new()
        }
        fn disconnect(&self, _connection: ConnectionHandle) {}
        fn add_ban(&self, _ip: &str, _ttl_ms: u64) {}
        fn is_banned(&self, _ip: &str) -> bool {
            false
        }
    }

    fn place(registry: &PlayerRegistry, conn: u64, ip: &str, pos: Vec3) -> PlayerId {
        let id = registry.add_player(ConnectionHandle(conn), ip.to_string());
        registry.with_mut(id, |p| {
            p.is_ingame = true;
            p.state.position = pos;
        });
        id
    }

    #[test]
    fn close_players_exchange_full_state() {
        let registry = PlayerRegistry::new();
        place(&registry, 1, "1.1.1.1", Vec3::new(0.0, 0.0, 0.0));
        place(&registry, 2, "2.2.2.2", Vec3::new(100.0, 0.0, 0.0));
        let transport = FakeTransport::default();

        let engine = TickEngine::new(50);
        engine.fan_out(&registry, &transport);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, op)| *op == Opcode::PlayerStateUpdate as u8));
    }

    #[test]
    fn distant_players_only_get_position() {
        let registry = PlayerRegistry::new();
        place(&registry, 1, "1.1.1.1", Vec3::new(0.0, 0.0, 0.0));
        place(&registry, 2, "2.2.2.2", Vec3::new(10_000.0, 0.0, 0.0));
        let transport = FakeTransport::default();

        let engine = TickEngine::new(50);
        engine.fan_out(&registry, &transport);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, op)| *op == Opcode::PositionUpdate as u8));
    }

    #[test]
    fn not_ingame_players_are_excluded_from_fanout() {
        let registry = PlayerRegistry::new();
        registry.add_player(ConnectionHandle(1), "1.1.1.1".into());
        place(&registry, 2, "2.2.2.2", Vec3::ZERO);
        let transport = FakeTransport::default();

        let engine = TickEngine::new(50);
        engine.fan_out(&registry, &transport);

        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn respawn_due_broadcasts_respawn_packet() {
        let registry = PlayerRegistry::new();
        let id = registry.add_player(ConnectionHandle(1), "1.1.1.1".into());
        registry.with_mut(id, |p| {
            p.is_ingame = true;
            p.health = 0;
            p.tod = 500;
        });
        let transport = FakeTransport::default();
        let host = ResourceHost::new().unwrap();
        let mut clock = GameClock::new(60.0);
        let mut engine = TickEngine::new(50);

        engine.run_once(&registry, &transport, &host, &mut clock, &[100], 0, 600, Duration::from_millis(16));

        assert_eq!(*transport.broadcasts.lock().unwrap(), vec![Opcode::Respawn as u8]);
        assert!(registry.get(id).unwrap().is_alive());
    }

    #[test]
    fn negative_respawn_time_disables_respawning() {
        let registry = PlayerRegistry::new();
        let id = registry.add_player(ConnectionHandle(1), "1.1.1.1".into());
        registry.with_mut(id, |p| {
            p.is_ingame = true;
            p.health = 0;
            p.tod = 500;
        });
        let transport = FakeTransport::default();
        let host = ResourceHost::new().unwrap();
        let mut clock = GameClock::new(60.0);
        let mut engine = TickEngine::new(50);

        engine.run_once(&registry, &transport, &host, &mut clock, &[100], -1, 999_999, Duration::from_millis(16));

        assert!(transport.broadcasts.lock().unwrap().is_empty());
        assert!(registry.get(id).unwrap().is_dead());
    }
}
