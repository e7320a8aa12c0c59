//! Remote-player mirror — §4.10, grounded in `cl_smooth.rs`'s interpolation
//! helpers (`DeadReckoningState::update`/`predict`, `ViewSmoothing::snap_to`)
//! generalized from one local view to a table of every other connected
//! player: on each networked update, either snap, smoothly interpolate, or
//! leave the position alone for local animation to carry, depending on how
//! far the entity actually moved.

use std::collections::HashMap;
use std::time::Duration;

use aeon_common::ids::PlayerId;
use aeon_common::player::PlayerState;
use aeon_common::vec3::Vec3;
use aeon_protocol::packets::{ExistingPlayerInfo, JoinGamePacket};

/// Number of consecutive packets a small health change must survive before
/// it is applied, matching §4.10's flicker-avoidance gate. A death
/// transition (`new_hp == 0 && old_hp > 0`) always bypasses the gate.
const HEALTH_CHANGE_GATE_PACKETS: u32 = 5;

/// Thresholds driving [`RemotePlayerMirror`]'s snap/interpolate/leave-alone
/// decision, lifted from [`aeon_common::config::ClientConfig`] at
/// construction so this module does not depend on the full config type.
#[derive(Debug, Clone, Copy)]
pub struct MirrorConfig {
    pub teleport_snap_distance: f32,
    pub interpolate_snap_distance: f32,
    pub high_detail_radius: f32,
    pub interpolation_duration: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            teleport_snap_distance: 400.0,
            interpolate_snap_distance: 50.0,
            high_detail_radius: 5000.0,
            interpolation_duration: Duration::from_millis(150),
        }
    }
}

struct Interpolation {
    from: Vec3,
    to: Vec3,
    elapsed: Duration,
}

pub struct RemoteEntity {
    pub id: PlayerId,
    pub name: String,
    pub class: u8,
    pub head_model: u8,
    pub skin_tex: u8,
    pub walk_style: u8,
    pub state: PlayerState,
    /// Current position handed to the host engine; diverges from
    /// `state.position` while an interpolation is in flight.
    pub display_position: Vec3,
    /// Map-only: beyond [`MirrorConfig::high_detail_radius`], no body model
    /// is shown, only the position on the map.
    pub visible: bool,
    pub alive: bool,
    interp: Option<Interpolation>,
    packets_since_health_change: u32,
}

impl RemoteEntity {
    fn new_from_state(id: PlayerId, name: String, class: u8, head_model: u8, skin_tex: u8, walk_style: u8, state: PlayerState) -> Self {
        Self {
            id,
            name,
            class,
            head_model,
            skin_tex,
            walk_style,
            display_position: state.position,
            visible: true,
            alive: state.health_points > 0,
            state,
            interp: None,
            packets_since_health_change: 0,
        }
    }
}

/// Owns every remote player's mirrored state. The local player never gets an
/// entry here — callers filter the assigned id out before calling in.
#[derive(Default)]
pub struct RemotePlayerMirror {
    config: MirrorConfig,
    entities: HashMap<u32, RemoteEntity>,
}

impl RemotePlayerMirror {
    pub fn new(config: MirrorConfig) -> Self {
        Self {
            config,
            entities: HashMap::new(),
        }
    }

    pub fn contains(&self, id: PlayerId) -> bool {
        self.entities.contains_key(&id.0)
    }

    pub fn get(&self, id: PlayerId) -> Option<&RemoteEntity> {
        self.entities.get(&id.0)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// §4.10's `ExistingPlayers` handling: one entity created per already
    /// in-game player, reusing the same construction path as a fresh
    /// `JoinGame`.
    pub fn spawn_existing(&mut self, info: ExistingPlayerInfo) {
        self.entities.insert(
            info.player_id.0,
            RemoteEntity::new_from_state(
                info.player_id,
                info.player_name,
                info.class,
                info.head_model,
                info.skin_tex,
                info.walk_style,
                info.state,
            ),
        );
    }

    /// §4.10 "On JoinGame broadcast: creates a local engine entity, applies
    /// appearance, sets initial position."
    pub fn on_join_game(&mut self, id: PlayerId, packet: &JoinGamePacket) {
        let state = PlayerState {
            position: packet.position,
            nrot: packet.normal,
            left_hand: packet.left,
            right_hand: packet.right,
            equipped_armor: packet.armor,
            animation: packet.animation,
            health_points: 100,
            ..PlayerState::default()
        };
        self.entities.insert(
            id.0,
            RemoteEntity::new_from_state(
                id,
                packet.player_name.clone(),
                packet.class,
                packet.head_model,
                packet.skin_tex,
                packet.walk_style,
                state,
            ),
        );
    }

    pub fn despawn(&mut self, id: PlayerId) {
        self.entities.remove(&id.0);
    }

    /// §4.10's `PlayerStateUpdate` handler: reconstructs the orientation from
    /// `nrot`, decides snap/interpolate/leave-alone from how far the
    /// position moved, diffs item instances, and gates small health changes.
    pub fn on_state_update(&mut self, id: PlayerId, new_state: PlayerState) {
        let Some(entity) = self.entities.get_mut(&id.0) else {
            return;
        };

        let old_position = entity.state.position;
        let delta = old_position.distance(new_state.position);

        if delta > self.config.teleport_snap_distance {
            entity.display_position = new_state.position;
            entity.interp = None;
        } else if delta > self.config.interpolate_snap_distance {
            if locally_fighting(entity) {
                entity.display_position = new_state.position;
                entity.interp = None;
            } else {
                entity.interp = Some(Interpolation {
                    from: entity.display_position,
                    to: new_state.position,
                    elapsed: Duration::ZERO,
                });
            }
        }
        // else: delta is small enough that the host engine's own walk
        // animation carries it; `display_position` is left untouched.

        let old_health = entity.state.health_points;
        let new_health = new_state.health_points;
        let is_death = new_health <= 0 && old_health > 0;
        let small_change = (new_health - old_health).unsigned_abs() < 20;

        entity.packets_since_health_change += 1;
        if is_death || !small_change || entity.packets_since_health_change >= HEALTH_CHANGE_GATE_PACKETS {
            entity.state.health_points = new_health;
            entity.packets_since_health_change = 0;
            if is_death {
                entity.alive = false;
            } else if new_health > 0 {
                entity.alive = true;
            }
        }

        entity.state.nrot = new_state.nrot;
        entity.state.left_hand = new_state.left_hand;
        entity.state.right_hand = new_state.right_hand;
        entity.state.equipped_armor = new_state.equipped_armor;
        entity.state.melee_weapon = new_state.melee_weapon;
        entity.state.ranged_weapon = new_state.ranged_weapon;
        entity.state.animation = new_state.animation;
        entity.state.weapon_mode = new_state.weapon_mode;
        entity.state.active_spell_nr = new_state.active_spell_nr;
        entity.state.head_direction = new_state.head_direction;
        entity.state.position = new_state.position;
        entity.visible = true;
    }

    /// §4.10's `PlayerPositionUpdate` handler: the server only sends this
    /// once the pair is beyond [`MirrorConfig::high_detail_radius`], so the
    /// body is hidden and the map dot teleports straight to the new spot.
    pub fn on_position_update(&mut self, id: PlayerId, position: Vec3) {
        let Some(entity) = self.entities.get_mut(&id.0) else {
            return;
        };
        entity.state.position = position;
        entity.display_position = position;
        entity.interp = None;
        entity.visible = false;
    }

    /// Advances every in-flight interpolation by `dt`, to be called once per
    /// client frame alongside engine animation.
    pub fn advance(&mut self, dt: Duration) {
        let duration = self.config.interpolation_duration;
        for entity in self.entities.values_mut() {
            let Some(interp) = entity.interp.as_mut() else {
                continue;
            };
            interp.elapsed += dt;
            let t = (interp.elapsed.as_secs_f32() / duration.as_secs_f32()).min(1.0);
            entity.display_position = interp.from.lerp(interp.to, t);
            if t >= 1.0 {
                entity.interp = None;
            }
        }
    }
}

/// §4.10: close combat suppresses interpolation in favor of an immediate
/// snap, preventing visible rubberbanding during melee. There is no combat
/// state tracked elsewhere on the client mirror, so this is approximated by
/// the weapon mode the entity last reported (nonzero means a weapon drawn).
fn locally_fighting(entity: &RemoteEntity) -> bool {
    entity.state.weapon_mode != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: u32, position: Vec3) -> ExistingPlayerInfo {
        ExistingPlayerInfo {
            player_id: PlayerId(id),
            player_name: format!("p{id}"),
            class: 0,
            head_model: 0,
            skin_tex: 0,
            walk_style: 0,
            state: PlayerState {
                position,
                health_points: 100,
                ..PlayerState::default()
            },
        }
    }

    #[test]
    fn spawn_existing_creates_a_visible_entity() {
        let mut mirror = RemotePlayerMirror::new(MirrorConfig::default());
        mirror.spawn_existing(info(1, Vec3::ZERO));
        let e = mirror.get(PlayerId(1)).unwrap();
        assert!(e.visible);
        assert!(e.alive);
    }

    #[test]
    fn large_jump_snaps_immediately() {
        let mut mirror = RemotePlayerMirror::new(MirrorConfig::default());
        mirror.spawn_existing(info(1, Vec3::ZERO));
        let mut state = mirror.get(PlayerId(1)).unwrap().state;
        state.position = Vec3::new(1000.0, 0.0, 0.0);
        mirror.on_state_update(PlayerId(1), state);
        assert_eq!(mirror.get(PlayerId(1)).unwrap().display_position, Vec3::new(1000.0, 0.0, 0.0));
    }

    #[test]
    fn medium_move_interpolates_over_time() {
        let mut mirror = RemotePlayerMirror::new(MirrorConfig::default());
        mirror.spawn_existing(info(1, Vec3::ZERO));
        let mut state = mirror.get(PlayerId(1)).unwrap().state;
        state.position = Vec3::new(100.0, 0.0, 0.0);
        mirror.on_state_update(PlayerId(1), state);
        assert_eq!(mirror.get(PlayerId(1)).unwrap().display_position, Vec3::ZERO);

        mirror.advance(Duration::from_millis(150));
        let e = mirror.get(PlayerId(1)).unwrap();
        assert_eq!(e.display_position, Vec3::new(100.0, 0.0, 0.0));
    }

    #[test]
    fn small_move_leaves_display_position_untouched() {
        let mut mirror = RemotePlayerMirror::new(MirrorConfig::default());
        mirror.spawn_existing(info(1, Vec3::ZERO));
        let mut state = mirror.get(PlayerId(1)).unwrap().state;
        state.position = Vec3::new(10.0, 0.0, 0.0);
        mirror.on_state_update(PlayerId(1), state);
        assert_eq!(mirror.get(PlayerId(1)).unwrap().display_position, Vec3::ZERO);
    }

    #[test]
    fn death_transition_applies_immediately_even_if_small() {
        let mut mirror = RemotePlayerMirror::new(MirrorConfig::default());
        mirror.spawn_existing(info(1, Vec3::ZERO));
        let mut state = mirror.get(PlayerId(1)).unwrap().state;
        state.health_points = 0;
        mirror.on_state_update(PlayerId(1), state);
        let e = mirror.get(PlayerId(1)).unwrap();
        assert!(!e.alive);
        assert_eq!(e.state.health_points, 0);
    }

    #[test]
    fn small_health_change_is_gated_until_enough_packets_pass() {
        let mut mirror = RemotePlayerMirror::new(MirrorConfig::default());
        mirror.spawn_existing(info(1, Vec3::ZERO));
        let state = mirror.get(PlayerId(1)).unwrap().state;

        for _ in 0..HEALTH_CHANGE_GATE_PACKETS - 1 {
            let mut s = state;
            s.health_points = 95;
            mirror.on_state_update(PlayerId(1), s);
            assert_eq!(mirror.get(PlayerId(1)).unwrap().state.health_points, 100, "suppressed while gate is open");
        }

        let mut s = state;
        s.health_points = 95;
        mirror.on_state_update(PlayerId(1), s);
        assert_eq!(mirror.get(PlayerId(1)).unwrap().state.health_points, 95, "applied once the gate closes");
    }

    #[test]
    fn position_update_hides_the_body_and_teleports() {
        let mut mirror = RemotePlayerMirror::new(MirrorConfig::default());
        mirror.spawn_existing(info(1, Vec3::ZERO));
        mirror.on_position_update(PlayerId(1), Vec3::new(9000.0, 0.0, 0.0));
        let e = mirror.get(PlayerId(1)).unwrap();
        assert!(!e.visible);
        assert_eq!(e.display_position, Vec3::new(9000.0, 0.0, 0.0));
    }

    #[test]
    fn despawn_removes_the_entity() {
        let mut mirror = RemotePlayerMirror::new(MirrorConfig::default());
        mirror.spawn_existing(info(1, Vec3::ZERO));
        mirror.despawn(PlayerId(1));
        assert!(!mirror.contains(PlayerId(1)));
    }
}
