//! Player data model — §3 of the design spec.

use crate::ids::{ConnectionHandle, PlayerId};
use crate::vec3::Vec3;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PlayerFlags: u8 {
        const UNCONSCIOUS = 1 << 0;
    }
}

/// Full state snapshot of a player, serialised on the wire in
/// `PlayerStateUpdate` and diffed by the client mirror.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerState {
    pub position: Vec3,
    pub nrot: Vec3,
    pub health_points: i16,
    pub mana_points: i16,
    pub left_hand: u16,
    pub right_hand: u16,
    pub equipped_armor: u16,
    pub melee_weapon: u16,
    pub ranged_weapon: u16,
    pub animation: u16,
    pub weapon_mode: u8,
    pub active_spell_nr: u8,
    pub head_direction: u8,
}

/// Authoritative server-side record for one connected peer.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub connection: ConnectionHandle,
    pub ip: String,

    pub name: String,
    pub class: u8,
    pub head_model: u8,
    pub skin_tex: u8,
    pub body: u8,
    pub walk_style: u8,

    pub state: PlayerState,
    pub health: i16,
    pub mana: i16,
    pub flags: PlayerFlags,

    pub is_ingame: bool,
    pub mute: bool,
    pub passed_crc_test: bool,

    /// Wall-clock time of death in milliseconds since epoch, or 0 if alive.
    pub tod: u64,
    pub fight_pos: u8,
}

impl Player {
    /// A freshly admitted connection, not yet in-game. Created on
    /// `NewIncomingConnection`.
    pub fn new_connecting(id: PlayerId, connection: ConnectionHandle, ip: String) -> Self {
        Self {
            id,
            connection,
            ip,
            name: String::new(),
            class: 0,
            head_model: 0,
            skin_tex: 0,
            body: 0,
            walk_style: 0,
            state: PlayerState::default(),
            health: 0,
            mana: 0,
            flags: PlayerFlags::empty(),
            is_ingame: false,
            mute: false,
            passed_crc_test: false,
            tod: 0,
            fight_pos: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.tod == 0
    }

    pub fn is_dead(&self) -> bool {
        !self.is_alive()
    }

    /// §3 invariant: `tod != 0 <=> health == 0`. Called after every health
    /// mutation so the invariant can never silently drift.
    pub fn assert_death_invariant(&self) {
        debug_assert_eq!(
            self.tod != 0,
            self.health == 0,
            "tod/health invariant violated for player {}",
            self.id
        );
    }
}

/// Sanitize a player-supplied display name: strip non-printable bytes, trim
/// whitespace, clamp to 24 UTF-16-ish code units (we use `chars().count()`
/// since the wire format carries UTF-8, not UTF-16; the 24 limit is a code
/// point count as the spec specifies "code units").
pub fn sanitize_player_name(raw: &str) -> String {
    let filtered: String = raw.chars().filter(|c| !c.is_control()).collect();
    let trimmed = filtered.trim();
    trimmed.chars().take(24).collect()
}

/// Default per-class maximum health. Falls back to 100 when the class table
/// is empty or the class is unknown, per §4.4's respawn rule.
pub fn max_health(class: u8, class_table: &[i16]) -> i16 {
    class_table
        .get(class as usize)
        .copied()
        .filter(|&hp| hp > 0)
        .unwrap_or(100)
}
