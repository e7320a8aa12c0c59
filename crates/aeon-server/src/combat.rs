//! Damage arbitration — §4.4's HPDiff handler. The authoritative server is
//! the only writer of `health`/`tod`/`UNCONSCIOUS`; this module never
//! touches the wire directly, it only mutates the registry and fires
//! scripting events. The caller (dispatch.rs) is responsible for
//! broadcasting `DoDie`/`Respawn` once this returns.

use aeon_common::ids::PlayerId;
use aeon_common::player::{max_health, PlayerFlags};
use aeon_script::ResourceHost;
use mlua::{MultiValue, Value};

use crate::registry::PlayerRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageOutcome {
    pub new_health: i16,
    pub became_unconscious: bool,
    pub died: bool,
}

/// Applies a signed health delta from `attacker` against `victim`.
///
/// Returns `None` when the attacker is not in-game, the victim does not
/// exist, or the victim is already dead — the caller should simply drop the
/// packet in those cases (§4.5: handlers never abort the server).
pub fn apply_hp_diff(
    registry: &PlayerRegistry,
    host: &ResourceHost,
    class_table: &[i16],
    be_unconscious_before_dead: bool,
    now_ms: u64,
    attacker: PlayerId,
    victim: PlayerId,
    delta: i16,
) -> Option<DamageOutcome> {
    let attacker_player = registry.get(attacker)?;
    if !attacker_player.is_ingame {
        return None;
    }
    let victim_player = registry.get(victim)?;
    if victim_player.is_dead() {
        return None;
    }

    let outcome = registry.with_mut(victim, |v| {
        let max_hp = max_health(v.class, class_table);
        let mut became_unconscious = false;

        if attacker == victim {
            v.health = (v.health + delta).clamp(0, max_hp);
        } else if be_unconscious_before_dead && matches!(attacker_player.fight_pos, 1 | 3 | 4) {
            if v.flags.contains(PlayerFlags::UNCONSCIOUS) {
                // A second hit while unconscious always kills.
                v.health = 0;
            } else {
                let candidate = v.health + delta;
                if candidate < 2 {
                    v.health = 1;
                    v.flags.insert(PlayerFlags::UNCONSCIOUS);
                    became_unconscious = true;
                } else {
                    v.health = candidate.clamp(0, max_hp);
                }
            }
        } else {
            v.health = (v.health + delta).clamp(0, max_hp);
        }

        let died = v.health <= 0;
        if died {
            v.health = 0;
            v.tod = now_ms;
            v.flags.remove(PlayerFlags::UNCONSCIOUS);
        }
        v.assert_death_invariant();

        DamageOutcome {
            new_health: v.health,
            became_unconscious,
            died,
        }
    })?;

    if delta < 0 {
        let hurt_amount = (-delta) as i64;
        host.events.trigger(host.lua(), "onPlayerHit", |_| {
            MultiValue::from_vec(vec![
                Value::Integer(attacker.0 as i64),
                Value::Integer(victim.0 as i64),
                Value::Integer(hurt_amount),
            ])
        });
    }

    if outcome.died {
        if attacker != victim {
            host.events.trigger(host.lua(), "onPlayerKill", |_| {
                MultiValue::from_vec(vec![
                    Value::Integer(attacker.0 as i64),
                    Value::Integer(victim.0 as i64),
                ])
            });
        }
        let killer = if attacker == victim { None } else { Some(attacker) };
        host.events.trigger(host.lua(), "onPlayerDeath", move |_| {
            let killer_value = match killer {
                Some(id) => Value::Integer(id.0 as i64),
                None => Value::Nil,
            };
            MultiValue::from_vec(vec![Value::Integer(victim.0 as i64), killer_value])
        });
    }

    Some(outcome)
}

/// §4.4 step 4: respawn every dead player whose grace period has elapsed.
/// Returns the set of players respawned this tick so the caller can
/// broadcast `Respawn` for each.
pub fn process_respawns(
    registry: &PlayerRegistry,
    class_table: &[i16],
    respawn_time_seconds: i64,
    now_ms: u64,
) -> Vec<PlayerId> {
    let mut respawned = Vec::new();
    registry.for_each(|player| {
        if player.tod == 0 {
            return;
        }
        let due = respawn_time_seconds == 0
            || now_ms >= player.tod + (respawn_time_seconds.max(0) as u64) * 1000;
        if !due {
            return;
        }
        registry.with_mut(player.id, |p| {
            p.flags.remove(PlayerFlags::UNCONSCIOUS);
            p.tod = 0;
            p.health = max_health(p.class, class_table);
            p.assert_death_invariant();
        });
        respawned.push(player.id);
    });
    respawned
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeon_common::ids::ConnectionHandle;

    fn setup() -> (PlayerRegistry, ResourceHost, PlayerId, PlayerId) {
        let registry = PlayerRegistry::new();
        let host = ResourceHost::new().unwrap();
        let attacker = registry.add_player(ConnectionHandle(1), "1.1.1.1".into());
        let victim = registry.add_player(ConnectionHandle(2), "2.2.2.2".into());
        registry.with_mut(attacker, |p| p.is_ingame = true);
        registry.with_mut(victim, |p| {
            p.is_ingame = true;
            p.health = 100;
        });
        (registry, host, attacker, victim)
    }

    #[test]
    fn self_heal_applies_delta_directly() {
        let (registry, host, _attacker, victim) = setup();
        registry.with_mut(victim, |p| p.health = 50);
        let outcome =
            apply_hp_diff(&registry, &host, &[], false, 1_000, victim, victim, 10).unwrap();
        assert_eq!(outcome.new_health, 60);
        assert!(!outcome.died);
    }

    #[test]
    fn lethal_hit_sets_tod_and_zeroes_health() {
        let (registry, host, attacker, victim) = setup();
        registry.with_mut(victim, |p| p.health = 10);
        let outcome =
            apply_hp_diff(&registry, &host, &[], false, 5_000, attacker, victim, -30).unwrap();
        assert!(outcome.died);
        assert_eq!(outcome.new_health, 0);
        let victim_player = registry.get(victim).unwrap();
        assert_eq!(victim_player.tod, 5_000);
        assert!(victim_player.is_dead());
    }

    #[test]
    fn unconscious_then_kill_with_fight_pos_one() {
        let (registry, host, attacker, victim) = setup();
        registry.with_mut(attacker, |p| p.fight_pos = 1);
        registry.with_mut(victim, |p| p.health = 6);

        let first =
            apply_hp_diff(&registry, &host, &[], true, 1_000, attacker, victim, -5).unwrap();
        assert!(first.became_unconscious);
        assert!(!first.died);
        assert_eq!(first.new_health, 1);
        assert!(registry
            .get(victim)
            .unwrap()
            .flags
            .contains(PlayerFlags::UNCONSCIOUS));

        let second =
            apply_hp_diff(&registry, &host, &[], true, 2_000, attacker, victim, -5).unwrap();
        assert!(second.died);
        assert!(!registry
            .get(victim)
            .unwrap()
            .flags
            .contains(PlayerFlags::UNCONSCIOUS));
    }

    #[test]
    fn already_dead_victim_is_ignored() {
        let (registry, host, attacker, victim) = setup();
        registry.with_mut(victim, |p| {
            p.health = 0;
            p.tod = 1;
        });
        assert!(apply_hp_diff(&registry, &host, &[], false, 2_000, attacker, victim, -5).is_none());
    }

    #[test]
    fn respawn_with_zero_grace_period_restores_max_health() {
        let registry = PlayerRegistry::new();
        let id = registry.add_player(ConnectionHandle(1), "1.1.1.1".into());
        registry.with_mut(id, |p| {
            p.is_ingame = true;
            p.health = 0;
            p.tod = 500;
        });
        let respawned = process_respawns(&registry, &[100], 0, 600);
        assert_eq!(respawned, vec![id]);
        let player = registry.get(id).unwrap();
        assert!(player.is_alive());
        assert_eq!(player.health, 100);
    }

    #[test]
    fn respawn_waits_for_grace_period() {
        let registry = PlayerRegistry::new();
        let id = registry.add_player(ConnectionHandle(1), "1.1.1.1".into());
        registry.with_mut(id, |p| {
            p.is_ingame = true;
            p.health = 0;
            p.tod = 1_000;
        });
        let too_soon = process_respawns(&registry, &[], 10, 5_000);
        assert!(too_soon.is_empty());
        let on_time = process_respawns(&registry, &[], 10, 11_000);
        assert_eq!(on_time, vec![id]);
    }
}
