//! Packet dispatcher — §4.5, grounded in `GameServer::ExecutePacket`'s opcode
//! switch and its per-opcode `Handle*` methods in
//! `gmp-server/lib/game_server.cpp`. Admission events never reach the opcode
//! table; every application frame requires a registered player first.

use aeon_common::ids::{ConnectionHandle, PlayerId};
use aeon_common::player::{max_health, sanitize_player_name};
use aeon_protocol::codec::{Decode, Encode, Reader};
use aeon_protocol::opcode::GameInfoFlags;
use aeon_protocol::packets::{
    frame, CastSpellPacket, CommandPacket, DiscordActivityPacket, DoDiePacket, DropItemPacket,
    ExistingPlayerInfo, ExistingPlayersPacket, GameInfoPacket, HpDiffPacket, InitialInfoPacket,
    JoinGamePacket, LeftGamePacket, MessagePacket, PlayerStateUpdatePacket, TakeItemPacket,
    VoicePacket,
};
use aeon_protocol::{AdmissionEvent, InboundEvent, Opcode, Priority, Reliability, TransportAdapter};
use aeon_script::ResourceHost;
use mlua::{MultiValue, Value};
use tracing::{debug, warn};

use crate::ban_manager::BanManager;
use crate::combat;
use crate::registry::PlayerRegistry;

/// Everything one dispatch pass needs; borrowed for a single
/// `handle_inbound_event` call and never held across a tick boundary.
pub struct DispatchContext<'a> {
    pub registry: &'a PlayerRegistry,
    pub transport: &'a dyn TransportAdapter,
    pub host: &'a ResourceHost,
    pub bans: &'a BanManager,
    pub class_table: &'a [i16],
    pub map_name: &'a str,
    pub allow_modification: bool,
    pub be_unconscious_before_dead: bool,
    pub now_ms: u64,
    pub raw_game_time: u32,
    pub game_mode: u8,
    pub game_info_flags: GameInfoFlags,
    /// Cached server activity, replicated to a joiner if one has ever been set
    /// via `UpdateDiscordActivity` (§4.9.6).
    pub discord_activity: Option<&'a DiscordActivityPacket>,
}

fn lua_string<'lua>(lua: &'lua mlua::Lua, s: &str) -> Value<'lua> {
    match lua.create_string(s) {
        Ok(v) => Value::String(v),
        Err(e) => {
            warn!(?e, "failed to allocate lua string for event payload");
            Value::Nil
        }
    }
}

fn optional_id(id: Option<PlayerId>) -> Value<'static> {
    match id {
        Some(id) => Value::Integer(id.0 as i64),
        None => Value::Nil,
    }
}

/// Entry point for one item drained from `TransportAdapter::poll_events`.
pub fn handle_inbound_event(ctx: &DispatchContext, event: InboundEvent) {
    match event {
        InboundEvent::Admission(admission) => handle_admission(ctx, admission),
        InboundEvent::Frame {
            connection,
            opcode,
            body,
        } => dispatch_frame(ctx, connection, opcode, &body),
    }
}

fn handle_admission(ctx: &DispatchContext, event: AdmissionEvent) {
    match event {
        AdmissionEvent::NewIncomingConnection { connection, ip } => {
            if ctx.bans.is_banned(&ip) || ctx.transport.is_banned(&ip) {
                ctx.transport.disconnect(connection);
                return;
            }
            let id = ctx.registry.add_player(connection, ip);
            let packet = InitialInfoPacket {
                map_name: ctx.map_name.to_string(),
                assigned_id: id,
            };
            ctx.transport.send(
                connection,
                &frame(Opcode::InitialInfo, &packet),
                Priority::Immediate,
                Reliability::Reliable,
            );
        }
        AdmissionEvent::DisconnectionNotification { connection }
        | AdmissionEvent::ConnectionLost { connection } => handle_disconnect(ctx, connection),
        AdmissionEvent::ConnectionBanned { connection, ip } => {
            debug!(%connection, ip, "rejected connection from banned ip");
        }
        AdmissionEvent::IncompatibleProtocolVersion { connection } => {
            debug!(%connection, "rejected connection: incompatible protocol version");
        }
    }
}

fn handle_disconnect(ctx: &DispatchContext, connection: ConnectionHandle) {
    let Some(player) = ctx.registry.remove_by_connection(connection) else {
        return;
    };
    if !player.is_ingame {
        return;
    }
    let id = player.id;
    ctx.host.events.trigger(ctx.host.lua(), "onPlayerDisconnect", move |_| {
        MultiValue::from_vec(vec![Value::Integer(id.0 as i64)])
    });
    let packet = LeftGamePacket { disconnected: id };
    ctx.transport.broadcast(
        &frame(Opcode::LeftGame, &packet),
        Priority::Immediate,
        Reliability::Reliable,
    );
}

fn dispatch_frame(ctx: &DispatchContext, connection: ConnectionHandle, opcode_byte: u8, body: &[u8]) {
    let opcode = match Opcode::from_u8(opcode_byte) {
        Ok(op) => op,
        Err(e) => {
            warn!(?e, %connection, "dropping frame with unknown opcode");
            return;
        }
    };

    if opcode == Opcode::Timestamp {
        let mut r = Reader::new(body);
        match aeon_protocol::packets::TimestampEnvelope::decode(&mut r) {
            Ok(env) => dispatch_frame(ctx, connection, env.inner_opcode, &env.inner_payload),
            Err(e) => warn!(?e, "malformed Timestamp envelope"),
        }
        return;
    }

    // §4.5: every application opcode requires a registered player — this
    // covers the narrow window between connect and the InitialInfo ack.
    if ctx.registry.id_for_connection(connection).is_none() {
        warn!(%connection, ?opcode, "frame from unregistered connection, dropping");
        return;
    }

    match opcode {
        Opcode::JoinGame => handle_join_game(ctx, connection, body),
        Opcode::PlayerStateUpdate => handle_state_update(ctx, connection, body),
        Opcode::HpDiff => handle_hp_diff(ctx, connection, body),
        Opcode::Message | Opcode::Whisper => handle_message(ctx, connection, body),
        Opcode::Command => handle_command(ctx, connection, body),
        Opcode::CastSpell => handle_cast_spell(ctx, connection, body, false),
        Opcode::CastSpellOnTarget => handle_cast_spell(ctx, connection, body, true),
        Opcode::DropItem => handle_drop_item(ctx, connection, body),
        Opcode::TakeItem => handle_take_item(ctx, connection, body),
        Opcode::Voice => handle_voice(ctx, connection, body),
        Opcode::GameInfo => handle_game_info_request(ctx, connection),
        other => {
            warn!(?other, "no handler registered for this opcode");
        }
    }
}

fn handle_join_game(ctx: &DispatchContext, connection: ConnectionHandle, body: &[u8]) {
    let Some(id) = ctx.registry.id_for_connection(connection) else {
        return;
    };
    let Some(player) = ctx.registry.get(id) else {
        return;
    };

    // §4.5, §8 scenario F: CRC-gate ban is installed directly into the
    // transport, not persisted through BanManager — it is a temporary
    // 1-hour penalty, not an admin ban list entry.
    if !ctx.allow_modification && !player.passed_crc_test {
        ctx.registry.remove_by_connection(connection);
        ctx.transport.add_ban(&player.ip, 3_600_000);
        ctx.transport.disconnect(connection);
        return;
    }

    let mut r = Reader::new(body);
    let packet = match JoinGamePacket::decode(&mut r) {
        Ok(p) => p,
        Err(e) => {
            warn!(?e, "malformed JoinGame");
            return;
        }
    };

    let was_dead = player.tod != 0;
    let was_ingame = player.is_ingame;
    let previous_class = player.class;
    let new_class = packet.class;
    let max_hp = max_health(new_class, ctx.class_table);
    let clean_name = sanitize_player_name(&packet.player_name);

    ctx.registry.with_mut(id, |p| {
        p.tod = 0;
        p.class = new_class;
        p.health = max_hp;
        p.state.health_points = max_hp;
        p.state.position = packet.position;
        p.state.nrot = packet.normal;
        p.state.left_hand = packet.left;
        p.state.right_hand = packet.right;
        p.state.equipped_armor = packet.armor;
        p.state.animation = packet.animation;
        p.head_model = packet.head_model;
        p.skin_tex = packet.skin_tex;
        p.body = packet.face_tex;
        p.walk_style = packet.walk_style;
        p.name = clean_name.clone();
    });

    if !was_ingame || previous_class != new_class {
        ctx.host
            .events
            .trigger(ctx.host.lua(), "onPlayerChangeClass", move |_| {
                MultiValue::from_vec(vec![Value::Integer(id.0 as i64), Value::Integer(new_class as i64)])
            });
    }

    let broadcast_packet = JoinGamePacket {
        player_id: Some(id),
        player_name: clean_name,
        ..packet
    };
    let framed_join = frame(Opcode::JoinGame, &broadcast_packet);

    let mut existing = Vec::new();
    ctx.registry.for_each_ingame(|existing_player| {
        if existing_player.id == id {
            return;
        }
        ctx.transport.send(
            existing_player.connection,
            &framed_join,
            Priority::Immediate,
            Reliability::Reliable,
        );
        existing.push(ExistingPlayerInfo {
            player_id: existing_player.id,
            player_name: existing_player.name.clone(),
            class: existing_player.class,
            head_model: existing_player.head_model,
            skin_tex: existing_player.skin_tex,
            walk_style: existing_player.walk_style,
            state: existing_player.state,
        });
    });

    if !existing.is_empty() {
        let snapshot = ExistingPlayersPacket { players: existing };
        ctx.transport.send(
            connection,
            &frame(Opcode::ExistingPlayers, &snapshot),
            Priority::Immediate,
            Reliability::Reliable,
        );
    }

    ctx.registry.with_mut(id, |p| p.is_ingame = true);

    if let Some(activity) = ctx.discord_activity {
        ctx.transport.send(
            connection,
            &frame(Opcode::DiscordActivity, activity),
            Priority::Medium,
            Reliability::Reliable,
        );
    }

    if was_dead {
        ctx.host.events.trigger(ctx.host.lua(), "onPlayerRespawn", move |_| {
            MultiValue::from_vec(vec![Value::Integer(id.0 as i64)])
        });
    }
    ctx.host.events.trigger(ctx.host.lua(), "onPlayerSpawn", move |_| {
        MultiValue::from_vec(vec![Value::Integer(id.0 as i64)])
    });
    ctx.host.events.trigger(ctx.host.lua(), "onPlayerConnect", move |_| {
        MultiValue::from_vec(vec![Value::Integer(id.0 as i64)])
    });
}

/// Client-reported state: position/animation/items are trusted, but health
/// and mana stay server-authoritative (§4.4 damage arbitration owns them).
fn handle_state_update(ctx: &DispatchContext, connection: ConnectionHandle, body: &[u8]) {
    let Some(id) = ctx.registry.id_for_connection(connection) else {
        return;
    };
    let mut r = Reader::new(body);
    let packet = match PlayerStateUpdatePacket::decode(&mut r) {
        Ok(p) => p,
        Err(e) => {
            warn!(?e, "malformed PlayerStateUpdate");
            return;
        }
    };
    let reported = packet.state;
    ctx.registry.with_mut(id, |p| {
        p.state.position = reported.position;
        p.state.nrot = reported.nrot;
        p.state.left_hand = reported.left_hand;
        p.state.right_hand = reported.right_hand;
        p.state.equipped_armor = reported.equipped_armor;
        p.state.melee_weapon = reported.melee_weapon;
        p.state.ranged_weapon = reported.ranged_weapon;
        p.state.animation = reported.animation;
        p.state.weapon_mode = reported.weapon_mode;
        p.state.active_spell_nr = reported.active_spell_nr;
        p.state.head_direction = reported.head_direction;
    });
}

fn handle_hp_diff(ctx: &DispatchContext, connection: ConnectionHandle, body: &[u8]) {
    let Some(attacker) = ctx.registry.id_for_connection(connection) else {
        return;
    };
    let mut r = Reader::new(body);
    let packet = match HpDiffPacket::decode(&mut r) {
        Ok(p) => p,
        Err(e) => {
            warn!(?e, "malformed HpDiff");
            return;
        }
    };
    let Some(outcome) = combat::apply_hp_diff(
        ctx.registry,
        ctx.host,
        ctx.class_table,
        ctx.be_unconscious_before_dead,
        ctx.now_ms,
        attacker,
        packet.victim,
        packet.delta,
    ) else {
        return;
    };
    if outcome.died {
        let die = DoDiePacket { dead: packet.victim };
        ctx.transport.broadcast(
            &frame(Opcode::DoDie, &die),
            Priority::Immediate,
            Reliability::Reliable,
        );
    }
}

fn handle_message(ctx: &DispatchContext, connection: ConnectionHandle, body: &[u8]) {
    let Some(id) = ctx.registry.id_for_connection(connection) else {
        return;
    };
    let Some(player) = ctx.registry.get(id) else {
        return;
    };
    if !player.is_ingame || player.mute {
        return;
    }
    let mut r = Reader::new(body);
    let mut packet = match MessagePacket::decode(&mut r) {
        Ok(p) => p,
        Err(e) => {
            warn!(?e, "malformed Message");
            return;
        }
    };
    packet.sender = Some(id);

    if packet.is_whisper() {
        let Some(recipient_id) = packet.recipient else {
            warn!("whisper with no recipient");
            return;
        };
        let Some(recipient) = ctx.registry.get(recipient_id) else {
            return;
        };
        let text = packet.text.clone();
        ctx.host.events.trigger(ctx.host.lua(), "onPlayerWhisper", move |lua| {
            MultiValue::from_vec(vec![
                Value::Integer(id.0 as i64),
                Value::Integer(recipient_id.0 as i64),
                lua_string(lua, &text),
            ])
        });
        let framed = frame(Opcode::Whisper, &packet);
        ctx.transport
            .send(player.connection, &framed, Priority::Low, Reliability::ReliableOrdered);
        ctx.transport
            .send(recipient.connection, &framed, Priority::Low, Reliability::ReliableOrdered);
        return;
    }

    if MessagePacket::is_command(&packet.text) {
        let command = packet.text.trim_start()[1..].to_string();
        if command.is_empty() {
            return;
        }
        ctx.host.events.trigger(ctx.host.lua(), "onPlayerCommand", move |lua| {
            MultiValue::from_vec(vec![Value::Integer(id.0 as i64), lua_string(lua, &command)])
        });
        return;
    }

    let text = packet.text.clone();
    ctx.host.events.trigger(ctx.host.lua(), "onPlayerMessage", move |lua| {
        MultiValue::from_vec(vec![Value::Integer(id.0 as i64), lua_string(lua, &text)])
    });

    let framed = frame(Opcode::Message, &packet);
    ctx.registry.for_each_ingame(|p| {
        ctx.transport
            .send(p.connection, &framed, Priority::Low, Reliability::ReliableOrdered);
    });
}

/// The dedicated `Command` opcode: a command submitted outside the chat
/// channel. `HandleRMConsole` left this unimplemented upstream "to be done in
/// scripts" — here that means firing the event and nothing else.
fn handle_command(ctx: &DispatchContext, connection: ConnectionHandle, body: &[u8]) {
    let Some(id) = ctx.registry.id_for_connection(connection) else {
        return;
    };
    let Some(player) = ctx.registry.get(id) else {
        return;
    };
    if !player.is_ingame {
        return;
    }
    let mut r = Reader::new(body);
    let packet = match CommandPacket::decode(&mut r) {
        Ok(p) => p,
        Err(e) => {
            warn!(?e, "malformed Command");
            return;
        }
    };
    if packet.command.is_empty() {
        return;
    }
    ctx.host.events.trigger(ctx.host.lua(), "onPlayerCommand", move |lua| {
        MultiValue::from_vec(vec![Value::Integer(id.0 as i64), lua_string(lua, &packet.command)])
    });
}

fn handle_cast_spell(ctx: &DispatchContext, connection: ConnectionHandle, body: &[u8], requires_target: bool) {
    let Some(id) = ctx.registry.id_for_connection(connection) else {
        return;
    };
    let Some(player) = ctx.registry.get(id) else {
        return;
    };
    if !player.is_ingame {
        return;
    }
    let mut r = Reader::new(body);
    let mut packet = match CastSpellPacket::decode(&mut r) {
        Ok(p) => p,
        Err(e) => {
            warn!(?e, "malformed CastSpell");
            return;
        }
    };
    packet.caster = Some(id);

    if requires_target {
        match packet.target.and_then(|t| ctx.registry.get(t)) {
            Some(target) if target.is_ingame => {}
            _ => return,
        }
    }

    let target = packet.target;
    let spell = packet.spell;
    ctx.host.events.trigger(ctx.host.lua(), "onPlayerCastSpell", move |_| {
        MultiValue::from_vec(vec![
            Value::Integer(id.0 as i64),
            Value::Integer(spell as i64),
            optional_id(target),
        ])
    });

    let opcode = if requires_target {
        Opcode::CastSpellOnTarget
    } else {
        Opcode::CastSpell
    };
    let framed = frame(opcode, &packet);
    ctx.registry.for_each_ingame(|p| {
        if p.id != id {
            ctx.transport.send(p.connection, &framed, Priority::High, Reliability::Reliable);
        }
    });
}

fn handle_drop_item(ctx: &DispatchContext, connection: ConnectionHandle, body: &[u8]) {
    let Some(id) = ctx.registry.id_for_connection(connection) else {
        return;
    };
    let Some(player) = ctx.registry.get(id) else {
        return;
    };
    if !player.is_ingame {
        return;
    }
    let mut r = Reader::new(body);
    let mut packet = match DropItemPacket::decode(&mut r) {
        Ok(p) => p,
        Err(e) => {
            warn!(?e, "malformed DropItem");
            return;
        }
    };
    packet.player_id = Some(id);

    let instance = packet.instance;
    let amount = packet.amount;
    ctx.host.events.trigger(ctx.host.lua(), "onPlayerDropItem", move |_| {
        MultiValue::from_vec(vec![
            Value::Integer(id.0 as i64),
            Value::Integer(instance as i64),
            Value::Integer(amount as i64),
        ])
    });

    let framed = frame(Opcode::DropItem, &packet);
    ctx.registry.for_each_ingame(|p| {
        if p.id != id {
            ctx.transport.send(p.connection, &framed, Priority::High, Reliability::Reliable);
        }
    });
}

fn handle_take_item(ctx: &DispatchContext, connection: ConnectionHandle, body: &[u8]) {
    if !ctx.game_info_flags.contains(GameInfoFlags::DROP_ITEMS) {
        return;
    }
    let Some(id) = ctx.registry.id_for_connection(connection) else {
        return;
    };
    let Some(player) = ctx.registry.get(id) else {
        return;
    };
    if !player.is_ingame {
        return;
    }
    let mut r = Reader::new(body);
    let mut packet = match TakeItemPacket::decode(&mut r) {
        Ok(p) => p,
        Err(e) => {
            warn!(?e, "malformed TakeItem");
            return;
        }
    };
    packet.player_id = Some(id);

    let instance = packet.instance;
    ctx.host.events.trigger(ctx.host.lua(), "onPlayerTakeItem", move |_| {
        MultiValue::from_vec(vec![Value::Integer(id.0 as i64), Value::Integer(instance as i64)])
    });

    let framed = frame(Opcode::TakeItem, &packet);
    ctx.registry.for_each_ingame(|p| {
        if p.id != id {
            ctx.transport.send(p.connection, &framed, Priority::High, Reliability::Reliable);
        }
    });
}

fn handle_voice(ctx: &DispatchContext, connection: ConnectionHandle, body: &[u8]) {
    if ctx.registry.id_for_connection(connection).is_none() {
        return;
    }
    let framed = frame(Opcode::Voice, &VoicePacket { raw: body.to_vec() });
    ctx.registry.for_each_ingame(|p| {
        if p.connection != connection {
            ctx.transport
                .send(p.connection, &framed, Priority::Immediate, Reliability::Unreliable);
        }
    });
}

fn handle_game_info_request(ctx: &DispatchContext, connection: ConnectionHandle) {
    let packet = GameInfoPacket {
        raw_game_time: ctx.raw_game_time,
        game_mode: ctx.game_mode,
        flags: ctx.game_info_flags,
    };
    ctx.transport.send(
        connection,
        &frame(Opcode::GameInfo, &packet),
        Priority::Immediate,
        Reliability::Reliable,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeon_common::vec3::Vec3;
    use parking_lot::Mutex as PLMutex;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeTransport {
        sent: StdMutex<Vec<(ConnectionHandle, Vec<u8>)>>,
        broadcasts: StdMutex<Vec<Vec<u8>>>,
        banned: StdMutex<Vec<(String, u64)>>,
        disconnected: StdMutex<Vec<ConnectionHandle>>,
    }

    impl TransportAdapter for FakeTransport {
        fn send(&self, to: ConnectionHandle, bytes: &[u8], _p: Priority, _r: Reliability) {
            self.sent.lock().unwrap().push((to, bytes.to_vec()));
        }
        fn broadcast(&self, bytes: &[u8], _p: Priority, _r: Reliability) {
            self.broadcasts.lock().unwrap().push(bytes.to_vec());
        }
        fn poll_events(&mut self) -> Vec<InboundEvent> {
            Vec::new()
        }
        fn disconnect(&self, connection: ConnectionHandle) {
            self.disconnected.lock().unwrap().push(connection);
        }
        fn add_ban(&self, ip: &str, ttl_ms: u64) {
            self.banned.lock().unwrap().push((ip.to_string(), ttl_ms));
        }
        fn is_banned(&self, ip: &str) -> bool {
            self.banned.lock().unwrap().iter().any(|(b, _)| b == ip)
        }
    }

    fn join_packet(name: &str) -> JoinGamePacket {
        JoinGamePacket {
            player_id: None,
            class: 1,
            head_model: 0,
            skin_tex: 0,
            face_tex: 0,
            walk_style: 0,
            position: Vec3::new(1.0, 2.0, 3.0),
            normal: Vec3::new(0.0, 0.0, 1.0),
            left: 0,
            right: 0,
            armor: 0,
            animation: 0,
            player_name: name.to_string(),
        }
    }

    fn encode<P: aeon_protocol::codec::Encode>(packet: &P) -> Vec<u8> {
        use aeon_protocol::codec::Writer;
        let mut w = Writer::new();
        packet.encode(&mut w);
        w.into_bytes()
    }

    fn base_ctx<'a>(
        registry: &'a PlayerRegistry,
        transport: &'a FakeTransport,
        host: &'a ResourceHost,
        bans: &'a BanManager,
    ) -> DispatchContext<'a> {
        DispatchContext {
            registry,
            transport,
            host,
            bans,
            class_table: &[],
            map_name: "newworld",
            allow_modification: true,
            be_unconscious_before_dead: false,
            now_ms: 0,
            raw_game_time: 0,
            game_mode: 0,
            game_info_flags: GameInfoFlags::empty(),
            discord_activity: None,
        }
    }

    #[test]
    fn join_game_marks_ingame_and_fires_connect_and_spawn() {
        let registry = PlayerRegistry::new();
        let transport = FakeTransport::default();
        let host = ResourceHost::new().unwrap();
        let bans_dir = tempfile::tempdir().unwrap();
        let bans = BanManager::load(bans_dir.path().join("bans.json")).unwrap();
        let ctx = base_ctx(&registry, &transport, &host, &bans);

        let conn = ConnectionHandle(1);
        let id = registry.add_player(conn, "1.1.1.1".into());

        let connect_calls = std::sync::Arc::new(PLMutex::new(0));
        let calls = connect_calls.clone();
        host.events.register_event("onPlayerConnect");
        let f = host
            .lua()
            .create_function(move |_, _: mlua::MultiValue| {
                *calls.lock() += 1;
                Ok(())
            })
            .unwrap();
        let key = host.lua().create_registry_value(f).unwrap();
        host.events.subscribe("onPlayerConnect", key, None).unwrap();

        let body = encode(&join_packet("Hero"));
        dispatch_frame(&ctx, conn, Opcode::JoinGame as u8, &body);

        assert!(registry.get(id).unwrap().is_ingame);
        assert_eq!(*connect_calls.lock(), 1);
    }

    #[test]
    fn join_game_rejects_failed_crc_when_modification_disallowed() {
        let registry = PlayerRegistry::new();
        let transport = FakeTransport::default();
        let host = ResourceHost::new().unwrap();
        let bans_dir = tempfile::tempdir().unwrap();
        let bans = BanManager::load(bans_dir.path().join("bans.json")).unwrap();
        let mut ctx = base_ctx(&registry, &transport, &host, &bans);
        ctx.allow_modification = false;

        let conn = ConnectionHandle(5);
        registry.add_player(conn, "9.9.9.9".into());

        let body = encode(&join_packet("Cheater"));
        dispatch_frame(&ctx, conn, Opcode::JoinGame as u8, &body);

        assert!(registry.id_for_connection(conn).is_none());
        assert_eq!(transport.banned.lock().unwrap()[0], ("9.9.9.9".to_string(), 3_600_000));
        assert_eq!(transport.disconnected.lock().unwrap().len(), 1);
    }

    #[test]
    fn second_joiner_receives_existing_players_snapshot() {
        let registry = PlayerRegistry::new();
        let transport = FakeTransport::default();
        let host = ResourceHost::new().unwrap();
        let bans_dir = tempfile::tempdir().unwrap();
        let bans = BanManager::load(bans_dir.path().join("bans.json")).unwrap();
        let ctx = base_ctx(&registry, &transport, &host, &bans);

        let conn_a = ConnectionHandle(1);
        registry.add_player(conn_a, "1.1.1.1".into());
        dispatch_frame(&ctx, conn_a, Opcode::JoinGame as u8, &encode(&join_packet("First")));

        let conn_b = ConnectionHandle(2);
        registry.add_player(conn_b, "2.2.2.2".into());
        dispatch_frame(&ctx, conn_b, Opcode::JoinGame as u8, &encode(&join_packet("Second")));

        let sent_to_b: Vec<_> = transport
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == conn_b)
            .cloned()
            .collect();
        assert!(sent_to_b
            .iter()
            .any(|(_, bytes)| bytes[0] == Opcode::ExistingPlayers as u8));
    }

    #[test]
    fn disconnect_of_ingame_player_broadcasts_left_game() {
        let registry = PlayerRegistry::new();
        let transport = FakeTransport::default();
        let host = ResourceHost::new().unwrap();
        let bans_dir = tempfile::tempdir().unwrap();
        let bans = BanManager::load(bans_dir.path().join("bans.json")).unwrap();
        let ctx = base_ctx(&registry, &transport, &host, &bans);

        let conn = ConnectionHandle(1);
        registry.add_player(conn, "1.1.1.1".into());
        dispatch_frame(&ctx, conn, Opcode::JoinGame as u8, &encode(&join_packet("Gone")));

        handle_disconnect(&ctx, conn);

        assert!(registry.id_for_connection(conn).is_none());
        assert_eq!(transport.broadcasts.lock().unwrap().len(), 1);
        assert_eq!(
            transport.broadcasts.lock().unwrap()[0][0],
            Opcode::LeftGame as u8
        );
    }

    #[test]
    fn voice_is_relayed_to_others_but_not_the_sender() {
        let registry = PlayerRegistry::new();
        let transport = FakeTransport::default();
        let host = ResourceHost::new().unwrap();
        let bans_dir = tempfile::tempdir().unwrap();
        let bans = BanManager::load(bans_dir.path().join("bans.json")).unwrap();
        let ctx = base_ctx(&registry, &transport, &host, &bans);

        let conn_a = ConnectionHandle(1);
        registry.add_player(conn_a, "1.1.1.1".into());
        dispatch_frame(&ctx, conn_a, Opcode::JoinGame as u8, &encode(&join_packet("A")));
        let conn_b = ConnectionHandle(2);
        registry.add_player(conn_b, "2.2.2.2".into());
        dispatch_frame(&ctx, conn_b, Opcode::JoinGame as u8, &encode(&join_packet("B")));

        transport.sent.lock().unwrap().clear();
        handle_voice(&ctx, conn_a, b"hello");

        let recipients: Vec<_> = transport.sent.lock().unwrap().iter().map(|(c, _)| *c).collect();
        assert_eq!(recipients, vec![conn_b]);
    }

    #[test]
    fn take_item_is_dropped_when_drop_items_disabled() {
        let registry = PlayerRegistry::new();
        let transport = FakeTransport::default();
        let host = ResourceHost::new().unwrap();
        let bans_dir = tempfile::tempdir().unwrap();
        let bans = BanManager::load(bans_dir.path().join("bans.json")).unwrap();
        let ctx = base_ctx(&registry, &transport, &host, &bans);

        let conn = ConnectionHandle(1);
        registry.add_player(conn, "1.1.1.1".into());
        dispatch_frame(&ctx, conn, Opcode::JoinGame as u8, &encode(&join_packet("A")));
        transport.sent.lock().unwrap().clear();
        transport.broadcasts.lock().unwrap().clear();

        let packet = TakeItemPacket {
            player_id: None,
            instance: 7,
        };
        dispatch_frame(&ctx, conn, Opcode::TakeItem as u8, &encode(&packet));

        assert!(transport.sent.lock().unwrap().is_empty());
        assert!(transport.broadcasts.lock().unwrap().is_empty());
    }

    #[test]
    fn take_item_broadcasts_when_drop_items_enabled() {
        let registry = PlayerRegistry::new();
        let transport = FakeTransport::default();
        let host = ResourceHost::new().unwrap();
        let bans_dir = tempfile::tempdir().unwrap();
        let bans = BanManager::load(bans_dir.path().join("bans.json")).unwrap();
        let mut ctx = base_ctx(&registry, &transport, &host, &bans);
        ctx.game_info_flags = GameInfoFlags::DROP_ITEMS;

        let conn_a = ConnectionHandle(1);
        registry.add_player(conn_a, "1.1.1.1".into());
        dispatch_frame(&ctx, conn_a, Opcode::JoinGame as u8, &encode(&join_packet("A")));
        let conn_b = ConnectionHandle(2);
        registry.add_player(conn_b, "2.2.2.2".into());
        dispatch_frame(&ctx, conn_b, Opcode::JoinGame as u8, &encode(&join_packet("B")));
        transport.sent.lock().unwrap().clear();

        let packet = TakeItemPacket {
            player_id: None,
            instance: 7,
        };
        dispatch_frame(&ctx, conn_a, Opcode::TakeItem as u8, &encode(&packet));

        let recipients: Vec<_> = transport.sent.lock().unwrap().iter().map(|(c, _)| *c).collect();
        assert_eq!(recipients, vec![conn_b]);
    }
}
