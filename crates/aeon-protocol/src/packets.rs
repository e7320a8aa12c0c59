//! Packet payload structs for every application opcode in §6.1.
//!
//! Admission opcodes (17-26) carry no application payload — the transport
//! synthesizes them with out-of-band metadata (peer handle, ip) that never
//! crosses the wire, so they have no `Encode`/`Decode` impl here.

use aeon_common::ids::PlayerId;
use aeon_common::player::PlayerState;
use aeon_common::vec3::Vec3;

use crate::codec::{Decode, DecodeResult, Encode, Reader, Writer};
use crate::opcode::{GameInfoFlags, Opcode};

/// `Timestamp` (27): u32 ms timestamp, wrapping an inner opcode + payload.
/// The inner frame is re-dispatched as if it arrived without the wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampEnvelope {
    pub timestamp_ms: u32,
    pub inner_opcode: u8,
    pub inner_payload: Vec<u8>,
}

impl Encode for TimestampEnvelope {
    fn encode(&self, w: &mut Writer) {
        w.write_u32(self.timestamp_ms);
        w.write_u8(self.inner_opcode);
        w.write_bytes(&self.inner_payload);
    }
}

impl Decode for TimestampEnvelope {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        let timestamp_ms = r.read_u32()?;
        let inner_opcode = r.read_u8()?;
        let remaining = r.remaining();
        let inner_payload = r.read_bytes(remaining)?;
        Ok(Self {
            timestamp_ms,
            inner_opcode,
            inner_payload,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOp {
    Say = 0,
    Team = 1,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessagePacket {
    pub op: u8,
    pub sender: Option<PlayerId>,
    pub recipient: Option<PlayerId>,
    pub text: String,
}

impl Encode for MessagePacket {
    fn encode(&self, w: &mut Writer) {
        w.write_u8(self.op);
        w.write_optional_player_id(self.sender);
        w.write_optional_player_id(self.recipient);
        w.write_string(&self.text);
    }
}

impl Decode for MessagePacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            op: r.read_u8()?,
            sender: r.read_optional_player_id()?,
            recipient: r.read_optional_player_id()?,
            text: r.read_string()?,
        })
    }
}

impl MessagePacket {
    /// A `Message` with a recipient present is wire-identical to `Whisper`
    /// (§6.1: "Whisper: Message with recipient present"); this is the shared
    /// predicate both the codec and the dispatcher use to classify one.
    pub fn is_whisper(&self) -> bool {
        self.recipient.is_some()
    }

    /// §4.2: "Command is any text beginning with `/` after stripping."
    pub fn is_command(text: &str) -> bool {
        text.trim_start().starts_with('/')
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitialInfoPacket {
    pub map_name: String,
    pub assigned_id: PlayerId,
}

impl Encode for InitialInfoPacket {
    fn encode(&self, w: &mut Writer) {
        w.write_string(&self.map_name);
        w.write_player_id(self.assigned_id);
    }
}

impl Decode for InitialInfoPacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            map_name: r.read_string()?,
            assigned_id: r.read_player_id()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinGamePacket {
    pub player_id: Option<PlayerId>,
    pub class: u8,
    pub head_model: u8,
    pub skin_tex: u8,
    pub face_tex: u8,
    pub walk_style: u8,
    pub position: Vec3,
    pub normal: Vec3,
    pub left: u16,
    pub right: u16,
    pub armor: u16,
    pub animation: u16,
    pub player_name: String,
}

impl Encode for JoinGamePacket {
    fn encode(&self, w: &mut Writer) {
        w.write_optional_player_id(self.player_id);
        w.write_u8(self.class);
        w.write_u8(self.head_model);
        w.write_u8(self.skin_tex);
        w.write_u8(self.face_tex);
        w.write_u8(self.walk_style);
        w.write_vec3(self.position);
        w.write_vec3(self.normal);
        w.write_u16(self.left);
        w.write_u16(self.right);
        w.write_u16(self.armor);
        w.write_u16(self.animation);
        w.write_string(&self.player_name);
    }
}

impl Decode for JoinGamePacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            player_id: r.read_optional_player_id()?,
            class: r.read_u8()?,
            head_model: r.read_u8()?,
            skin_tex: r.read_u8()?,
            face_tex: r.read_u8()?,
            walk_style: r.read_u8()?,
            position: r.read_vec3()?,
            normal: r.read_vec3()?,
            left: r.read_u16()?,
            right: r.read_u16()?,
            armor: r.read_u16()?,
            animation: r.read_u16()?,
            player_name: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStateUpdatePacket {
    pub player_id: Option<PlayerId>,
    pub state: PlayerState,
}

impl Encode for PlayerStateUpdatePacket {
    fn encode(&self, w: &mut Writer) {
        w.write_optional_player_id(self.player_id);
        encode_player_state(&self.state, w);
    }
}

impl Decode for PlayerStateUpdatePacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            player_id: r.read_optional_player_id()?,
            state: decode_player_state(r)?,
        })
    }
}

fn encode_player_state(state: &PlayerState, w: &mut Writer) {
    w.write_vec3(state.position);
    w.write_vec3(state.nrot);
    w.write_i16(state.health_points);
    w.write_i16(state.mana_points);
    w.write_u16(state.left_hand);
    w.write_u16(state.right_hand);
    w.write_u16(state.equipped_armor);
    w.write_u16(state.melee_weapon);
    w.write_u16(state.ranged_weapon);
    w.write_u16(state.animation);
    w.write_u8(state.weapon_mode);
    w.write_u8(state.active_spell_nr);
    w.write_u8(state.head_direction);
}

fn decode_player_state(r: &mut Reader) -> DecodeResult<PlayerState> {
    Ok(PlayerState {
        position: r.read_vec3()?,
        nrot: r.read_vec3()?,
        health_points: r.read_i16()?,
        mana_points: r.read_i16()?,
        left_hand: r.read_u16()?,
        right_hand: r.read_u16()?,
        equipped_armor: r.read_u16()?,
        melee_weapon: r.read_u16()?,
        ranged_weapon: r.read_u16()?,
        animation: r.read_u16()?,
        weapon_mode: r.read_u8()?,
        active_spell_nr: r.read_u8()?,
        head_direction: r.read_u8()?,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExistingPlayerInfo {
    pub player_id: PlayerId,
    pub player_name: String,
    pub class: u8,
    pub head_model: u8,
    pub skin_tex: u8,
    pub walk_style: u8,
    pub state: PlayerState,
}

impl Encode for ExistingPlayerInfo {
    fn encode(&self, w: &mut Writer) {
        w.write_player_id(self.player_id);
        w.write_string(&self.player_name);
        w.write_u8(self.class);
        w.write_u8(self.head_model);
        w.write_u8(self.skin_tex);
        w.write_u8(self.walk_style);
        encode_player_state(&self.state, w);
    }
}

impl Decode for ExistingPlayerInfo {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            player_id: r.read_player_id()?,
            player_name: r.read_string()?,
            class: r.read_u8()?,
            head_model: r.read_u8()?,
            skin_tex: r.read_u8()?,
            walk_style: r.read_u8()?,
            state: decode_player_state(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExistingPlayersPacket {
    pub players: Vec<ExistingPlayerInfo>,
}

impl Encode for ExistingPlayersPacket {
    fn encode(&self, w: &mut Writer) {
        w.write_u32(self.players.len() as u32);
        for p in &self.players {
            p.encode(w);
        }
    }
}

impl Decode for ExistingPlayersPacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        let count = r.read_u32()? as usize;
        let mut players = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            players.push(ExistingPlayerInfo::decode(r)?);
        }
        Ok(Self { players })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HpDiffPacket {
    pub victim: PlayerId,
    pub delta: i16,
}

impl Encode for HpDiffPacket {
    fn encode(&self, w: &mut Writer) {
        w.write_player_id(self.victim);
        w.write_i16(self.delta);
    }
}

impl Decode for HpDiffPacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            victim: r.read_player_id()?,
            delta: r.read_i16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdatePacket {
    pub player_id: Option<PlayerId>,
    pub position: Vec3,
}

impl Encode for PositionUpdatePacket {
    fn encode(&self, w: &mut Writer) {
        w.write_optional_player_id(self.player_id);
        w.write_vec3(self.position);
    }
}

impl Decode for PositionUpdatePacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            player_id: r.read_optional_player_id()?,
            position: r.read_vec3()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandPacket {
    pub command: String,
}

impl Encode for CommandPacket {
    fn encode(&self, w: &mut Writer) {
        w.write_string(&self.command);
    }
}

impl Decode for CommandPacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            command: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptingEnvelopePacket {
    pub payload: Vec<u8>,
}

impl Encode for ScriptingEnvelopePacket {
    fn encode(&self, w: &mut Writer) {
        w.write_blob(&self.payload);
    }
}

impl Decode for ScriptingEnvelopePacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            payload: r.read_blob()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerMessagePacket {
    pub text: String,
}

impl Encode for ServerMessagePacket {
    fn encode(&self, w: &mut Writer) {
        w.write_string(&self.text);
    }
}

impl Decode for ServerMessagePacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            text: r.read_string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeftGamePacket {
    pub disconnected: PlayerId,
}

impl Encode for LeftGamePacket {
    fn encode(&self, w: &mut Writer) {
        w.write_player_id(self.disconnected);
    }
}

impl Decode for LeftGamePacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            disconnected: r.read_player_id()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameInfoPacket {
    pub raw_game_time: u32,
    pub game_mode: u8,
    pub flags: GameInfoFlags,
}

impl Encode for GameInfoPacket {
    fn encode(&self, w: &mut Writer) {
        w.write_u32(self.raw_game_time);
        w.write_u8(self.game_mode);
        w.write_u8(self.flags.bits());
    }
}

impl Decode for GameInfoPacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            raw_game_time: r.read_u32()?,
            game_mode: r.read_u8()?,
            flags: GameInfoFlags::from_bits_truncate(r.read_u8()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoDiePacket {
    pub dead: PlayerId,
}

impl Encode for DoDiePacket {
    fn encode(&self, w: &mut Writer) {
        w.write_player_id(self.dead);
    }
}

impl Decode for DoDiePacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            dead: r.read_player_id()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RespawnPacket {
    pub respawned: PlayerId,
}

impl Encode for RespawnPacket {
    fn encode(&self, w: &mut Writer) {
        w.write_player_id(self.respawned);
    }
}

impl Decode for RespawnPacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            respawned: r.read_player_id()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropItemPacket {
    pub player_id: Option<PlayerId>,
    pub instance: u16,
    pub amount: u16,
}

impl Encode for DropItemPacket {
    fn encode(&self, w: &mut Writer) {
        w.write_optional_player_id(self.player_id);
        w.write_u16(self.instance);
        w.write_u16(self.amount);
    }
}

impl Decode for DropItemPacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            player_id: r.read_optional_player_id()?,
            instance: r.read_u16()?,
            amount: r.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TakeItemPacket {
    pub player_id: Option<PlayerId>,
    pub instance: u16,
}

impl Encode for TakeItemPacket {
    fn encode(&self, w: &mut Writer) {
        w.write_optional_player_id(self.player_id);
        w.write_u16(self.instance);
    }
}

impl Decode for TakeItemPacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            player_id: r.read_optional_player_id()?,
            instance: r.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CastSpellPacket {
    pub caster: Option<PlayerId>,
    pub target: Option<PlayerId>,
    pub spell: u16,
}

impl Encode for CastSpellPacket {
    fn encode(&self, w: &mut Writer) {
        w.write_optional_player_id(self.caster);
        w.write_optional_player_id(self.target);
        w.write_u16(self.spell);
    }
}

impl Decode for CastSpellPacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            caster: r.read_optional_player_id()?,
            target: r.read_optional_player_id()?,
            spell: r.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoicePacket {
    pub raw: Vec<u8>,
}

impl Encode for VoicePacket {
    fn encode(&self, w: &mut Writer) {
        w.write_blob(&self.raw);
    }
}

impl Decode for VoicePacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            raw: r.read_blob()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiscordActivityPacket {
    pub details: String,
    pub state: String,
    pub large_image: String,
    pub large_text: String,
    pub small_image: String,
    pub small_text: String,
}

impl Encode for DiscordActivityPacket {
    fn encode(&self, w: &mut Writer) {
        for field in [
            &self.details,
            &self.state,
            &self.large_image,
            &self.large_text,
            &self.small_image,
            &self.small_text,
        ] {
            w.write_string(field);
        }
    }
}

impl Decode for DiscordActivityPacket {
    fn decode(r: &mut Reader) -> DecodeResult<Self> {
        Ok(Self {
            details: r.read_string()?,
            state: r.read_string()?,
            large_image: r.read_string()?,
            large_text: r.read_string()?,
            small_image: r.read_string()?,
            small_text: r.read_string()?,
        })
    }
}

/// Convenience: prepend the opcode byte and encode a packet body in one call.
pub fn frame<T: Encode>(opcode: Opcode, body: &T) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u8(opcode as u8);
    body.encode(&mut w);
    w.into_bytes()
}
