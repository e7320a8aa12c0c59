//! Client-side network runtime — §4.1 from the client's perspective, §4.9.5,
//! grounded in `GameClient` (`gmp-client/client-net/include/game_client.hpp`,
//! `.../src/game_client.cpp`): a single connection to one server, pumped once
//! per frame (`HandleNetwork`), with inbound frames routed either to the
//! remote-player mirror or, for `PT_EXTENDED_4_SCRIPTS`, to the scripting
//! host's `onPacket` event (`game_client.cpp:239`'s `event_observer_.OnPacket`).

use std::sync::Arc;

use aeon_common::ids::PlayerId;
use aeon_protocol::codec::{Decode, Reader};
use aeon_protocol::opcode::GameInfoFlags;
use aeon_protocol::packets::{
    self, frame, ExistingPlayersPacket, GameInfoPacket, InitialInfoPacket, JoinGamePacket,
    LeftGamePacket, PlayerStateUpdatePacket, PositionUpdatePacket, ServerMessagePacket,
};
use aeon_protocol::{Opcode, Reliability};
use aeon_script::client_resource::ClientResourceRuntime;
use tracing::{debug, warn};

use crate::mirror::RemotePlayerMirror;

/// Mirrors `GameClient::ConnectionState`. `Failed` carries the human-readable
/// reason surfaced by `GetConnectionError()` in the original.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

/// What the link underneath a [`ClientConnection`] hands up each pump. There
/// is exactly one peer, so unlike [`aeon_protocol::InboundEvent`] no
/// connection handle is threaded through.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientLinkEvent {
    Connected,
    ConnectionAttemptFailed,
    AlreadyConnected,
    NoFreeIncomingConnections,
    InvalidPassword,
    IncompatibleProtocolVersion,
    Banned,
    Disconnected,
    ConnectionLost,
    Frame { opcode: u8, body: Vec<u8> },
}

/// The boundary a concrete client transport (UDP, an in-memory pair for
/// tests) implements. `poll_events` is pumped once per [`ClientConnection::pulse`].
pub trait ClientLink: Send {
    fn send(&self, bytes: &[u8], reliability: Reliability);
    fn poll_events(&mut self) -> Vec<ClientLinkEvent>;
    fn ping_ms(&self) -> u32;
}

/// Outcomes a caller (UI, console) might care about from one [`ClientConnection::pulse`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientOutcome {
    StateChanged(ConnectionState),
    ChatMessage { sender: Option<PlayerId>, text: String, is_whisper: bool },
    ServerMessage(String),
}

pub struct ClientConnection {
    link: Box<dyn ClientLink>,
    state: ConnectionState,
    assigned_id: Option<PlayerId>,
    map_name: String,
    game_info: Option<GameInfoPacket>,
    mirror: RemotePlayerMirror,
    scripts: Arc<ClientResourceRuntime>,
}

impl ClientConnection {
    pub fn new(link: Box<dyn ClientLink>, scripts: Arc<ClientResourceRuntime>, mirror: RemotePlayerMirror) -> Self {
        Self {
            link,
            state: ConnectionState::Connecting,
            assigned_id: None,
            map_name: String::new(),
            game_info: None,
            mirror,
            scripts,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn assigned_id(&self) -> Option<PlayerId> {
        self.assigned_id
    }

    pub fn ping_ms(&self) -> u32 {
        self.link.ping_ms()
    }

    pub fn game_info_flags(&self) -> GameInfoFlags {
        self.game_info.map(|g| g.flags).unwrap_or_default()
    }

    /// Requests to join the game as a freshly-created character. `player_id`
    /// is always `None` in an outgoing request — the server fills it in and
    /// echoes the packet back to everyone else (`JoinGamePacket`'s `Option`
    /// distinguishes "this is me" from "someone else joined").
    #[allow(clippy::too_many_arguments)]
    pub fn join_game(
        &self,
        class: u8,
        head_model: u8,
        skin_tex: u8,
        face_tex: u8,
        walk_style: u8,
        position: aeon_common::vec3::Vec3,
        normal: aeon_common::vec3::Vec3,
        player_name: String,
    ) {
        let packet = JoinGamePacket {
            player_id: None,
            class,
            head_model,
            skin_tex,
            face_tex,
            walk_style,
            position,
            normal,
            left: 0,
            right: 0,
            armor: 0,
            animation: 0,
            player_name,
        };
        self.link.send(&frame(Opcode::JoinGame, &packet), Reliability::Reliable);
    }

    pub fn send_command(&self, command: &str) {
        let packet = packets::CommandPacket { command: command.to_string() };
        self.link.send(&frame(Opcode::Command, &packet), Reliability::Reliable);
    }

    /// Drains the link once, the way `HandleNetwork` drives `g_netclient->Pulse()`
    /// and `HandlePacket` once per frame.
    pub fn pulse(&mut self) -> Vec<ClientOutcome> {
        let mut outcomes = Vec::new();
        for event in self.link.poll_events() {
            self.handle_event(event, &mut outcomes);
        }
        outcomes
    }

    fn set_state(&mut self, state: ConnectionState, outcomes: &mut Vec<ClientOutcome>) {
        self.state = state.clone();
        outcomes.push(ClientOutcome::StateChanged(state));
    }

    fn handle_event(&mut self, event: ClientLinkEvent, outcomes: &mut Vec<ClientOutcome>) {
        match event {
            ClientLinkEvent::Connected => self.set_state(ConnectionState::Connected, outcomes),
            ClientLinkEvent::ConnectionAttemptFailed => {
                self.set_state(ConnectionState::Failed("connection attempt failed".into()), outcomes)
            }
            ClientLinkEvent::AlreadyConnected => {
                self.set_state(ConnectionState::Failed("already connected".into()), outcomes)
            }
            ClientLinkEvent::NoFreeIncomingConnections => {
                self.set_state(ConnectionState::Failed("server is full".into()), outcomes)
            }
            ClientLinkEvent::InvalidPassword => {
                self.set_state(ConnectionState::Failed("invalid password".into()), outcomes)
            }
            ClientLinkEvent::IncompatibleProtocolVersion => {
                self.set_state(ConnectionState::Failed("incompatible protocol version".into()), outcomes)
            }
            ClientLinkEvent::Banned => self.set_state(ConnectionState::Failed("banned".into()), outcomes),
            ClientLinkEvent::Disconnected => self.set_state(ConnectionState::Disconnected, outcomes),
            ClientLinkEvent::ConnectionLost => {
                self.set_state(ConnectionState::Failed("connection lost".into()), outcomes)
            }
            ClientLinkEvent::Frame { opcode, body } => self.handle_frame(opcode, &body, outcomes),
        }
    }

    fn handle_frame(&mut self, opcode_byte: u8, body: &[u8], outcomes: &mut Vec<ClientOutcome>) {
        let Ok(opcode) = Opcode::from_u8(opcode_byte) else {
            warn!(opcode = opcode_byte, "unknown opcode from server");
            return;
        };

        match opcode {
            Opcode::InitialInfo => {
                let mut r = Reader::new(body);
                let Ok(packet) = InitialInfoPacket::decode(&mut r) else {
                    return;
                };
                self.assigned_id = Some(packet.assigned_id);
                self.map_name = packet.map_name;
            }
            Opcode::GameInfo => {
                let mut r = Reader::new(body);
                if let Ok(packet) = GameInfoPacket::decode(&mut r) {
                    self.game_info = Some(packet);
                }
            }
            Opcode::ExistingPlayers => {
                let mut r = Reader::new(body);
                if let Ok(packet) = ExistingPlayersPacket::decode(&mut r) {
                    for p in packet.players {
                        if Some(p.player_id) != self.assigned_id {
                            self.mirror.spawn_existing(p);
                        }
                    }
                }
            }
            Opcode::JoinGame => {
                let mut r = Reader::new(body);
                if let Ok(packet) = JoinGamePacket::decode(&mut r) {
                    match packet.player_id {
                        Some(id) if Some(id) != self.assigned_id => self.mirror.on_join_game(id, &packet),
                        _ => {}
                    }
                }
            }
            Opcode::PlayerStateUpdate => {
                let mut r = Reader::new(body);
                if let Ok(packet) = PlayerStateUpdatePacket::decode(&mut r) {
                    if let Some(id) = packet.player_id {
                        if Some(id) != self.assigned_id {
                            self.mirror.on_state_update(id, packet.state);
                        }
                    }
                }
            }
            Opcode::PositionUpdate => {
                let mut r = Reader::new(body);
                if let Ok(packet) = PositionUpdatePacket::decode(&mut r) {
                    if let Some(id) = packet.player_id {
                        if Some(id) != self.assigned_id {
                            self.mirror.on_position_update(id, packet.position);
                        }
                    }
                }
            }
            Opcode::LeftGame => {
                let mut r = Reader::new(body);
                if let Ok(packet) = LeftGamePacket::decode(&mut r) {
                    self.mirror.despawn(packet.disconnected);
                }
            }
            Opcode::ServerMessage => {
                let mut r = Reader::new(body);
                if let Ok(packet) = ServerMessagePacket::decode(&mut r) {
                    outcomes.push(ClientOutcome::ServerMessage(packet.text));
                }
            }
            Opcode::Message | Opcode::Whisper => {
                let mut r = Reader::new(body);
                if let Ok(packet) = packets::MessagePacket::decode(&mut r) {
                    outcomes.push(ClientOutcome::ChatMessage {
                        sender: packet.sender,
                        is_whisper: packet.is_whisper(),
                        text: packet.text,
                    });
                }
            }
            Opcode::ScriptingEnvelope => self.dispatch_scripting_envelope(body),
            other => debug!(?other, "unhandled client opcode"),
        }
    }

    /// `game_client.cpp:239-241`: the server's only use of this opcode is to
    /// hand raw, application-defined bytes to scripts via `onPacket` — the
    /// client core itself never interprets the payload.
    fn dispatch_scripting_envelope(&self, payload: &[u8]) {
        let payload = payload.to_vec();
        self.scripts.events.trigger(self.scripts.lua(), "onPacket", move |lua| {
            match lua.create_string(&payload) {
                Ok(s) => mlua::MultiValue::from_iter([mlua::Value::String(s)]),
                Err(e) => {
                    warn!(?e, "failed to allocate onPacket payload string");
                    mlua::MultiValue::new()
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeon_common::vec3::Vec3;
    use aeon_protocol::codec::{Encode, Writer};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeLink {
        sent: Mutex<Vec<u8>>,
        queue: Mutex<Vec<ClientLinkEvent>>,
    }

    impl ClientLink for FakeLink {
        fn send(&self, bytes: &[u8], _r: Reliability) {
            self.sent.lock().unwrap().extend_from_slice(bytes);
        }
        fn poll_events(&mut self) -> Vec<ClientLinkEvent> {
            std::mem::take(&mut *self.queue.lock().unwrap())
        }
        fn ping_ms(&self) -> u32 {
            0
        }
    }

    fn make() -> ClientConnection {
        let scripts = Arc::new(ClientResourceRuntime::new().unwrap());
        scripts.install_bindings().unwrap();
        let mirror = RemotePlayerMirror::new(Default::default());
        ClientConnection::new(Box::new(FakeLink::default()), scripts, mirror)
    }

    #[test]
    fn starts_connecting() {
        let conn = make();
        assert_eq!(*conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn initial_info_sets_assigned_id_and_map() {
        let mut conn = make();
        let packet = InitialInfoPacket { map_name: "oldcamp".into(), assigned_id: PlayerId(7) };
        conn.handle_frame(Opcode::InitialInfo as u8, &{
            let mut w = aeon_protocol::codec::Writer::new();
            packet.encode(&mut w);
            w.into_bytes()
        }, &mut Vec::new());
        assert_eq!(conn.assigned_id(), Some(PlayerId(7)));
        assert_eq!(conn.map_name, "oldcamp");
    }

    #[test]
    fn own_join_game_echo_does_not_spawn_a_mirror() {
        let mut conn = make();
        conn.assigned_id = Some(PlayerId(1));
        let packet = JoinGamePacket {
            player_id: Some(PlayerId(1)),
            class: 0,
            head_model: 0,
            skin_tex: 0,
            face_tex: 0,
            walk_style: 0,
            position: Vec3::ZERO,
            normal: Vec3::ZERO,
            left: 0,
            right: 0,
            armor: 0,
            animation: 0,
            player_name: "me".into(),
        };
        let mut w = aeon_protocol::codec::Writer::new();
        packet.encode(&mut w);
        conn.handle_frame(Opcode::JoinGame as u8, &w.into_bytes(), &mut Vec::new());
        assert!(!conn.mirror.contains(PlayerId(1)));
    }

    #[test]
    fn connected_event_updates_state_and_emits_outcome() {
        let mut conn = make();
        let mut outcomes = Vec::new();
        conn.handle_event(ClientLinkEvent::Connected, &mut outcomes);
        assert_eq!(*conn.state(), ConnectionState::Connected);
        assert_eq!(outcomes, vec![ClientOutcome::StateChanged(ConnectionState::Connected)]);
    }
}
