//! The pre-connection handshake sub-protocol shared by [`crate::udp_transport`]
//! and [`crate::udp_link`].
//!
//! `aeon_protocol::Opcode`'s 17-26 range is reserved for admission-layer
//! signaling and is never run through `Encode`/`Decode` — the catalogue's
//! own doc comment says the transport "detects the condition ... and
//! synthesizes the event". This UDP transport takes that literally: those
//! same byte values double as the raw first byte of a connectionless
//! handshake datagram, so a rejected peer (wrong password, full server, bad
//! version, banned) sees exactly the opcode that names why, with no
//! `ConnectionHandle` ever minted for it. `CONNECT_REQUEST` is a single
//! extra marker outside the catalogued range (the client has no existing
//! opcode to request a connection with, since `NewIncomingConnection` is the
//! server's *accepted* reply); `PING`/`PONG` piggyback on `Timestamp` (27),
//! which the catalogue deliberately excludes from `is_admission()`.

use aeon_protocol::codec::{Reader, Writer};
use aeon_protocol::Opcode;

/// Client -> server, address not yet tracked. Body: protocol_version (u8),
/// password (string), player ip-facing display name is not needed here —
/// name arrives later via `JoinGame`.
pub const CONNECT_REQUEST: u8 = 0;

pub const PROTOCOL_VERSION: u8 = 1;

pub struct ConnectRequest {
    pub protocol_version: u8,
    pub password: String,
}

impl ConnectRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_u8(CONNECT_REQUEST);
        w.write_u8(self.protocol_version);
        w.write_string(&self.password);
        w.into_bytes()
    }

    pub fn decode(body: &[u8]) -> Option<Self> {
        let mut r = Reader::new(body);
        let protocol_version = r.read_u8().ok()?;
        let password = r.read_string().ok()?;
        Some(Self {
            protocol_version,
            password,
        })
    }
}

/// A bare admission opcode byte with no body — `NewIncomingConnection` (ack),
/// `AlreadyConnected`, `NoFreeIncomingConnections`, `InvalidPassword`,
/// `IncompatibleProtocolVersion`, `ConnectionBanned`, `DisconnectionNotification`.
pub fn bare(opcode: Opcode) -> Vec<u8> {
    vec![opcode as u8]
}

/// Timestamp ping/pong: `[Timestamp][u32 sender's own millis]`. Whichever
/// side receives one echoes the same body straight back; the original
/// sender then measures round-trip against its own clock.
pub fn timestamp_packet(millis: u32) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u8(Opcode::Timestamp as u8);
    w.write_u32(millis);
    w.into_bytes()
}

pub fn decode_timestamp(body: &[u8]) -> Option<u32> {
    let mut r = Reader::new(body);
    r.read_u32().ok()
}
