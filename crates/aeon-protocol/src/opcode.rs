//! Opcode catalogue — §6.1. Every frame begins with a single opcode byte.

use aeon_common::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    ConnectionAttemptFailed = 17,
    AlreadyConnected = 18,
    NewIncomingConnection = 19,
    NoFreeIncomingConnections = 20,
    DisconnectionNotification = 21,
    ConnectionLost = 22,
    ConnectionBanned = 23,
    InvalidPassword = 24,
    IncompatibleProtocolVersion = 25,
    IpRecentlyConnected = 26,
    Timestamp = 27,
    Message = 135,
    RequestFileLength = 136,
    RequestFilePart = 137,
    InitialInfo = 138,
    JoinGame = 139,
    PlayerStateUpdate = 140,
    ExistingPlayers = 141,
    HpDiff = 142,
    PositionUpdate = 143,
    Command = 144,
    Whisper = 145,
    ScriptingEnvelope = 146,
    ServerMessage = 147,
    LeftGame = 148,
    GameInfo = 149,
    DoDie = 150,
    Respawn = 151,
    DropItem = 152,
    TakeItem = 153,
    CastSpell = 154,
    CastSpellOnTarget = 155,
    Voice = 156,
    DiscordActivity = 157,
}

impl Opcode {
    pub fn from_u8(raw: u8) -> Result<Self, ProtocolError> {
        use Opcode::*;
        Ok(match raw {
            17 => ConnectionAttemptFailed,
            18 => AlreadyConnected,
            19 => NewIncomingConnection,
            20 => NoFreeIncomingConnections,
            21 => DisconnectionNotification,
            22 => ConnectionLost,
            23 => ConnectionBanned,
            24 => InvalidPassword,
            25 => IncompatibleProtocolVersion,
            26 => IpRecentlyConnected,
            27 => Timestamp,
            135 => Message,
            136 => RequestFileLength,
            137 => RequestFilePart,
            138 => InitialInfo,
            139 => JoinGame,
            140 => PlayerStateUpdate,
            141 => ExistingPlayers,
            142 => HpDiff,
            143 => PositionUpdate,
            144 => Command,
            145 => Whisper,
            146 => ScriptingEnvelope,
            147 => ServerMessage,
            148 => LeftGame,
            149 => GameInfo,
            150 => DoDie,
            151 => Respawn,
            152 => DropItem,
            153 => TakeItem,
            154 => CastSpell,
            155 => CastSpellOnTarget,
            156 => Voice,
            157 => DiscordActivity,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        })
    }

    /// Admission opcodes are synthesized by the transport layer, never sent
    /// by application code directly, and are handled before the dispatcher's
    /// opcode table (§4.1, §4.5).
    pub fn is_admission(self) -> bool {
        matches!(
            self,
            Opcode::ConnectionAttemptFailed
                | Opcode::AlreadyConnected
                | Opcode::NewIncomingConnection
                | Opcode::NoFreeIncomingConnections
                | Opcode::DisconnectionNotification
                | Opcode::ConnectionLost
                | Opcode::ConnectionBanned
                | Opcode::InvalidPassword
                | Opcode::IncompatibleProtocolVersion
                | Opcode::IpRecentlyConnected
        )
    }
}

bitflags::bitflags! {
    /// Flag byte in `GameInfo`: bit 0 QuickPots, bit 1 DropItems, bit 2 HideMap.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GameInfoFlags: u8 {
        const QUICK_POTS = 1 << 0;
        const DROP_ITEMS = 1 << 1;
        const HIDE_MAP   = 1 << 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_every_catalogued_opcode() {
        let all = [
            17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 135, 136, 137, 138, 139, 140, 141, 142,
            143, 144, 145, 146, 147, 148, 149, 150, 151, 152, 153, 154, 155, 156, 157,
        ];
        for raw in all {
            let op = Opcode::from_u8(raw).unwrap();
            assert_eq!(op as u8, raw);
        }
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        assert!(Opcode::from_u8(200).is_err());
        assert!(Opcode::from_u8(0).is_err());
    }

    #[test]
    fn admission_opcodes_are_flagged() {
        assert!(Opcode::NewIncomingConnection.is_admission());
        assert!(Opcode::ConnectionLost.is_admission());
        assert!(!Opcode::JoinGame.is_admission());
        assert!(!Opcode::Voice.is_admission());
    }

    #[test]
    fn gameinfo_flag_bits_match_spec() {
        let flags = GameInfoFlags::QUICK_POTS | GameInfoFlags::HIDE_MAP;
        assert_eq!(flags.bits(), 0b101);
    }
}
