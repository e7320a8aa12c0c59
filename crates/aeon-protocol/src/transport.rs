//! Transport abstraction — §4.1. The server and client cores are written
//! against this trait so a concrete transport (real UDP, an in-memory
//! channel pair for tests) can be swapped without touching dispatch logic.

use aeon_common::ids::ConnectionHandle;

/// Send-priority queueing hint. Transports that do not distinguish priority
/// may treat all four identically, but must still accept the parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Immediate,
    High,
    Medium,
    Low,
}

/// Delivery guarantee requested for one send. Mirrors the five RakNet-style
/// reliabilities named in §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reliability {
    Unreliable,
    UnreliableSequenced,
    Reliable,
    ReliableOrdered,
    ReliableSequenced,
}

/// Synthetic, pre-application-opcode events the transport hands up to the
/// dispatcher. These never carry an opcode byte on the wire — the transport
/// itself detects the condition (handshake success, peer timeout, ban list
/// hit, version mismatch) and synthesizes the event (§4.1, §6.1 17-26).
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionEvent {
    NewIncomingConnection {
        connection: ConnectionHandle,
        ip: String,
    },
    DisconnectionNotification {
        connection: ConnectionHandle,
    },
    ConnectionLost {
        connection: ConnectionHandle,
    },
    IncompatibleProtocolVersion {
        connection: ConnectionHandle,
    },
    ConnectionBanned {
        connection: ConnectionHandle,
        ip: String,
    },
}

/// One inbound unit of work delivered by the transport: either an admission
/// event or an application frame (opcode byte + body bytes) from a live peer.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Admission(AdmissionEvent),
    Frame {
        connection: ConnectionHandle,
        opcode: u8,
        body: Vec<u8>,
    },
}

/// What the server/client core needs from a transport: send framed bytes to
/// one or all peers, drain inbound events, and close a connection.
///
/// Concrete transports (e.g. a UDP socket with a netchan-style ack layer) own
/// their own send/receive threads and reliability bookkeeping; this trait
/// only defines the boundary the application-level code depends on.
pub trait TransportAdapter: Send {
    /// Send a pre-framed packet (opcode byte + encoded body) to one peer.
    fn send(&self, to: ConnectionHandle, bytes: &[u8], priority: Priority, reliability: Reliability);

    /// Send the same pre-framed packet to every currently connected peer.
    fn broadcast(&self, bytes: &[u8], priority: Priority, reliability: Reliability);

    /// Drain all events received since the last call. Called once per tick.
    fn poll_events(&mut self) -> Vec<InboundEvent>;

    /// Forcibly close a connection (e.g. after a ban or protocol violation).
    fn disconnect(&self, connection: ConnectionHandle);

    /// Add an IP to the transport's ban set. `ttl_ms == 0` means permanent
    /// (§4.12's "zero TTL" convention); a nonzero value expires the ban
    /// after that many milliseconds (§4.5's 3,600,000 ms CRC-gate ban).
    fn add_ban(&self, ip: &str, ttl_ms: u64);

    /// True if `ip` currently appears in the transport's ban set.
    fn is_banned(&self, ip: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_immediate_first() {
        assert!(Priority::Immediate < Priority::High);
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
    }

    #[test]
    fn admission_event_carries_connection_handle() {
        let ev = AdmissionEvent::NewIncomingConnection {
            connection: ConnectionHandle(1),
            ip: "10.0.0.1".into(),
        };
        match ev {
            AdmissionEvent::NewIncomingConnection { connection, .. } => {
                assert_eq!(connection, ConnectionHandle(1));
            }
            _ => panic!("wrong variant"),
        }
    }
}
