//! Client-side UDP [`ClientLink`] — the single-peer counterpart to
//! [`crate::udp_transport::UdpTransportAdapter`], sharing its handshake
//! wire format (`crate::wire`) and its background receive thread
//! (`crate::io_thread`).
//!
//! Reliability bookkeeping (resends, ordering, acks) is the concrete
//! transport's job per `TransportAdapter`'s own doc comment; this adapter
//! is deliberately thin — it hands raw datagrams to the OS and trusts the
//! application layer's own opcodes (`JoinGame`, `Command`, ...) to tolerate
//! UDP's unordered, lossy delivery the way the rest of this workspace
//! already assumes.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use aeon_client::connection::{ClientLink, ClientLinkEvent};
use aeon_protocol::{Opcode, Reliability};
use tracing::debug;

use crate::io_thread::{ReceivedDatagram, RecvThread};
use crate::wire::{self, ConnectRequest};

const HANDSHAKE_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const MAX_HANDSHAKE_ATTEMPTS: u32 = 10;
const PING_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
enum LinkState {
    Connecting,
    Connected,
    GaveUp,
}

pub struct UdpClientLink {
    socket: Arc<UdpSocket>,
    _recv_thread: RecvThread,
    rx: std::sync::mpsc::Receiver<ReceivedDatagram>,
    password: String,
    state: Mutex<LinkState>,
    attempts: Mutex<u32>,
    last_handshake_send: Mutex<Instant>,
    last_ping_send: Mutex<Instant>,
    ping_ms: AtomicU32,
    started: Instant,
}

impl UdpClientLink {
    pub fn connect(server_host: &str, server_port: u16, password: String) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect((server_host, server_port))?;
        let socket = Arc::new(socket);
        let (recv_thread, rx) = RecvThread::spawn(socket.clone(), "client");

        let link = Self {
            socket,
            _recv_thread: recv_thread,
            rx,
            password,
            state: Mutex::new(LinkState::Connecting),
            attempts: Mutex::new(0),
            last_handshake_send: Mutex::new(Instant::now() - HANDSHAKE_RETRY_INTERVAL),
            last_ping_send: Mutex::new(Instant::now()),
            ping_ms: AtomicU32::new(0),
            started: Instant::now(),
        };
        Ok(link)
    }

    fn now_millis(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    fn send_handshake_if_due(&self, events: &mut Vec<ClientLinkEvent>) {
        if *self.state.lock().unwrap() != LinkState::Connecting {
            return;
        }
        let mut last = self.last_handshake_send.lock().unwrap();
        if last.elapsed() < HANDSHAKE_RETRY_INTERVAL {
            return;
        }
        let mut attempts = self.attempts.lock().unwrap();
        if *attempts >= MAX_HANDSHAKE_ATTEMPTS {
            *self.state.lock().unwrap() = LinkState::GaveUp;
            events.push(ClientLinkEvent::ConnectionAttemptFailed);
            return;
        }
        *attempts += 1;
        *last = Instant::now();
        let req = ConnectRequest {
            protocol_version: wire::PROTOCOL_VERSION,
            password: self.password.clone(),
        };
        let _ = self.socket.send(&req.encode());
    }

    fn send_ping_if_due(&self) {
        if *self.state.lock().unwrap() != LinkState::Connected {
            return;
        }
        let mut last = self.last_ping_send.lock().unwrap();
        if last.elapsed() < PING_INTERVAL {
            return;
        }
        *last = Instant::now();
        let _ = self.socket.send(&wire::timestamp_packet(self.now_millis()));
    }

    fn handle_datagram(&self, datagram: ReceivedDatagram, events: &mut Vec<ClientLinkEvent>) {
        if datagram.bytes.is_empty() {
            return;
        }
        let opcode_byte = datagram.bytes[0];
        let body = &datagram.bytes[1..];

        match opcode_byte {
            b if b == Opcode::NewIncomingConnection as u8 => {
                *self.state.lock().unwrap() = LinkState::Connected;
                events.push(ClientLinkEvent::Connected);
            }
            b if b == Opcode::AlreadyConnected as u8 => events.push(ClientLinkEvent::AlreadyConnected),
            b if b == Opcode::NoFreeIncomingConnections as u8 => {
                events.push(ClientLinkEvent::NoFreeIncomingConnections)
            }
            b if b == Opcode::InvalidPassword as u8 => events.push(ClientLinkEvent::InvalidPassword),
            b if b == Opcode::IncompatibleProtocolVersion as u8 => {
                events.push(ClientLinkEvent::IncompatibleProtocolVersion)
            }
            b if b == Opcode::ConnectionBanned as u8 => events.push(ClientLinkEvent::Banned),
            b if b == Opcode::DisconnectionNotification as u8 => events.push(ClientLinkEvent::Disconnected),
            b if b == Opcode::Timestamp as u8 => {
                if let Some(sent_at) = wire::decode_timestamp(body) {
                    let rtt = self.now_millis().saturating_sub(sent_at);
                    self.ping_ms.store(rtt, Ordering::Relaxed);
                }
            }
            other => match Opcode::from_u8(other) {
                Ok(opcode) if !opcode.is_admission() => {
                    events.push(ClientLinkEvent::Frame {
                        opcode: opcode as u8,
                        body: body.to_vec(),
                    });
                }
                _ => debug!(opcode_byte = other, "udp link: dropping unexpected opcode from server"),
            },
        }
    }
}

impl ClientLink for UdpClientLink {
    fn send(&self, bytes: &[u8], _reliability: Reliability) {
        let _ = self.socket.send(bytes);
    }

    fn poll_events(&mut self) -> Vec<ClientLinkEvent> {
        let mut events = Vec::new();

        self.send_handshake_if_due(&mut events);
        self.send_ping_if_due();

        while let Ok(datagram) = self.rx.try_recv() {
            self.handle_datagram(datagram, &mut events);
        }

        events
    }

    fn ping_ms(&self) -> u32 {
        self.ping_ms.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_link_starts_in_connecting_state_and_sends_no_ping() {
        let link = UdpClientLink::connect("127.0.0.1", 0, String::new()).unwrap();
        assert_eq!(*link.state.lock().unwrap(), LinkState::Connecting);
        assert_eq!(link.ping_ms(), 0);
    }
}
