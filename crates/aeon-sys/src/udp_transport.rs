//! Server-side UDP [`TransportAdapter`] — grounded in `net_udp.rs`'s
//! `NetState`/`net_ip_socket` (broadcast-capable, non-blocking, low-delay
//! `socket2` socket) and `net_io_thread.rs`'s background receive thread,
//! with the admission handshake layered on top per [`crate::wire`].

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use aeon_common::ids::ConnectionHandle;
use aeon_protocol::{AdmissionEvent, InboundEvent, Opcode, Priority, Reliability, TransportAdapter};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::io_thread::RecvThread;
use crate::wire::{self, ConnectRequest};

const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct UdpTransportConfig {
    pub password: String,
    pub max_slots: u32,
    pub connection_timeout: Duration,
}

impl Default for UdpTransportConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            max_slots: 16,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }
}

struct Peer {
    handle: ConnectionHandle,
    addr: SocketAddr,
    last_seen: Instant,
}

pub struct UdpTransportAdapter {
    socket: Arc<UdpSocket>,
    _recv_thread: RecvThread,
    rx: std::sync::mpsc::Receiver<crate::io_thread::ReceivedDatagram>,
    config: UdpTransportConfig,
    next_handle: AtomicU64,
    by_addr: Mutex<HashMap<SocketAddr, Peer>>,
    by_handle: Mutex<HashMap<ConnectionHandle, SocketAddr>>,
    bans: Mutex<HashMap<String, Option<Instant>>>,
}

fn open_udp_socket(bind_addr: &str, port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.set_broadcast(true)?;
    let addr: std::net::SocketAddrV4 = format!("{bind_addr}:{port}")
        .parse()
        .map_err(|e: std::net::AddrParseError| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
        })?;
    socket.bind(&socket2::SockAddr::from(addr))?;
    Ok(socket.into())
}

impl UdpTransportAdapter {
    pub fn bind(port: u16, config: UdpTransportConfig) -> std::io::Result<Self> {
        let socket = Arc::new(open_udp_socket("0.0.0.0", port)?);
        let (recv_thread, rx) = RecvThread::spawn(socket.clone(), "server");
        Ok(Self {
            socket,
            _recv_thread: recv_thread,
            rx,
            config,
            next_handle: AtomicU64::new(1),
            by_addr: Mutex::new(HashMap::new()),
            by_handle: Mutex::new(HashMap::new()),
            bans: Mutex::new(HashMap::new()),
        })
    }

    fn mint_handle(&self) -> ConnectionHandle {
        ConnectionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn send_raw(&self, addr: SocketAddr, bytes: &[u8]) {
        if let Err(e) = self.socket.send_to(bytes, addr) {
            if e.kind() != std::io::ErrorKind::WouldBlock {
                warn!(error = %e, %addr, "udp transport: send_to failed");
            }
        }
    }

    fn handle_handshake(&self, addr: SocketAddr, body: &[u8], events: &mut Vec<InboundEvent>) {
        let Some(req) = ConnectRequest::decode(body) else {
            debug!(%addr, "malformed connect request");
            return;
        };

        let ip = addr.ip().to_string();
        if self.is_banned(&ip) {
            let handle = self.mint_handle();
            self.send_raw(addr, &wire::bare(Opcode::ConnectionBanned));
            events.push(InboundEvent::Admission(AdmissionEvent::ConnectionBanned {
                connection: handle,
                ip,
            }));
            return;
        }
        if req.protocol_version != wire::PROTOCOL_VERSION {
            let handle = self.mint_handle();
            self.send_raw(addr, &wire::bare(Opcode::IncompatibleProtocolVersion));
            events.push(InboundEvent::Admission(AdmissionEvent::IncompatibleProtocolVersion {
                connection: handle,
            }));
            return;
        }
        if !self.config.password.is_empty() && req.password != self.config.password {
            self.send_raw(addr, &wire::bare(Opcode::InvalidPassword));
            return;
        }
        let mut by_addr = self.by_addr.lock().unwrap();
        if by_addr.len() as u32 >= self.config.max_slots {
            drop(by_addr);
            self.send_raw(addr, &wire::bare(Opcode::NoFreeIncomingConnections));
            return;
        }

        let handle = self.mint_handle();
        by_addr.insert(
            addr,
            Peer {
                handle,
                addr,
                last_seen: Instant::now(),
            },
        );
        drop(by_addr);
        self.by_handle.lock().unwrap().insert(handle, addr);
        self.send_raw(addr, &wire::bare(Opcode::NewIncomingConnection));
        events.push(InboundEvent::Admission(AdmissionEvent::NewIncomingConnection {
            connection: handle,
            ip,
        }));
    }

    fn remove_peer(&self, addr: SocketAddr) -> Option<ConnectionHandle> {
        let peer = self.by_addr.lock().unwrap().remove(&addr)?;
        self.by_handle.lock().unwrap().remove(&peer.handle);
        Some(peer.handle)
    }

    fn sweep_timeouts(&self, events: &mut Vec<InboundEvent>) {
        let timed_out: Vec<SocketAddr> = {
            let by_addr = self.by_addr.lock().unwrap();
            let now = Instant::now();
            by_addr
                .values()
                .filter(|p| now.duration_since(p.last_seen) > self.config.connection_timeout)
                .map(|p| p.addr)
                .collect()
        };
        for addr in timed_out {
            if let Some(handle) = self.remove_peer(addr) {
                events.push(InboundEvent::Admission(AdmissionEvent::ConnectionLost { connection: handle }));
            }
        }
    }
}

impl TransportAdapter for UdpTransportAdapter {
    fn send(&self, to: ConnectionHandle, bytes: &[u8], _priority: Priority, _reliability: Reliability) {
        if let Some(addr) = self.by_handle.lock().unwrap().get(&to).copied() {
            self.send_raw(addr, bytes);
        }
    }

    fn broadcast(&self, bytes: &[u8], _priority: Priority, _reliability: Reliability) {
        let addrs: Vec<SocketAddr> = self.by_handle.lock().unwrap().values().copied().collect();
        for addr in addrs {
            self.send_raw(addr, bytes);
        }
    }

    fn poll_events(&mut self) -> Vec<InboundEvent> {
        let mut events = Vec::new();

        while let Ok(datagram) = self.rx.try_recv() {
            if datagram.bytes.is_empty() {
                continue;
            }
            let opcode_byte = datagram.bytes[0];
            let body = &datagram.bytes[1..];

            let existing = self.by_addr.lock().unwrap().get(&datagram.from).map(|p| p.handle);
            match existing {
                Some(handle) => {
                    if opcode_byte == wire::CONNECT_REQUEST {
                        self.send_raw(datagram.from, &wire::bare(Opcode::AlreadyConnected));
                        continue;
                    }
                    if let Some(peer) = self.by_addr.lock().unwrap().get_mut(&datagram.from) {
                        peer.last_seen = Instant::now();
                    }
                    if opcode_byte == Opcode::DisconnectionNotification as u8 {
                        self.remove_peer(datagram.from);
                        events.push(InboundEvent::Admission(AdmissionEvent::DisconnectionNotification {
                            connection: handle,
                        }));
                        continue;
                    }
                    if opcode_byte == Opcode::Timestamp as u8 {
                        self.send_raw(datagram.from, &datagram.bytes);
                        continue;
                    }
                    match Opcode::from_u8(opcode_byte) {
                        Ok(opcode) if !opcode.is_admission() => {
                            events.push(InboundEvent::Frame {
                                connection: handle,
                                opcode: opcode as u8,
                                body: body.to_vec(),
                            });
                        }
                        _ => debug!(opcode_byte, "udp transport: dropping unexpected opcode from peer"),
                    }
                }
                None => {
                    if opcode_byte == wire::CONNECT_REQUEST {
                        self.handle_handshake(datagram.from, body, &mut events);
                    }
                }
            }
        }

        self.sweep_timeouts(&mut events);
        events
    }

    fn disconnect(&self, connection: ConnectionHandle) {
        if let Some(addr) = self.by_handle.lock().unwrap().remove(&connection) {
            self.by_addr.lock().unwrap().remove(&addr);
        }
    }

    fn add_ban(&self, ip: &str, ttl_ms: u64) {
        let expiry = if ttl_ms == 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(ttl_ms))
        };
        self.bans.lock().unwrap().insert(ip.to_string(), expiry);
    }

    fn is_banned(&self, ip: &str) -> bool {
        let mut bans = self.bans.lock().unwrap();
        match bans.get(ip) {
            None => false,
            Some(None) => true,
            Some(Some(expiry)) => {
                if Instant::now() >= *expiry {
                    bans.remove(ip);
                    false
                } else {
                    true
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_request_round_trips() {
        let req = ConnectRequest {
            protocol_version: 1,
            password: "secret".into(),
        };
        let bytes = req.encode();
        let decoded = ConnectRequest::decode(&bytes[1..]).unwrap();
        assert_eq!(decoded.protocol_version, 1);
        assert_eq!(decoded.password, "secret");
    }

    #[test]
    fn ban_with_zero_ttl_is_permanent() {
        let adapter = UdpTransportAdapter::bind(0, UdpTransportConfig::default()).unwrap();
        adapter.add_ban("10.0.0.5", 0);
        assert!(adapter.is_banned("10.0.0.5"));
    }

    #[test]
    fn ban_expires_after_ttl() {
        let adapter = UdpTransportAdapter::bind(0, UdpTransportConfig::default()).unwrap();
        adapter.add_ban("10.0.0.6", 1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(!adapter.is_banned("10.0.0.6"));
    }

    #[test]
    fn unbanned_ip_is_not_banned() {
        let adapter = UdpTransportAdapter::bind(0, UdpTransportConfig::default()).unwrap();
        assert!(!adapter.is_banned("1.2.3.4"));
    }
}
