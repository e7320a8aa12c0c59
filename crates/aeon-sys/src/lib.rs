//! Concrete UDP transport — the only layer of this workspace allowed to
//! touch a real socket. `aeon-server` and `aeon-client` are written against
//! `aeon_protocol::TransportAdapter` / `aeon_client::connection::ClientLink`
//! and know nothing about sockets, threads, or the admission handshake;
//! this crate supplies both concrete implementations plus the binaries
//! that wire them into [`aeon_server::ServerContext`] and
//! [`aeon_client::connection::ClientConnection`].

pub mod io_thread;
pub mod udp_link;
pub mod udp_transport;
pub mod wire;

pub use udp_link::UdpClientLink;
pub use udp_transport::{UdpTransportAdapter, UdpTransportConfig};
