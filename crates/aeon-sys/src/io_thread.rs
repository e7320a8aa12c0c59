//! Background UDP receive thread — grounded in `net_io_thread.rs`'s
//! `spawn_udp_io_thread`/`udp_io_loop`, collapsed from that file's per-socket
//! (`NetSrc::Client`/`NetSrc::Server`) duplication down to the single socket
//! each of our adapters owns, and carrying `SocketAddr` instead of the
//! original's `NetAdr` since this workspace has no legacy address type to
//! interoperate with.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::warn;

const POLL_TIMEOUT: Duration = Duration::from_millis(10);
const MAX_DATAGRAM: usize = 8192;

pub struct ReceivedDatagram {
    pub from: SocketAddr,
    pub bytes: Vec<u8>,
}

/// Owns the background thread that drains `socket` and forwards every
/// datagram to the owner's channel. Dropping the handle joins the thread.
pub struct RecvThread {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RecvThread {
    pub fn spawn(socket: Arc<UdpSocket>, name: &str) -> (Self, mpsc::Receiver<ReceivedDatagram>) {
        let (tx, rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let handle = thread::Builder::new()
            .name(format!("udp-io-{name}"))
            .spawn(move || recv_loop(socket, tx, shutdown_clone))
            .expect("failed to spawn UDP receive thread");
        (
            Self {
                shutdown,
                handle: Some(handle),
            },
            rx,
        )
    }
}

impl Drop for RecvThread {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn recv_loop(socket: Arc<UdpSocket>, tx: mpsc::Sender<ReceivedDatagram>, shutdown: Arc<AtomicBool>) {
    if let Err(e) = socket.set_read_timeout(Some(POLL_TIMEOUT)) {
        warn!(error = %e, "udp receive thread: failed to set read timeout");
        return;
    }

    let mut buf = [0u8; MAX_DATAGRAM];
    while !shutdown.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                if tx
                    .send(ReceivedDatagram {
                        from,
                        bytes: buf[..len].to_vec(),
                    })
                    .is_err()
                {
                    break;
                }
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                if !shutdown.load(Ordering::Relaxed) {
                    warn!(error = %e, "udp receive thread: recv_from failed");
                }
            }
        }
    }
}
