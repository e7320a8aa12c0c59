//! Public-list heartbeat — §4.13, grounded in `GameServer::AddToPublicListHTTP`
//! (`gmp-server/lib/game_server.cpp`): while the server is public, every 5s
//! issue `GET <lobby>/add.php?sn=<name>&port=<port>&crt=<current>&mx=<slots>&map=<map>`.
//! The original polls every 100ms and only fires the request once 5s have
//! elapsed; this port keeps that polling granularity so `stop()` reacts
//! quickly rather than blocking for a whole interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use aeon_common::config::ServerConfig;

use crate::registry::PlayerRegistry;

pub const DEFAULT_LOBBY_URL: &str = "http://lobby.your-site.com";
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Zeroes every ASCII control byte except BEL (0x07), matching the original
/// in-place sanitisation. Multi-byte UTF-8 continuation bytes are always
/// >= 0x80 and are left untouched.
pub fn sanitize_server_name(name: &str) -> String {
    let bytes: Vec<u8> = name
        .bytes()
        .map(|b| if b < 0x20 && b != 0x07 { 0 } else { b })
        .collect();
    String::from_utf8(bytes).unwrap_or_default()
}

fn build_query(config: &ServerConfig, current_players: usize) -> String {
    let name = sanitize_server_name(&config.name);
    format!(
        "add.php?sn={}&port={}&crt={}&mx={}&map={}",
        urlencoding_lite(&name),
        config.port,
        current_players,
        config.slots,
        urlencoding_lite(&config.map),
    )
}

/// Minimal query-parameter escaping: space and `&`/`?`/`#` are the only
/// characters that would otherwise corrupt the query string, since server
/// names and map names are free text.
fn urlencoding_lite(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ' ' => out.push_str("%20"),
            '&' => out.push_str("%26"),
            '?' => out.push_str("%3F"),
            '#' => out.push_str("%23"),
            '\0' => {}
            other => out.push(other),
        }
    }
    out
}

pub struct HeartbeatWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatWorker {
    pub fn spawn(config: Arc<ServerConfig>, registry: Arc<PlayerRegistry>) -> Self {
        Self::spawn_with_lobby(config, registry, DEFAULT_LOBBY_URL.to_string())
    }

    pub fn spawn_with_lobby(
        config: Arc<ServerConfig>,
        registry: Arc<PlayerRegistry>,
        lobby_url: String,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = std::thread::spawn(move || {
            let client = reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client");
            let mut last_sent = Instant::now() - HEARTBEAT_INTERVAL;
            while !stop_flag.load(Ordering::Relaxed) {
                if config.public && last_sent.elapsed() >= HEARTBEAT_INTERVAL {
                    last_sent = Instant::now();
                    let query = build_query(&config, registry.len());
                    let url = format!("{lobby_url}/{query}");
                    if let Err(e) = client.get(&url).send() {
                        tracing::warn!(error = %e, "public-list heartbeat request failed");
                    }
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HeartbeatWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_bytes_are_nulled_except_bell() {
        let raw = "Ga\u{0007}nd\u{0001}alf";
        let sanitized = sanitize_server_name(raw);
        assert_eq!(sanitized.as_bytes()[2], 0x07);
        assert_eq!(sanitized.as_bytes()[5], 0x00);
    }

    #[test]
    fn printable_ascii_is_unchanged() {
        assert_eq!(sanitize_server_name("My Server"), "My Server");
    }

    #[test]
    fn query_string_contains_expected_fields() {
        let cfg = ServerConfig {
            name: "My Server".to_string(),
            port: 27900,
            slots: 16,
            map: "newworld".to_string(),
            ..ServerConfig::default()
        };
        let query = build_query(&cfg, 3);
        assert!(query.starts_with("add.php?sn=My%20Server"));
        assert!(query.contains("port=27900"));
        assert!(query.contains("crt=3"));
        assert!(query.contains("mx=16"));
        assert!(query.contains("map=newworld"));
    }

    #[test]
    fn worker_stops_promptly() {
        let cfg = Arc::new(ServerConfig {
            public: false,
            ..ServerConfig::default()
        });
        let registry = Arc::new(PlayerRegistry::new());
        let worker = HeartbeatWorker::spawn(cfg, registry);
        worker.stop();
    }
}
