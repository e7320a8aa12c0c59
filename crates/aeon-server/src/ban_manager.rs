//! Ban manager — §4.12. Owns `bans.json` on disk and keeps the transport's
//! ban set in sync with it. The data shape and malformed-entry filtering
//! live in [`aeon_common::ban`]; this module adds the filesystem and
//! transport side-effects.

use std::fs;
use std::path::{Path, PathBuf};

use aeon_common::ban::{parse_ban_list, BanEntry};
use aeon_common::error::{CoreError, CoreResult, ResourceError};
use aeon_protocol::transport::TransportAdapter;
use parking_lot::Mutex;

pub struct BanManager {
    path: PathBuf,
    entries: Mutex<Vec<BanEntry>>,
}

impl BanManager {
    /// Loads `bans.json` from `path`. A missing file is treated as an empty
    /// ban list rather than an error (a fresh server has none yet).
    pub fn load(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let text = fs::read_to_string(&path).map_err(|e| {
                CoreError::Resource(ResourceError::NotFound(format!(
                    "reading {}: {e}",
                    path.display()
                )))
            })?;
            parse_ban_list(&text)?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Installs every loaded ban into the transport with a permanent (zero)
    /// TTL. §8 property 13 requires this to run before the first packet
    /// handler executes.
    pub fn sync_into_transport(&self, transport: &dyn TransportAdapter) {
        for entry in self.entries.lock().iter() {
            transport.add_ban(&entry.ip, 0);
        }
    }

    pub fn is_banned(&self, ip: &str) -> bool {
        self.entries.lock().iter().any(|e| e.ip == ip)
    }

    /// Adds an entry, installs it into the transport immediately, and
    /// rewrites `bans.json` atomically.
    pub fn add_ban(
        &self,
        entry: BanEntry,
        transport: &dyn TransportAdapter,
        ttl_ms: u64,
    ) -> CoreResult<()> {
        transport.add_ban(&entry.ip, ttl_ms);
        {
            let mut entries = self.entries.lock();
            if !entries.iter().any(|e| e.ip == entry.ip) {
                entries.push(entry);
            }
        }
        self.save()
    }

    /// Atomically rewrites `bans.json`: write to a sibling temp file, then
    /// rename over the original so a crash mid-write never truncates it.
    pub fn save(&self) -> CoreResult<()> {
        let entries = self.entries.lock();
        let json = serde_json::to_string_pretty(&*entries)
            .map_err(|e| CoreError::Resource(ResourceError::ManifestParse(e.to_string())))?;
        write_atomic(&self.path, &json)
    }
}

fn write_atomic(path: &Path, contents: &str) -> CoreResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents).map_err(|e| {
        CoreError::Resource(ResourceError::Build(format!(
            "writing {}: {e}",
            tmp.display()
        )))
    })?;
    fs::rename(&tmp, path).map_err(|e| {
        CoreError::Resource(ResourceError::Build(format!(
            "renaming {} to {}: {e}",
            tmp.display(),
            path.display()
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeon_protocol::{InboundEvent, Priority, Reliability};
    use aeon_common::ids::ConnectionHandle;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeTransport {
        banned: StdMutex<Vec<String>>,
    }

    impl TransportAdapter for FakeTransport {
        fn send(&self, _to: ConnectionHandle, _bytes: &[u8], _p: Priority, _r: Reliability) {}
        fn broadcast(&self, _bytes: &[u8], _p: Priority, _r: Reliability) {}
        fn poll_events(&mut self) -> Vec<InboundEvent> {
            Vec::new()
        }
        fn disconnect(&self, _connection: ConnectionHandle) {}
        fn add_ban(&self, ip: &str, _ttl_ms: u64) {
            self.banned.lock().unwrap().push(ip.to_string());
        }
        fn is_banned(&self, ip: &str) -> bool {
            self.banned.lock().unwrap().iter().any(|b| b == ip)
        }
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = BanManager::load(tmp.path().join("bans.json")).unwrap();
        assert!(!manager.is_banned("1.2.3.4"));
    }

    #[test]
    fn sync_installs_every_entry_with_zero_ttl() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bans.json");
        fs::write(&path, r#"[{"IP": "5.5.5.5"}]"#).unwrap();
        let manager = BanManager::load(&path).unwrap();
        let transport = FakeTransport::default();
        manager.sync_into_transport(&transport);
        assert_eq!(*transport.banned.lock().unwrap(), vec!["5.5.5.5".to_string()]);
    }

    #[test]
    fn add_ban_persists_and_installs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bans.json");
        let manager = BanManager::load(&path).unwrap();
        let transport = FakeTransport::default();
        manager
            .add_ban(BanEntry::permanent("9.9.9.9"), &transport, 3_600_000)
            .unwrap();
        assert!(transport.is_banned("9.9.9.9"));

        let reloaded = BanManager::load(&path).unwrap();
        assert!(reloaded.is_banned("9.9.9.9"));
    }

    #[test]
    fn add_ban_does_not_duplicate_existing_ip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bans.json");
        let manager = BanManager::load(&path).unwrap();
        let transport = FakeTransport::default();
        manager
            .add_ban(BanEntry::permanent("1.1.1.1"), &transport, 0)
            .unwrap();
        manager
            .add_ban(BanEntry::permanent("1.1.1.1"), &transport, 0)
            .unwrap();
        assert_eq!(manager.entries.lock().len(), 1);
    }
}
