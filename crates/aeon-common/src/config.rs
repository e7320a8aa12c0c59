//! Server and client configuration — §6.2, realized as §4.15 of the
//! expanded spec: `serde` + `toml` deserialization with a clamp-to-default
//! policy for out-of-range values (Config error kind, §7).

use serde::Deserialize;
use std::path::Path;

use crate::error::{ConfigError, CoreError, CoreResult};

fn default_true() -> bool {
    true
}

fn default_tick_rate() -> u32 {
    50
}

fn default_frame_sleep_ms() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub port: u16,
    pub public: bool,
    pub slots: u32,
    pub admin_passwd: String,
    pub auth_key: String,
    pub map: String,
    pub map_md5: String,
    pub allow_modification: bool,
    pub hide_map: bool,
    pub respawn_time_seconds: i64,
    pub log_file: String,
    pub log_to_stdout: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub scripts: Vec<String>,
    /// Per-class max health, indexed by class id; an empty table falls back
    /// to a flat 100 HP for every class (see `max_health`).
    pub class_table: Vec<i16>,
    #[serde(default = "default_tick_rate")]
    pub tick_rate_ms: u32,
    pub be_unconscious_before_dead: bool,
    pub daemon: bool,
    #[serde(default = "default_frame_sleep_ms")]
    pub frame_sleep_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "Unnamed Server".to_string(),
            port: 27900,
            public: false,
            slots: 16,
            admin_passwd: String::new(),
            auth_key: String::new(),
            map: String::new(),
            map_md5: String::new(),
            allow_modification: true,
            hide_map: false,
            respawn_time_seconds: 10,
            log_file: String::new(),
            log_to_stdout: default_true(),
            log_level: default_log_level(),
            scripts: Vec::new(),
            class_table: Vec::new(),
            tick_rate_ms: default_tick_rate(),
            be_unconscious_before_dead: false,
            daemon: false,
            frame_sleep_ms: default_frame_sleep_ms(),
        }
    }
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "critical", "off"];

impl ServerConfig {
    pub fn load(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(ConfigError::MalformedToml(format!(
                "reading {}: {e}",
                path.display()
            )))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> CoreResult<Self> {
        let mut cfg: ServerConfig = toml::from_str(text)
            .map_err(|e| CoreError::Config(ConfigError::MalformedToml(e.to_string())))?;
        cfg.apply_clamps();
        Ok(cfg)
    }

    /// Clamp out-of-range values to documented defaults, warning for each
    /// correction (§7 Config error kind: "out-of-range value (corrected to
    /// default with a warning)").
    fn apply_clamps(&mut self) {
        if self.name.chars().count() > 100 {
            tracing::warn!(field = "name", "truncating server name to 100 chars");
            self.name = self.name.chars().take(100).collect();
        }
        if self.admin_passwd.chars().count() > 32 {
            tracing::warn!(field = "admin_passwd", "truncating to 32 chars");
            self.admin_passwd = self.admin_passwd.chars().take(32).collect();
        }
        if self.auth_key.chars().count() > 32 {
            tracing::warn!(field = "auth_key", "truncating to 32 chars");
            self.auth_key = self.auth_key.chars().take(32).collect();
        }
        if self.respawn_time_seconds < -1 {
            tracing::warn!(
                field = "respawn_time_seconds",
                value = self.respawn_time_seconds,
                "out of range (must be >= -1), using default"
            );
            self.respawn_time_seconds = ServerConfig::default().respawn_time_seconds;
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            tracing::warn!(
                field = "log_level",
                value = %self.log_level,
                "unrecognized log level, defaulting to info"
            );
            self.log_level = default_log_level();
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    pub download_base_prefix: String,
    pub auto_consent_downloads: bool,
    pub teleport_snap_distance: f32,
    pub interpolate_snap_distance: f32,
    pub high_detail_radius: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 27900,
            download_base_prefix: "/resources".to_string(),
            auto_consent_downloads: false,
            teleport_snap_distance: 400.0,
            interpolate_snap_distance: 50.0,
            high_detail_radius: 5000.0,
        }
    }
}

impl ClientConfig {
    pub fn parse(text: &str) -> CoreResult<Self> {
        toml::from_str(text)
            .map_err(|e| CoreError::Config(ConfigError::MalformedToml(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.tick_rate_ms, 50);
        assert_eq!(cfg.frame_sleep_ms, 10);
    }

    #[test]
    fn parses_minimal_toml() {
        let cfg = ServerConfig::parse(r#"name = "My Server"
port = 27910
"#)
        .unwrap();
        assert_eq!(cfg.name, "My Server");
        assert_eq!(cfg.port, 27910);
        // unspecified fields fall back to Default
        assert_eq!(cfg.tick_rate_ms, 50);
    }

    #[test]
    fn clamps_long_name() {
        let long_name = "x".repeat(150);
        let toml_text = format!("name = \"{long_name}\"\n");
        let cfg = ServerConfig::parse(&toml_text).unwrap();
        assert_eq!(cfg.name.chars().count(), 100);
    }

    #[test]
    fn rejects_invalid_respawn_time() {
        let cfg = ServerConfig::parse("respawn_time_seconds = -5\n").unwrap();
        assert_eq!(cfg.respawn_time_seconds, ServerConfig::default().respawn_time_seconds);
    }

    #[test]
    fn negative_one_respawn_time_is_valid() {
        let cfg = ServerConfig::parse("respawn_time_seconds = -1\n").unwrap();
        assert_eq!(cfg.respawn_time_seconds, -1);
    }

    #[test]
    fn unknown_log_level_defaults_to_info() {
        let cfg = ServerConfig::parse("log_level = \"noisy\"\n").unwrap();
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(ServerConfig::parse("not = [valid").is_err());
    }
}
