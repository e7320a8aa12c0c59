//! Ban list persistence — §3 `BanEntry` and §4.12 Ban Manager data shape.
//!
//! Loading/saving the JSON file and installing entries into a transport
//! live in `aeon-server::ban_manager`; this module only owns the data type
//! and the pure parse-and-filter step so it can be unit tested without a
//! transport or filesystem.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BanEntry {
    #[serde(rename = "Nickname", skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "Date", skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "Reason", skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BanEntry {
    pub fn permanent(ip: impl Into<String>) -> Self {
        Self {
            nickname: None,
            ip: ip.into(),
            date: None,
            reason: None,
        }
    }
}

/// Parse the `bans.json` contents into entries, skipping malformed ones with
/// a `warn!` rather than failing the whole load. A non-array root is a hard
/// error, matching §4.12.
pub fn parse_ban_list(json: &str) -> Result<Vec<BanEntry>, crate::error::CoreError> {
    let value: serde_json::Value = serde_json::from_str(json).map_err(|e| {
        crate::error::CoreError::Config(crate::error::ConfigError::MalformedToml(e.to_string()))
    })?;

    let Some(array) = value.as_array() else {
        return Err(crate::error::CoreError::Resource(
            crate::error::ResourceError::ManifestParse(
                "bans.json root must be a JSON array".to_string(),
            ),
        ));
    };

    let mut entries = Vec::with_capacity(array.len());
    for node in array {
        if !node.is_object() {
            tracing::warn!("ignoring malformed ban entry that is not a JSON object");
            continue;
        }
        let Some(ip) = node.get("IP").and_then(|v| v.as_str()) else {
            tracing::warn!("ignoring ban entry without a valid IP string");
            continue;
        };
        if ip.is_empty() {
            tracing::warn!("ignoring ban entry with empty IP string");
            continue;
        }
        entries.push(BanEntry {
            nickname: node
                .get("Nickname")
                .and_then(|v| v.as_str())
                .map(String::from),
            ip: ip.to_string(),
            date: node.get("Date").and_then(|v| v.as_str()).map(String::from),
            reason: node
                .get("Reason")
                .and_then(|v| v.as_str())
                .map(String::from),
        });
    }
    Ok(entries)
}
