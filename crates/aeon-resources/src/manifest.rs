//! Manifest types for packed resources — §4.6/§4.7.
//!
//! A resource is a versioned `.pak` (ZIP) archive plus a sidecar
//! `<name>.manifest.json` describing its contents. The manifest is the only
//! thing a client needs to fetch before deciding whether to download the
//! archive at all (§4.8's consent step reads `archive.size`/`archive.sha256`
//! without touching the pak itself).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub path: String,
    pub size: u64,
    pub sha256: String,
    #[serde(default)]
    pub cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub format: String,
    pub archive: ArchiveMeta,
    pub files: Vec<FileMeta>,
    #[serde(default)]
    pub entrypoints: Vec<String>,
    pub created_utc: String,
    #[serde(default)]
    pub signature: String,
}

impl Manifest {
    pub fn file(&self, path: &str) -> Option<&FileMeta> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Options accepted by [`crate::packer::pack_resource`].
#[derive(Debug, Clone)]
pub struct PackOptions {
    pub src_dir: std::path::PathBuf,
    pub out_dir: std::path::PathBuf,
    pub name: String,
    pub version: String,
    pub compile_lua: bool,
    pub strip_debug: bool,
    pub compression_level: i64,
}

impl PackOptions {
    pub fn new(
        src_dir: impl Into<std::path::PathBuf>,
        out_dir: impl Into<std::path::PathBuf>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            src_dir: src_dir.into(),
            out_dir: out_dir.into(),
            name: name.into(),
            version: version.into(),
            compile_lua: true,
            strip_debug: true,
            compression_level: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackResult {
    pub pak_path: std::path::PathBuf,
    pub manifest_path: std::path::PathBuf,
    pub manifest: Manifest,
}
