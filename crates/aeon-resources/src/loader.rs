//! Loads a packed resource and verifies its integrity — §4.7.
//!
//! A [`ResourcePack`] is an immutable, already-verified handle: by the time
//! one exists, the manifest parsed cleanly and (if requested) the archive's
//! own hash matched. Per-file hash verification happens lazily, on
//! [`ResourcePack::load_file`], since not every consumer reads every file.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;

use aeon_common::error::{CoreError, IntegrityError, ResourceError};
use sha2::{Digest, Sha256};

use crate::manifest::{FileMeta, Manifest};

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// One file pulled out of a [`ResourcePack`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedFile {
    pub path: String,
    pub data: Vec<u8>,
    pub size: u64,
    pub sha256: String,
}

/// An immutable, loaded resource pack: manifest plus the raw archive bytes.
/// Read operations take `&self` and are safe to call from multiple threads
/// concurrently, matching the loader's documented thread-safety contract.
#[derive(Debug)]
pub struct ResourcePack {
    manifest: Manifest,
    archive_bytes: Vec<u8>,
    file_index: HashMap<String, usize>,
}

impl ResourcePack {
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.file_index.contains_key(path)
    }

    pub fn file_metadata(&self, path: &str) -> Option<&FileMeta> {
        self.file_index.get(path).map(|&i| &self.manifest.files[i])
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.manifest.files.iter().map(|f| f.path.clone()).collect()
    }

    /// Extract one file's bytes from the archive. With `verify_hash` set,
    /// the extracted content's SHA-256 must match the manifest entry or this
    /// returns [`CoreError::Integrity`] wrapping an [`IntegrityError::HashMismatch`],
    /// kept distinct from a [`ResourceError::Build`] failure per the error
    /// taxonomy's Integrity/Resource split.
    pub fn load_file(&self, path: &str, verify_hash: bool) -> Result<LoadedFile, CoreError> {
        let &idx = self
            .file_index
            .get(path)
            .ok_or_else(|| ResourceError::NotFound(path.to_string()))?;
        let meta = &self.manifest.files[idx];

        let mut archive = zip::ZipArchive::new(Cursor::new(self.archive_bytes.as_slice()))
            .map_err(|e| ResourceError::Build(format!("corrupt archive: {e}")))?;
        let mut entry = archive
            .by_name(path)
            .map_err(|_| ResourceError::NotFound(format!("{path} missing from archive")))?;

        let mut data = Vec::with_capacity(meta.size as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| ResourceError::Build(format!("failed to read {path}: {e}")))?;
        drop(entry);

        if data.len() as u64 != meta.size {
            return Err(IntegrityError::SizeMismatch {
                path: path.to_string(),
                expected: meta.size,
                actual: data.len() as u64,
            }
            .into());
        }

        if verify_hash {
            let actual = hex(&Sha256::digest(&data));
            if actual != meta.sha256 {
                return Err(IntegrityError::HashMismatch {
                    path: path.to_string(),
                    expected: meta.sha256.clone(),
                    actual,
                }
                .into());
            }
        }

        Ok(LoadedFile {
            path: path.to_string(),
            data,
            size: meta.size,
            sha256: meta.sha256.clone(),
        })
    }
}

fn build_file_index(manifest: &Manifest) -> HashMap<String, usize> {
    manifest
        .files
        .iter()
        .enumerate()
        .map(|(i, f)| (f.path.clone(), i))
        .collect()
}

/// Stateless factory mirroring the original `ResourcePackLoader`: load from
/// a manifest+pak pair on disk, or from already-fetched bytes in memory (the
/// path the downloader's consent flow uses once the pak has been fully
/// received).
pub struct ResourcePackLoader;

impl ResourcePackLoader {
    pub fn load(manifest_path: &Path, verify_integrity: bool) -> Result<ResourcePack, CoreError> {
        let manifest_text = std::fs::read_to_string(manifest_path)
            .map_err(|_| ResourceError::NotFound(manifest_path.display().to_string()))?;
        let manifest = Manifest::from_json(&manifest_text)
            .map_err(|e| ResourceError::ManifestParse(e.to_string()))?;

        if manifest.format != "zip" {
            return Err(ResourceError::UnsupportedFormat(manifest.format.clone()).into());
        }

        let manifest_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
        let pak_file_name = Path::new(&manifest.archive.path)
            .file_name()
            .ok_or_else(|| ResourceError::ManifestParse("empty archive path".into()))?;
        let pak_path = manifest_dir.join(pak_file_name);

        let archive_bytes = std::fs::read(&pak_path)
            .map_err(|_| ResourceError::NotFound(pak_path.display().to_string()))?;

        Self::finish_load(manifest, archive_bytes, verify_integrity)
    }

    pub fn load_from_memory(
        manifest_json: &str,
        archive_bytes: Vec<u8>,
        verify_integrity: bool,
    ) -> Result<ResourcePack, CoreError> {
        let manifest =
            Manifest::from_json(manifest_json).map_err(|e| ResourceError::ManifestParse(e.to_string()))?;
        if manifest.format != "zip" {
            return Err(ResourceError::UnsupportedFormat(manifest.format.clone()).into());
        }
        Self::finish_load(manifest, archive_bytes, verify_integrity)
    }

    /// Size/hash failures surface as [`CoreError::Integrity`], kept distinct
    /// from a manifest or archive-format failure, per the error taxonomy's
    /// Integrity/Resource split.
    fn finish_load(
        manifest: Manifest,
        archive_bytes: Vec<u8>,
        verify_integrity: bool,
    ) -> Result<ResourcePack, CoreError> {
        let actual_size = archive_bytes.len() as u64;
        if actual_size != manifest.archive.size {
            return Err(IntegrityError::SizeMismatch {
                path: manifest.archive.path.clone(),
                expected: manifest.archive.size,
                actual: actual_size,
            }
            .into());
        }

        if verify_integrity {
            let actual_hash = hex(&Sha256::digest(&archive_bytes));
            if actual_hash != manifest.archive.sha256 {
                return Err(IntegrityError::HashMismatch {
                    path: manifest.archive.path.clone(),
                    expected: manifest.archive.sha256.clone(),
                    actual: actual_hash,
                }
                .into());
            }
        }

        let file_index = build_file_index(&manifest);
        Ok(ResourcePack {
            manifest,
            archive_bytes,
            file_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PackOptions;
    use crate::packer::pack_resource;

    fn write_file(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn pack_fixture(tmp: &std::path::Path) -> crate::manifest::PackResult {
        let src = tmp.join("src");
        write_file(&src.join("client/main.lua"), "print('hi')");
        let out = tmp.join("out");
        let opts = PackOptions::new(&src, &out, "hud", "1.0.0");
        pack_resource(&opts).unwrap()
    }

    #[test]
    fn loads_from_disk_and_verifies_integrity() {
        let tmp = tempfile::tempdir().unwrap();
        let result = pack_fixture(tmp.path());

        let pack = ResourcePackLoader::load(&result.manifest_path, true).unwrap();
        assert!(pack.has_file("client/main.luac"));
        let loaded = pack.load_file("client/main.luac", true).unwrap();
        assert_eq!(loaded.size, loaded.data.len() as u64);
    }

    #[test]
    fn load_from_memory_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let result = pack_fixture(tmp.path());

        let manifest_json = std::fs::read_to_string(&result.manifest_path).unwrap();
        let archive_bytes = std::fs::read(&result.pak_path).unwrap();

        let pack = ResourcePackLoader::load_from_memory(&manifest_json, archive_bytes, true).unwrap();
        assert_eq!(pack.file_paths().len(), 1);
    }

    #[test]
    fn tampered_archive_fails_hash_check() {
        let tmp = tempfile::tempdir().unwrap();
        let result = pack_fixture(tmp.path());

        let manifest_json = std::fs::read_to_string(&result.manifest_path).unwrap();
        let mut archive_bytes = std::fs::read(&result.pak_path).unwrap();
        archive_bytes.push(0xFF);

        let err = ResourcePackLoader::load_from_memory(&manifest_json, archive_bytes, true).unwrap_err();
        assert!(matches!(err, CoreError::Integrity(_)));
    }

    #[test]
    fn missing_manifest_file_is_not_found() {
        let err = ResourcePackLoader::load(Path::new("/nonexistent/manifest.json"), true).unwrap_err();
        assert!(matches!(err, CoreError::Resource(ResourceError::NotFound(_))));
    }

    #[test]
    fn unknown_file_in_pack_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let result = pack_fixture(tmp.path());
        let pack = ResourcePackLoader::load(&result.manifest_path, true).unwrap();
        assert!(matches!(
            pack.load_file("client/missing.luac", true),
            Err(CoreError::Resource(ResourceError::NotFound(_)))
        ));
    }
}
