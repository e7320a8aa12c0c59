//! Builds a `.pak` archive and its sidecar manifest from a source tree —
//! §4.6. Only `client/` and `shared/` subdirectories are scanned; `.lua`
//! files are compiled to bytecode when `compile_lua` is set, everything
//! else is staged as-is.

use std::io::Write;
use std::path::{Path, PathBuf};

use aeon_common::error::ResourceError;
use sha2::{Digest, Sha256};

use crate::manifest::{ArchiveMeta, FileMeta, Manifest, PackOptions, PackResult};

const INCLUDE_DIRS: [&str; 2] = ["client", "shared"];

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn sha256_file(path: &Path) -> Result<String, ResourceError> {
    let data = std::fs::read(path)
        .map_err(|e| ResourceError::Build(format!("failed to read {}: {e}", path.display())))?;
    Ok(hex(&Sha256::digest(&data)))
}

/// Rejects `..` segments and absolute paths — the same two checks the
/// original packer applies before a relative path is trusted as a ZIP entry
/// name or staging subpath.
fn validate_relative_path(path: &str) -> Result<(), ResourceError> {
    if path.split('/').any(|seg| seg == "..") {
        return Err(ResourceError::PathTraversal(path.to_string()));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(ResourceError::PathTraversal(path.to_string()));
    }
    Ok(())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn derive_entrypoints(files: &[FileMeta]) -> Vec<String> {
    let has_path = |candidate: &str| files.iter().any(|f| f.path == candidate);

    for candidate in ["client/main.luac", "client/main.lua"] {
        if has_path(candidate) {
            return vec![candidate.to_string()];
        }
    }

    files
        .iter()
        .filter(|f| {
            f.path.starts_with("client/") && (f.path.ends_with(".luac") || f.path.ends_with(".lua"))
        })
        .map(|f| f.path.clone())
        .collect()
}

fn compile_lua_to_bytecode(source: &str, strip_debug: bool) -> Result<Vec<u8>, ResourceError> {
    let lua = mlua::Lua::new();
    let chunk = lua
        .load(source)
        .into_function()
        .map_err(|e| ResourceError::Build(format!("lua compile error: {e}")))?;
    Ok(chunk.dump(strip_debug))
}

fn stage_source_files(
    opts: &PackOptions,
    src_path: &Path,
    staging_dir: &Path,
) -> Result<Vec<FileMeta>, ResourceError> {
    let mut files = Vec::new();

    for dir in INCLUDE_DIRS {
        let dir_path = src_path.join(dir);
        if !dir_path.is_dir() {
            continue;
        }

        for entry in walk_files(&dir_path)? {
            if entry.extension().and_then(|e| e.to_str()) != Some("lua") {
                continue;
            }

            let rel_path = entry
                .strip_prefix(src_path)
                .map_err(|e| ResourceError::Build(e.to_string()))?;
            let mut normalized_rel = normalize_path(rel_path);
            validate_relative_path(&normalized_rel)?;

            let mut staging_file_path = staging_dir.join(rel_path);
            if let Some(parent) = staging_file_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ResourceError::Build(e.to_string()))?;
            }

            if opts.compile_lua {
                let source = std::fs::read_to_string(&entry)
                    .map_err(|e| ResourceError::Build(format!("failed to read {}: {e}", entry.display())))?;
                let bytecode = compile_lua_to_bytecode(&source, opts.strip_debug)
                    .map_err(|e| ResourceError::Build(format!("{}: {e}", entry.display())))?;
                staging_file_path.set_extension("luac");
                std::fs::write(&staging_file_path, &bytecode)
                    .map_err(|e| ResourceError::Build(e.to_string()))?;
                let mut rel = rel_path.to_path_buf();
                rel.set_extension("luac");
                normalized_rel = normalize_path(&rel);
            } else {
                std::fs::copy(&entry, &staging_file_path).map_err(|e| ResourceError::Build(e.to_string()))?;
            }

            let size = std::fs::metadata(&staging_file_path)
                .map_err(|e| ResourceError::Build(e.to_string()))?
                .len();
            let sha256 = sha256_file(&staging_file_path)?;

            files.push(FileMeta {
                path: normalized_rel,
                size,
                sha256,
                cache: true,
            });
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn walk_files(dir: &Path) -> Result<Vec<PathBuf>, ResourceError> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries =
            std::fs::read_dir(&current).map_err(|e| ResourceError::Build(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| ResourceError::Build(e.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

fn write_zip_archive(
    staging_dir: &Path,
    files: &[FileMeta],
    pak_path: &Path,
    compression_level: i64,
) -> Result<(), ResourceError> {
    let level = compression_level.clamp(0, 9);
    let file = std::fs::File::create(pak_path).map_err(|e| ResourceError::Build(e.to_string()))?;
    let mut zip = zip::ZipWriter::new(file);
    let method = if level > 0 {
        zip::CompressionMethod::Deflated
    } else {
        zip::CompressionMethod::Stored
    };
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(method)
        .compression_level(Some(level));

    for meta in files {
        let staged_file = staging_dir.join(&meta.path);
        let data = std::fs::read(&staged_file).map_err(|e| ResourceError::Build(e.to_string()))?;
        zip.start_file(meta.path.as_str(), options)
            .map_err(|e| ResourceError::Build(e.to_string()))?;
        zip.write_all(&data)
            .map_err(|e| ResourceError::Build(e.to_string()))?;
    }

    zip.finish().map_err(|e| ResourceError::Build(e.to_string()))?;
    Ok(())
}

/// Pack a resource according to `opts`: scan, compile, hash, zip, and write
/// a manifest alongside the archive. Mirrors the staged-build-then-cleanup
/// flow used by the original packer, minus the native-language RAII guard —
/// here the staging directory is removed with an explicit cleanup step that
/// runs on both the success and failure paths.
pub fn pack_resource(opts: &PackOptions) -> Result<PackResult, ResourceError> {
    if opts.name.is_empty() {
        return Err(ResourceError::Build("resource name cannot be empty".into()));
    }
    if opts.version.is_empty() {
        return Err(ResourceError::Build("resource version cannot be empty".into()));
    }
    if !opts.src_dir.is_dir() {
        return Err(ResourceError::Build(format!(
            "source directory does not exist: {}",
            opts.src_dir.display()
        )));
    }

    std::fs::create_dir_all(&opts.out_dir).map_err(|e| ResourceError::Build(e.to_string()))?;

    let staging_dir = opts
        .out_dir
        .join(format!("staging_{}_{}", opts.name, opts.version));
    if staging_dir.exists() {
        std::fs::remove_dir_all(&staging_dir).map_err(|e| ResourceError::Build(e.to_string()))?;
    }
    std::fs::create_dir_all(&staging_dir).map_err(|e| ResourceError::Build(e.to_string()))?;

    let result = (|| -> Result<PackResult, ResourceError> {
        let files = stage_source_files(opts, &opts.src_dir, &staging_dir)?;
        let entrypoints = derive_entrypoints(&files);

        let pak_path = opts
            .out_dir
            .join(format!("{}-{}.pak", opts.name, opts.version));
        if let Err(e) = write_zip_archive(&staging_dir, &files, &pak_path, opts.compression_level) {
            let _ = std::fs::remove_file(&pak_path);
            return Err(e);
        }

        let archive_bytes = std::fs::read(&pak_path).map_err(|e| ResourceError::Build(e.to_string()))?;
        let archive = ArchiveMeta {
            path: format!("{}/{}", opts.name, pak_path.file_name().unwrap().to_string_lossy()),
            size: archive_bytes.len() as u64,
            sha256: hex(&Sha256::digest(&archive_bytes)),
        };

        let manifest = Manifest {
            name: opts.name.clone(),
            version: opts.version.clone(),
            format: "zip".to_string(),
            archive,
            files,
            entrypoints,
            created_utc: chrono::Utc::now().to_rfc3339(),
            signature: String::new(),
        };

        let manifest_path = opts
            .out_dir
            .join(format!("{}-{}.manifest.json", opts.name, opts.version));
        let manifest_json = manifest
            .to_json_pretty()
            .map_err(|e| ResourceError::Build(e.to_string()))?;
        std::fs::write(&manifest_path, manifest_json).map_err(|e| ResourceError::Build(e.to_string()))?;

        Ok(PackResult {
            pak_path,
            manifest_path,
            manifest,
        })
    })();

    let _ = std::fs::remove_dir_all(&staging_dir);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn packs_lua_files_and_derives_entrypoint() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write_file(&src.join("client/main.lua"), "print('hi')");
        write_file(&src.join("shared/util.lua"), "return 1");

        let out = tmp.path().join("out");
        let mut opts = PackOptions::new(&src, &out, "hud", "1.0.0");
        opts.compile_lua = true;

        let result = pack_resource(&opts).unwrap();
        assert!(result.pak_path.exists());
        assert_eq!(result.manifest.entrypoints, vec!["client/main.luac"]);
        assert_eq!(result.manifest.files.len(), 2);
        assert!(result
            .manifest
            .files
            .iter()
            .any(|f| f.path == "shared/util.luac"));
    }

    #[test]
    fn rejects_empty_name() {
        let tmp = tempfile::tempdir().unwrap();
        let opts = PackOptions::new(tmp.path(), tmp.path(), "", "1.0.0");
        assert!(pack_resource(&opts).is_err());
    }

    #[test]
    fn path_traversal_is_rejected() {
        assert!(validate_relative_path("../escape.lua").is_err());
        assert!(validate_relative_path("/abs/path.lua").is_err());
        assert!(validate_relative_path("client/main.lua").is_ok());
    }

    #[test]
    fn manifest_files_are_sorted_for_reproducibility() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        write_file(&src.join("client/z.lua"), "return 1");
        write_file(&src.join("client/a.lua"), "return 1");
        let out = tmp.path().join("out");
        let opts = PackOptions::new(&src, &out, "pack", "1.0.0");
        let result = pack_resource(&opts).unwrap();
        let paths: Vec<_> = result.manifest.files.iter().map(|f| f.path.clone()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }
}
