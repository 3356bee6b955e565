//! Container expansion and repacking.
//!
//! Zip-based package containers (NuGet packages, VSIX extensions) hold named inner parts,
//! some of which independently require signing. Expansion opens a container, extracts its
//! signable parts to a content-hash-named scratch directory, classifies them (recursing
//! into nested containers), and records the result as a [`ContainerManifest`].
//!
//! Extraction is deduplicated across the whole run through the [`ContentArena`]: a nested
//! part whose content hash is already known anywhere in the plan reuses the existing
//! [`SignableFile`] instead of being extracted and classified again. Identical binaries
//! appearing in multiple containers are therefore signed exactly once and the signed
//! bytes reused everywhere.
//!
//! Repacking rewrites a container, substituting each manifest part's bytes with the
//! current on-disk content of the part's file. The orchestrator repacks a container
//! after its parts were signed and before the container itself is signed.

use std::{
    collections::HashMap,
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use log::debug;
use zip::{write::FileOptions, ZipArchive, ZipWriter};

use crate::{
    batch::SigningMetrics,
    classify::{classify, is_signable_name},
    content::ContentHash,
    plan::SignableFile,
    policy::SigningPolicy,
    Result,
};

/// One signable part inside a container.
#[derive(Debug)]
pub struct NestedPart {
    /// Path of the part inside the container
    pub relative_path: String,
    /// The extracted (or deduplicated) file backing this part
    pub file: Arc<SignableFile>,
}

/// The nested signing obligations of one container.
///
/// Built exactly once per distinct container content hash; structurally identical
/// containers share one manifest.
#[derive(Debug)]
pub struct ContainerManifest {
    /// Content hash of the owning container
    pub container_hash: ContentHash,
    /// The signable parts, in container order
    pub parts: Vec<NestedPart>,
}

impl ContainerManifest {
    /// Returns the part with the given in-container path, if it is a signable part.
    #[must_use]
    pub fn find_part(&self, relative_path: &str) -> Option<&NestedPart> {
        self.parts
            .iter()
            .find(|part| part.relative_path == relative_path)
    }
}

/// The content-hash deduplication arena shared by the whole plan.
///
/// First-writer-wins: once a hash is registered, later discoverers of the same content
/// reuse the existing entry. The map is synchronized so container expansion may run
/// concurrently.
pub struct ContentArena {
    files: DashMap<ContentHash, Arc<SignableFile>>,
}

impl ContentArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> ContentArena {
        ContentArena {
            files: DashMap::new(),
        }
    }

    /// Returns the registered file for a content hash, if any.
    #[must_use]
    pub fn get(&self, hash: &ContentHash) -> Option<Arc<SignableFile>> {
        self.files.get(hash).map(|entry| entry.value().clone())
    }

    /// Registers a file under its content hash.
    ///
    /// If the hash is already taken the existing entry wins and is returned; the caller
    /// must use the returned file, not the one it passed in.
    pub fn register(&self, file: Arc<SignableFile>) -> Arc<SignableFile> {
        self.files
            .entry(*file.content_hash())
            .or_insert(file)
            .value()
            .clone()
    }

    /// Returns all registered files.
    #[must_use]
    pub fn files(&self) -> Vec<Arc<SignableFile>> {
        self.files.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl Default for ContentArena {
    fn default() -> Self {
        Self::new()
    }
}

/// Expands a container into its manifest, recursively.
///
/// Signable parts are extracted to `<scratch_dir>/<HASH>/<file name>`, deduplicated
/// through the arena, classified, and - if they are containers themselves - expanded in
/// turn. Parts that are not signable file types, and parts on the policy's external
/// exclusion list, are skipped and not recorded.
///
/// # Errors
/// An unopenable or unparsable container is an error: it could not be safely repacked
/// later. The caller surfaces this as a run-level error for the file.
pub(crate) fn expand_container(
    path: &Path,
    container_hash: ContentHash,
    policy: &SigningPolicy,
    scratch_dir: &Path,
    arena: &ContentArena,
    manifests: &mut HashMap<ContentHash, ContainerManifest>,
    metrics: &mut SigningMetrics,
) -> Result<()> {
    // Structurally identical containers share one manifest
    if manifests.contains_key(&container_hash) {
        metrics.payloads_deduplicated += 1;
        return Ok(());
    }

    let mut archive = ZipArchive::new(fs::File::open(path)?)?;
    let mut parts = Vec::new();
    let mut pending_containers = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }

        let relative_path = entry.name().to_string();
        let file_name = relative_path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&relative_path)
            .to_string();

        if !is_signable_name(&file_name) {
            continue;
        }

        if policy.is_excluded(&file_name) {
            debug!(
                "Skipping externally owned part: '{}' -> '{}'",
                path.display(),
                relative_path
            );
            continue;
        }

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        let hash = ContentHash::of_bytes(&bytes);

        let file = match arena.get(&hash) {
            Some(existing) => {
                metrics.payloads_deduplicated += 1;
                debug!(
                    "Reusing content {} for '{}' -> '{}'",
                    hash,
                    path.display(),
                    relative_path
                );
                existing
            }
            None => {
                let extracted = extract_to_scratch(scratch_dir, &hash, &file_name, &bytes)?;
                let (category, sign_info) = classify(&extracted, policy);
                let file = arena.register(Arc::new(SignableFile::new(
                    extracted, category, hash, sign_info,
                )));

                if file.is_container() && file.should_sign() {
                    pending_containers.push(file.clone());
                }

                file
            }
        };

        parts.push(NestedPart {
            relative_path,
            file,
        });
    }

    manifests.insert(
        container_hash,
        ContainerManifest {
            container_hash,
            parts,
        },
    );

    for nested in pending_containers {
        expand_container(
            nested.path(),
            *nested.content_hash(),
            policy,
            scratch_dir,
            arena,
            manifests,
            metrics,
        )?;
    }

    Ok(())
}

/// Writes part bytes to the content-hash-named scratch location.
///
/// The hash-derived directory makes repeated extractions idempotent and keeps distinct
/// content from ever colliding.
fn extract_to_scratch(
    scratch_dir: &Path,
    hash: &ContentHash,
    file_name: &str,
    bytes: &[u8],
) -> Result<PathBuf> {
    let dir = scratch_dir.join(hash.to_hex());
    fs::create_dir_all(&dir)?;

    let path = dir.join(file_name);
    if !path.exists() {
        fs::write(&path, bytes)?;
    }

    Ok(path)
}

/// Rewrites a container, substituting each manifest part with the current on-disk bytes
/// of its backing file.
///
/// Entries without a manifest part are copied through unchanged (raw, without
/// recompression). The rewrite goes to a sibling temporary file that replaces the
/// original on success.
///
/// # Errors
/// Returns an error if the container or any backing file cannot be read, or the rewrite
/// cannot be persisted.
pub fn repack_container(container: &SignableFile, manifest: &ContainerManifest) -> Result<()> {
    let source_path = container.path();
    let temp_path = source_path.with_extension("repack.tmp");

    let mut archive = ZipArchive::new(fs::File::open(source_path)?)?;
    let mut writer = ZipWriter::new(fs::File::create(&temp_path)?);

    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;

        match manifest.find_part(entry.name()) {
            Some(part) => {
                debug!(
                    "Copying signed bytes from '{}' to '{}' -> '{}'",
                    part.file.path().display(),
                    source_path.display(),
                    entry.name()
                );

                let options: FileOptions =
                    FileOptions::default().compression_method(entry.compression());
                writer.start_file(entry.name(), options)?;
                writer.write_all(&fs::read(part.file.path())?)?;
            }
            None => {
                writer.raw_copy_file(entry)?;
            }
        }
    }

    writer.finish()?;
    fs::rename(&temp_path, source_path)?;

    Ok(())
}

/// Reads all file entries of a container as `(relative path, bytes)` pairs.
///
/// Used by the verification pass to re-check nested parts after signing.
///
/// # Errors
/// Returns an error if the container cannot be opened or an entry cannot be read.
pub fn read_parts(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(fs::File::open(path)?)?;
    let mut parts = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        parts.push((entry.name().to_string(), bytes));
    }

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classify::FileCategory,
        policy::SignInfo,
        test::{build_native_pe, build_zip},
    };

    fn signable(path: PathBuf, data: &[u8]) -> Arc<SignableFile> {
        Arc::new(SignableFile::new(
            path,
            FileCategory::PortableExecutable { managed: false },
            ContentHash::of_bytes(data),
            SignInfo::Pending {
                certificate: "CertX".to_string(),
                strong_name_key: None,
            },
        ))
    }

    #[test]
    fn arena_first_writer_wins() {
        let arena = ContentArena::new();

        let first = signable(PathBuf::from("/a/first.dll"), b"same");
        let second = signable(PathBuf::from("/b/second.dll"), b"same");

        let registered = arena.register(first.clone());
        assert_eq!(registered.path(), first.path());

        let reused = arena.register(second);
        assert_eq!(reused.path(), first.path());
        assert_eq!(arena.files().len(), 1);
    }

    #[test]
    fn expand_extracts_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let pe = build_native_pe();

        let container_path = dir.path().join("pkg.nupkg");
        build_zip(
            &container_path,
            &[
                ("lib/net6.0/a.dll", &pe),
                ("lib/net7.0/a.dll", &pe),
                ("readme.txt", b"docs"),
            ],
        );

        let policy = SigningPolicy::new("CertX");
        let arena = ContentArena::new();
        let mut manifests = HashMap::new();
        let mut metrics = SigningMetrics::default();
        let hash = ContentHash::of_file(&container_path).unwrap();

        expand_container(
            &container_path,
            hash,
            &policy,
            &scratch,
            &arena,
            &mut manifests,
            &mut metrics,
        )
        .unwrap();

        let manifest = manifests.get(&hash).unwrap();
        // readme.txt is not signable and not recorded
        assert_eq!(manifest.parts.len(), 2);
        // Identical payloads resolve to one SignableFile
        assert_eq!(arena.files().len(), 1);
        assert_eq!(metrics.payloads_deduplicated, 1);
        assert!(Arc::ptr_eq(
            &manifest.parts[0].file,
            &manifest.parts[1].file
        ));
        assert!(manifest.parts[0].file.path().exists());
    }

    #[test]
    fn expand_skips_excluded_names() {
        let dir = tempfile::tempdir().unwrap();
        let container_path = dir.path().join("pkg.nupkg");
        build_zip(&container_path, &[("lib/external.dll", &build_native_pe())]);

        let policy = SigningPolicy::new("CertX").with_excluded_name("external.dll");
        let arena = ContentArena::new();
        let mut manifests = HashMap::new();
        let mut metrics = SigningMetrics::default();
        let hash = ContentHash::of_file(&container_path).unwrap();

        expand_container(
            &container_path,
            hash,
            &policy,
            &dir.path().join("scratch"),
            &arena,
            &mut manifests,
            &mut metrics,
        )
        .unwrap();

        assert!(manifests.get(&hash).unwrap().parts.is_empty());
        assert!(arena.files().is_empty());
    }

    #[test]
    fn expand_rejects_corrupt_containers() {
        let dir = tempfile::tempdir().unwrap();
        let container_path = dir.path().join("broken.nupkg");
        fs::write(&container_path, b"this is not a zip archive").unwrap();

        let policy = SigningPolicy::new("CertX");
        let arena = ContentArena::new();
        let mut manifests = HashMap::new();
        let mut metrics = SigningMetrics::default();

        let result = expand_container(
            &container_path,
            ContentHash::of_file(&container_path).unwrap(),
            &policy,
            &dir.path().join("scratch"),
            &arena,
            &mut manifests,
            &mut metrics,
        );

        assert!(result.is_err());
    }

    #[test]
    fn repack_substitutes_signed_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let container_path = dir.path().join("pkg.nupkg");
        build_zip(
            &container_path,
            &[("lib/a.dll", b"original"), ("readme.txt", b"docs")],
        );

        // The "signed" bytes live at the extracted file's path
        let signed_path = dir.path().join("a.dll");
        fs::write(&signed_path, b"signed bytes").unwrap();

        let container_hash = ContentHash::of_file(&container_path).unwrap();
        let container = Arc::new(SignableFile::new(
            container_path.clone(),
            FileCategory::Container(crate::classify::ContainerKind::NuGetPackage),
            container_hash,
            SignInfo::Pending {
                certificate: "NuGet".to_string(),
                strong_name_key: None,
            },
        ));

        let manifest = ContainerManifest {
            container_hash,
            parts: vec![NestedPart {
                relative_path: "lib/a.dll".to_string(),
                file: signable(signed_path, b"signed bytes"),
            }],
        };

        repack_container(&container, &manifest).unwrap();

        let parts = read_parts(&container_path).unwrap();
        let rewritten = parts.iter().find(|(name, _)| name == "lib/a.dll").unwrap();
        assert_eq!(rewritten.1, b"signed bytes");

        let untouched = parts.iter().find(|(name, _)| name == "readme.txt").unwrap();
        assert_eq!(untouched.1, b"docs");
    }
}
