//! Signing plan construction.
//!
//! The plan builder turns an explicit list of build output files into a
//! [`SigningPlan`]: every input is classified and content-hashed, containers are
//! expanded into their nested signing obligations, and the result is aggregated into a
//! deterministic, path-sorted list of files to sign plus the content-hash to
//! [`ContainerManifest`](crate::container::ContainerManifest) map the orchestrator
//! repacks from.
//!
//! Problems are collected, not fail-fast: every unreadable file, unopenable container
//! and certificate-policy violation in the input set is reported together so a single
//! run yields as many actionable errors as possible. Duplicate input paths are an error
//! - the input list is assumed caller-deduplicated.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info};
use rayon::prelude::*;

use crate::{
    batch::SigningMetrics,
    classify::{classify, ContainerKind, FileCategory},
    container::{expand_container, ContainerManifest, ContentArena},
    content::ContentHash,
    policy::{SignInfo, SigningPolicy},
    Error, Result,
};

/// One file requiring a signing decision.
///
/// Created once per distinct path during plan building and immutable thereafter; the
/// orchestrator tracks signing progress in its own signed-set keyed by content hash,
/// not on the file.
pub struct SignableFile {
    path: PathBuf,
    file_name: String,
    category: FileCategory,
    content_hash: ContentHash,
    sign_info: SignInfo,
}

impl SignableFile {
    /// Creates a signable file record.
    #[must_use]
    pub fn new(
        path: PathBuf,
        category: FileCategory,
        content_hash: ContentHash,
        sign_info: SignInfo,
    ) -> SignableFile {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        SignableFile {
            path,
            file_name,
            category,
            content_hash,
            sign_info,
        }
    }

    /// Full path of the file on disk (original location or scratch extraction).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directory.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// The file's category.
    #[must_use]
    pub fn category(&self) -> &FileCategory {
        &self.category
    }

    /// The file's content hash, its identity across the run.
    #[must_use]
    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    /// The file's signing treatment.
    #[must_use]
    pub fn sign_info(&self) -> &SignInfo {
        &self.sign_info
    }

    /// Returns `true` if the file still needs to be signed.
    #[must_use]
    pub fn should_sign(&self) -> bool {
        self.sign_info.should_sign()
    }

    /// Returns `true` if the file is a container.
    #[must_use]
    pub fn is_container(&self) -> bool {
        self.category.is_container()
    }
}

impl std::fmt::Debug for SignableFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignableFile")
            .field("path", &self.path)
            .field("category", &self.category)
            .field("sign_info", &self.sign_info)
            .finish()
    }
}

/// The aggregate signing plan for one run.
///
/// Built once, consumed read-only by the orchestrator and the verification pass.
#[derive(Debug)]
pub struct SigningPlan {
    /// Every distinct file of the run - explicit inputs and extracted nested parts
    pub files: Vec<Arc<SignableFile>>,
    /// The files that need signing, sorted by full path for determinism
    pub to_sign: Vec<Arc<SignableFile>>,
    /// Container content hash to nested-part manifest
    pub manifests: HashMap<ContentHash, ContainerManifest>,
}

/// Builds the signing plan for an explicit list of files.
///
/// Classification and hashing of independent inputs runs on the rayon pool; container
/// expansion shares one content arena so identical nested payloads resolve to a single
/// [`SignableFile`] across the whole plan.
///
/// # Arguments
/// * `inputs` - The explicit files to sign, caller-deduplicated
/// * `policy` - Signing policy tables
/// * `scratch_dir` - Directory for content-hash-named part extraction
/// * `metrics` - Accumulator for plan statistics
///
/// # Errors
/// - [`crate::Error::PlanErrors`] collecting every unreadable input, duplicate path and
///   unopenable container
/// - [`crate::Error::CertificateErrors`] collecting every certificate consistency
///   violation found in the pre-flight pass
pub fn build_plan(
    inputs: &[PathBuf],
    policy: &SigningPolicy,
    scratch_dir: &Path,
    metrics: &mut SigningMetrics,
) -> Result<SigningPlan> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for path in inputs {
        if !seen.insert(path.as_path()) {
            errors.push(format!("Duplicate input path - {}", path.display()));
        }
    }

    // Classification and hashing of independent files is embarrassingly parallel
    let classified: Vec<(&PathBuf, Result<(FileCategory, SignInfo, ContentHash)>)> = inputs
        .par_iter()
        .map(|path| {
            let result = ContentHash::of_file(path).map(|hash| {
                let (category, sign_info) = classify(path, policy);
                (category, sign_info, hash)
            });
            (path, result)
        })
        .collect();

    let arena = ContentArena::new();
    let mut manifests = HashMap::new();
    let mut top_level = Vec::new();

    for (path, result) in classified {
        match result {
            Ok((category, sign_info, hash)) => {
                let file = Arc::new(SignableFile::new(
                    path.clone(),
                    category,
                    hash,
                    sign_info,
                ));

                // Register for nested-part deduplication; the file keeps its own
                // identity even if another input carried the same content.
                arena.register(file.clone());
                top_level.push(file);
            }
            Err(error) => {
                errors.push(format!("Unable to read {} - {}", path.display(), error));
            }
        }
    }

    for file in &top_level {
        if file.is_container() && file.should_sign() {
            if let Err(error) = expand_container(
                file.path(),
                *file.content_hash(),
                policy,
                scratch_dir,
                &arena,
                &mut manifests,
                metrics,
            ) {
                errors.push(format!(
                    "Unable to expand container {} - {}",
                    file.path().display(),
                    error
                ));
            }
        }
    }

    if !errors.is_empty() {
        return Err(Error::PlanErrors(errors));
    }

    // All distinct files: explicit inputs plus everything the arena discovered
    let mut files = top_level;
    let mut known_paths: HashSet<PathBuf> =
        files.iter().map(|file| file.path().to_path_buf()).collect();
    for file in arena.files() {
        if known_paths.insert(file.path().to_path_buf()) {
            files.push(file);
        }
    }
    files.sort_by(|a, b| a.path().cmp(b.path()));

    verify_certificates(&files, policy)?;

    let to_sign: Vec<Arc<SignableFile>> = files
        .iter()
        .filter(|file| file.should_sign())
        .cloned()
        .collect();

    metrics.files_planned = files.len();
    info!(
        "Planned {} file(s), {} to sign, {} container manifest(s)",
        files.len(),
        to_sign.len(),
        manifests.len()
    );
    for file in &to_sign {
        debug!("To sign: '{}' with {:?}", file.path().display(), file.sign_info());
    }

    Ok(SigningPlan {
        files,
        to_sign,
        manifests,
    })
}

/// Sanity-checks the certificates attached to the planned files before any signing
/// begins: a PE must not carry a container certificate, and containers must carry their
/// kind's certificate and never a strong name key.
fn verify_certificates(files: &[Arc<SignableFile>], policy: &SigningPolicy) -> Result<()> {
    let mut violations = Vec::new();

    for file in files {
        let SignInfo::Pending {
            certificate,
            strong_name_key,
        } = file.sign_info()
        else {
            continue;
        };

        match file.category() {
            FileCategory::PortableExecutable { .. } => {
                if SigningPolicy::is_vsix_certificate(certificate) {
                    violations.push(format!(
                        "Assembly {} cannot be signed with a VSIX certificate",
                        file.file_name()
                    ));
                }
            }
            FileCategory::Container(ContainerKind::Vsix) => {
                if !SigningPolicy::is_vsix_certificate(certificate) {
                    violations.push(format!(
                        "VSIX {} must be signed with a VSIX certificate",
                        file.file_name()
                    ));
                }
                if strong_name_key.is_some() {
                    violations.push(format!(
                        "VSIX {} cannot be strong name signed",
                        file.file_name()
                    ));
                }
            }
            FileCategory::Container(ContainerKind::NuGetPackage) => {
                if *certificate != policy.nupkg_certificate {
                    violations.push(format!(
                        "Nupkg {} must be signed with the {} certificate",
                        file.file_name(),
                        policy.nupkg_certificate
                    ));
                }
                if strong_name_key.is_some() {
                    violations.push(format!(
                        "Nupkg {} cannot be strong name signed",
                        file.file_name()
                    ));
                }
            }
            FileCategory::Opaque => {}
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::CertificateErrors(violations))
    }
}
