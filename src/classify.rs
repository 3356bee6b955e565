//! File classification and default signing assignment.
//!
//! Every file entering the pipeline is inspected once to decide its category - managed or
//! native PE, zip-based package container, or opaque - and its default signing treatment
//! derived from the [`crate::policy::SigningPolicy`] tables.
//!
//! Classification never fails the run: files that cannot be identified, and managed
//! images whose metadata cannot be read, are logged and degrade to the safest treatment
//! (ignore, or unmanaged defaults respectively).
//!
//! # Examples
//!
//! ```rust,no_run
//! use signscope::{classify::classify, policy::SigningPolicy};
//! use std::path::Path;
//!
//! let policy = SigningPolicy::new("Microsoft400");
//! let (category, sign_info) = classify(Path::new("artifacts/MyLibrary.dll"), &policy);
//! println!("{:?} -> {:?}", category, sign_info);
//! ```

use std::path::Path;

use log::{debug, warn};

use crate::{
    file::File,
    metadata::{read_assembly_metadata, read_cor20_header, CorFlags},
    policy::{SigningPolicy, DO_NOT_SIGN},
};

/// The sub-kind of a zip-based package container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ContainerKind {
    /// A NuGet package (`.nupkg`)
    #[strum(serialize = "nupkg")]
    NuGetPackage,
    /// A Visual Studio extension package (`.vsix`)
    #[strum(serialize = "vsix")]
    Vsix,
}

/// The coarse category of a file, deciding its signing treatment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileCategory {
    /// A Portable Executable image
    PortableExecutable {
        /// `true` if the image carries a CLR runtime header
        managed: bool,
    },
    /// A zip-based package container holding named inner parts
    Container(ContainerKind),
    /// Anything else - not signed, not unpacked
    Opaque,
}

impl FileCategory {
    /// Returns `true` for container files.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, FileCategory::Container(_))
    }

    /// Returns `true` for PE files.
    #[must_use]
    pub fn is_pe(&self) -> bool {
        matches!(self, FileCategory::PortableExecutable { .. })
    }
}

/// Returns `true` if the file name has a PE extension.
#[must_use]
pub fn is_pe_name(file_name: &str) -> bool {
    let name = file_name.to_lowercase();
    name.ends_with(".dll") || name.ends_with(".exe")
}

/// Returns the container kind for the file name, if it has a container extension.
#[must_use]
pub fn container_kind(file_name: &str) -> Option<ContainerKind> {
    let name = file_name.to_lowercase();
    if name.ends_with(".nupkg") {
        Some(ContainerKind::NuGetPackage)
    } else if name.ends_with(".vsix") {
        Some(ContainerKind::Vsix)
    } else {
        None
    }
}

/// Returns `true` if the file name denotes a signable file type - a PE or a container.
#[must_use]
pub fn is_signable_name(file_name: &str) -> bool {
    is_pe_name(file_name) || container_kind(file_name).is_some()
}

/// Inspects a file and derives its category and default signing treatment.
///
/// # Arguments
/// * `path` - Full path of the file to classify
/// * `policy` - The signing policy tables
///
/// Unidentified or unreadable files are logged and classified as
/// ([`FileCategory::Opaque`], [`SignInfo::Ignore`](crate::policy::SignInfo::Ignore));
/// classification never aborts the run.
#[must_use]
pub fn classify(path: &Path, policy: &SigningPolicy) -> (FileCategory, crate::policy::SignInfo) {
    use crate::policy::SignInfo;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    if let Some(kind) = container_kind(&file_name) {
        let sign_info = container_sign_info(&file_name, kind, policy);
        debug!(
            "Classified '{}' as {} container -> {:?}",
            path.display(),
            kind,
            sign_info
        );
        return (FileCategory::Container(kind), sign_info);
    }

    if !is_pe_name(&file_name) {
        debug!("Unidentified file type, ignoring: '{}'", path.display());
        return (FileCategory::Opaque, SignInfo::Ignore);
    }

    let file = match File::from_file(path) {
        Ok(file) => file,
        Err(error) => {
            warn!(
                "Failed to parse PE file '{}', ignoring: {}",
                path.display(),
                error
            );
            return (FileCategory::Opaque, SignInfo::Ignore);
        }
    };

    let managed = file.clr().is_some();
    let category = FileCategory::PortableExecutable { managed };

    // Files that already carry an authenticode signature are excluded from the active
    // signing set but still verified later.
    if file.is_authenticode_signed() {
        debug!("Already signed: '{}'", path.display());
        return (category, SignInfo::AlreadySigned);
    }

    let (token, target_framework, crossgened) = if managed {
        read_managed_identity(&file, path)
    } else {
        (None, None, false)
    };

    let sign_info = pe_sign_info(
        &file_name,
        token.as_deref(),
        target_framework.as_deref(),
        managed && !crossgened,
        policy,
    );

    debug!(
        "Classified '{}': managed={}, token={:?}, tfm={:?} -> {:?}",
        path.display(),
        managed,
        token,
        target_framework,
        sign_info
    );

    (category, sign_info)
}

/// Reads public key token, target framework and crossgen state of a managed image.
///
/// Unreadable metadata degrades to unmanaged defaults, logged but never fatal.
fn read_managed_identity(file: &File, path: &Path) -> (Option<String>, Option<String>, bool) {
    let crossgened = match read_cor20_header(file) {
        Ok(Some(header)) => {
            CorFlags::from_bits_retain(header.flags).contains(CorFlags::IL_LIBRARY)
        }
        _ => false,
    };

    match read_assembly_metadata(file) {
        Ok(Some(metadata)) => {
            let token = metadata.public_key_token().unwrap_or_else(|error| {
                warn!(
                    "Could not derive public key token of '{}': {}",
                    path.display(),
                    error
                );
                None
            });
            (token, metadata.target_framework, crossgened)
        }
        Ok(None) => (None, None, crossgened),
        Err(error) => {
            warn!(
                "Could not read assembly metadata of '{}', treating as unmanaged: {}",
                path.display(),
                error
            );
            (None, None, crossgened)
        }
    }
}

/// Resolves the signing treatment of a PE file from the policy tables.
fn pe_sign_info(
    file_name: &str,
    token: Option<&str>,
    target_framework: Option<&str>,
    strong_name_eligible: bool,
    policy: &SigningPolicy,
) -> crate::policy::SignInfo {
    use crate::policy::SignInfo;

    let strong_name_key = if strong_name_eligible {
        token
            .and_then(|token| policy.token_default(token))
            .and_then(|info| info.strong_name_key.clone())
    } else {
        None
    };

    if let Some(certificate) = policy.resolve_override(file_name, token, target_framework) {
        if certificate == DO_NOT_SIGN {
            return SignInfo::Ignore;
        }

        return SignInfo::Pending {
            certificate: certificate.to_string(),
            strong_name_key,
        };
    }

    if let Some(info) = token.and_then(|token| policy.token_default(token)) {
        return SignInfo::Pending {
            certificate: info.certificate.clone(),
            strong_name_key,
        };
    }

    SignInfo::Pending {
        certificate: policy.default_certificate.clone(),
        strong_name_key: None,
    }
}

/// Resolves the signing treatment of a container from its kind, honoring name overrides.
fn container_sign_info(
    file_name: &str,
    kind: ContainerKind,
    policy: &SigningPolicy,
) -> crate::policy::SignInfo {
    use crate::policy::SignInfo;

    if let Some(certificate) = policy.resolve_override(file_name, None, None) {
        if certificate == DO_NOT_SIGN {
            return SignInfo::Ignore;
        }

        return SignInfo::Pending {
            certificate: certificate.to_string(),
            strong_name_key: None,
        };
    }

    let certificate = match kind {
        ContainerKind::NuGetPackage => policy.nupkg_certificate.clone(),
        ContainerKind::Vsix => policy.vsix_certificate.clone(),
    };

    SignInfo::Pending {
        certificate,
        strong_name_key: None,
    }
}
