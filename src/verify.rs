//! Post-signing validation.
//!
//! After the orchestrator finishes, every file of the plan that was signed (or that
//! claimed to be already signed) is checked again: PE files through a pluggable
//! [`SignatureCheck`], containers by re-opening them and checking every nested part that
//! should have been signed.
//!
//! A single failure anywhere makes the run fail, but checking continues across all
//! files so one pass reports the complete set of problems. Intentionally unsigned files
//! are never failures.

use log::{debug, info};

use crate::{
    classify::FileCategory,
    container::read_parts,
    plan::SigningPlan,
    policy::SignInfo,
    strongname::{self, PeLayout},
    Error, Result,
};

/// The signature check applied to PE files during verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureCheck {
    /// Full strong name validation: checksum, flag bit and RSA signature
    StrongName,
    /// Authenticode presence: a non-empty certificate table directory
    ///
    /// This is the check the signing mechanism's output is normally validated with;
    /// authenticode is a distinct signature type from strong names.
    AuthenticodePresence,
}

impl SignatureCheck {
    /// Runs the check against a complete PE image buffer.
    fn passes(self, buffer: &[u8]) -> Result<bool> {
        match self {
            SignatureCheck::StrongName => strongname::is_signed(buffer),
            SignatureCheck::AuthenticodePresence => {
                let layout = PeLayout::parse(buffer)?;
                let mut offset = layout.authenticode_dir_offset;
                let rva = crate::file::io::read_le_at::<u32>(buffer, &mut offset)?;
                let size = crate::file::io::read_le_at::<u32>(buffer, &mut offset)?;
                Ok(rva != 0 && size != 0)
            }
        }
    }
}

/// Verifies every signed artifact of the plan.
///
/// # Arguments
/// * `plan` - The signing plan that was just executed
/// * `check` - The signature check applied to PE files
///
/// # Errors
/// Returns [`crate::Error::VerificationErrors`] carrying one message per failed file or
/// nested part. Already-written files are not reverted.
pub fn verify_plan(plan: &SigningPlan, check: SignatureCheck) -> Result<()> {
    let mut failures = Vec::new();

    for file in &plan.files {
        match file.sign_info() {
            // Intentionally unsigned - nothing to check
            SignInfo::Ignore => continue,
            SignInfo::AlreadySigned | SignInfo::Pending { .. } => {}
        }

        match file.category() {
            FileCategory::PortableExecutable { .. } => {
                match std::fs::read(file.path()) {
                    Ok(buffer) => match check.passes(&buffer) {
                        Ok(true) => {
                            debug!("Verified: '{}'", file.path().display());
                        }
                        Ok(false) => {
                            failures.push(format!(
                                "Assembly {} is not signed properly",
                                file.path().display()
                            ));
                        }
                        Err(error) => {
                            failures.push(format!(
                                "Assembly {} is unreadable after signing - {}",
                                file.path().display(),
                                error
                            ));
                        }
                    },
                    Err(error) => {
                        failures.push(format!(
                            "Assembly {} could not be read back - {}",
                            file.path().display(),
                            error
                        ));
                    }
                }
            }
            FileCategory::Container(_) => {
                verify_container(plan, file, check, &mut failures);
            }
            FileCategory::Opaque => {}
        }
    }

    if failures.is_empty() {
        info!("Verified {} file(s)", plan.files.len());
        Ok(())
    } else {
        Err(Error::VerificationErrors(failures))
    }
}

/// Re-opens a container and checks every nested PE part that should have been signed.
fn verify_container(
    plan: &SigningPlan,
    file: &crate::plan::SignableFile,
    check: SignatureCheck,
    failures: &mut Vec<String>,
) {
    let Some(manifest) = plan.manifests.get(file.content_hash()) else {
        return;
    };

    let parts = match read_parts(file.path()) {
        Ok(parts) => parts,
        Err(error) => {
            failures.push(format!(
                "Container {} could not be re-opened - {}",
                file.path().display(),
                error
            ));
            return;
        }
    };

    for (relative_path, bytes) in parts {
        let Some(part) = manifest.find_part(&relative_path) else {
            continue;
        };

        if !part.file.should_sign() || !part.file.category().is_pe() {
            continue;
        }

        match check.passes(&bytes) {
            Ok(true) => {}
            Ok(false) => {
                failures.push(format!(
                    "Container {} has part {} which is not signed",
                    file.path().display(),
                    relative_path
                ));
            }
            Err(error) => {
                failures.push(format!(
                    "Container {} has unreadable part {} - {}",
                    file.path().display(),
                    relative_path,
                    error
                ));
            }
        }
    }
}
