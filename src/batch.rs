//! Round-based batch signing orchestration.
//!
//! The orchestrator drives the external signing mechanism over a
//! [`SigningPlan`](crate::plan::SigningPlan) in numbered rounds. Each round it selects
//! the files whose dependencies are already satisfied - a file is ready if it is not a
//! container, or if every nested part of its container manifest is either exempt from
//! signing or already signed - repacks the ready containers with their freshly signed
//! parts, and hands the whole batch to the [`Signer`] in one invocation.
//!
//! Batching exists because the external mechanism has fixed per-invocation overhead:
//! all independently signable files go out together, while the topological constraint
//! that a container cannot be finalized before its contents is preserved across rounds.
//! A round that extracts an empty batch while files remain is a cyclic dependency, which
//! is a bug in plan construction and fatal.
//!
//! Rounds are strictly sequential: round N+1's readiness test reads round N's commits.

use std::{collections::HashSet, path::PathBuf, sync::Arc};

use log::{debug, info};

use crate::{
    classify::FileCategory,
    container::repack_container,
    content::ContentHash,
    plan::{build_plan, SignableFile, SigningPlan},
    policy::SigningPolicy,
    strongname,
    verify::{verify_plan, SignatureCheck},
    Error, Result,
};

/// The injected signing mechanism.
///
/// Implementations mutate the batch files on disk so that they carry a signature by the
/// time `sign` returns. The mechanism is a black box to the orchestrator: it reports
/// success or failure for the whole batch, partial success is not modeled.
pub trait Signer {
    /// Signs one round's batch of files.
    ///
    /// # Arguments
    /// * `round` - The round number, starting at 0
    /// * `files` - The batch, in plan order
    ///
    /// # Errors
    /// An `Err` aborts the run like an `Ok(false)` does, but carries a cause.
    fn sign(&mut self, round: u32, files: &[Arc<SignableFile>]) -> Result<bool>;
}

/// Counters accumulated over one signing run.
///
/// Owned by the caller and threaded through the call chain, so the orchestrator stays
/// free of process-wide state and testable in isolation.
#[derive(Clone, Debug, Default)]
pub struct SigningMetrics {
    /// Number of distinct files in the plan
    pub files_planned: usize,
    /// Number of signing rounds that ran
    pub rounds: u32,
    /// Number of files handed to the signing mechanism
    pub files_signed: usize,
    /// Number of containers rewritten with signed parts
    pub containers_repacked: usize,
    /// Number of nested payloads resolved through the deduplication arena
    pub payloads_deduplicated: usize,
    /// Number of assemblies that had their public-sign flag stripped
    pub public_signs_removed: usize,
}

/// Signs every file of the plan in dependency-respecting rounds.
///
/// Before round 0, every strong-name-pending assembly that is public-signed has the
/// interfering flag bit stripped. Then, per round: ready files are extracted from the
/// remaining set, ready containers are repacked with their signed parts, and the batch
/// goes to the signer. On success the batch members' content hashes are committed to
/// the signed set and the next round starts.
///
/// # Arguments
/// * `plan` - The signing plan
/// * `signer` - The external signing mechanism
/// * `metrics` - Accumulator for run statistics
///
/// # Errors
/// - [`crate::Error::SigningFailed`] if the mechanism reports failure; prior rounds
///   remain signed on disk, nothing is rolled back
/// - [`crate::Error::NoProgress`] if no file is ready although files remain
pub fn sign_plan(
    plan: &SigningPlan,
    signer: &mut dyn Signer,
    metrics: &mut SigningMetrics,
) -> Result<()> {
    remove_public_signs(plan, metrics)?;

    let mut remaining: Vec<Arc<SignableFile>> = plan.to_sign.clone();
    let mut signed: HashSet<ContentHash> = HashSet::new();
    let mut round: u32 = 0;

    let is_ready = |file: &SignableFile, signed: &HashSet<ContentHash>| -> bool {
        if !file.is_container() {
            return true;
        }

        match plan.manifests.get(file.content_hash()) {
            Some(manifest) => manifest
                .parts
                .iter()
                .all(|part| !part.file.should_sign() || signed.contains(part.file.content_hash())),
            // A container with no manifest has no nested dependency
            None => true,
        }
    };

    while !remaining.is_empty() {
        let mut batch = Vec::new();
        let mut blocked = Vec::new();
        for file in remaining {
            if is_ready(&file, &signed) {
                batch.push(file);
            } else {
                blocked.push(file);
            }
        }
        remaining = blocked;

        if batch.is_empty() {
            return Err(Error::NoProgress(remaining.len()));
        }

        // Containers must reflect their signed inner content before their own bytes
        // are hashed by the signing mechanism
        for file in &batch {
            if let Some(manifest) = plan
                .manifests
                .get(file.content_hash())
                .filter(|_| file.is_container())
            {
                debug!("Repacking container: '{}'", file.path().display());
                repack_container(file, manifest)?;
                metrics.containers_repacked += 1;
            }
        }

        info!("Signing Round {}: {} files to sign.", round, batch.len());
        for file in &batch {
            debug!("File: '{}'", file.path().display());
        }

        if !signer.sign(round, &batch)? {
            return Err(Error::SigningFailed(round));
        }

        for file in &batch {
            signed.insert(*file.content_hash());
        }
        metrics.files_signed += batch.len();
        metrics.rounds = round + 1;
        round += 1;
    }

    Ok(())
}

/// Strips the strong-name-signed flag from public-signed assemblies about to be strong
/// named; the stale bit interferes with the actual signing.
fn remove_public_signs(plan: &SigningPlan, metrics: &mut SigningMetrics) -> Result<()> {
    for file in &plan.to_sign {
        let is_managed = matches!(
            file.category(),
            FileCategory::PortableExecutable { managed: true }
        );
        if !is_managed || file.sign_info().strong_name_key().is_none() {
            continue;
        }

        if strongname::clear_strong_name_flag(file.path())? {
            info!("Removing public sign: '{}'", file.path().display());
            metrics.public_signs_removed += 1;
        }
    }

    Ok(())
}

/// Builds the plan, signs it, and verifies the results - the whole pipeline in one call.
///
/// # Arguments
/// * `inputs` - The explicit files to sign, caller-deduplicated
/// * `policy` - Signing policy tables
/// * `scratch_dir` - Directory for container part extraction
/// * `signer` - The external signing mechanism
/// * `check` - The signature check applied during post-signing verification
///
/// # Errors
/// Propagates plan construction, orchestration and verification errors; see
/// [`build_plan`](crate::plan::build_plan), [`sign_plan`] and
/// [`verify_plan`](crate::verify::verify_plan).
pub fn sign_artifacts(
    inputs: &[PathBuf],
    policy: &SigningPolicy,
    scratch_dir: PathBuf,
    signer: &mut dyn Signer,
    check: SignatureCheck,
) -> Result<SigningMetrics> {
    let mut metrics = SigningMetrics::default();

    let plan = build_plan(inputs, policy, &scratch_dir, &mut metrics)?;
    sign_plan(&plan, signer, &mut metrics)?;
    verify_plan(&plan, check)?;

    info!("Build artifacts signed and validated.");
    Ok(metrics)
}
