//! Strong name signing and verification of managed PE images.
//!
//! Strong naming embeds an RSA signature over the image into a reserved directory of the
//! binary. The signing hash is PE-format aware: the checksum field and the authenticode
//! directory entry are zeroed before hashing, and the strong name directory itself is
//! segmented out of the hashed byte ranges entirely - the computed hash is identical
//! whether that region holds zeros or stale data.
//!
//! The digest is SHA-1 with PKCS#1 v1.5 padding. That is a format-compatibility
//! constraint inherited from the ECMA-335 strong name layout, not a design choice - every
//! runtime that validates strong names expects exactly this construction.
//!
//! # Operations
//!
//! - [`sign_buffer`] / [`sign_file`] - transactional in-place signing: hash, RSA-sign,
//!   write the byte-reversed signature into the directory, recompute the PE checksum
//! - [`is_signed`] / [`is_signed_file`] - full validation: checksum match, flag bit,
//!   RSA signature verification against the embedded public key
//! - [`clear_strong_name_flag`] - strips the strong-name-signed flag bit from
//!   public-signed assemblies, which interferes with real signing
//!
//! # Examples
//!
//! ```rust,no_run
//! use signscope::strongname::{sign_file, is_signed_file, StrongNameKeyPair};
//! use std::path::Path;
//!
//! let key = StrongNameKeyPair::from_file("keys/MyKey.snk")?;
//! sign_file(Path::new("artifacts/MyLibrary.dll"), &key)?;
//! assert!(is_signed_file(Path::new("artifacts/MyLibrary.dll"))?);
//! # Ok::<(), signscope::Error>(())
//! ```

pub mod keyblob;
pub mod layout;

use std::path::Path;

use log::debug;
use rsa::Pkcs1v15Sign;
use sha1::{Digest, Sha1};

use crate::{
    file::{io::write_le_at, File},
    metadata::{read_assembly_metadata, CorFlags},
    Error::{EcmaKeyUnsupported, PublicKeyMismatch, StrongNameDirectoryMissing},
    Result,
};

pub use keyblob::{is_valid_public_key, StrongNameKeyPair};
pub use layout::PeLayout;

use layout::{AUTHENTICODE_DIRECTORY_SIZE, CHECKSUM_SIZE};

/// Computes the strong name signing hash of a prepared image buffer.
///
/// The hash covers the header region (DOS stub through the section table) and every
/// section's raw bytes, except that any byte range overlapping the strong name signature
/// directory is excluded - the bytes strictly before and strictly after that region are
/// hashed, never the region itself.
///
/// Callers must run [`prepare_for_hashing`] on the buffer first; the checksum field and
/// authenticode directory entry are inside the hashed ranges and have to be normalized.
///
/// # Arguments
/// * `buffer` - The prepared image bytes
/// * `pe` - The image layout
/// * `strong_name_offset` - File offset of the strong name directory
/// * `strong_name_size` - Size of the strong name directory in bytes
///
/// # Errors
/// Returns an error if a section range or the strong name range lies outside the buffer.
pub fn compute_signing_hash(
    buffer: &[u8],
    pe: &PeLayout,
    strong_name_offset: usize,
    strong_name_size: usize,
) -> Result<[u8; 20]> {
    let mut hash = Sha1::new();

    // First hash the DOS header and PE headers
    hash.update(slice(buffer, 0, pe.headers_size)?);

    // Now each section, skipping the strong name signature if present
    let strong_name_end = strong_name_offset + strong_name_size;
    for section in &pe.sections {
        let section_offset = section.raw_offset;
        let section_size = section.raw_size;
        let section_end = section_offset + section_size;

        if strong_name_end < section_offset || strong_name_offset >= section_end {
            // No signature overlap, hash the whole section
            hash.update(slice(buffer, section_offset, section_size)?);
        } else {
            // There is overlap. Hash either side of the signature
            if strong_name_offset < section_offset || strong_name_end > section_end {
                return Err(malformed_error!(
                    "Strong name directory straddles a section boundary"
                ));
            }

            hash.update(slice(buffer, section_offset, strong_name_offset - section_offset)?);
            hash.update(slice(buffer, strong_name_end, section_end - strong_name_end)?);
        }
    }

    Ok(hash.finalize().into())
}

/// Prepares an image buffer for hashing by zeroing the checksum field and the
/// authenticode directory entry, and optionally setting the strong-name-signed flag bit.
///
/// Signing sets the flag before hashing so the hash covers the final flag state;
/// verification leaves the flags untouched.
///
/// # Arguments
/// * `buffer` - The image bytes to normalize
/// * `pe` - The image layout
/// * `set_strong_name_bit` - If `true`, the strong-name-signed flag bit is set
///
/// # Errors
/// Returns an error if the layout offsets lie outside the buffer.
pub fn prepare_for_hashing(
    buffer: &mut [u8],
    pe: &PeLayout,
    set_strong_name_bit: bool,
) -> Result<()> {
    zero_range(buffer, pe.checksum_offset, CHECKSUM_SIZE)?;
    zero_range(
        buffer,
        pe.authenticode_dir_offset,
        AUTHENTICODE_DIRECTORY_SIZE,
    )?;

    if set_strong_name_bit {
        let Some(flags_offset) = pe.cor_flags_offset() else {
            return Err(malformed_error!("Image has no COR20 header"));
        };
        let flags = pe.cor_flags.unwrap_or(0) | CorFlags::STRONG_NAME_SIGNED.bits();
        write_le_at::<u32>(buffer, flags_offset, flags)?;
    }

    Ok(())
}

/// Calculates the PE checksum of an image buffer.
///
/// The image is processed as a sequence of little-endian 16-bit words with 16-bit carry
/// folding after every addition; the checksum field itself is excluded from the sum, and
/// the total image byte length is added at the end. The result is invariant to whatever
/// stale value the checksum field currently holds.
///
/// # Arguments
/// * `buffer` - The complete image bytes
/// * `pe` - The image layout
#[must_use]
pub fn calculate_checksum(buffer: &[u8], pe: &PeLayout) -> u32 {
    let checksum_start = pe.checksum_offset.min(buffer.len());
    let checksum_end = (pe.checksum_offset + CHECKSUM_SIZE).min(buffer.len());

    checksum_segments(&[&buffer[..checksum_start], &buffer[checksum_end..]])
        .wrapping_add(buffer.len() as u32)
}

/// Folds a 16-bit word into the running checksum accumulator.
fn aggregate_checksum(checksum: u32, value: u16) -> u32 {
    let sum = checksum.wrapping_add(u32::from(value));
    (sum >> 16) + (sum & 0xFFFF)
}

/// Sums byte segments as little-endian 16-bit words.
///
/// A trailing odd byte of one segment is paired with the first byte of the next; the very
/// last byte of the final segment is folded in alone.
fn checksum_segments(segments: &[&[u8]]) -> u32 {
    let mut checksum = 0_u32;
    let mut pending: Option<u8> = None;

    for segment in segments {
        if segment.is_empty() {
            continue;
        }

        let mut index = 0;
        if let Some(low) = pending.take() {
            checksum =
                aggregate_checksum(checksum, (u16::from(segment[0]) << 8) | u16::from(low));
            index = 1;
        }

        let mut count = segment.len();
        if (count - index) % 2 != 0 {
            pending = Some(segment[count - 1]);
            count -= 1;
        }

        while index < count {
            checksum = aggregate_checksum(
                checksum,
                u16::from_le_bytes([segment[index], segment[index + 1]]),
            );
            index += 2;
        }
    }

    if let Some(low) = pending {
        checksum = aggregate_checksum(checksum, u16::from(low));
    }

    checksum
}

/// Strong names a delay-signed image buffer in place.
///
/// The buffer is mutated transactionally: on success it holds the final, checksummed,
/// signed image; on error its content is unspecified and must be discarded.
///
/// # Arguments
/// * `buffer` - The complete image bytes
/// * `key` - The signing key pair
///
/// # Errors
/// - [`crate::Error::StrongNameDirectoryMissing`] if the binary was not built
///   delay-signed
/// - [`crate::Error::EcmaKeyUnsupported`] if the assembly carries the neutral key
/// - [`crate::Error::PublicKeyMismatch`] if the embedded key does not match `key`
/// - Parsing or RSA errors for malformed input
pub fn sign_buffer(buffer: &mut [u8], key: &StrongNameKeyPair) -> Result<()> {
    let pe = PeLayout::parse(buffer)?;

    let Some((sn_offset, sn_size)) = pe.strong_name_dir else {
        return Err(StrongNameDirectoryMissing);
    };

    // The assembly's embedded public key decides whether this key may sign it
    let metadata = read_assembly_metadata(&File::from_mem(buffer.to_vec())?)?
        .ok_or_else(|| malformed_error!("Cannot strong name sign binary without metadata"))?;
    let Some(public_key) = metadata.public_key else {
        return Err(malformed_error!("Assembly does not embed a public key"));
    };

    if keyblob::is_neutral_public_key(&public_key) {
        return Err(EcmaKeyUnsupported);
    }

    let (assembly_sn_key, _) = keyblob::parse_key(&public_key)?;
    if assembly_sn_key != key.public_key_blob() {
        return Err(PublicKeyMismatch);
    }

    prepare_for_hashing(buffer, &pe, true)?;

    let hash = compute_signing_hash(buffer, &pe, sn_offset, sn_size)?;

    let mut signature = key
        .private_key()
        .sign(Pkcs1v15Sign::new::<Sha1>(), &hash)?;

    // The signature is stored in reverse byte order
    signature.reverse();

    if signature.len() != sn_size {
        return Err(malformed_error!(
            "Signature size {} does not match the strong name directory size {}",
            signature.len(),
            sn_size
        ));
    }
    buffer[sn_offset..sn_offset + sn_size].copy_from_slice(&signature);

    // Compute a new checksum over the final image and write it out
    let checksum = calculate_checksum(buffer, &pe);
    write_le_at::<u32>(buffer, pe.checksum_offset, checksum)?;

    Ok(())
}

/// Strong names a delay-signed binary on disk, in place and at the same length.
///
/// # Arguments
/// * `path` - Path of the binary to sign
/// * `key` - The signing key pair
///
/// # Errors
/// See [`sign_buffer`]; additionally I/O errors while reading or writing the file.
pub fn sign_file(path: &Path, key: &StrongNameKeyPair) -> Result<()> {
    let mut buffer = std::fs::read(path)?;
    sign_buffer(&mut buffer, key)?;
    std::fs::write(path, &buffer)?;

    debug!("Strong name signed '{}'", path.display());
    Ok(())
}

/// Checks whether an image buffer carries a valid strong name signature.
///
/// The checks, in order: the stored checksum matches a freshly computed one, the
/// strong-name-signed flag bit is set, the signature directory is present, and an RSA
/// verification of the stored (re-reversed) signature against the embedded public key
/// succeeds. Any failing check yields `false`.
///
/// # Arguments
/// * `buffer` - The complete image bytes
///
/// # Errors
/// Structurally malformed PE input propagates as an error; a merely-unsigned image is
/// `Ok(false)`.
pub fn is_signed(buffer: &[u8]) -> Result<bool> {
    let pe = PeLayout::parse(buffer)?;

    // If the binary has no metadata then it's not signed
    let Some(cor_flags) = pe.cor_flags else {
        return Ok(false);
    };

    if !CorFlags::from_bits_retain(cor_flags).contains(CorFlags::STRONG_NAME_SIGNED) {
        return Ok(false);
    }

    let Some((sn_offset, sn_size)) = pe.strong_name_dir else {
        return Ok(false);
    };

    if pe.stored_checksum != calculate_checksum(buffer, &pe) {
        return Ok(false);
    }

    let Some(metadata) = read_assembly_metadata(&File::from_mem(buffer.to_vec())?)? else {
        return Ok(false);
    };
    let Some(public_key) = metadata.public_key else {
        return Ok(false);
    };

    if !keyblob::is_valid_public_key(&public_key) {
        return Ok(false);
    }

    let rsa_key = keyblob::public_key_from_sn_blob(&public_key)?;

    // Verification hashes with the flags left exactly as stored
    let mut prepared = buffer.to_vec();
    prepare_for_hashing(&mut prepared, &pe, false)?;
    let hash = compute_signing_hash(&prepared, &pe, sn_offset, sn_size)?;

    // The signature bytes are stored in reverse order
    let mut signature = buffer[sn_offset..sn_offset + sn_size].to_vec();
    signature.reverse();

    Ok(rsa_key
        .verify(Pkcs1v15Sign::new::<Sha1>(), &hash, &signature)
        .is_ok())
}

/// Checks whether a binary on disk carries a valid strong name signature.
///
/// # Arguments
/// * `path` - Path of the binary to check
///
/// # Errors
/// See [`is_signed`]; additionally I/O errors while reading the file.
pub fn is_signed_file(path: &Path) -> Result<bool> {
    is_signed(&std::fs::read(path)?)
}

/// Clears the strong-name-signed flag bit from a public-signed binary.
///
/// Public-signed assemblies carry the flag without a real signature, which interferes
/// with actual strong name signing. Binaries without the flag are left untouched.
///
/// # Arguments
/// * `path` - Path of the binary to strip
///
/// # Returns
/// `true` if the flag was cleared, `false` if there was nothing to do.
///
/// # Errors
/// Returns an error for unreadable or structurally malformed images.
pub fn clear_strong_name_flag(path: &Path) -> Result<bool> {
    let mut buffer = std::fs::read(path)?;
    let pe = PeLayout::parse(&buffer)?;

    let (Some(flags), Some(flags_offset)) = (pe.cor_flags, pe.cor_flags_offset()) else {
        return Ok(false);
    };

    let flags = CorFlags::from_bits_retain(flags);
    if !flags.contains(CorFlags::STRONG_NAME_SIGNED) {
        return Ok(false);
    }

    let stripped = flags.difference(CorFlags::STRONG_NAME_SIGNED);
    write_le_at::<u32>(&mut buffer, flags_offset, stripped.bits())?;
    std::fs::write(path, &buffer)?;

    debug!("Removed public sign flag from '{}'", path.display());
    Ok(true)
}

fn slice(buffer: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let Some(end) = offset.checked_add(len) else {
        return Err(crate::Error::OutOfBounds);
    };

    if end > buffer.len() {
        return Err(crate::Error::OutOfBounds);
    }

    Ok(&buffer[offset..end])
}

fn zero_range(buffer: &mut [u8], offset: usize, len: usize) -> Result<()> {
    let Some(end) = offset.checked_add(len) else {
        return Err(crate::Error::OutOfBounds);
    };

    if end > buffer.len() {
        return Err(crate::Error::OutOfBounds);
    }

    buffer[offset..end].fill(0);
    Ok(())
}
