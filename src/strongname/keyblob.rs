//! CAPI key blob parsing for strong name keys.
//!
//! Strong name key files (`.snk`) carry RSA keys in the wincrypt `PUBLICKEYBLOB` /
//! `PRIVATEKEYBLOB` layout: a blob header, an `RSAPUBKEY` header and little-endian key
//! material. Assemblies embed their public key wrapped in an additional 12-byte strong
//! name header (signature algorithm, hash algorithm, data size).
//!
//! This module converts between those layouts and the [`rsa`] crate key types, validates
//! public key blobs, and knows the two well-known special keys: the 16-byte neutral
//! public key and the full ECMA key it stands for.

use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};

use crate::{file::parser::Parser, Error::InvalidKeyBlob, Result};

/// PUBLICKEYSTRUC: bType, bVersion, wReserved, aiKeyAlg
pub(crate) const BLOB_HEADER_SIZE: usize = 1 + 1 + 2 + 4;
/// RSAPUBKEY: magic, bitlen, pubexp
pub(crate) const RSA_PUB_KEY_SIZE: usize = 4 + 4 + 4;
/// Strong name wrapper: SigAlgID, HashAlgID, cbPublicKey
pub(crate) const SN_PUBLIC_KEY_HEADER_SIZE: usize = 12;
/// Offset of the modulus within a CAPI blob
pub(crate) const OFFSET_TO_KEY_DATA: usize = BLOB_HEADER_SIZE + RSA_PUB_KEY_SIZE;

const RSA1: u32 = 0x3141_5352;
const RSA2: u32 = 0x3241_5352;

const PUBLIC_KEY_BLOB_ID: u8 = 0x06;
const PRIVATE_KEY_BLOB_ID: u8 = 0x07;

const ALG_CLASS_SIGNATURE: u32 = 1;
const ALG_CLASS_HASH: u32 = 4;
const ALG_SUB_ID_SHA1: u32 = 4;

const ALG_ID_RSA_SIGN: u32 = 0x0000_2400;
const ALG_ID_SHA: u32 = 0x0000_8004;

/// Neutral public key indicates that the ECMA key was used to strong name the binary.
pub(crate) const NEUTRAL_PUBLIC_KEY: [u8; 16] =
    [0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];

/// The full ECMA key the neutral public key stands for.
#[rustfmt::skip]
pub(crate) const ECMA_PUBLIC_KEY: [u8; 160] = [
    0x00,0x24,0x00,0x00,0x04,0x80,0x00,0x00,0x94,0x00,0x00,0x00,0x06,0x02,0x00,0x00,
    0x00,0x24,0x00,0x00,0x52,0x53,0x41,0x31,0x00,0x04,0x00,0x00,0x01,0x00,0x01,0x00,
    0x07,0xd1,0xfa,0x57,0xc4,0xae,0xd9,0xf0,0xa3,0x2e,0x84,0xaa,0x0f,0xae,0xfd,0x0d,
    0xe9,0xe8,0xfd,0x6a,0xec,0x8f,0x87,0xfb,0x03,0x76,0x6c,0x83,0x4c,0x99,0x92,0x1e,
    0xb2,0x3b,0xe7,0x9a,0xd9,0xd5,0xdc,0xc1,0xdd,0x9a,0xd2,0x36,0x13,0x21,0x02,0x90,
    0x0b,0x72,0x3c,0xf9,0x80,0x95,0x7f,0xc4,0xe1,0x77,0x10,0x8f,0xc6,0x07,0x77,0x4f,
    0x29,0xe8,0x32,0x0e,0x92,0xea,0x05,0xec,0xe4,0xe8,0x21,0xc0,0xa5,0xef,0xe8,0xf1,
    0x64,0x5c,0x4c,0x0c,0x93,0xc1,0xab,0x99,0x28,0x5d,0x62,0x2c,0xaa,0x65,0x2c,0x1d,
    0xfa,0xd6,0x3d,0x74,0x5d,0x6f,0x2d,0xe5,0xf1,0x7e,0x5e,0xaf,0x0f,0xc4,0x96,0x3d,
    0x26,0x1c,0x8a,0x12,0x43,0x65,0x18,0x20,0x6d,0xc0,0x93,0x34,0x4d,0x5a,0xd2,0x93,
];

/// Returns `true` if the blob is the 16-byte neutral public key.
#[must_use]
pub fn is_neutral_public_key(blob: &[u8]) -> bool {
    blob == NEUTRAL_PUBLIC_KEY
}

/// Checks whether a blob is a valid strong name public key blob.
///
/// Mirrors the invariants of the runtime's `StrongNameInternal` checks: correct size
/// bookkeeping, wincrypt `PUBLICKEYBLOB` key data, a signature-class signature algorithm
/// and a SHA1-or-better hash-class hash algorithm. The neutral public key passes despite
/// not obeying those invariants.
#[must_use]
pub fn is_valid_public_key(blob: &[u8]) -> bool {
    // Large enough for the header and at least one byte of key data
    if blob.len() < SN_PUBLIC_KEY_HEADER_SIZE + 1 {
        return false;
    }

    let mut parser = Parser::new(blob);
    let Ok(sig_alg_id) = parser.read_le::<u32>() else {
        return false;
    };
    let Ok(hash_alg_id) = parser.read_le::<u32>() else {
        return false;
    };
    let Ok(public_key_size) = parser.read_le::<u32>() else {
        return false;
    };
    let Ok(public_key) = parser.read_le::<u8>() else {
        return false;
    };

    if blob.len() != SN_PUBLIC_KEY_HEADER_SIZE + public_key_size as usize {
        return false;
    }

    // The ECMA neutral public key does not obey the invariants checked below
    if is_neutral_public_key(blob) {
        return true;
    }

    if public_key != PUBLIC_KEY_BLOB_ID {
        return false;
    }

    if sig_alg_id != 0 && algorithm_class(sig_alg_id) != ALG_CLASS_SIGNATURE {
        return false;
    }

    if hash_alg_id != 0
        && (algorithm_class(hash_alg_id) != ALG_CLASS_HASH
            || algorithm_sub_id(hash_alg_id) < ALG_SUB_ID_SHA1)
    {
        return false;
    }

    true
}

fn algorithm_class(flags: u32) -> u32 {
    (flags >> 13) & 0x7
}

fn algorithm_sub_id(flags: u32) -> u32 {
    flags & 0x1FF
}

/// Builds a strong name public key blob from its parts.
fn create_sn_public_key_blob(
    blob_type: u8,
    version: u8,
    alg_id: u32,
    magic: u32,
    bit_len: u32,
    pub_exp: u32,
    modulus: &[u8],
) -> Vec<u8> {
    let mut blob = Vec::with_capacity(SN_PUBLIC_KEY_HEADER_SIZE + OFFSET_TO_KEY_DATA + modulus.len());
    blob.extend_from_slice(&ALG_ID_RSA_SIGN.to_le_bytes());
    blob.extend_from_slice(&ALG_ID_SHA.to_le_bytes());
    blob.extend_from_slice(&((OFFSET_TO_KEY_DATA + modulus.len()) as u32).to_le_bytes());

    blob.push(blob_type);
    blob.push(version);
    blob.extend_from_slice(&0_u16.to_le_bytes());
    blob.extend_from_slice(&alg_id.to_le_bytes());

    blob.extend_from_slice(&magic.to_le_bytes());
    blob.extend_from_slice(&bit_len.to_le_bytes());
    blob.extend_from_slice(&pub_exp.to_le_bytes());
    blob.extend_from_slice(modulus);

    blob
}

/// Parses a CAPI key blob into its strong name public key blob and, for private key
/// blobs, the RSA private key.
///
/// Accepts either a strong name public key blob (returned unchanged, no private key), a
/// `PUBLICKEYBLOB` or an unencrypted `PRIVATEKEYBLOB`.
///
/// # Errors
/// Returns [`crate::Error::InvalidKeyBlob`] if the blob matches none of those layouts,
/// or [`crate::Error::RsaError`] if the key material is inconsistent.
pub(crate) fn parse_key(blob: &[u8]) -> Result<(Vec<u8>, Option<RsaPrivateKey>)> {
    if is_valid_public_key(blob) {
        return Ok((blob.to_vec(), None));
    }

    if blob.len() < BLOB_HEADER_SIZE + RSA_PUB_KEY_SIZE {
        return Err(InvalidKeyBlob("blob is too short".to_string()));
    }

    let mut parser = Parser::new(blob);
    let blob_type = parser.read_le::<u8>()?;
    let version = parser.read_le::<u8>()?;
    parser.read_le::<u16>()?; // wReserved
    let mut alg_id = parser.read_le::<u32>()?;
    let magic = parser.read_le::<u32>()?;
    let bit_len = parser.read_le::<u32>()?;
    let pub_exp = parser.read_le::<u32>()?;

    let modulus_length = bit_len as usize / 8;
    if blob.len() - OFFSET_TO_KEY_DATA < modulus_length {
        return Err(InvalidKeyBlob("modulus is truncated".to_string()));
    }

    let modulus = read_bytes(&mut parser, modulus_length)?;

    if !(blob_type == PRIVATE_KEY_BLOB_ID && magic == RSA2)
        && !(blob_type == PUBLIC_KEY_BLOB_ID && magic == RSA1)
    {
        return Err(InvalidKeyBlob(format!(
            "unexpected type/magic combination - 0x{:02X}/0x{:08X}",
            blob_type, magic
        )));
    }

    let private_key = if blob_type == PRIVATE_KEY_BLOB_ID {
        let half_length = (modulus_length + 1) / 2;

        let prime1 = read_bytes(&mut parser, half_length)?;
        let prime2 = read_bytes(&mut parser, half_length)?;
        // Exponent1, Exponent2 and Coefficient are recomputed by the RSA implementation
        parser.advance_by(3 * half_length)?;
        let private_exponent = read_bytes(&mut parser, modulus_length)?;

        // Key material is stored little-endian
        let key = RsaPrivateKey::from_components(
            BigUint::from_bytes_le(modulus),
            BigUint::from(pub_exp),
            BigUint::from_bytes_le(private_exponent),
            vec![
                BigUint::from_bytes_le(prime1),
                BigUint::from_bytes_le(prime2),
            ],
        )?;

        // The derived sn public key advertises the RSA signature algorithm
        alg_id = ALG_ID_RSA_SIGN;

        Some(key)
    } else {
        None
    };

    let sn_key = create_sn_public_key_blob(
        PUBLIC_KEY_BLOB_ID,
        version,
        alg_id,
        RSA1,
        bit_len,
        pub_exp,
        modulus,
    );

    Ok((sn_key, private_key))
}

fn read_bytes<'a>(parser: &mut Parser<'a>, count: usize) -> Result<&'a [u8]> {
    let data = parser.remaining();
    if data.len() < count {
        return Err(InvalidKeyBlob("key material is truncated".to_string()));
    }

    parser.advance_by(count)?;
    Ok(&data[..count])
}

/// Builds an RSA public key from a strong name public key blob.
///
/// The neutral public key is substituted by the full ECMA key first.
///
/// # Errors
/// Returns [`crate::Error::InvalidKeyBlob`] for undersized blobs, or
/// [`crate::Error::RsaError`] if the key material is rejected.
pub(crate) fn public_key_from_sn_blob(blob: &[u8]) -> Result<RsaPublicKey> {
    let blob: &[u8] = if is_neutral_public_key(blob) {
        &ECMA_PUBLIC_KEY
    } else {
        blob
    };

    if blob.len() < SN_PUBLIC_KEY_HEADER_SIZE + OFFSET_TO_KEY_DATA {
        return Err(InvalidKeyBlob("public key blob is too short".to_string()));
    }

    let mut parser = Parser::new(blob);
    parser.advance_by(SN_PUBLIC_KEY_HEADER_SIZE)?;
    parser.read_le::<u8>()?; // bType
    parser.read_le::<u8>()?; // bVersion
    parser.read_le::<u16>()?; // wReserved
    parser.read_le::<u32>()?; // aiKeyAlg
    parser.read_le::<u32>()?; // magic
    let bit_len = parser.read_le::<u32>()?;
    let pub_exp = parser.read_le::<u32>()?;

    let modulus = read_bytes(&mut parser, bit_len as usize / 8)?;

    Ok(RsaPublicKey::new(
        BigUint::from_bytes_le(modulus),
        BigUint::from(pub_exp),
    )?)
}

/// A full strong name key pair parsed from an `.snk` blob.
#[derive(Debug)]
pub struct StrongNameKeyPair {
    public_key_blob: Vec<u8>,
    private_key: RsaPrivateKey,
}

impl StrongNameKeyPair {
    /// Parses a key pair from raw `.snk` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidKeyBlob`] if the blob is not a full public/private
    /// key pair.
    pub fn from_blob(blob: &[u8]) -> Result<StrongNameKeyPair> {
        let (public_key_blob, private_key) = parse_key(blob)?;
        let Some(private_key) = private_key else {
            return Err(InvalidKeyBlob(
                "key must be a full public/private keypair".to_string(),
            ));
        };

        Ok(StrongNameKeyPair {
            public_key_blob,
            private_key,
        })
    }

    /// Parses a key pair from an `.snk` file.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read, or
    /// [`crate::Error::InvalidKeyBlob`] if its content is not a key pair.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<StrongNameKeyPair> {
        Self::from_blob(&std::fs::read(path)?)
    }

    /// The strong name public key blob derived from this pair, as embedded in assemblies.
    #[must_use]
    pub fn public_key_blob(&self) -> &[u8] {
        &self.public_key_blob
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecma_key_is_valid() {
        assert!(is_valid_public_key(&ECMA_PUBLIC_KEY));
    }

    #[test]
    fn neutral_key_is_valid() {
        assert!(is_valid_public_key(&NEUTRAL_PUBLIC_KEY));
        assert!(is_neutral_public_key(&NEUTRAL_PUBLIC_KEY));
        assert!(!is_neutral_public_key(&ECMA_PUBLIC_KEY));
    }

    #[test]
    fn garbage_is_not_valid() {
        assert!(!is_valid_public_key(&[]));
        assert!(!is_valid_public_key(&[0x00; 8]));
        assert!(!is_valid_public_key(&[0xFF; 64]));

        // Correct size bookkeeping but wrong blob id
        let mut blob = ECMA_PUBLIC_KEY.to_vec();
        blob[12] = 0x07;
        assert!(!is_valid_public_key(&blob));
    }

    #[test]
    fn parse_sn_public_blob_passthrough() {
        let (sn_key, private_key) = parse_key(&ECMA_PUBLIC_KEY).unwrap();
        assert_eq!(sn_key, ECMA_PUBLIC_KEY.to_vec());
        assert!(private_key.is_none());
    }

    #[test]
    fn public_key_from_ecma_blob() {
        let key = public_key_from_sn_blob(&ECMA_PUBLIC_KEY).unwrap();
        // 1024-bit modulus, exponent 0x010001 stored little-endian in the blob
        assert_eq!(rsa::traits::PublicKeyParts::size(&key), 128);
    }

    #[test]
    fn neutral_blob_substitutes_ecma() {
        let from_neutral = public_key_from_sn_blob(&NEUTRAL_PUBLIC_KEY).unwrap();
        let from_ecma = public_key_from_sn_blob(&ECMA_PUBLIC_KEY).unwrap();
        assert_eq!(from_neutral, from_ecma);
    }

    #[test]
    fn sn_blob_layout() {
        let modulus = [0xAA_u8; 64];
        let blob = create_sn_public_key_blob(
            PUBLIC_KEY_BLOB_ID,
            2,
            ALG_ID_RSA_SIGN,
            RSA1,
            512,
            0x0001_0001,
            &modulus,
        );

        assert_eq!(blob.len(), SN_PUBLIC_KEY_HEADER_SIZE + OFFSET_TO_KEY_DATA + 64);
        assert!(is_valid_public_key(&blob));
        assert_eq!(&blob[20..24], b"RSA1");
    }

    #[test]
    fn key_pair_requires_private_material() {
        assert!(matches!(
            StrongNameKeyPair::from_blob(&ECMA_PUBLIC_KEY).unwrap_err(),
            InvalidKeyBlob(_)
        ));
    }
}
