#![allow(dead_code)]

//! Crafted managed assemblies, key material and archives shared by the integration
//! tests.
//!
//! The assembly builder emits a minimal but well-formed delay-signed PE32 image: CLR
//! runtime header, reserved strong name signature directory, and an ECMA-335 metadata
//! root with `#~`, `#Strings` and `#Blob` streams carrying an Assembly row (and
//! optionally a `TargetFrameworkAttribute`).

use std::{io::Write, path::Path, sync::OnceLock};

use rand::SeedableRng;
use rsa::{
    traits::{PrivateKeyParts, PublicKeyParts},
    BigUint, RsaPrivateKey,
};

/// Routes log output into the test harness capture.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The deterministic 1024-bit RSA test key, generated once per test binary.
pub fn test_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0x5349_474E);
        RsaPrivateKey::new(&mut rng, 1024).expect("key generation")
    })
}

/// A second, distinct key for mismatch scenarios.
pub fn other_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0x4F54_4845);
        RsaPrivateKey::new(&mut rng, 1024).expect("key generation")
    })
}

fn le_padded(value: &BigUint, width: usize) -> Vec<u8> {
    let mut bytes = value.to_bytes_le();
    assert!(bytes.len() <= width, "component wider than its blob field");
    bytes.resize(width, 0);
    bytes
}

/// Encodes an RSA private key as an unencrypted CAPI `PRIVATEKEYBLOB` (`.snk` layout).
///
/// The CRT exponents and coefficient fields are zero-filled; consumers of `.snk` files
/// recompute them from the primes.
pub fn snk_blob(key: &RsaPrivateKey) -> Vec<u8> {
    let modulus_length = key.size();
    let half_length = (modulus_length + 1) / 2;

    let mut blob = Vec::new();
    blob.push(0x07); // PRIVATEKEYBLOB
    blob.push(0x02); // version
    blob.extend_from_slice(&0_u16.to_le_bytes()); // reserved
    blob.extend_from_slice(&0x0000_2400_u32.to_le_bytes()); // CALG_RSA_SIGN
    blob.extend_from_slice(&0x3241_5352_u32.to_le_bytes()); // 'RSA2'
    blob.extend_from_slice(&u32::try_from(modulus_length * 8).unwrap().to_le_bytes());

    let exponent = key.e().to_bytes_le();
    let mut exponent_dword = [0_u8; 4];
    exponent_dword[..exponent.len()].copy_from_slice(&exponent);
    blob.extend_from_slice(&exponent_dword);

    blob.extend_from_slice(&le_padded(key.n(), modulus_length));
    blob.extend_from_slice(&le_padded(&key.primes()[0], half_length));
    blob.extend_from_slice(&le_padded(&key.primes()[1], half_length));
    blob.extend_from_slice(&vec![0_u8; 3 * half_length]); // exponent1, exponent2, coefficient
    blob.extend_from_slice(&le_padded(key.d(), modulus_length));

    blob
}

fn put_u16(image: &mut [u8], offset: usize, value: u16) {
    image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn push_u16(data: &mut Vec<u8>, value: u16) {
    data.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(data: &mut Vec<u8>, value: u32) {
    data.extend_from_slice(&value.to_le_bytes());
}

/// Builds a delay-signed managed PE32 image.
///
/// # Arguments
/// * `public_key_blob` - The strong name public key blob embedded in the Assembly row
/// * `strong_name_size` - Reserved strong name directory size; 0 omits the directory
/// * `target_framework` - Optional `TargetFrameworkAttribute` value
/// * `public_signed` - If `true`, the strong-name-signed flag is set without a signature
pub fn build_managed_pe(
    public_key_blob: &[u8],
    strong_name_size: usize,
    target_framework: Option<&str>,
    public_signed: bool,
) -> Vec<u8> {
    assert!(strong_name_size <= 0x80, "directory must fit before the metadata");

    let metadata = build_metadata(public_key_blob, target_framework);
    assert!(metadata.len() <= 0x500, "metadata must fit in the section");

    let mut image = vec![0_u8; 0x800];

    // DOS header
    image[0] = b'M';
    image[1] = b'Z';
    put_u32(&mut image, 0x3C, 0x80);

    image[0x80..0x84].copy_from_slice(b"PE\0\0");

    // COFF header
    put_u16(&mut image, 0x84, 0x014C);
    put_u16(&mut image, 0x86, 1);
    put_u16(&mut image, 0x94, 224);
    put_u16(&mut image, 0x96, 0x2102);

    // Optional header (PE32)
    let opt = 0x98;
    put_u16(&mut image, opt, 0x10B);
    image[opt + 2] = 6;
    put_u32(&mut image, opt + 4, 0x600);
    put_u32(&mut image, opt + 20, 0x1000);
    put_u32(&mut image, opt + 24, 0x2000);
    put_u32(&mut image, opt + 28, 0x0040_0000);
    put_u32(&mut image, opt + 32, 0x1000);
    put_u32(&mut image, opt + 36, 0x200);
    put_u16(&mut image, opt + 40, 4);
    put_u16(&mut image, opt + 48, 4);
    put_u32(&mut image, opt + 56, 0x2000);
    put_u32(&mut image, opt + 60, 0x200);
    put_u16(&mut image, opt + 68, 3);
    put_u32(&mut image, opt + 72, 0x0010_0000);
    put_u32(&mut image, opt + 76, 0x1000);
    put_u32(&mut image, opt + 80, 0x0010_0000);
    put_u32(&mut image, opt + 84, 0x1000);
    put_u32(&mut image, opt + 92, 16);

    // CLR runtime header directory entry (index 14)
    put_u32(&mut image, opt + 96 + 14 * 8, 0x1000);
    put_u32(&mut image, opt + 96 + 14 * 8 + 4, 72);

    // Section header: .text
    let section = opt + 224;
    image[section..section + 5].copy_from_slice(b".text");
    put_u32(&mut image, section + 8, 0x1000);
    put_u32(&mut image, section + 12, 0x1000);
    put_u32(&mut image, section + 16, 0x600);
    put_u32(&mut image, section + 20, 0x200);
    put_u32(&mut image, section + 36, 0x6000_0020);

    // COR20 header at RVA 0x1000 (file 0x200)
    let cor = 0x200;
    put_u32(&mut image, cor, 72);
    put_u16(&mut image, cor + 4, 2);
    put_u16(&mut image, cor + 6, 5);
    put_u32(&mut image, cor + 8, 0x1100); // metadata RVA
    put_u32(&mut image, cor + 12, metadata.len() as u32);
    let mut flags = 0x0000_0001_u32; // ILONLY
    if public_signed {
        flags |= 0x0000_0008; // strong-name-signed bit without an actual signature
    }
    put_u32(&mut image, cor + 16, flags);
    if strong_name_size > 0 {
        put_u32(&mut image, cor + 32, 0x1080); // strong name RVA (file 0x280)
        put_u32(&mut image, cor + 36, strong_name_size as u32);
    }

    // Metadata root at RVA 0x1100 (file 0x300)
    image[0x300..0x300 + metadata.len()].copy_from_slice(&metadata);

    image
}

/// Builds the metadata root: version string, stream directory, `#~`, `#Strings`, `#Blob`.
fn build_metadata(public_key_blob: &[u8], target_framework: Option<&str>) -> Vec<u8> {
    // #Strings heap: "", "TestLib", attribute type names, ".ctor"
    let mut strings = Vec::new();
    strings.push(0);
    let name_index = strings.len() as u32;
    strings.extend_from_slice(b"TestLib\0");
    let attribute_index = strings.len() as u32;
    strings.extend_from_slice(b"TargetFrameworkAttribute\0");
    let namespace_index = strings.len() as u32;
    strings.extend_from_slice(b"System.Runtime.Versioning\0");
    let ctor_index = strings.len() as u32;
    strings.extend_from_slice(b".ctor\0");

    // #Blob heap: "", public key, ctor signature, attribute value
    let mut blobs = vec![0_u8];
    let public_key_index = blobs.len() as u32;
    push_blob(&mut blobs, public_key_blob);
    let ctor_sig_index = blobs.len() as u32;
    push_blob(&mut blobs, &[0x20, 0x01, 0x01, 0x0E]); // hasthis void(string)
    let attribute_value_index = blobs.len() as u32;
    if let Some(framework) = target_framework {
        let mut value = vec![0x01, 0x00];
        value.push(framework.len() as u8);
        value.extend_from_slice(framework.as_bytes());
        value.extend_from_slice(&[0x00, 0x00]); // no named arguments
        push_blob(&mut blobs, &value);
    }

    // #~ stream
    let mut tables = Vec::new();
    push_u32(&mut tables, 0); // Reserved
    tables.push(2); // MajorVersion
    tables.push(0); // MinorVersion
    tables.push(0); // HeapSizes
    tables.push(1); // Reserved
    let mut valid = 1_u64 << 0x20;
    if target_framework.is_some() {
        valid |= (1 << 0x01) | (1 << 0x0A) | (1 << 0x0C);
    }
    tables.extend_from_slice(&valid.to_le_bytes());
    tables.extend_from_slice(&0_u64.to_le_bytes()); // Sorted

    if target_framework.is_some() {
        push_u32(&mut tables, 1); // TypeRef rows
        push_u32(&mut tables, 1); // MemberRef rows
        push_u32(&mut tables, 1); // CustomAttribute rows
    }
    push_u32(&mut tables, 1); // Assembly rows

    if target_framework.is_some() {
        // TypeRef: scope AssemblyRef#1, TargetFrameworkAttribute
        push_u16(&mut tables, (1 << 2) | 2);
        push_u16(&mut tables, attribute_index as u16);
        push_u16(&mut tables, namespace_index as u16);

        // MemberRef: class TypeRef#1, .ctor
        push_u16(&mut tables, (1 << 3) | 1);
        push_u16(&mut tables, ctor_index as u16);
        push_u16(&mut tables, ctor_sig_index as u16);

        // CustomAttribute: parent Assembly#1, type MemberRef#1
        push_u16(&mut tables, (1 << 5) | 14);
        push_u16(&mut tables, (1 << 3) | 3);
        push_u16(&mut tables, attribute_value_index as u16);
    }

    // Assembly row
    push_u32(&mut tables, 0x8004); // HashAlgId - SHA1
    push_u16(&mut tables, 1);
    push_u16(&mut tables, 0);
    push_u16(&mut tables, 0);
    push_u16(&mut tables, 0);
    push_u32(&mut tables, 0x0001); // Flags - PublicKey
    push_u16(&mut tables, public_key_index as u16);
    push_u16(&mut tables, name_index as u16);
    push_u16(&mut tables, 0); // Culture

    // Root: header, version string, stream directory
    let mut root = Vec::new();
    root.extend_from_slice(&0x424A_5342_u32.to_le_bytes());
    push_u16(&mut root, 1);
    push_u16(&mut root, 1);
    push_u32(&mut root, 0);
    push_u32(&mut root, 12);
    root.extend_from_slice(b"v4.0.30319\0\0");
    push_u16(&mut root, 0);
    push_u16(&mut root, 3);

    // Stream headers: 12 bytes for "#~", 20 for "#Strings", 16 for "#Blob"
    let streams_start = root.len() as u32 + 12 + 20 + 16;
    push_u32(&mut root, streams_start);
    push_u32(&mut root, tables.len() as u32);
    root.extend_from_slice(b"#~\0\0");

    push_u32(&mut root, streams_start + tables.len() as u32);
    push_u32(&mut root, strings.len() as u32);
    root.extend_from_slice(b"#Strings\0\0\0\0");

    push_u32(&mut root, streams_start + (tables.len() + strings.len()) as u32);
    push_u32(&mut root, blobs.len() as u32);
    root.extend_from_slice(b"#Blob\0\0\0");

    root.extend_from_slice(&tables);
    root.extend_from_slice(&strings);
    root.extend_from_slice(&blobs);
    root
}

fn push_blob(blobs: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        length if length < 0x80 => blobs.push(length as u8),
        length if length < 0x4000 => {
            blobs.push(0x80 | (length >> 8) as u8);
            blobs.push((length & 0xFF) as u8);
        }
        length => panic!("blob too large for the test heap - {length}"),
    }
    blobs.extend_from_slice(data);
}

/// Writes a zip archive with the given `(name, bytes)` entries.
pub fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);

    for (name, data) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }

    writer.finish().unwrap();
}
