//! Content hashing for artifact identity.
//!
//! Every file that enters the signing pipeline is identified by the SHA-256 digest of its
//! bytes. The digest is the deduplication key across the whole run: identical nested
//! binaries discovered in different containers resolve to the same [`ContentHash`] and are
//! therefore signed exactly once.
//!
//! The canonical string form is uppercase hex without separators, which doubles as a
//! filesystem-safe directory name for scratch extraction.
//!
//! # Examples
//!
//! ```rust
//! use signscope::content::ContentHash;
//!
//! let hash = ContentHash::of_bytes(b"hello");
//! assert_eq!(ContentHash::from_hex(&hash.to_hex())?, hash);
//! # Ok::<(), signscope::Error>(())
//! ```

use std::{
    fmt,
    io::Read,
    path::Path,
};

use sha2::{Digest, Sha256};

use crate::Result;

/// A fixed-length content digest identifying file content.
///
/// Two files with identical bytes produce identical hashes. The type is cheap to copy and
/// implements [`Eq`] and [`Hash`](std::hash::Hash) so it can serve as a map key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Computes the content hash of a byte slice.
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> ContentHash {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(hasher.finalize().into())
    }

    /// Computes the content hash of a reader, consuming it from its current position to
    /// the end.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if reading fails.
    pub fn of_reader(mut reader: impl Read) -> Result<ContentHash> {
        let mut hasher = Sha256::new();
        std::io::copy(&mut reader, &mut hasher)?;
        Ok(ContentHash(hasher.finalize().into()))
    }

    /// Computes the content hash of the file at the given path.
    ///
    /// The hash of an empty file is the digest of the empty byte string.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or read.
    pub fn of_file(path: impl AsRef<Path>) -> Result<ContentHash> {
        Self::of_reader(std::fs::File::open(path)?)
    }

    /// Returns the digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Renders the canonical string form: uppercase hex, no separators.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Parses the canonical string form produced by [`ContentHash::to_hex`].
    ///
    /// Lowercase digits are accepted as well.
    ///
    /// # Errors
    /// Returns a malformed error if the string is not exactly 64 hex digits.
    pub fn from_hex(value: &str) -> Result<ContentHash> {
        let bytes = hex::decode(value)
            .map_err(|_| malformed_error!("Invalid content hash string - {}", value))?;

        match <[u8; 32]>::try_from(bytes) {
            Ok(digest) => Ok(ContentHash(digest)),
            Err(_) => Err(malformed_error!(
                "Content hash must be 32 bytes - got {} characters",
                value.len()
            )),
        }
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        let a = ContentHash::of_bytes(b"payload");
        let b = ContentHash::of_bytes(b"payload");
        let c = ContentHash::of_bytes(b"other");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hex_round_trip() {
        let hash = ContentHash::of_bytes(&[0x00, 0xFF, 0x10, 0x20]);
        let text = hash.to_hex();

        assert_eq!(text.len(), 64);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(text, text.to_uppercase());
        assert_eq!(ContentHash::from_hex(&text).unwrap(), hash);
        assert_eq!(ContentHash::from_hex(&text.to_lowercase()).unwrap(), hash);
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(ContentHash::from_hex("xyz").is_err());
        assert!(ContentHash::from_hex("ABCD").is_err());
    }

    #[test]
    fn empty_input_is_defined() {
        // SHA-256 of the empty byte string
        assert_eq!(
            ContentHash::of_bytes(&[]).to_hex(),
            "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
        );
    }

    #[test]
    fn reader_matches_bytes() {
        let data = vec![0x42_u8; 4096];
        let from_reader = ContentHash::of_reader(&data[..]).unwrap();
        assert_eq!(from_reader, ContentHash::of_bytes(&data));
    }

    #[test]
    fn file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"on disk").unwrap();

        assert_eq!(
            ContentHash::of_file(&path).unwrap(),
            ContentHash::of_bytes(b"on disk")
        );
    }
}
