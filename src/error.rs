use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all possible error conditions that can occur during artifact classification,
/// container expansion, batch orchestration, strong-name surgery and post-signing verification.
/// Each variant provides specific context about the failure mode to enable appropriate error
/// handling.
///
/// # Error Categories
///
/// ## File Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond file boundaries
/// - [`Error::NotSupported`] - Unsupported file format or feature
/// - [`Error::Empty`] - Empty input provided
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - PE parsing errors from the goblin crate
/// - [`Error::ZipError`] - Container parsing errors from the zip crate
/// - [`Error::RsaError`] - RSA key import / sign / verify failures
///
/// ## Planning Errors
/// - [`Error::PlanErrors`] - One or more files could not be brought into the plan
///   (unreadable inputs, duplicate paths, unopenable containers)
/// - [`Error::CertificateErrors`] - Pre-flight certificate consistency violations
///
/// ## Orchestration Errors
/// - [`Error::NoProgress`] - The signing graph has ready work but cannot proceed
/// - [`Error::SigningFailed`] - The external signing mechanism reported failure
/// - [`Error::VerificationErrors`] - Post-signing validation found unsigned artifacts
///
/// ## Strong-Name Errors
/// - [`Error::StrongNameDirectoryMissing`] - Binary was not built delay-signed
/// - [`Error::PublicKeyMismatch`] - Assembly key does not match the signing key
/// - [`Error::EcmaKeyUnsupported`] - Signing with the neutral ECMA key is not possible
/// - [`Error::InvalidKeyBlob`] - Key material could not be parsed
#[derive(Error, Debug)]
pub enum Error {
    /// The file is damaged and could not be parsed.
    ///
    /// This error indicates that the file structure is corrupted or doesn't conform to the
    /// expected format. The error includes the source location where the malformation was
    /// detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    ///
    /// This error occurs when trying to read data beyond the end of the file or stream. It's a
    /// safety check to prevent buffer overruns during parsing.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type is not supported.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur during file operations such as reading from
    /// disk, permission issues, or filesystem errors.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// Error from the zip crate while reading or rewriting a container.
    #[error("{0}")]
    ZipError(#[from] zip::result::ZipError),

    /// Error from the rsa crate while importing keys, signing or verifying.
    #[error("{0}")]
    RsaError(#[from] rsa::Error),

    /// One or more files could not be brought into the signing plan.
    ///
    /// All per-file problems encountered while classifying, hashing and expanding the inputs
    /// are collected here, so that a single run reports as many actionable problems as
    /// possible.
    #[error("Signing plan could not be built - {} error(s):\n{}", .0.len(), .0.join("\n"))]
    PlanErrors(Vec<String>),

    /// Pre-flight certificate consistency violations.
    ///
    /// Raised before any signing begins when files were assigned certificates inconsistent
    /// with their kind, e.g. an assembly carrying a VSIX certificate. All violations are
    /// collected and reported together.
    #[error("Certificate consistency check failed - {} violation(s):\n{}", .0.len(), .0.join("\n"))]
    CertificateErrors(Vec<String>),

    /// The orchestrator could not extract a ready batch although work remains.
    ///
    /// A round with an empty batch while files remain unsigned indicates a cyclic dependency
    /// or a bug in plan construction. This state is fatal and no partial output is trusted.
    ///
    /// The associated value is the number of files still waiting.
    #[error("No progress made on signing with {0} file(s) remaining, which indicates a bug")]
    NoProgress(usize),

    /// The external signing mechanism reported failure for a round.
    ///
    /// All remaining rounds are abandoned. Files signed in prior rounds remain signed on
    /// disk; no rollback is attempted.
    #[error("Signing mechanism failed in round {0}")]
    SigningFailed(u32),

    /// Post-signing verification found artifacts without a valid signature.
    ///
    /// Collected across all files of the run so a single pass yields the complete set of
    /// failures.
    #[error("Signature verification failed - {} error(s):\n{}", .0.len(), .0.join("\n"))]
    VerificationErrors(Vec<String>),

    /// The strong name signature directory is not present in the binary.
    ///
    /// The binary was not built delay-signed or public-signed, so there is no reserved
    /// region to place a strong name signature into.
    #[error("Strong name directory is not present. Binary is not signed or delay-signed.")]
    StrongNameDirectoryMissing,

    /// The public key embedded in the assembly does not match the signing key.
    #[error("Public key of the assembly does not match the public key of the provided key")]
    PublicKeyMismatch,

    /// The assembly is signed with the neutral ECMA key, which cannot be used for signing.
    #[error("Cannot sign with the ECMA key")]
    EcmaKeyUnsupported,

    /// Key material could not be parsed as a public/private key blob.
    #[error("Invalid key blob - {0}")]
    InvalidKeyBlob(String),
}
