//! Signing policy tables and per-file signing decisions.
//!
//! Policy answers one question for every file: which certificate (and optionally which
//! strong name key) does it get, or is it exempt? The answer is resolved from three
//! layers, most specific first:
//!
//! 1. Explicit per-file overrides, matched by `(file name, public key token, target
//!    framework)` with decreasing specificity
//! 2. Public-key-token defaults
//! 3. The generic default certificate (containers use fixed per-kind certificates
//!    instead)
//!
//! An override value equal to [`DO_NOT_SIGN`] means the file is intentionally exempt
//! (`ShouldIgnore`), not that the override is ignored.
//!
//! The format and parsing of these tables is out of scope here; callers assemble a
//! [`SigningPolicy`] programmatically from whatever configuration source they use.

use std::collections::{HashMap, HashSet};

/// Reserved certificate value meaning "do not sign this file".
pub const DO_NOT_SIGN: &str = "None";

/// Default certificate name for NuGet packages.
pub const DEFAULT_NUPKG_CERTIFICATE: &str = "NuGet";

/// Default certificate name for VSIX packages.
pub const DEFAULT_VSIX_CERTIFICATE: &str = "VsixSHA2";

/// The signing treatment assigned to a single file.
///
/// Modeled as a tagged enum so the readiness and should-sign logic of the orchestrator
/// can match exhaustively instead of probing sentinel instances.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignInfo {
    /// The file is intentionally exempt from signing
    Ignore,
    /// The file already carries a signature and is excluded from the active signing set,
    /// but still checked during verification
    AlreadySigned,
    /// The file needs a signature
    Pending {
        /// Certificate name the signing mechanism should apply
        certificate: String,
        /// Strong name key reference, for managed assemblies that also get strong-named
        strong_name_key: Option<String>,
    },
}

impl SignInfo {
    /// Returns `true` if the file still needs to be signed.
    #[must_use]
    pub fn should_sign(&self) -> bool {
        matches!(self, SignInfo::Pending { .. })
    }

    /// Returns the assigned certificate name, if any.
    #[must_use]
    pub fn certificate(&self) -> Option<&str> {
        match self {
            SignInfo::Pending { certificate, .. } => Some(certificate),
            _ => None,
        }
    }

    /// Returns the assigned strong name key reference, if any.
    #[must_use]
    pub fn strong_name_key(&self) -> Option<&str> {
        match self {
            SignInfo::Pending {
                strong_name_key, ..
            } => strong_name_key.as_deref(),
            _ => None,
        }
    }
}

/// Default signing information attached to a public key token.
#[derive(Clone, Debug)]
pub struct TokenSignInfo {
    /// Certificate name for files carrying this token
    pub certificate: String,
    /// Strong name key reference, if assemblies with this token are also strong-named
    pub strong_name_key: Option<String>,
}

/// Key of an explicit per-file override.
///
/// `public_key_token` and `target_framework` narrow the match; `None` fields make the
/// key less specific.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OverrideKey {
    /// File name (without directory), compared case-insensitively
    pub file_name: String,
    /// Public key token in lowercase hex, if the override is token-specific
    pub public_key_token: Option<String>,
    /// Target framework moniker, if the override is framework-specific
    pub target_framework: Option<String>,
}

impl OverrideKey {
    /// Creates an override key, normalizing the name and token casing.
    #[must_use]
    pub fn new(
        file_name: &str,
        public_key_token: Option<&str>,
        target_framework: Option<&str>,
    ) -> OverrideKey {
        OverrideKey {
            file_name: file_name.to_lowercase(),
            public_key_token: public_key_token.map(str::to_lowercase),
            target_framework: target_framework.map(str::to_string),
        }
    }
}

/// The aggregate signing policy for one run.
#[derive(Clone, Debug)]
pub struct SigningPolicy {
    /// Certificate applied to files with no more specific assignment
    pub default_certificate: String,
    /// Certificate applied to NuGet packages
    pub nupkg_certificate: String,
    /// Certificate applied to VSIX packages
    pub vsix_certificate: String,
    token_defaults: HashMap<String, TokenSignInfo>,
    overrides: HashMap<OverrideKey, String>,
    excluded_names: HashSet<String>,
}

impl SigningPolicy {
    /// Creates a policy with the given generic default certificate and the standard
    /// container certificates.
    pub fn new(default_certificate: impl Into<String>) -> SigningPolicy {
        SigningPolicy {
            default_certificate: default_certificate.into(),
            nupkg_certificate: DEFAULT_NUPKG_CERTIFICATE.to_string(),
            vsix_certificate: DEFAULT_VSIX_CERTIFICATE.to_string(),
            token_defaults: HashMap::new(),
            overrides: HashMap::new(),
            excluded_names: HashSet::new(),
        }
    }

    /// Registers default signing information for a public key token.
    #[must_use]
    pub fn with_token_default(
        mut self,
        public_key_token: &str,
        certificate: &str,
        strong_name_key: Option<&str>,
    ) -> SigningPolicy {
        self.token_defaults.insert(
            public_key_token.to_lowercase(),
            TokenSignInfo {
                certificate: certificate.to_string(),
                strong_name_key: strong_name_key.map(str::to_string),
            },
        );
        self
    }

    /// Registers an explicit per-file override.
    ///
    /// Passing [`DO_NOT_SIGN`] as the certificate exempts the matched files.
    #[must_use]
    pub fn with_override(mut self, key: OverrideKey, certificate: &str) -> SigningPolicy {
        self.overrides.insert(key, certificate.to_string());
        self
    }

    /// Registers a file name that is owned externally and never signed or extracted.
    #[must_use]
    pub fn with_excluded_name(mut self, file_name: &str) -> SigningPolicy {
        self.excluded_names.insert(file_name.to_lowercase());
        self
    }

    /// Returns `true` if the given file name is on the external exclusion list.
    #[must_use]
    pub fn is_excluded(&self, file_name: &str) -> bool {
        self.excluded_names.contains(&file_name.to_lowercase())
    }

    /// Returns the default signing information for a public key token, if registered.
    #[must_use]
    pub fn token_default(&self, public_key_token: &str) -> Option<&TokenSignInfo> {
        self.token_defaults.get(&public_key_token.to_lowercase())
    }

    /// Resolves an explicit override with decreasing specificity: exact match on all
    /// three fields first, then `(name, token)`, then name alone.
    #[must_use]
    pub fn resolve_override(
        &self,
        file_name: &str,
        public_key_token: Option<&str>,
        target_framework: Option<&str>,
    ) -> Option<&str> {
        if public_key_token.is_some() && target_framework.is_some() {
            let key = OverrideKey::new(file_name, public_key_token, target_framework);
            if let Some(certificate) = self.overrides.get(&key) {
                return Some(certificate.as_str());
            }
        }

        if public_key_token.is_some() {
            let key = OverrideKey::new(file_name, public_key_token, None);
            if let Some(certificate) = self.overrides.get(&key) {
                return Some(certificate.as_str());
            }
        }

        self.overrides
            .get(&OverrideKey::new(file_name, None, None))
            .map(String::as_str)
    }

    /// Returns `true` if the given certificate name denotes a VSIX certificate.
    #[must_use]
    pub fn is_vsix_certificate(certificate: &str) -> bool {
        certificate.to_lowercase().starts_with("vsix")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_sign_derivation() {
        assert!(!SignInfo::Ignore.should_sign());
        assert!(!SignInfo::AlreadySigned.should_sign());
        assert!(SignInfo::Pending {
            certificate: "CertX".to_string(),
            strong_name_key: None
        }
        .should_sign());
    }

    #[test]
    fn override_specificity() {
        let policy = SigningPolicy::new("Generic")
            .with_override(OverrideKey::new("a.dll", None, None), "ByName")
            .with_override(OverrideKey::new("a.dll", Some("1234"), None), "ByToken")
            .with_override(
                OverrideKey::new("a.dll", Some("1234"), Some("net472")),
                "ByFramework",
            );

        assert_eq!(
            policy.resolve_override("a.dll", Some("1234"), Some("net472")),
            Some("ByFramework")
        );
        assert_eq!(
            policy.resolve_override("a.dll", Some("1234"), Some("net60")),
            Some("ByToken")
        );
        assert_eq!(
            policy.resolve_override("a.dll", Some("ffff"), None),
            Some("ByName")
        );
        assert_eq!(policy.resolve_override("a.dll", None, None), Some("ByName"));
        assert_eq!(policy.resolve_override("b.dll", None, None), None);
    }

    #[test]
    fn override_matching_is_case_insensitive() {
        let policy = SigningPolicy::new("Generic")
            .with_override(OverrideKey::new("A.DLL", Some("ABCD"), None), "CertX");

        assert_eq!(
            policy.resolve_override("a.dll", Some("abcd"), None),
            Some("CertX")
        );
    }

    #[test]
    fn do_not_sign_is_a_value_not_an_absence() {
        let policy = SigningPolicy::new("Generic")
            .with_override(OverrideKey::new("c.dll", None, None), DO_NOT_SIGN);

        assert_eq!(policy.resolve_override("c.dll", None, None), Some(DO_NOT_SIGN));
    }

    #[test]
    fn token_defaults() {
        let policy = SigningPolicy::new("Generic").with_token_default(
            "1234567890ABCDEF",
            "CertX",
            Some("KeyX.snk"),
        );

        let info = policy.token_default("1234567890abcdef").unwrap();
        assert_eq!(info.certificate, "CertX");
        assert_eq!(info.strong_name_key.as_deref(), Some("KeyX.snk"));
        assert!(policy.token_default("0000000000000000").is_none());
    }

    #[test]
    fn excluded_names() {
        let policy = SigningPolicy::new("Generic").with_excluded_name("External.dll");

        assert!(policy.is_excluded("external.DLL"));
        assert!(!policy.is_excluded("internal.dll"));
    }

    #[test]
    fn vsix_certificate_detection() {
        assert!(SigningPolicy::is_vsix_certificate("VsixSHA2"));
        assert!(SigningPolicy::is_vsix_certificate("vsix3"));
        assert!(!SigningPolicy::is_vsix_certificate("Microsoft400"));
    }
}
