//! Convenient re-exports of the most commonly used types and traits.
//!
//! This module provides a curated selection of the most frequently used types from
//! across the signscope library, allowing for convenient glob imports.
//!
//! # Example
//!
//! ```rust,no_run
//! use signscope::prelude::*;
//! use std::path::PathBuf;
//!
//! let policy = SigningPolicy::new("Microsoft400");
//! let mut metrics = SigningMetrics::default();
//! let plan = build_plan(
//!     &[PathBuf::from("artifacts/MyLibrary.dll")],
//!     &policy,
//!     &PathBuf::from("artifacts/unpack"),
//!     &mut metrics,
//! )?;
//! println!("{} file(s) to sign", plan.to_sign.len());
//! # Ok::<(), signscope::Error>(())
//! ```

pub use crate::{
    batch::{sign_artifacts, sign_plan, Signer, SigningMetrics},
    classify::{classify, ContainerKind, FileCategory},
    container::{repack_container, ContainerManifest, ContentArena, NestedPart},
    content::ContentHash,
    plan::{build_plan, SignableFile, SigningPlan},
    policy::{OverrideKey, SignInfo, SigningPolicy, TokenSignInfo, DO_NOT_SIGN},
    strongname::{
        calculate_checksum, clear_strong_name_flag, is_signed, is_signed_file, sign_buffer,
        sign_file, PeLayout, StrongNameKeyPair,
    },
    verify::{verify_plan, SignatureCheck},
    Error, File, Parser, Result,
};
