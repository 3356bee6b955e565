// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # signscope
//!
//! A cross-platform framework for orchestrating batch code-signing of .NET build artifacts.
//! Built in pure Rust, `signscope` classifies build outputs (managed executables, zip-based
//! package containers), recursively unpacks nested containers to discover inner files that
//! need a signature, drives an external signing mechanism in dependency-respecting rounds,
//! and validates afterwards that every artifact actually carries the signature it was
//! promised.
//!
//! It also ships a byte-exact strong-name signing primitive: a PE-format-aware hash that
//! excludes the mutable regions of the image, RSA signing of that hash, in-place signature
//! placement and PE checksum recomputation, all without requiring Windows or the .NET
//! runtime.
//!
//! ## Features
//!
//! - **Round-based orchestration** - Inner content is signed before outer containers are
//!   repacked and signed, with batching to minimize invocations of the signing mechanism
//! - **Content-addressed deduplication** - Identical nested binaries appearing in multiple
//!   containers are signed exactly once and reused everywhere
//! - **Strong-name surgery** - ECMA-335 compatible signing hash, PKCS#1 v1.5 RSA signature
//!   and PE checksum, all computed and written in place
//! - **Policy driven** - Per-file overrides, public-key-token defaults and container-kind
//!   defaults decide which certificate (if any) each file receives
//! - **Post-signing verification** - Every signed artifact and every nested part is checked
//!   again; failures are collected and reported together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use signscope::prelude::*;
//! use std::path::PathBuf;
//!
//! struct NoopSigner;
//!
//! impl Signer for NoopSigner {
//!     fn sign(&mut self, _round: u32, _files: &[std::sync::Arc<SignableFile>]) -> signscope::Result<bool> {
//!         Ok(true)
//!     }
//! }
//!
//! let policy = SigningPolicy::new("Microsoft400");
//! let inputs = vec![PathBuf::from("artifacts/MyLibrary.dll")];
//!
//! let mut signer = NoopSigner;
//! let metrics = sign_artifacts(
//!     &inputs,
//!     &policy,
//!     PathBuf::from("artifacts/unpack"),
//!     &mut signer,
//!     SignatureCheck::AuthenticodePresence,
//! )?;
//! println!("Signed {} file(s) in {} round(s)", metrics.files_signed, metrics.rounds);
//! # Ok::<(), signscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `signscope` is organized into several key modules, in dependency order:
//!
//! - [`content`] - Content hashing, the identity key for deduplication across the pipeline
//! - [`policy`] - Signing policy tables and the per-file signing decision
//! - [`classify`] - File category detection (managed PE, container, opaque) and default
//!   signing assignment
//! - [`container`] - Container expansion into nested signing obligations, and repacking
//! - [`plan`] - Aggregation of classification and container trees into a [`plan::SigningPlan`]
//! - [`batch`] - The round-based scheduler driving the external [`batch::Signer`]
//! - [`strongname`] - Low-level strong-name signing and verification
//! - [`verify`] - Post-signing validation of every signed artifact
//! - [`metadata`] - Minimal ECMA-335 metadata access (assembly identity, COR20 header)
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result) with comprehensive error information.
//! Conditions that can affect many files at once (plan construction, certificate
//! consistency, verification) collect every per-file problem before failing, so a single
//! run reports as many actionable problems as possible.

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

pub mod prelude;

pub mod batch;
pub mod classify;
pub mod container;
pub mod content;
pub mod metadata;
pub mod plan;
pub mod policy;
pub mod strongname;
pub mod verify;

pub use crate::batch::sign_artifacts;
pub use crate::error::Error;
pub use crate::file::{parser::Parser, File};

/// Represents the outcome of an operation which returns a value, but could also fail
pub type Result<T> = std::result::Result<T, Error>;
