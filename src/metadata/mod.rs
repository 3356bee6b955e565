//! Minimal ECMA-335 metadata access.
//!
//! The signing pipeline needs only a narrow slice of the metadata surface: the COR20
//! header (strong name directory, runtime flags), the metadata root with its stream
//! directory, and the Assembly / CustomAttribute tables that carry the public key and
//! the target framework moniker. This module provides exactly that slice, built on the
//! bounds-checked primitives from [`crate::file`].
//!
//! # Key Components
//!
//! - [`cor20::Cor20Header`] - The CLR runtime header, including the strong name directory
//! - [`root::Root`] - Metadata root and stream directory
//! - [`streams`] - `#Strings` and `#Blob` heap access
//! - [`tables::TablesStream`] - `#~` table stream with computed row layouts
//! - [`assembly::AssemblyMetadata`] - Assembly name, public key and target framework
//! - [`identity::Identity`] - Public-key-token derivation
//!
//! # References
//!
//! - [ECMA-335 6th Edition, Partition II](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

pub mod assembly;
pub mod cor20;
pub mod identity;
pub mod root;
pub mod streams;
pub mod tables;

pub use assembly::{read_assembly_metadata, read_cor20_header, AssemblyMetadata};
pub use cor20::{Cor20Header, CorFlags, COR_FLAGS_OFFSET};
pub use identity::{AssemblyHashAlgorithm, Identity};
pub use root::Root;
