//! PE file abstraction for artifact inspection.
//!
//! This module provides read-side access to Portable Executable files. It abstracts over
//! different data sources (disk files, memory buffers) and exposes the PE structures the
//! signing pipeline cares about: the CLR runtime header location, the authenticode
//! certificate table, section tables and address translation.
//!
//! # Key Components
//!
//! - [`crate::file::File`] - Main PE file abstraction
//! - [`crate::file::Backend`] - Trait for different data sources
//! - [`crate::file::physical::Physical`] - Memory-mapped file backend for disk access
//! - [`crate::file::memory::Memory`] - In-memory buffer backend
//! - [`crate::file::parser::Parser`] - Cursor-based parser for metadata structures
//! - [`crate::file::io`] - Low-level I/O utilities for reading PE structures
//!
//! Unlike a general-purpose analysis framework, loading succeeds for any well-formed PE
//! file - native images without a CLR runtime header are valid classification targets
//! here. Use [`File::clr`] to find out whether an image is managed.
//!
//! # Examples
//!
//! ```rust,no_run
//! use signscope::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("artifacts/MyLibrary.dll"))?;
//! match file.clr() {
//!     Some((rva, size)) => println!("CLR header at RVA 0x{:x}, size {}", rva, size),
//!     None => println!("Native image"),
//! }
//! # Ok::<(), signscope::Error>(())
//! ```

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use crate::{
    Error::{Empty, GoblinErr, OutOfBounds},
    Result,
};
use goblin::pe::{header::Header, section_table::SectionTable, PE};
use memory::Memory;
use ouroboros::self_referencing;
use physical::Physical;

/// Backend trait for file data sources.
///
/// This trait abstracts over the source of PE data, allowing for both in-memory and
/// on-disk representations. All implementations must be thread-safe.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Arguments
    ///
    /// * `offset` - The starting offset within the data.
    /// * `len` - The length of the slice in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

#[self_referencing]
/// Represents a loaded PE file.
///
/// This struct wraps the parsed PE and provides methods for accessing headers, sections,
/// data directories, and for converting between address spaces. It supports loading from
/// both files and memory buffers.
///
/// # Examples
///
/// ```rust,no_run
/// use signscope::File;
/// use std::path::Path;
///
/// let file = File::from_file(Path::new("artifacts/MyLibrary.dll"))?;
/// println!("Loaded PE with {} sections", file.sections().count());
/// # Ok::<(), signscope::Error>(())
/// ```
pub struct File {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
    /// The parsed PE structure, referencing the data.
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File").finish_non_exhaustive()
    }
}

impl File {
    /// Loads a PE file from the given path.
    ///
    /// The file is memory-mapped for efficient access.
    ///
    /// # Arguments
    ///
    /// * `file` - Path to the PE file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is empty, or is not a valid PE
    /// format.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Loads a PE file from a memory buffer.
    ///
    /// # Arguments
    ///
    /// * `data` - The bytes of the PE file.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is empty or not a valid PE format.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(input)
    }

    /// Internal loader for any backend.
    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let data = Box::new(data);

        File::try_new(data, |data| {
            let data = data.as_ref();
            match PE::parse(data.data()) {
                Ok(pe) => {
                    if pe.header.optional_header.is_none() {
                        return Err(malformed_error!("File does not have an OptionalHeader"));
                    }

                    Ok(pe)
                }
                Err(error) => Err(GoblinErr(error)),
            }
        })
    }

    /// Returns the total size of the loaded file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns `true` if the file has a length of zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a reference to the PE header.
    #[must_use]
    pub fn header(&self) -> &Header {
        self.with_pe(|pe| &pe.header)
    }

    /// Returns the RVA and size (in bytes) of the CLR runtime header, if present.
    ///
    /// Native images have no CLR runtime header directory; those return `None`.
    #[must_use]
    pub fn clr(&self) -> Option<(usize, usize)> {
        self.with_pe(|pe| {
            let optional_header = pe.header.optional_header?;
            let clr_dir = optional_header.data_directories.get_clr_runtime_header()?;
            if clr_dir.virtual_address == 0 || clr_dir.size == 0 {
                return None;
            }

            Some((clr_dir.virtual_address as usize, clr_dir.size as usize))
        })
    }

    /// Returns the RVA and size of the authenticode certificate table, if present.
    ///
    /// A non-empty certificate table means the image carries an authenticode signature.
    #[must_use]
    pub fn certificate_table(&self) -> Option<(u32, u32)> {
        self.with_pe(|pe| {
            let optional_header = pe.header.optional_header?;
            let cert_dir = optional_header.data_directories.get_certificate_table()?;
            if cert_dir.virtual_address == 0 || cert_dir.size == 0 {
                return None;
            }

            Some((cert_dir.virtual_address, cert_dir.size))
        })
    }

    /// Returns `true` if the image carries an authenticode signature.
    #[must_use]
    pub fn is_authenticode_signed(&self) -> bool {
        self.certificate_table().is_some()
    }

    /// Returns an iterator over the section headers of the PE file.
    pub fn sections(&self) -> impl Iterator<Item = &SectionTable> {
        self.with_pe(|pe| pe.sections.iter())
    }

    /// Returns the raw data of the loaded file.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// Returns a slice of the file data at the given offset and length.
    ///
    /// # Arguments
    ///
    /// * `offset` - The offset to start the slice from.
    /// * `len` - The length of the slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }

    /// Converts a relative virtual address (RVA) to a file offset.
    ///
    /// # Arguments
    ///
    /// * `rva` - The RVA to convert.
    ///
    /// # Errors
    ///
    /// Returns an error if the RVA cannot be mapped to a file offset.
    pub fn rva_to_offset(&self, rva: usize) -> Result<usize> {
        self.with_pe(|pe| rva_to_offset(&pe.sections, rva))
    }
}

/// Converts an RVA to a file offset using the given section table.
///
/// # Errors
///
/// Returns an error if a section is malformed or the RVA lies outside every section.
pub(crate) fn rva_to_offset(sections: &[SectionTable], rva: usize) -> Result<usize> {
    let rva_u32 = u32::try_from(rva).map_err(|_| OutOfBounds)?;

    for section in sections {
        let Some(section_max) = section.virtual_address.checked_add(section.virtual_size) else {
            return Err(malformed_error!(
                "Section malformed, causing integer overflow - {} + {}",
                section.virtual_address,
                section.virtual_size
            ));
        };

        if section.virtual_address <= rva_u32 && rva_u32 < section_max {
            return Ok((rva - section.virtual_address as usize)
                + section.pointer_to_raw_data as usize);
        }
    }

    Err(malformed_error!(
        "RVA could not be converted to offset - {}",
        rva
    ))
}
