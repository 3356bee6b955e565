//! PE image layout for in-place signing surgery.
//!
//! [`PeLayout`] captures the byte offsets the strong name signer mutates or must exclude
//! from hashing: the checksum field, the authenticode directory entry, the COR20 flags
//! field and the strong name signature directory. Offsets are derived once from the PE
//! headers so the actual surgery can operate on a plain byte buffer.
//!
//! The header region size follows the fixed optional header sizes of the PE
//! specification (224 bytes for PE32, 240 for PE32+) plus 40 bytes per section header.

use goblin::pe::PE;

use crate::{
    file::rva_to_offset,
    metadata::{cor20::COR_FLAGS_OFFSET, Cor20Header},
    Result,
};

/// Offset of the checksum field within the optional header.
pub const CHECKSUM_OFFSET_IN_PE_HEADER: usize = 0x40;

/// Size of the checksum field in bytes.
pub const CHECKSUM_SIZE: usize = 4;

/// Size of the authenticode (certificate table) directory entry in bytes.
pub const AUTHENTICODE_DIRECTORY_SIZE: usize = 8;

const PE_HEADER_SIZE_32BIT: usize = 224;
const PE_HEADER_SIZE_64BIT: usize = 240;
const PE_SECTION_HEADER_SIZE: usize = 40;

/// Raw data range of one section.
#[derive(Clone, Copy, Debug)]
pub struct SectionRange {
    /// File offset of the section's raw data
    pub raw_offset: usize,
    /// Size of the section's raw data in bytes
    pub raw_size: usize,
}

/// Byte offsets of the regions the strong name signer reads, excludes or rewrites.
pub struct PeLayout {
    /// File offset of the optional header
    pub opt_header_offset: usize,
    /// `true` for PE32+ images
    pub is_pe32_plus: bool,
    /// File offset of the checksum field
    pub checksum_offset: usize,
    /// File offset of the certificate table directory entry
    pub authenticode_dir_offset: usize,
    /// Size of the region hashed as "headers": DOS stub through the section table
    pub headers_size: usize,
    /// Raw data ranges of all sections, in header order
    pub sections: Vec<SectionRange>,
    /// The checksum currently stored in the image
    pub stored_checksum: u32,
    /// File offset of the COR20 header, for managed images
    pub cor_header_offset: Option<usize>,
    /// COR20 runtime flags, for managed images
    pub cor_flags: Option<u32>,
    /// File offset and size of the strong name signature directory
    pub strong_name_dir: Option<(usize, usize)>,
}

impl PeLayout {
    /// Derives the layout from a PE image buffer.
    ///
    /// # Arguments
    /// * `data` - The complete image bytes
    ///
    /// # Errors
    /// Returns an error if the buffer is not a well-formed PE image, or if header
    /// offsets point outside the buffer.
    pub fn parse(data: &[u8]) -> Result<PeLayout> {
        let pe = PE::parse(data)?;

        let Some(optional_header) = pe.header.optional_header else {
            return Err(malformed_error!("File does not have an OptionalHeader"));
        };

        let pe_sig_offset = pe.header.dos_header.pe_pointer as usize;
        let opt_header_offset = pe_sig_offset + 4 + 20;

        // PE32 magic is 0x10b, PE32+ magic is 0x20b
        let is_pe32_plus = optional_header.standard_fields.magic != 0x10b;
        let opt_header_size = if is_pe32_plus {
            PE_HEADER_SIZE_64BIT
        } else {
            PE_HEADER_SIZE_32BIT
        };

        let headers_size =
            opt_header_offset + opt_header_size + PE_SECTION_HEADER_SIZE * pe.sections.len();
        if headers_size > data.len() {
            return Err(malformed_error!(
                "Header region extends past the image - {} > {}",
                headers_size,
                data.len()
            ));
        }

        let checksum_offset = opt_header_offset + CHECKSUM_OFFSET_IN_PE_HEADER;

        // Subsystem, DllCharacteristics, the four stack/heap sizes, LoaderFlags,
        // NumberOfRvaAndSizes and the four directory entries before the certificate table
        let authenticode_dir_offset = checksum_offset
            + CHECKSUM_SIZE
            + 2
            + 2
            + 4 * if is_pe32_plus { 8 } else { 4 }
            + 4
            + 4
            + 4 * 8;
        if authenticode_dir_offset + AUTHENTICODE_DIRECTORY_SIZE > data.len() {
            return Err(malformed_error!(
                "Certificate table directory entry extends past the image"
            ));
        }

        let sections = pe
            .sections
            .iter()
            .map(|section| SectionRange {
                raw_offset: section.pointer_to_raw_data as usize,
                raw_size: section.size_of_raw_data as usize,
            })
            .collect();

        let stored_checksum = optional_header.windows_fields.check_sum;

        let mut cor_header_offset = None;
        let mut cor_flags = None;
        let mut strong_name_dir = None;

        let clr_dir = optional_header
            .data_directories
            .get_clr_runtime_header()
            .filter(|dir| dir.virtual_address != 0 && dir.size != 0);
        if let Some(clr_dir) = clr_dir {
            let cor_offset = rva_to_offset(&pe.sections, clr_dir.virtual_address as usize)?;
            if cor_offset + 72 > data.len() {
                return Err(malformed_error!("COR20 header extends past the image"));
            }

            let cor_header = Cor20Header::read(&data[cor_offset..])?;
            cor_header_offset = Some(cor_offset);
            cor_flags = Some(cor_header.flags);

            if let Some((sn_rva, sn_size)) = cor_header.strong_name_directory() {
                let sn_offset = rva_to_offset(&pe.sections, sn_rva as usize)?;
                if sn_offset + sn_size as usize > data.len() {
                    return Err(malformed_error!(
                        "Strong name directory extends past the image"
                    ));
                }

                strong_name_dir = Some((sn_offset, sn_size as usize));
            }
        }

        Ok(PeLayout {
            opt_header_offset,
            is_pe32_plus,
            checksum_offset,
            authenticode_dir_offset,
            headers_size,
            sections,
            stored_checksum,
            cor_header_offset,
            cor_flags,
            strong_name_dir,
        })
    }

    /// File offset of the COR20 flags field, for managed images.
    #[must_use]
    pub fn cor_flags_offset(&self) -> Option<usize> {
        self.cor_header_offset
            .map(|offset| offset + COR_FLAGS_OFFSET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::build_native_pe;

    #[test]
    fn native_layout() {
        let image = build_native_pe();
        let layout = PeLayout::parse(&image).unwrap();

        // DOS stub ends at 0x80 in the crafted image
        assert_eq!(layout.opt_header_offset, 0x80 + 4 + 20);
        assert!(!layout.is_pe32_plus);
        assert_eq!(
            layout.checksum_offset,
            layout.opt_header_offset + CHECKSUM_OFFSET_IN_PE_HEADER
        );
        // PE32: certificate table entry sits 128 bytes into the optional header
        assert_eq!(
            layout.authenticode_dir_offset,
            layout.opt_header_offset + 128
        );
        assert_eq!(
            layout.headers_size,
            layout.opt_header_offset + 224 + 40
        );
        assert_eq!(layout.sections.len(), 1);
        assert_eq!(layout.sections[0].raw_offset, 0x200);
        assert!(layout.cor_header_offset.is_none());
        assert!(layout.strong_name_dir.is_none());
    }

    #[test]
    fn rejects_non_pe() {
        assert!(PeLayout::parse(&[0x42; 256]).is_err());
    }
}
