//! Assembly-level metadata extraction for signing decisions.
//!
//! Reads just enough of an image's ECMA-335 metadata to drive signing policy: the
//! assembly name, flags and hash algorithm, the embedded public key (the strong-name
//! identity), and the `TargetFrameworkAttribute` value used to match explicit per-file
//! certificate overrides.
//!
//! Reading is strictly best-effort at the call sites: a managed image whose metadata
//! cannot be parsed is treated as unmanaged by the classifier, never as a fatal error.

use crate::{
    file::{parser::Parser, File},
    metadata::{
        cor20::Cor20Header,
        identity::{AssemblyHashAlgorithm, Identity},
        root::Root,
        streams::{Blob, Strings},
        tables::{
            CodedIndex, TablesStream, TABLE_ASSEMBLY, TABLE_CUSTOM_ATTRIBUTE, TABLE_MEMBER_REF,
            TABLE_TYPE_REF,
        },
    },
    Result,
};

/// The attribute type whose constructor argument names the target framework moniker.
const TARGET_FRAMEWORK_ATTRIBUTE: &str = "TargetFrameworkAttribute";

/// Identity-relevant fields of the Assembly metadata table.
pub struct AssemblyMetadata {
    /// Simple assembly name from the `#Strings` heap
    pub name: String,
    /// `AssemblyFlags` column
    pub flags: u32,
    /// `HashAlgId` column, see [`AssemblyHashAlgorithm`]
    pub hash_alg: u32,
    /// The embedded public key blob, `None` if the assembly carries no key
    pub public_key: Option<Vec<u8>>,
    /// Value of the `TargetFrameworkAttribute`, e.g. `.NETStandard,Version=v2.0`
    pub target_framework: Option<String>,
}

impl AssemblyMetadata {
    /// Derives the public key token in its conventional lowercase hex form.
    ///
    /// Returns `None` if the assembly has no public key.
    ///
    /// # Errors
    /// Returns an error if the assembly declares an unsupported hash algorithm.
    pub fn public_key_token(&self) -> Result<Option<String>> {
        let Some(public_key) = &self.public_key else {
            return Ok(None);
        };

        let algo = match self.hash_alg {
            AssemblyHashAlgorithm::NONE => AssemblyHashAlgorithm::SHA1,
            other => other,
        };

        let identity = Identity::from(public_key, true)?;
        Ok(Some(identity.to_token_string(algo)?))
    }
}

/// Reads the COR20 runtime header of a managed image, if the image has one.
///
/// Returns `Ok(None)` for native images.
///
/// # Arguments
/// * `file` - The loaded PE file
///
/// # Errors
/// Returns an error if the CLR directory points at unreadable or invalid data.
pub fn read_cor20_header(file: &File) -> Result<Option<Cor20Header>> {
    let Some((clr_rva, clr_size)) = file.clr() else {
        return Ok(None);
    };

    let cor_offset = file.rva_to_offset(clr_rva)?;
    Ok(Some(Cor20Header::read(
        file.data_slice(cor_offset, clr_size.max(72))?,
    )?))
}

/// Reads the Assembly table of a managed image, if the image has one.
///
/// Returns `Ok(None)` for native images and for managed modules without an assembly
/// manifest.
///
/// # Arguments
/// * `file` - The loaded PE file
///
/// # Errors
/// Returns an error if the image declares metadata that turns out to be unreadable.
pub fn read_assembly_metadata(file: &File) -> Result<Option<AssemblyMetadata>> {
    let Some(cor_header) = read_cor20_header(file)? else {
        return Ok(None);
    };

    let meta_offset = file.rva_to_offset(cor_header.meta_data_rva as usize)?;
    let meta_data = file.data_slice(meta_offset, cor_header.meta_data_size as usize)?;
    let root = Root::read(meta_data)?;

    let tables_header = root
        .stream("#~")
        .ok_or_else(|| malformed_error!("Metadata has no #~ stream"))?;
    let tables = TablesStream::parse(stream_data(meta_data, tables_header.offset, tables_header.size)?)?;

    if tables.rows(TABLE_ASSEMBLY) == 0 {
        return Ok(None);
    }

    let strings = match root.stream("#Strings") {
        Some(header) => Some(Strings::from(stream_data(meta_data, header.offset, header.size)?)?),
        None => None,
    };
    let blobs = match root.stream("#Blob") {
        Some(header) => Some(Blob::from(stream_data(meta_data, header.offset, header.size)?)?),
        None => None,
    };

    let mut row = tables.row(TABLE_ASSEMBLY, 1)?;
    let hash_alg = row.read_u32()?;
    row.read_u16()?; // MajorVersion
    row.read_u16()?; // MinorVersion
    row.read_u16()?; // BuildNumber
    row.read_u16()?; // RevisionNumber
    let flags = row.read_u32()?;
    let public_key_index = row.read_blob_index()?;
    let name_index = row.read_str_index()?;

    let name = match &strings {
        Some(strings) => strings.get(name_index)?.to_string(),
        None => String::new(),
    };

    let public_key = match (&blobs, public_key_index) {
        (_, 0) | (None, _) => None,
        (Some(blobs), index) => {
            let blob = blobs.get(index)?;
            if blob.is_empty() {
                None
            } else {
                Some(blob.to_vec())
            }
        }
    };

    let target_framework = match (&strings, &blobs) {
        (Some(strings), Some(blobs)) => read_target_framework(&tables, strings, blobs)?,
        _ => None,
    };

    Ok(Some(AssemblyMetadata {
        name,
        flags,
        hash_alg,
        public_key,
        target_framework,
    }))
}

/// Finds the `TargetFrameworkAttribute` attached to the assembly and decodes its
/// constructor argument.
fn read_target_framework(
    tables: &TablesStream<'_>,
    strings: &Strings<'_>,
    blobs: &Blob<'_>,
) -> Result<Option<String>> {
    for index in 1..=tables.rows(TABLE_CUSTOM_ATTRIBUTE) {
        let mut row = tables.row(TABLE_CUSTOM_ATTRIBUTE, index)?;

        let parent = row.read_coded(CodedIndex::HasCustomAttribute)?;
        if parent.table != TABLE_ASSEMBLY || parent.row != 1 {
            continue;
        }

        let constructor = row.read_coded(CodedIndex::CustomAttributeType)?;
        if constructor.table != TABLE_MEMBER_REF || constructor.row == 0 {
            continue;
        }

        let value_index = row.read_blob_index()?;

        let mut member_ref = tables.row(TABLE_MEMBER_REF, constructor.row)?;
        let class = member_ref.read_coded(CodedIndex::MemberRefParent)?;
        if class.table != TABLE_TYPE_REF || class.row == 0 {
            continue;
        }

        let mut type_ref = tables.row(TABLE_TYPE_REF, class.row)?;
        type_ref.read_coded(CodedIndex::ResolutionScope)?;
        let type_name = strings.get(type_ref.read_str_index()?)?;
        if type_name != TARGET_FRAMEWORK_ATTRIBUTE {
            continue;
        }

        let value = blobs.get(value_index)?;
        return Ok(decode_fixed_string_argument(value)?);
    }

    Ok(None)
}

/// Decodes the single string constructor argument of a custom attribute value blob.
///
/// The blob starts with the `0x0001` prolog (II.23.3), followed by a SerString.
fn decode_fixed_string_argument(value: &[u8]) -> Result<Option<String>> {
    let mut parser = Parser::new(value);

    let prolog = parser.read_le::<u16>()?;
    if prolog != 0x0001 {
        return Err(malformed_error!(
            "Invalid custom attribute prolog - 0x{:04X}",
            prolog
        ));
    }

    parser.read_prefixed_string_utf8()
}

/// Slices a stream out of the metadata root, validated against the root bounds.
fn stream_data(meta_data: &[u8], offset: u32, size: u32) -> Result<&[u8]> {
    let start = offset as usize;
    let Some(end) = start.checked_add(size as usize) else {
        return Err(crate::Error::OutOfBounds);
    };

    if end > meta_data.len() {
        return Err(crate::Error::OutOfBounds);
    }

    Ok(&meta_data[start..end])
}
