//! Metadata root header and stream directory for .NET assemblies.
//!
//! This module defines the [`Root`] struct, which represents the root metadata header and stream
//! directory as specified by ECMA-335, and the [`StreamHeader`] entries it contains. The root is
//! the entry point for locating the `#~`, `#Strings` and `#Blob` streams the signing pipeline
//! reads assembly identity from.
//!
//! # References
//!
//! - [ECMA-335 II.24.2.1: Metadata root](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use crate::{
    file::io::{read_le, read_le_at},
    Error::OutOfBounds,
    Result,
};

/// The MAGIC value indicating the CIL metadata header
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;

/// A single entry of the metadata stream directory.
///
/// Offsets are relative to the start of the metadata root.
#[derive(Debug)]
pub struct StreamHeader {
    /// Offset of the stream, relative to the metadata root
    pub offset: u32,
    /// Size of the stream in bytes
    pub size: u32,
    /// Stream name, e.g. `#~`, `#Strings`, `#Blob`
    pub name: String,
}

impl StreamHeader {
    /// Reads a [`StreamHeader`] from a byte slice.
    ///
    /// # Arguments
    /// * `data` - The byte slice starting at the stream header
    ///
    /// # Errors
    /// Returns an error if the data is too short or the name is not terminated.
    pub fn from(data: &[u8]) -> Result<StreamHeader> {
        if data.len() < 9 {
            return Err(OutOfBounds);
        }

        let offset = read_le::<u32>(data)?;
        let size = read_le::<u32>(&data[4..])?;

        let mut name = String::new();
        for byte in &data[8..] {
            if *byte == 0 {
                return Ok(StreamHeader { offset, size, name });
            }

            if name.len() >= 32 {
                break;
            }

            name.push(char::from(*byte));
        }

        Err(malformed_error!("Stream name is not terminated"))
    }
}

/// The header of the present metadata, providing necessary information for parsing.
///
/// The [`Root`] struct gives access to the version string, stream directory, and all stream headers
/// required to parse .NET assembly metadata. It is the first structure parsed when reading metadata
/// from a PE file.
///
/// ## Reference
/// - [ECMA-335 II.24.2.1: Metadata root](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)
#[derive(Debug)]
pub struct Root {
    /// Magic signature for physical metadata: 0x424A5342
    pub signature: u32,
    /// `MajorVersion`
    pub major_version: u16,
    /// `MinorVersion`
    pub minor_version: u16,
    /// Always 0
    pub reserved: u32,
    /// Number of bytes allocated to hold the version string
    pub length: u32,
    /// 'VersionString\0'
    pub version: String,
    /// Reserved, always 0
    pub flags: u16,
    /// Number of streams
    pub stream_number: u16,
    /// Streams
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Reads a [`Root`] metadata header from a byte slice.
    ///
    /// # Arguments
    /// * `data` - The byte slice from which this object shall be read
    ///
    /// # Errors
    /// Returns an error if the data is too short, the signature is invalid, or the stream
    /// directory is malformed.
    pub fn read(data: &[u8]) -> Result<Root> {
        if data.len() < 36 {
            return Err(OutOfBounds);
        }

        let signature = read_le::<u32>(data)?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - {}",
                signature
            ));
        }

        let version_string_length = read_le_at::<u32>(data, &mut (12))?;
        match u32::checked_add(version_string_length, 16_u32) {
            Some(str_end) => {
                let data_len =
                    u32::try_from(data.len()).map_err(|_| malformed_error!("Data too large"))?;
                if str_end > data_len {
                    return Err(OutOfBounds);
                }
            }
            None => {
                return Err(malformed_error!(
                    "Version string length causing integer overflow - {} + {}",
                    version_string_length,
                    16
                ))
            }
        }

        // The version string is null-padded to its allocated length
        let mut version_string = String::with_capacity(version_string_length as usize);
        for counter in 0..version_string_length {
            let byte = read_le_at::<u8>(data, &mut (16 + counter as usize))?;
            if byte == 0 {
                break;
            }
            version_string.push(char::from(byte));
        }

        let directory_offset = 16 + version_string_length as usize;
        let stream_count = read_le_at::<u16>(data, &mut (directory_offset + 2))?;
        if stream_count == 0 || stream_count > 5 || (stream_count * 9) as usize > data.len() {
            // Must have streams, no more than the 5 defined kinds
            return Err(malformed_error!("Invalid stream count"));
        }

        let mut streams = Vec::with_capacity(stream_count as usize);
        let mut stream_offset = directory_offset + 4;
        for _ in 0..stream_count {
            if stream_offset > data.len() {
                return Err(OutOfBounds);
            }

            let new_stream = StreamHeader::from(&data[stream_offset..])?;
            match u32::checked_add(new_stream.offset, new_stream.size) {
                Some(range) => {
                    if range as usize > data.len() {
                        return Err(OutOfBounds);
                    }
                }
                None => {
                    return Err(malformed_error!(
                        "Stream offset and size cause integer overflow - {} + {}",
                        new_stream.offset,
                        new_stream.size
                    ))
                }
            }

            let name_aligned = ((new_stream.name.len() + 1) + 3) & !3;
            stream_offset += 8 + name_aligned;

            streams.push(new_stream);
        }

        Ok(Root {
            signature,
            major_version: read_le::<u16>(&data[4..])?,
            minor_version: read_le::<u16>(&data[6..])?,
            reserved: read_le::<u32>(&data[8..])?,
            length: version_string_length,
            flags: read_le::<u16>(&data[directory_offset..])?,
            stream_number: u16::try_from(streams.len())
                .map_err(|_| malformed_error!("Too many streams"))?,
            stream_headers: streams,
            version: version_string,
        })
    }

    /// Returns the stream header with the given name, if present.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamHeader> {
        self.stream_headers.iter().find(|header| header.name == name)
    }
}
