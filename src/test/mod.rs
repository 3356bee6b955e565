//! Crafted binary images and archives shared by the unit tests.

use std::{io::Write, path::Path};

/// Builds a minimal, well-formed native PE32 image with a single `.text` section.
///
/// DOS header at 0, PE signature at 0x80, optional header of 224 bytes with 16 empty
/// data directories, one section header, section raw data of 0x600 bytes at 0x200.
/// The image parses with goblin and has no CLR runtime header.
pub fn build_native_pe() -> Vec<u8> {
    let mut image = vec![0_u8; 0x800];

    // DOS header
    image[0] = b'M';
    image[1] = b'Z';
    put_u32(&mut image, 0x3C, 0x80); // e_lfanew

    // PE signature
    image[0x80..0x84].copy_from_slice(b"PE\0\0");

    // COFF header
    put_u16(&mut image, 0x84, 0x014C); // Machine - i386
    put_u16(&mut image, 0x86, 1); // NumberOfSections
    put_u16(&mut image, 0x94, 224); // SizeOfOptionalHeader
    put_u16(&mut image, 0x96, 0x2102); // Characteristics - executable, 32-bit, dll

    // Optional header (PE32)
    let opt = 0x98;
    put_u16(&mut image, opt, 0x10B); // Magic
    image[opt + 2] = 6; // MajorLinkerVersion
    put_u32(&mut image, opt + 4, 0x600); // SizeOfCode
    put_u32(&mut image, opt + 20, 0x1000); // BaseOfCode
    put_u32(&mut image, opt + 24, 0x2000); // BaseOfData
    put_u32(&mut image, opt + 28, 0x0040_0000); // ImageBase
    put_u32(&mut image, opt + 32, 0x1000); // SectionAlignment
    put_u32(&mut image, opt + 36, 0x200); // FileAlignment
    put_u16(&mut image, opt + 40, 4); // MajorOperatingSystemVersion
    put_u16(&mut image, opt + 48, 4); // MajorSubsystemVersion
    put_u32(&mut image, opt + 56, 0x2000); // SizeOfImage
    put_u32(&mut image, opt + 60, 0x200); // SizeOfHeaders
    put_u32(&mut image, opt + 64, 0); // CheckSum
    put_u16(&mut image, opt + 68, 3); // Subsystem - console
    put_u32(&mut image, opt + 72, 0x0010_0000); // SizeOfStackReserve
    put_u32(&mut image, opt + 76, 0x1000); // SizeOfStackCommit
    put_u32(&mut image, opt + 80, 0x0010_0000); // SizeOfHeapReserve
    put_u32(&mut image, opt + 84, 0x1000); // SizeOfHeapCommit
    put_u32(&mut image, opt + 92, 16); // NumberOfRvaAndSizes

    // Section header: .text
    let section = opt + 224;
    image[section..section + 5].copy_from_slice(b".text");
    put_u32(&mut image, section + 8, 0x1000); // VirtualSize
    put_u32(&mut image, section + 12, 0x1000); // VirtualAddress
    put_u32(&mut image, section + 16, 0x600); // SizeOfRawData
    put_u32(&mut image, section + 20, 0x200); // PointerToRawData
    put_u32(&mut image, section + 36, 0x6000_0020); // Characteristics

    // Section data - a deterministic non-zero pattern
    for (index, byte) in image[0x200..0x800].iter_mut().enumerate() {
        *byte = (index % 251) as u8;
    }

    image
}

/// Writes a zip archive with the given `(name, bytes)` entries.
pub fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);

    for (name, data) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }

    writer.finish().unwrap();
}

fn put_u16(image: &mut [u8], offset: usize, value: u16) {
    image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
