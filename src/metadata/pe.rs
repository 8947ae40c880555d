//! PE/COFF envelope parsing for managed modules.
//!
//! Format detection is done entirely from header bytes: the DOS magic, the
//! PE signature, the optional-header magic and a non-empty CLI data
//! directory. File extensions are never consulted.

use crate::metadata::cursor::Cursor;
use crate::metadata::error::{MetadataError, Result};

const DOS_MAGIC: &[u8; 2] = b"MZ";
const PE_SIGNATURE: &[u8; 4] = b"PE\0\0";
const OPTIONAL_MAGIC_PE32: u16 = 0x10B;
const OPTIONAL_MAGIC_PE32_PLUS: u16 = 0x20B;
const CLI_DIRECTORY_INDEX: u32 = 14;

/// Recognized managed object-file layouts, selected by header sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    Pe32,
    Pe32Plus,
}

#[derive(Debug, Clone)]
struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_pointer: u32,
}

/// A sniffed and section-mapped managed PE image.
#[derive(Debug)]
pub struct PeImage<'a> {
    data: &'a [u8],
    pub format: BinaryFormat,
    sections: Vec<Section>,
    metadata_rva: u32,
    metadata_size: u32,
}

impl<'a> PeImage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        if cursor.take(2).map(|magic| magic != DOS_MAGIC).unwrap_or(true) {
            return Err(MetadataError::format("missing MZ signature"));
        }

        let mut lfanew_cursor = Cursor::at(data, 0x3C)
            .map_err(|_| MetadataError::format("truncated DOS header"))?;
        let e_lfanew = lfanew_cursor
            .read_u32()
            .map_err(|_| MetadataError::format("truncated DOS header"))?;

        let mut pe = Cursor::at(data, e_lfanew as usize)
            .map_err(|_| MetadataError::format("PE header offset beyond end of image"))?;
        if pe.take(4).map(|sig| sig != PE_SIGNATURE).unwrap_or(true) {
            return Err(MetadataError::format("missing PE signature"));
        }

        // COFF file header.
        let _machine = pe.read_u16()?;
        let section_count = pe.read_u16()?;
        pe.skip(12)?; // timestamp, symbol table pointer, symbol count
        let optional_header_size = pe.read_u16()?;
        let _characteristics = pe.read_u16()?;

        let optional_start = pe.position();
        let magic = pe.read_u16()?;
        let format = match magic {
            OPTIONAL_MAGIC_PE32 => BinaryFormat::Pe32,
            OPTIONAL_MAGIC_PE32_PLUS => BinaryFormat::Pe32Plus,
            other => {
                return Err(MetadataError::format(format!(
                    "unrecognized optional header magic 0x{other:x}"
                )))
            }
        };

        let (count_offset, dirs_offset) = match format {
            BinaryFormat::Pe32 => (92, 96),
            BinaryFormat::Pe32Plus => (108, 112),
        };

        let mut counts = Cursor::at(data, optional_start + count_offset)?;
        let directory_count = counts.read_u32()?;
        if directory_count <= CLI_DIRECTORY_INDEX {
            return Err(MetadataError::format(
                "not a managed module (no CLI data directory)",
            ));
        }

        let mut cli_dir = Cursor::at(
            data,
            optional_start + dirs_offset + CLI_DIRECTORY_INDEX as usize * 8,
        )?;
        let cli_rva = cli_dir.read_u32()?;
        let cli_size = cli_dir.read_u32()?;
        if cli_rva == 0 || cli_size == 0 {
            return Err(MetadataError::format(
                "not a managed module (empty CLI data directory)",
            ));
        }

        let mut sections = Vec::with_capacity(section_count as usize);
        let mut section_cursor =
            Cursor::at(data, optional_start + optional_header_size as usize)?;
        for _ in 0..section_count {
            section_cursor.skip(8)?; // name
            let virtual_size = section_cursor.read_u32()?;
            let virtual_address = section_cursor.read_u32()?;
            let raw_size = section_cursor.read_u32()?;
            let raw_pointer = section_cursor.read_u32()?;
            section_cursor.skip(16)?; // relocations, line numbers, characteristics
            sections.push(Section {
                virtual_address,
                virtual_size,
                raw_size,
                raw_pointer,
            });
        }

        let image = Self {
            data,
            format,
            sections,
            metadata_rva: 0,
            metadata_size: 0,
        };

        // CLI (COR20) header carries the metadata directory.
        let mut cor20 = Cursor::at(data, image.rva_to_offset(cli_rva)?)?;
        let cb = cor20.read_u32()?;
        if cb < 72 {
            return Err(MetadataError::format("CLI header too small"));
        }
        cor20.skip(4)?; // runtime major/minor
        let metadata_rva = cor20.read_u32()?;
        let metadata_size = cor20.read_u32()?;
        if metadata_rva == 0 || metadata_size == 0 {
            return Err(MetadataError::format("CLI header has no metadata directory"));
        }

        Ok(Self {
            metadata_rva,
            metadata_size,
            ..image
        })
    }

    fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        for section in &self.sections {
            let span = section.virtual_size.max(section.raw_size);
            if rva >= section.virtual_address && rva < section.virtual_address + span {
                let offset = section.raw_pointer as usize + (rva - section.virtual_address) as usize;
                if offset < self.data.len() {
                    return Ok(offset);
                }
                return Err(MetadataError::format("section data beyond end of image"));
            }
        }
        Err(MetadataError::format(format!(
            "RVA 0x{rva:x} not covered by any section"
        )))
    }

    /// The raw physical metadata blob (root signature onwards).
    pub fn metadata(&self) -> Result<&'a [u8]> {
        let start = self.rva_to_offset(self.metadata_rva)?;
        let end = start
            .checked_add(self.metadata_size as usize)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| MetadataError::format("metadata directory truncated"))?;
        Ok(&self.data[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_input() {
        let err = PeImage::parse(&[]).unwrap_err();
        assert!(matches!(err, MetadataError::InvalidBinaryFormat { .. }));
    }

    #[test]
    fn test_rejects_non_mz() {
        let err = PeImage::parse(b"\x7fELF rest of header").unwrap_err();
        assert!(err.to_string().contains("MZ"));
    }

    #[test]
    fn test_rejects_mz_without_pe() {
        let mut image = vec![0u8; 0x80];
        image[0] = b'M';
        image[1] = b'Z';
        image[0x3C] = 0x40; // e_lfanew -> offset 0x40, but no PE signature there
        let err = PeImage::parse(&image).unwrap_err();
        assert!(err.to_string().contains("PE signature"));
    }

    #[test]
    fn test_rejects_lfanew_beyond_image() {
        let mut image = vec![0u8; 0x40];
        image[0] = b'M';
        image[1] = b'Z';
        image[0x3C..0x40].copy_from_slice(&0xFFFF_u32.to_le_bytes());
        assert!(PeImage::parse(&image).is_err());
    }
}
