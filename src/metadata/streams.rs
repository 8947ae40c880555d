//! Metadata root and heap streams (ECMA-335 II.24.2).

use crate::metadata::cursor::Cursor;
use crate::metadata::error::{MetadataError, Result};

const METADATA_SIGNATURE: u32 = 0x424A_5342; // "BSJB"

/// Null-terminated UTF-8 strings heap (`#Strings`).
#[derive(Debug, Clone, Copy)]
pub struct StringsHeap<'a> {
    data: &'a [u8],
}

impl<'a> StringsHeap<'a> {
    pub fn get(&self, offset: u32) -> Result<&'a str> {
        let start = offset as usize;
        if start >= self.data.len() {
            return Err(MetadataError::format("string heap offset out of range"));
        }
        let terminator = self.data[start..]
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| MetadataError::format("unterminated heap string"))?;
        std::str::from_utf8(&self.data[start..start + terminator])
            .map_err(|_| MetadataError::format("heap string is not valid UTF-8"))
    }
}

/// Length-prefixed binary blobs heap (`#Blob`).
#[derive(Debug, Clone, Copy)]
pub struct BlobHeap<'a> {
    data: &'a [u8],
}

impl<'a> BlobHeap<'a> {
    pub fn get(&self, offset: u32) -> Result<&'a [u8]> {
        let mut cursor = Cursor::at(self.data, offset as usize)
            .map_err(|_| MetadataError::format("blob heap offset out of range"))?;
        let length = cursor.read_compressed_u32()? as usize;
        cursor.take(length)
    }
}

/// Parsed metadata root: runtime version plus the streams the reader consumes.
#[derive(Debug)]
pub struct MetadataRoot<'a> {
    pub version: String,
    pub tables: &'a [u8],
    pub strings: StringsHeap<'a>,
    pub blob: BlobHeap<'a>,
}

impl<'a> MetadataRoot<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        if cursor.read_u32()? != METADATA_SIGNATURE {
            return Err(MetadataError::format("missing metadata root signature"));
        }
        cursor.skip(8)?; // major, minor, reserved
        let version_length = cursor.read_u32()? as usize;
        let version_bytes = cursor.take(version_length)?;
        let version = version_bytes
            .split(|b| *b == 0)
            .next()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .ok_or_else(|| MetadataError::format("malformed runtime version string"))?
            .to_string();
        cursor.skip(2)?; // flags
        let stream_count = cursor.read_u16()?;

        let mut tables = None;
        let mut strings = None;
        let mut blob = None;

        for _ in 0..stream_count {
            let offset = cursor.read_u32()? as usize;
            let size = cursor.read_u32()? as usize;
            let name = Self::read_stream_name(&mut cursor)?;

            let end = offset
                .checked_add(size)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| MetadataError::format("stream extends beyond metadata"))?;
            let slice = &data[offset..end];

            match name.as_str() {
                "#~" => tables = Some(slice),
                "#-" => {
                    return Err(MetadataError::format(
                        "uncompressed #- tables stream is not supported",
                    ))
                }
                "#Strings" => strings = Some(StringsHeap { data: slice }),
                "#Blob" => blob = Some(BlobHeap { data: slice }),
                // #US and #GUID are not consumed by dependency discovery.
                _ => {}
            }
        }

        Ok(Self {
            version,
            tables: tables.ok_or_else(|| MetadataError::format("missing #~ tables stream"))?,
            strings: strings
                .ok_or_else(|| MetadataError::format("missing #Strings heap"))?,
            blob: blob.unwrap_or(BlobHeap { data: &[] }),
        })
    }

    fn read_stream_name(cursor: &mut Cursor<'a>) -> Result<String> {
        // Stream names are null-terminated and padded to a 4-byte boundary.
        let mut name = String::new();
        loop {
            let chunk = cursor.take(4)?;
            for byte in chunk {
                if *byte == 0 {
                    return Ok(name);
                }
                if !byte.is_ascii() || name.len() >= 32 {
                    return Err(MetadataError::format("malformed stream name"));
                }
                name.push(*byte as char);
            }
        }
    }
}
