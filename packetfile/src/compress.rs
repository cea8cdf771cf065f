//! Compressed packet envelope.
//!
//! A compressed packet is an 8 byte header followed by a zlib stream:
//! ```text
//! +--------------------+--------------------------+------------------+
//! | magic 0x7468DEAD   | uncompressed length      | zlib data ...    |
//! +--------------------+--------------------------+------------------+
//! ```
//! Writers store both header words little-endian. When the magic reads
//! byte-swapped, the packet was written big-endian and the length is read
//! big-endian too.

use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::def::{COMPRESSION_HEADER_SIZE, COMPRESSION_MAGIC};
use crate::error::{PacketFileError, Result};

/// Turns packet payloads into stored bytes and back. Storage never looks
/// inside either form.
pub trait PacketCodec {
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>>;

    /// Expand `packed`, refusing results larger than `max_size`
    fn decompress(&self, packed: &[u8], max_size: usize) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy)]
pub struct ZlibCodec {
    level: Compression,
}

impl Default for ZlibCodec {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl ZlibCodec {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: Compression::new(level),
        }
    }
}

/// Declared uncompressed length of a packet, from its header
pub fn uncompressed_len(packed: &[u8]) -> Result<usize> {
    if packed.len() < COMPRESSION_HEADER_SIZE {
        return Err(PacketFileError::CorruptRecord(format!(
            "compressed packet of {} bytes has no header",
            packed.len()
        )));
    }
    let magic = LittleEndian::read_u32(&packed[0..4]);
    if magic == COMPRESSION_MAGIC {
        Ok(LittleEndian::read_u32(&packed[4..8]) as usize)
    } else if magic == COMPRESSION_MAGIC.swap_bytes() {
        Ok(BigEndian::read_u32(&packed[4..8]) as usize)
    } else {
        Err(PacketFileError::CorruptRecord(format!(
            "bad compression magic {:#010x}",
            magic
        )))
    }
}

impl PacketCodec for ZlibCodec {
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(COMPRESSION_HEADER_SIZE + raw.len() / 2);
        let mut header = [0u8; COMPRESSION_HEADER_SIZE];
        LittleEndian::write_u32(&mut header[0..4], COMPRESSION_MAGIC);
        LittleEndian::write_u32(&mut header[4..8], raw.len() as u32);
        out.extend_from_slice(&header);
        let mut encoder = ZlibEncoder::new(out, self.level);
        encoder.write_all(raw)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, packed: &[u8], max_size: usize) -> Result<Vec<u8>> {
        let declared = uncompressed_len(packed)?;
        if declared > max_size {
            return Err(PacketFileError::CorruptRecord(format!(
                "declared length {} exceeds limit {}",
                declared, max_size
            )));
        }
        let mut out = Vec::with_capacity(declared);
        ZlibDecoder::new(&packed[COMPRESSION_HEADER_SIZE..])
            .take(declared as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| PacketFileError::CorruptRecord(format!("inflate failed: {}", e)))?;
        if out.len() != declared {
            return Err(PacketFileError::CorruptRecord(format!(
                "inflated {} bytes, header says {}",
                out.len(),
                declared
            )));
        }
        Ok(out)
    }
}
