use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use filebundle::crc::{check_crc, crc32};

use crate::def::{
    INDEX_ENTRY_DATA_SIZE, INDEX_ENTRY_SIZE, INDEX_FORMAT_VERSION, INDEX_HEADER_SIZE,
    INDEX_SIGNATURE,
};
use crate::error::{PacketFileError, Result};
use crate::qtpath::QuadtreePath;

/// One record of a packet index: where the packet for `qt_path` lives in the
/// bundle.
///
/// The derived order compares `qt_path` first and breaks ties with the
/// remaining fields, so sorting never depends on the input order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketIndexEntry {
    qt_path: QuadtreePath,
    position: u64,
    record_size: u32,
    extra: u32,
}

impl PacketIndexEntry {
    pub fn new(qt_path: QuadtreePath, position: u64, record_size: u32, extra: u32) -> Self {
        Self {
            qt_path,
            position,
            record_size,
            extra,
        }
    }

    pub fn qt_path(&self) -> QuadtreePath {
        self.qt_path
    }

    /// Bundle position of the record
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Stored size of the record, including its CRC when the data has one
    pub fn record_size(&self) -> u32 {
        self.record_size
    }

    pub fn extra(&self) -> u32 {
        self.extra
    }

    pub fn encode(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut bz = [0u8; INDEX_ENTRY_SIZE];
        self.qt_path.write_le_bytes(&mut bz[0..8]);
        LittleEndian::write_u64(&mut bz[8..16], self.position);
        LittleEndian::write_u32(&mut bz[16..20], self.record_size);
        LittleEndian::write_u32(&mut bz[20..INDEX_ENTRY_DATA_SIZE], self.extra);
        let crc = crc32(&bz[..INDEX_ENTRY_DATA_SIZE]);
        LittleEndian::write_u32(&mut bz[INDEX_ENTRY_DATA_SIZE..], crc);
        bz
    }

    /// Decode a stored entry, checking its CRC. `path` names the index in
    /// error messages.
    pub fn decode(bz: &[u8], path: &Path) -> Result<Self> {
        if bz.len() != INDEX_ENTRY_SIZE {
            return Err(PacketFileError::corrupt_index(
                path,
                format!("entry of {} bytes", bz.len()),
            ));
        }
        if !check_crc(bz) {
            return Err(PacketFileError::corrupt_index(path, "entry CRC mismatch"));
        }
        let qt_path = QuadtreePath::from_le_bytes(&bz[0..8])
            .map_err(|e| PacketFileError::corrupt_index(path, e.to_string()))?;
        Ok(Self {
            qt_path,
            position: LittleEndian::read_u64(&bz[8..16]),
            record_size: LittleEndian::read_u32(&bz[16..20]),
            extra: LittleEndian::read_u32(&bz[20..INDEX_ENTRY_DATA_SIZE]),
        })
    }
}

pub fn encode_index_header(data_has_crc: bool) -> [u8; INDEX_HEADER_SIZE] {
    let mut bz = [0u8; INDEX_HEADER_SIZE];
    bz[0..8].copy_from_slice(INDEX_SIGNATURE);
    LittleEndian::write_u16(&mut bz[8..10], INDEX_FORMAT_VERSION);
    LittleEndian::write_u16(&mut bz[10..12], data_has_crc as u16);
    let crc = crc32(&bz[0..12]);
    LittleEndian::write_u32(&mut bz[12..16], crc);
    bz
}

/// Validate an index header and return its `data_has_crc` flag
pub fn decode_index_header(bz: &[u8], path: &Path) -> Result<bool> {
    if bz.len() < INDEX_HEADER_SIZE {
        return Err(PacketFileError::corrupt_index(path, "short header"));
    }
    if &bz[0..8] != INDEX_SIGNATURE {
        return Err(PacketFileError::corrupt_index(path, "bad signature"));
    }
    if !check_crc(&bz[0..INDEX_HEADER_SIZE]) {
        return Err(PacketFileError::corrupt_index(path, "header CRC mismatch"));
    }
    let version = LittleEndian::read_u16(&bz[8..10]);
    if version != INDEX_FORMAT_VERSION {
        return Err(PacketFileError::corrupt_index(
            path,
            format!("unsupported version {}", version),
        ));
    }
    Ok(LittleEndian::read_u16(&bz[10..12]) != 0)
}
