//! CRC32 helpers for records that carry a trailing checksum.
//!
//! A CRC'd record is `payload ++ crc32(payload)`, the checksum stored
//! little-endian in the last [`CRC_SIZE`] bytes.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{BundleError, Result};

/// Bytes occupied by the trailing CRC of a record
pub const CRC_SIZE: usize = 4;

pub fn crc32(bz: &[u8]) -> u32 {
    crc32fast::hash(bz)
}

/// Append the CRC of the current buffer content to the buffer
pub fn append_crc(buf: &mut Vec<u8>) {
    let crc = crc32(buf);
    let mut tail = [0u8; CRC_SIZE];
    LittleEndian::write_u32(&mut tail, crc);
    buf.extend_from_slice(&tail);
}

/// Overwrite the last `CRC_SIZE` bytes of `record` with the CRC of the bytes
/// before them. The record must be longer than the CRC itself.
pub fn store_crc(record: &mut [u8]) -> Result<()> {
    if record.len() <= CRC_SIZE {
        return Err(BundleError::RecordTooSmall(record.len()));
    }
    let data_len = record.len() - CRC_SIZE;
    let crc = crc32(&record[..data_len]);
    LittleEndian::write_u32(&mut record[data_len..], crc);
    Ok(())
}

/// Returns whether the trailing CRC of `record` matches its payload.
/// Records shorter than or equal to the CRC itself never match.
pub fn check_crc(record: &[u8]) -> bool {
    if record.len() <= CRC_SIZE {
        return false;
    }
    let data_len = record.len() - CRC_SIZE;
    crc32(&record[..data_len]) == LittleEndian::read_u32(&record[data_len..])
}
