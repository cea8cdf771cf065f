//! The `bundle.hdr` file describing the segments of a bundle.
//!
//! Layout (little-endian):
//! ```text
//! "FileBundleHeader"        16 bytes
//! format version            u32
//! segment count             u32
//! segment break             u64
//! per segment:  name len u16, name bytes, data size u32
//!                (segment i must be named `bundle.{i:04}`)
//! CRC32 of all bytes above  u32
//! ```

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::crc::{append_crc, check_crc, CRC_SIZE};
use crate::error::{BundleError, Result};

pub const HEADER_SIGNATURE: &[u8; 16] = b"FileBundleHeader";
pub const FORMAT_VERSION: u32 = 2;
pub const HEADER_FILE_NAME: &str = "bundle.hdr";
pub const SEGMENT_FILE_PREFIX: &str = "bundle.";
pub const SEGMENT_FILE_SUFFIX_LENGTH: usize = 4;
/// Must stay consistent with `SEGMENT_FILE_SUFFIX_LENGTH` (at most 10^4 names)
pub const SEGMENT_FILE_COUNT_MAX: usize = 10000;

pub fn segment_file_name(id: usize) -> String {
    format!(
        "{}{:0width$}",
        SEGMENT_FILE_PREFIX,
        id,
        width = SEGMENT_FILE_SUFFIX_LENGTH
    )
}

/// Segment number of a `bundle.NNNN` file name
pub fn parse_segment_file_name(name: &str) -> Option<usize> {
    let suffix = name.strip_prefix(SEGMENT_FILE_PREFIX)?;
    if suffix.len() != SEGMENT_FILE_SUFFIX_LENGTH || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub name: String,
    pub data_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleHeader {
    pub segment_break: u64,
    pub segments: Vec<SegmentInfo>,
}

impl BundleHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.segments.len() * 16);
        let mut tmp = [0u8; 8];
        buf.extend_from_slice(HEADER_SIGNATURE);
        LittleEndian::write_u32(&mut tmp[..4], FORMAT_VERSION);
        buf.extend_from_slice(&tmp[..4]);
        LittleEndian::write_u32(&mut tmp[..4], self.segments.len() as u32);
        buf.extend_from_slice(&tmp[..4]);
        LittleEndian::write_u64(&mut tmp, self.segment_break);
        buf.extend_from_slice(&tmp);
        for seg in &self.segments {
            LittleEndian::write_u16(&mut tmp[..2], seg.name.len() as u16);
            buf.extend_from_slice(&tmp[..2]);
            buf.extend_from_slice(seg.name.as_bytes());
            LittleEndian::write_u32(&mut tmp[..4], seg.data_size);
            buf.extend_from_slice(&tmp[..4]);
        }
        append_crc(&mut buf);
        buf
    }

    /// Decode and validate a header. `path` is only used in error messages.
    pub fn decode(bz: &[u8], path: &Path) -> Result<BundleHeader> {
        let fixed = HEADER_SIGNATURE.len() + 4 + 4 + 8;
        if bz.len() < fixed + CRC_SIZE || &bz[..HEADER_SIGNATURE.len()] != HEADER_SIGNATURE {
            return Err(BundleError::corrupt(path, "bad signature"));
        }
        if !check_crc(bz) {
            return Err(BundleError::corrupt(path, "bad CRC"));
        }
        let body = &bz[..bz.len() - CRC_SIZE];
        let mut pos = HEADER_SIGNATURE.len();

        let version = LittleEndian::read_u32(&body[pos..]);
        pos += 4;
        if version != FORMAT_VERSION {
            return Err(BundleError::corrupt(
                path,
                format!("unknown header version {}", version),
            ));
        }
        let segment_count = LittleEndian::read_u32(&body[pos..]) as usize;
        pos += 4;
        if segment_count == 0 || segment_count > SEGMENT_FILE_COUNT_MAX {
            return Err(BundleError::corrupt(
                path,
                format!("bad segment count {}", segment_count),
            ));
        }
        let segment_break = LittleEndian::read_u64(&body[pos..]);
        pos += 8;
        if segment_break == 0 {
            return Err(BundleError::corrupt(path, "segment break is 0"));
        }

        let mut segments = Vec::with_capacity(segment_count);
        for id in 0..segment_count {
            if pos + 2 > body.len() {
                return Err(BundleError::corrupt(path, "truncated segment list"));
            }
            let name_len = LittleEndian::read_u16(&body[pos..]) as usize;
            pos += 2;
            if pos + name_len + 4 > body.len() {
                return Err(BundleError::corrupt(path, "truncated segment list"));
            }
            let name = String::from_utf8(body[pos..pos + name_len].to_vec())
                .map_err(|_| BundleError::corrupt(path, "segment name is not UTF-8"))?;
            if name != segment_file_name(id) {
                return Err(BundleError::corrupt(
                    path,
                    format!("segment {} is named {:?}", id, name),
                ));
            }
            pos += name_len;
            let data_size = LittleEndian::read_u32(&body[pos..]);
            pos += 4;
            segments.push(SegmentInfo { name, data_size });
        }
        if pos != body.len() {
            return Err(BundleError::corrupt(path, "garbage after segment list"));
        }

        Ok(BundleHeader {
            segment_break,
            segments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BundleHeader {
        BundleHeader {
            segment_break: 1 << 20,
            segments: vec![
                SegmentInfo {
                    name: segment_file_name(0),
                    data_size: 1000,
                },
                SegmentInfo {
                    name: segment_file_name(1),
                    data_size: 17,
                },
            ],
        }
    }

    #[test]
    fn test_segment_file_name() {
        assert_eq!(segment_file_name(0), "bundle.0000");
        assert_eq!(segment_file_name(42), "bundle.0042");
        assert_eq!(parse_segment_file_name("bundle.0042"), Some(42));
        assert_eq!(parse_segment_file_name("bundle.hdr"), None);
        assert_eq!(parse_segment_file_name("bundle.42"), None);
        assert_eq!(parse_segment_file_name("bundle.+042"), None);
    }

    #[test]
    fn test_decode_encoded() {
        let hdr = sample();
        let bz = hdr.encode();
        let decoded = BundleHeader::decode(&bz, Path::new("x")).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn test_detects_damage() {
        let mut bz = sample().encode();
        bz[20] ^= 0x01;
        let err = BundleHeader::decode(&bz, Path::new("x")).unwrap_err();
        assert!(err.is_corruption());

        let mut bz = sample().encode();
        bz[0] = b'X';
        assert!(BundleHeader::decode(&bz, Path::new("x")).is_err());

        let bz = sample().encode();
        assert!(BundleHeader::decode(&bz[..bz.len() - 1], Path::new("x")).is_err());
    }

    #[test]
    fn test_rejects_foreign_segment_names() {
        for bad in ["../bundle.0001", "/etc/passwd", "bundle.0007", "bundle.1"] {
            let mut hdr = sample();
            hdr.segments[1].name = bad.to_string();
            let err = BundleHeader::decode(&hdr.encode(), Path::new("x")).unwrap_err();
            assert!(err.is_corruption(), "{}: {}", bad, err);
        }
    }
}
