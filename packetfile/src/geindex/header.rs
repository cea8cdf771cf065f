//! The `index.hdr` file of a geindex directory.
//!
//! Layout (little-endian):
//! ```text
//! "GEIndexHeader"              13 bytes
//! format version               u16
//! root child bucket address    u64 offset, u32 child size, u32 entry size
//! root entry bucket address    u64 offset, u32 size
//! slots are single             u8
//! wasted space                 u64
//! packet files                 u32 count, per file: u16 len, bytes
//! packet file extras           u32 count, u32 each        (version >= 1)
//! content description          u16 len, bytes             (version >= 2)
//! CRC32 of all bytes above     u32
//! ```
//! Packet file paths are relative to the index directory unless absolute.
//! An empty path marks a packet file that is no longer referenced.

use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use filebundle::crc::{append_crc, check_crc};
use filebundle::CRC_SIZE;

use super::addr::{BundleAddr, ChildBucketAddr};
use super::FieldReader;
use crate::error::{PacketFileError, Result};

pub const INDEX_HEADER_FILE_NAME: &str = "index.hdr";
pub const INDEX_HEADER_MAGIC: &[u8; 13] = b"GEIndexHeader";
pub const INDEX_FORMAT_VERSION: u16 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeIndexHeader {
    pub root_child_addr: ChildBucketAddr,
    pub root_entry_addr: BundleAddr,
    pub slots_are_single: bool,
    /// Bundle bytes no longer reachable from the root
    pub wasted_space: u64,
    pub packet_files: Vec<String>,
    /// One per packet file, used to rank entries of a blend index
    pub packet_file_extras: Vec<u32>,
    pub content_desc: String,
}

impl GeIndexHeader {
    pub fn new(slots_are_single: bool, content_desc: &str) -> Self {
        Self {
            slots_are_single,
            content_desc: content_desc.to_string(),
            ..Default::default()
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        let mut tmp = [0u8; 8];
        buf.extend_from_slice(INDEX_HEADER_MAGIC);
        LittleEndian::write_u16(&mut tmp[..2], INDEX_FORMAT_VERSION);
        buf.extend_from_slice(&tmp[..2]);
        self.root_child_addr.encode(&mut buf);
        self.root_entry_addr.encode(&mut buf);
        buf.push(self.slots_are_single as u8);
        LittleEndian::write_u64(&mut tmp, self.wasted_space);
        buf.extend_from_slice(&tmp);

        LittleEndian::write_u32(&mut tmp[..4], self.packet_files.len() as u32);
        buf.extend_from_slice(&tmp[..4]);
        for name in &self.packet_files {
            write_string(&mut buf, name);
        }
        LittleEndian::write_u32(&mut tmp[..4], self.packet_file_extras.len() as u32);
        buf.extend_from_slice(&tmp[..4]);
        for extra in &self.packet_file_extras {
            LittleEndian::write_u32(&mut tmp[..4], *extra);
            buf.extend_from_slice(&tmp[..4]);
        }
        write_string(&mut buf, &self.content_desc);
        append_crc(&mut buf);
        buf
    }

    /// Decode and validate a header. `path` is only used in error messages.
    pub fn decode(bz: &[u8], path: &Path) -> Result<GeIndexHeader> {
        if bz.len() < INDEX_HEADER_MAGIC.len() + CRC_SIZE
            || &bz[..INDEX_HEADER_MAGIC.len()] != INDEX_HEADER_MAGIC
        {
            return Err(PacketFileError::corrupt_index(path, "bad signature"));
        }
        if !check_crc(bz) {
            return Err(PacketFileError::corrupt_index(path, "bad CRC"));
        }
        let body = &bz[INDEX_HEADER_MAGIC.len()..bz.len() - CRC_SIZE];
        let mut r = FieldReader::new(body, path);

        let version = r.u16()?;
        if version > INDEX_FORMAT_VERSION {
            return Err(PacketFileError::corrupt_index(
                path,
                format!("unknown header version {}", version),
            ));
        }
        let root_child_addr = ChildBucketAddr::decode(r.bytes(ChildBucketAddr::SIZE)?);
        let root_entry_addr = BundleAddr::decode(r.bytes(BundleAddr::SIZE)?);
        let slots_are_single = r.u8()? != 0;
        let wasted_space = r.u64()?;

        let count = r.u32()? as usize;
        let mut packet_files = Vec::with_capacity(count.min(body.len()));
        for _ in 0..count {
            packet_files.push(r.string()?);
        }
        let packet_file_extras = if version >= 1 {
            let count = r.u32()? as usize;
            let mut extras = Vec::with_capacity(count.min(body.len()));
            for _ in 0..count {
                extras.push(r.u32()?);
            }
            extras
        } else {
            vec![0; packet_files.len()]
        };
        if packet_file_extras.len() != packet_files.len() {
            return Err(PacketFileError::corrupt_index(
                path,
                format!(
                    "{} packet file extras for {} packet files",
                    packet_file_extras.len(),
                    packet_files.len()
                ),
            ));
        }
        let content_desc = if version >= 2 { r.string()? } else { String::new() };
        r.finish()?;

        Ok(GeIndexHeader {
            root_child_addr,
            root_entry_addr,
            slots_are_single,
            wasted_space,
            packet_files,
            packet_file_extras,
            content_desc,
        })
    }

    pub fn read(dir: &Path) -> Result<GeIndexHeader> {
        let path = dir.join(INDEX_HEADER_FILE_NAME);
        let bz = std::fs::read(&path)?;
        Self::decode(&bz, &path)
    }

    /// Location of packet file `file_num`, `None` if it was removed or the
    /// number is unknown
    pub fn packet_file_path(&self, dir: &Path, file_num: u32) -> Option<PathBuf> {
        let name = self.packet_files.get(file_num as usize)?;
        if name.is_empty() {
            return None;
        }
        let p = Path::new(name);
        Some(if p.is_absolute() { p.to_path_buf() } else { dir.join(p) })
    }

    pub fn packet_extra(&self, file_num: u32) -> u32 {
        self.packet_file_extras
            .get(file_num as usize)
            .copied()
            .unwrap_or(0)
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    let mut tmp = [0u8; 2];
    LittleEndian::write_u16(&mut tmp, s.len() as u16);
    buf.extend_from_slice(&tmp);
    buf.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GeIndexHeader {
        GeIndexHeader {
            root_child_addr: ChildBucketAddr::new(400, 44, 32),
            root_entry_addr: BundleAddr::new(0, 120),
            slots_are_single: false,
            wasted_space: 17,
            packet_files: vec!["../imagery".to_string(), String::new()],
            packet_file_extras: vec![3, 0],
            content_desc: "UnifiedIndex".to_string(),
        }
    }

    #[test]
    fn test_header_encode_decode() {
        let h = sample();
        let bz = h.encode();
        assert_eq!(&bz[..13], INDEX_HEADER_MAGIC);
        assert_eq!(GeIndexHeader::decode(&bz, Path::new("index.hdr")).unwrap(), h);
    }

    #[test]
    fn test_header_rejects_damage() {
        let bz = sample().encode();
        let path = Path::new("index.hdr");

        let mut flipped = bz.clone();
        flipped[20] ^= 1;
        assert!(GeIndexHeader::decode(&flipped, path).unwrap_err().is_corruption());

        let mut magic = bz.clone();
        magic[0] = b'X';
        assert!(GeIndexHeader::decode(&magic, path).unwrap_err().is_corruption());

        // a valid CRC over a cut body still fails on the missing fields
        let mut cut = bz[..bz.len() - CRC_SIZE - 6].to_vec();
        append_crc(&mut cut);
        assert!(GeIndexHeader::decode(&cut, path).unwrap_err().is_corruption());
    }

    #[test]
    fn test_version_zero_has_no_extras() {
        let mut buf = INDEX_HEADER_MAGIC.to_vec();
        buf.extend_from_slice(&0u16.to_le_bytes());
        ChildBucketAddr::default().encode(&mut buf);
        BundleAddr::new(0, 30).encode(&mut buf);
        buf.push(1);
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        write_string(&mut buf, "/data/terrain");
        append_crc(&mut buf);

        let h = GeIndexHeader::decode(&buf, Path::new("index.hdr")).unwrap();
        assert!(h.slots_are_single);
        assert_eq!(h.packet_file_extras, vec![0]);
        assert_eq!(h.content_desc, "");
        assert_eq!(
            h.packet_file_path(Path::new("/idx"), 0),
            Some(PathBuf::from("/data/terrain"))
        );
        assert_eq!(h.packet_file_path(Path::new("/idx"), 1), None);
    }

    #[test]
    fn test_packet_file_paths() {
        let h = sample();
        assert_eq!(
            h.packet_file_path(Path::new("/idx"), 0),
            Some(PathBuf::from("/idx/../imagery"))
        );
        assert_eq!(h.packet_file_path(Path::new("/idx"), 1), None);
        assert_eq!(h.packet_extra(0), 3);
        assert_eq!(h.packet_extra(9), 0);
    }
}
