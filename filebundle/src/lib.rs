//! # File bundle
//!
//! A file bundle stores an append-only sequence of records in a directory of
//! segment files (`bundle.0000`, `bundle.0001`, ...) described by a small
//! header file (`bundle.hdr`). A record is addressed by its *bundle position*,
//! `segment * segment_break + offset_in_segment`, and never spans two segments.
//!
//! Writing happens in two steps: `allocate` reserves a range under a mutex and
//! returns its position, then `write_at` fills the range with a positioned
//! write. Producers may therefore fill disjoint ranges concurrently and in any
//! order. `append` and `append_crc` combine both steps. The header is only
//! written by `close`, so a bundle whose writer died never opens.
//!
//! Records may carry a trailing CRC32 (see [`crc`]). `read_at_crc` checks it
//! and strips it before handing the payload back.
//!
//! A `FileBundleReader` can serve many reader threads. Readers that walk the
//! bundle in roughly ascending order can turn on a small block cache with
//! `enable_read_cache`.

mod cache;
pub mod crc;
pub mod error;
pub mod header;
mod reader;
mod writer;

pub use cache::IO_BLK_SIZE;
pub use crc::CRC_SIZE;
pub use error::{BundleError, Result};
pub use header::{BundleHeader, SegmentInfo, HEADER_FILE_NAME};
pub use reader::FileBundleReader;
pub use writer::FileBundleWriter;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_round_trip() {
        let dir = tempfile::Builder::new()
            .prefix("filebundle")
            .tempdir()
            .unwrap();
        let writer = FileBundleWriter::create(dir.path(), 1 << 12).unwrap();
        let plain = writer.append(b"plain record").unwrap();
        let checked = writer.append_crc(b"checked record").unwrap();
        let reserved = writer.allocate(5).unwrap();
        writer.write_at(reserved, b"later").unwrap();
        writer.close().unwrap();

        let reader = FileBundleReader::open(dir.path()).unwrap();
        let mut buf = [0u8; 12];
        reader.read_at(plain, &mut buf).unwrap();
        assert_eq!(&buf, b"plain record");
        let payload = reader.read_at_crc(checked, 14 + CRC_SIZE).unwrap();
        assert_eq!(payload, b"checked record");
        let mut buf = [0u8; 5];
        reader.read_at(reserved, &mut buf).unwrap();
        assert_eq!(&buf, b"later");
        assert_eq!(reader.data_size(), 12 + 14 + CRC_SIZE as u64 + 5);
    }

    #[test]
    fn test_unclosed_bundle_does_not_open() {
        let dir = tempfile::Builder::new()
            .prefix("filebundle")
            .tempdir()
            .unwrap();
        {
            let writer = FileBundleWriter::create(dir.path(), 1 << 12).unwrap();
            writer.append(b"lost").unwrap();
        }
        assert!(FileBundleReader::open(dir.path()).is_err());
    }

    #[test]
    fn test_rewrite_replaces_old_bundle() {
        let dir = tempfile::Builder::new()
            .prefix("filebundle")
            .tempdir()
            .unwrap();
        let writer = FileBundleWriter::create(dir.path(), 1 << 12).unwrap();
        writer.append(&[1u8; 100]).unwrap();
        writer.close().unwrap();

        let writer = FileBundleWriter::create(dir.path(), 1 << 12).unwrap();
        assert!(!dir.path().join(HEADER_FILE_NAME).exists());
        writer.append(&[2u8; 10]).unwrap();
        writer.close().unwrap();

        let reader = FileBundleReader::open(dir.path()).unwrap();
        assert_eq!(reader.data_size(), 10);
    }
}
