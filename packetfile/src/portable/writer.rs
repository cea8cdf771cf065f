use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use filebundle::BundleError;
use log::{debug, info, warn};

use crate::def::PORTABLE_INDEX_FILE_NAME;
use crate::error::{PacketFileError, Result};
use crate::portable::{bundle_file_name, parse_bundle_file_name};
use crate::portable::finder::PacketBundleFinder;
use crate::portable::item::IndexItem;

/// Writes a portable bundle: packets appended to `pbundle_NNNN` files and a
/// sorted `index` written on close.
///
/// A delta writer checks every key against a base bundle first and skips
/// packets the base already holds, so the delta carries only what is new.
#[derive(Debug)]
pub struct PacketBundleWriter {
    dir: PathBuf,
    max_file_size: u64,
    file_id: u16,
    file: BufWriter<File>,
    file_size: u64,
    items: Vec<IndexItem>,
    base: Option<PacketBundleFinder<BufReader<File>>>,
    closed: bool,
}

impl PacketBundleWriter {
    pub fn create(dir: impl AsRef<Path>, max_file_size: u64) -> Result<PacketBundleWriter> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let index_path = dir.join(PORTABLE_INDEX_FILE_NAME);
        if index_path.exists() {
            fs::remove_file(&index_path)?;
        }
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let stale = entry
                .file_name()
                .to_str()
                .and_then(parse_bundle_file_name)
                .is_some_and(|id| id > 0);
            if stale && entry.file_type()?.is_file() {
                debug!("removing stale bundle file {:?}", entry.path());
                fs::remove_file(entry.path())?;
            }
        }
        let file = BufWriter::new(File::create(dir.join(bundle_file_name(0)))?);
        info!(
            "creating portable bundle {:?}, max file size {}",
            dir, max_file_size
        );
        Ok(PacketBundleWriter {
            dir,
            max_file_size,
            file_id: 0,
            file,
            file_size: 0,
            items: Vec::new(),
            base: None,
            closed: false,
        })
    }

    /// A writer that only stores packets missing from the bundle in `base_dir`
    pub fn create_delta(
        dir: impl AsRef<Path>,
        base_dir: impl AsRef<Path>,
        max_file_size: u64,
    ) -> Result<PacketBundleWriter> {
        let base_index = File::open(base_dir.as_ref().join(PORTABLE_INDEX_FILE_NAME))?;
        let base_size = base_index.metadata()?.len();
        let mut base = PacketBundleFinder::new(BufReader::new(base_index), 0, base_size)?;
        base.preload()?;
        let mut writer = Self::create(dir, max_file_size)?;
        writer.base = Some(base);
        Ok(writer)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Packets written so far
    pub fn packet_count(&self) -> usize {
        self.items.len()
    }

    /// Number of `pbundle_NNNN` files in use
    pub fn file_count(&self) -> u32 {
        self.file_id as u32 + 1
    }

    fn next_file(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        self.file_id = self
            .file_id
            .checked_add(1)
            .ok_or_else(|| BundleError::TooManySegments(self.dir.clone()))?;
        self.file = BufWriter::new(File::create(self.dir.join(bundle_file_name(self.file_id)))?);
        self.file_size = 0;
        Ok(())
    }

    /// Append one packet. Returns `false` without writing when this is a
    /// delta writer and the base already holds the key.
    pub fn append_packet(
        &mut self,
        address: &str,
        packet_type: u8,
        channel: u16,
        data: &[u8],
    ) -> Result<bool> {
        if self.closed {
            return Err(PacketFileError::Closed(self.dir.clone()));
        }
        let packet_size =
            u32::try_from(data.len()).map_err(|_| PacketFileError::PacketTooLarge(data.len()))?;
        let mut item = IndexItem::new(address, packet_type, channel)?;
        if let Some(base) = self.base.as_mut() {
            let mut lookup = item;
            if base.find_packet_in_index(&mut lookup)? {
                return Ok(false);
            }
        }
        if self.file_size > 0 && self.file_size + data.len() as u64 > self.max_file_size {
            self.next_file()?;
        }
        self.file.write_all(data)?;
        item.file_id = self.file_id;
        item.offset = self.file_size;
        item.packet_size = packet_size;
        self.items.push(item);
        self.file_size += data.len() as u64;
        Ok(true)
    }

    /// Flush the last bundle file and write the sorted index
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(PacketFileError::Closed(self.dir.clone()));
        }
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        self.items.sort();
        let duplicates = self.items.windows(2).filter(|w| w[0] == w[1]).count();
        if duplicates > 0 {
            warn!(
                "portable bundle {:?} holds {} duplicate keys",
                self.dir, duplicates
            );
        }
        let mut index = BufWriter::new(File::create(self.dir.join(PORTABLE_INDEX_FILE_NAME))?);
        for item in &self.items {
            index.write_all(&item.encode())?;
        }
        index.flush()?;
        index.get_ref().sync_all()?;
        self.closed = true;
        info!(
            "closed portable bundle {:?}: {} packets in {} files",
            self.dir,
            self.items.len(),
            self.file_count()
        );
        Ok(())
    }
}

impl Drop for PacketBundleWriter {
    fn drop(&mut self) {
        if !self.closed {
            warn!("portable bundle {:?} dropped without close", self.dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::portable::item::{IMAGE_PACKET, QTP_PACKET};
    use crate::portable::reader::PacketBundleReader;

    #[test]
    fn test_rotation_and_lookup() {
        let dir = TempDir::new().unwrap();
        let mut writer = PacketBundleWriter::create(dir.path(), 250).unwrap();
        let addresses = ["0", "01", "012", "0123", "02", "03"];
        for (i, address) in addresses.iter().rev().enumerate() {
            let data = vec![i as u8; 100];
            assert!(writer.append_packet(address, IMAGE_PACKET, 0, &data).unwrap());
        }
        assert_eq!(writer.file_count(), 3);
        writer.close().unwrap();
        assert!(writer.append_packet("0", QTP_PACKET, 0, b"late").is_err());

        let mut reader = PacketBundleReader::open(dir.path()).unwrap();
        assert_eq!(reader.packet_count(), 6);
        let mut buf = Vec::new();
        for (i, address) in addresses.iter().rev().enumerate() {
            assert!(reader.read_packet(address, IMAGE_PACKET, 0, &mut buf).unwrap());
            assert_eq!(buf, vec![i as u8; 100]);
        }
        assert!(!reader.read_packet("013", IMAGE_PACKET, 0, &mut buf).unwrap());
        assert!(!reader.read_packet("0", QTP_PACKET, 0, &mut buf).unwrap());
    }

    #[test]
    fn test_oversized_packet_gets_own_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = PacketBundleWriter::create(dir.path(), 10).unwrap();
        writer.append_packet("0", IMAGE_PACKET, 0, &[1u8; 50]).unwrap();
        writer.append_packet("00", IMAGE_PACKET, 0, &[2u8; 5]).unwrap();
        assert_eq!(writer.file_count(), 2);
        writer.close().unwrap();

        let mut reader = PacketBundleReader::open(dir.path()).unwrap();
        let item = reader.find("00", IMAGE_PACKET, 0).unwrap().unwrap();
        assert_eq!(item.file_id, 1);
        assert_eq!(item.offset, 0);
    }

    #[test]
    fn test_smaller_rewrite_drops_old_files() {
        let dir = TempDir::new().unwrap();
        let mut writer = PacketBundleWriter::create(dir.path(), 100).unwrap();
        for address in ["0", "1", "2", "3"] {
            writer.append_packet(address, IMAGE_PACKET, 0, &[3u8; 100]).unwrap();
        }
        assert_eq!(writer.file_count(), 4);
        writer.close().unwrap();

        let mut writer = PacketBundleWriter::create(dir.path(), 100).unwrap();
        writer.append_packet("2", IMAGE_PACKET, 0, b"small").unwrap();
        writer.close().unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["index", "pbundle_0000"]);
        let mut reader = PacketBundleReader::open(dir.path()).unwrap();
        assert_eq!(reader.packet_count(), 1);
        let mut buf = Vec::new();
        assert!(reader.read_packet("2", IMAGE_PACKET, 0, &mut buf).unwrap());
        assert_eq!(buf, b"small");
    }

    #[test]
    fn test_bad_address() {
        let dir = TempDir::new().unwrap();
        let mut writer = PacketBundleWriter::create(dir.path(), 1000).unwrap();
        assert!(writer.append_packet("5", IMAGE_PACKET, 0, b"x").is_err());
        writer.close().unwrap();
    }
}
