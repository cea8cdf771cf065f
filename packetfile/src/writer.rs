use std::fs;
use std::path::{Path, PathBuf};

use filebundle::{FileBundleWriter, CRC_SIZE};
use log::info;
use parking_lot::Mutex;

use crate::config::Config;
use crate::def::INDEX_FILE_NAME;
use crate::error::{PacketFileError, Result};
use crate::index::{CloseStrategy, PacketIndexEntry, PacketIndexWriter};
use crate::qtpath::QuadtreePath;

/// Space reserved by [`PacketFileWriter::allocate_append`]: an index slot and
/// a bundle range, to be filled later by `write_at_crc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedBlock {
    qt_path: QuadtreePath,
    index_pos: u64,
    position: u64,
    record_size: u32,
}

impl AllocatedBlock {
    pub fn qt_path(&self) -> QuadtreePath {
        self.qt_path
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Stored size including the CRC
    pub fn record_size(&self) -> u32 {
        self.record_size
    }
}

/// Writes packets keyed by quadtree path into a packet file directory: a
/// file bundle for the data plus a `packetindex`.
///
/// All methods take `&self`; producers on different threads may append or
/// fill allocated blocks concurrently. Bundle range and index slot are
/// reserved together so index order follows bundle order.
#[derive(Debug)]
pub struct PacketFileWriter {
    dir: PathBuf,
    max_sort_buffer: usize,
    bundle: FileBundleWriter,
    index: PacketIndexWriter,
    alloc_lock: Mutex<()>,
}

impl PacketFileWriter {
    /// Create a packet file in `config.dir`, replacing any earlier one.
    pub fn create(config: &Config) -> Result<PacketFileWriter> {
        let dir = PathBuf::from(&config.dir);
        fs::create_dir_all(&dir)?;
        let index = PacketIndexWriter::create(dir.join(INDEX_FILE_NAME), config.data_has_crc)?;
        let bundle = FileBundleWriter::create(&dir, config.segment_break)?;
        info!(
            "creating packet file {:?}, segment break {}",
            dir, config.segment_break
        );
        Ok(PacketFileWriter {
            dir,
            max_sort_buffer: config.max_sort_buffer,
            bundle,
            index,
            alloc_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_count(&self) -> u64 {
        self.index.entry_count()
    }

    fn allocate(&self, qt_path: &QuadtreePath, record_size: usize) -> Result<AllocatedBlock> {
        let _guard = self.alloc_lock.lock();
        let position = self.bundle.allocate(record_size as u64)?;
        let index_pos = self.index.allocate_append(qt_path)?;
        Ok(AllocatedBlock {
            qt_path: *qt_path,
            index_pos,
            position,
            record_size: record_size as u32,
        })
    }

    fn index_block(&self, block: &AllocatedBlock) -> Result<()> {
        let entry = PacketIndexEntry::new(block.qt_path, block.position, block.record_size, 0);
        self.index.write_at(block.index_pos, &entry)
    }

    /// Store `record` as is and return its bundle position
    pub fn write_append(&self, qt_path: &QuadtreePath, record: &[u8]) -> Result<u64> {
        let block = self.allocate(qt_path, record.len())?;
        self.bundle.write_at(block.position, record)?;
        self.index_block(&block)?;
        Ok(block.position)
    }

    /// Store `payload` followed by its CRC and return its bundle position
    pub fn write_append_crc(&self, qt_path: &QuadtreePath, payload: &[u8]) -> Result<u64> {
        let block = self.allocate(qt_path, payload.len() + CRC_SIZE)?;
        self.bundle.write_at_crc(block.position, payload)?;
        self.index_block(&block)?;
        Ok(block.position)
    }

    /// Reserve room for a `payload_size` byte payload plus CRC. The index
    /// slot is taken now, so ordering is decided by allocation order, not
    /// by the order blocks are filled.
    pub fn allocate_append(
        &self,
        qt_path: &QuadtreePath,
        payload_size: usize,
    ) -> Result<AllocatedBlock> {
        self.allocate(qt_path, payload_size + CRC_SIZE)
    }

    /// Fill a block from `allocate_append` with `payload` and its CRC
    pub fn write_at_crc(
        &self,
        qt_path: &QuadtreePath,
        payload: &[u8],
        block: &AllocatedBlock,
    ) -> Result<()> {
        if *qt_path != block.qt_path {
            return Err(PacketFileError::InvalidPath(format!(
                "{} written to block allocated for {}",
                qt_path, block.qt_path
            )));
        }
        let expected = block.record_size as usize - CRC_SIZE;
        if payload.len() != expected {
            return Err(PacketFileError::BlockSizeMismatch {
                expected,
                actual: payload.len(),
            });
        }
        self.bundle.write_at_crc(block.position, payload)?;
        self.index_block(block)
    }

    /// Index `qt_path` as a second key for the record of `block`
    pub fn write_duplicate(&self, qt_path: &QuadtreePath, block: &AllocatedBlock) -> Result<()> {
        let entry = PacketIndexEntry::new(*qt_path, block.position, block.record_size, 0);
        self.index.write_append(&entry)
    }

    pub fn close(&self) -> Result<CloseStrategy> {
        self.close_with_sort_buffer(self.max_sort_buffer)
    }

    /// Close the bundle, then sort the index within `max_sort_buffer` bytes
    pub fn close_with_sort_buffer(&self, max_sort_buffer: usize) -> Result<CloseStrategy> {
        self.bundle.close()?;
        let strategy = self.index.close(max_sort_buffer)?;
        info!(
            "closed packet file {:?}: {} entries, {:?}",
            self.dir,
            self.index.entry_count(),
            strategy
        );
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::reader::PacketFileReader;

    const TEST_DIR: &str = "./test-packetfile-writer";

    fn fresh_config() -> Config {
        let _ = fs::remove_dir_all(TEST_DIR);
        let mut config = Config::from_dir(TEST_DIR);
        config.set_segment_break(64);
        config
    }

    #[test]
    #[serial]
    fn test_records_rotate_segments() {
        let config = fresh_config();
        let writer = PacketFileWriter::create(&config).unwrap();
        let mut positions = Vec::new();
        for (i, path) in ["0", "1", "2", "3"].iter().enumerate() {
            let payload = vec![i as u8; 28];
            positions.push(writer.write_append_crc(&path.parse().unwrap(), &payload).unwrap());
        }
        assert_eq!(positions, vec![0, 32, 64, 96]);
        writer.close().unwrap();

        let mut reader = PacketFileReader::open(TEST_DIR).unwrap();
        assert_eq!(reader.num_packets(), 4);
        let two = reader.find_packet(&"2".parse().unwrap()).unwrap().unwrap();
        assert_eq!(two, vec![2u8; 28]);
        fs::remove_dir_all(TEST_DIR).unwrap();
    }

    #[test]
    #[serial]
    fn test_oversized_record_rejected() {
        let config = fresh_config();
        let writer = PacketFileWriter::create(&config).unwrap();
        let err = writer
            .write_append_crc(&QuadtreePath::root(), &[0u8; 61])
            .unwrap_err();
        assert!(matches!(err, PacketFileError::Bundle(_)));
        assert_eq!(writer.entry_count(), 0);
        writer.close().unwrap();
        fs::remove_dir_all(TEST_DIR).unwrap();
    }
}
