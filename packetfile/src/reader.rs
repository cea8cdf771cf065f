use std::fs;
use std::path::{Path, PathBuf};

use filebundle::{BundleError, FileBundleReader, CRC_SIZE, HEADER_FILE_NAME};

use crate::def::{INDEX_FILE_NAME, INDEX_HEADER_SIZE};
use crate::error::{PacketFileError, Result};
use crate::index::{PacketIndexEntry, PacketIndexReader};
use crate::qtpath::QuadtreePath;

/// A file belonging to a packet file, with its size on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub data_size: u64,
}

/// Positional access to the records of a packet file, without its index.
/// This is what the reader pool hands out.
#[derive(Debug)]
pub struct PacketFileReaderBase {
    dir: PathBuf,
    bundle: FileBundleReader,
}

impl PacketFileReaderBase {
    pub fn open(dir: impl AsRef<Path>) -> Result<PacketFileReaderBase> {
        let dir = dir.as_ref().to_path_buf();
        let bundle = FileBundleReader::open(&dir)?;
        Ok(PacketFileReaderBase { dir, bundle })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn enable_read_cache(&mut self, max_blocks: usize, block_size: usize) {
        self.bundle.enable_read_cache(max_blocks, block_size);
    }

    /// Read `buf.len()` bytes at a bundle position
    pub fn read_at(&self, position: u64, buf: &mut [u8]) -> Result<()> {
        self.bundle.read_at(position, buf)?;
        Ok(())
    }

    /// Fail unless `len` bytes at `position` are inside the bundle
    pub fn check_range(&self, position: u64, len: usize) -> Result<()> {
        self.bundle.check_range(position, len).map_err(|e| match e {
            BundleError::OutOfRange { position, len } => PacketFileError::CorruptRecord(format!(
                "record of {} bytes at {} is outside the bundle",
                len, position
            )),
            other => other.into(),
        })?;
        Ok(())
    }

    /// Read a CRC'd record of `record_size` bytes and return its payload
    pub fn read_at_crc(&self, position: u64, record_size: usize) -> Result<Vec<u8>> {
        if record_size <= CRC_SIZE {
            return Err(PacketFileError::CorruptRecord(format!(
                "record of {} bytes at {} cannot hold a CRC",
                record_size, position
            )));
        }
        self.check_range(position, record_size)?;
        Ok(self.bundle.read_at_crc(position, record_size)?)
    }

    /// Header, segments and index of the packet file
    pub fn manifest(&self) -> Result<Vec<ManifestEntry>> {
        let mut files = vec![self.dir.join(HEADER_FILE_NAME)];
        files.extend(self.bundle.segment_names().map(|name| self.dir.join(name)));
        files.push(self.dir.join(INDEX_FILE_NAME));
        files
            .into_iter()
            .map(|path| -> Result<ManifestEntry> {
                let data_size = fs::metadata(&path)?.len();
                Ok(ManifestEntry { path, data_size })
            })
            .collect()
    }
}

/// Reads a packet file in index (preorder) order, or looks up single paths.
#[derive(Debug)]
pub struct PacketFileReader {
    base: PacketFileReaderBase,
    index: PacketIndexReader,
}

impl PacketFileReader {
    pub fn open(dir: impl AsRef<Path>) -> Result<PacketFileReader> {
        let base = PacketFileReaderBase::open(dir)?;
        let index = PacketIndexReader::open(base.dir().join(INDEX_FILE_NAME))?;
        Ok(PacketFileReader { base, index })
    }

    pub fn base(&self) -> &PacketFileReaderBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut PacketFileReaderBase {
        &mut self.base
    }

    pub fn data_has_crc(&self) -> bool {
        self.index.data_has_crc()
    }

    pub fn num_packets(&self) -> u64 {
        self.index.entry_count()
    }

    fn read_record(&self, entry: &PacketIndexEntry, buf: &mut Vec<u8>) -> Result<()> {
        let record_size = entry.record_size() as usize;
        self.base.check_range(entry.position(), record_size)?;
        buf.resize(record_size, 0);
        self.base.read_at(entry.position(), buf)
    }

    /// Read the next record as stored (CRC included when present) into
    /// `buf`. Returns its path, or `None` at the end of the index.
    pub fn read_next(&mut self, buf: &mut Vec<u8>) -> Result<Option<QuadtreePath>> {
        match self.index.read_next()? {
            Some(entry) => {
                self.read_record(&entry, buf)?;
                Ok(Some(entry.qt_path()))
            }
            None => Ok(None),
        }
    }

    /// Read the next record, check its CRC and leave only the payload in
    /// `buf`
    pub fn read_next_crc(&mut self, buf: &mut Vec<u8>) -> Result<Option<QuadtreePath>> {
        match self.index.read_next()? {
            Some(entry) => {
                *buf = self
                    .base
                    .read_at_crc(entry.position(), entry.record_size() as usize)?;
                Ok(Some(entry.qt_path()))
            }
            None => Ok(None),
        }
    }

    /// Restart `read_next` from the first entry
    pub fn rewind(&mut self) -> Result<()> {
        self.index.seek(INDEX_HEADER_SIZE as u64)
    }

    /// Look up the packet stored for `qt_path`. The CRC is checked and
    /// stripped when the file carries CRCs.
    pub fn find_packet(&mut self, qt_path: &QuadtreePath) -> Result<Option<Vec<u8>>> {
        let entry = match self.index.find(qt_path)? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if self.data_has_crc() {
            let payload = self
                .base
                .read_at_crc(entry.position(), entry.record_size() as usize)?;
            return Ok(Some(payload));
        }
        let mut buf = Vec::new();
        self.read_record(&entry, &mut buf)?;
        Ok(Some(buf))
    }
}
