use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::def::{INDEX_ENTRY_SIZE, INDEX_HEADER_SIZE};
use crate::error::{PacketFileError, Result};
use crate::index::entry::{decode_index_header, PacketIndexEntry};
use crate::qtpath::QuadtreePath;

/// Sequential and random access to a packet index file.
///
/// Every entry is CRC-checked as it is read; a damaged header is reported by
/// [`open`](Self::open) and a damaged entry by the read that hits it.
#[derive(Debug)]
pub struct PacketIndexReader {
    path: PathBuf,
    file: BufReader<File>,
    data_has_crc: bool,
    file_size: u64,
    pos: u64,
}

impl PacketIndexReader {
    pub fn open(path: impl AsRef<Path>) -> Result<PacketIndexReader> {
        let path = path.as_ref().to_path_buf();
        let mut file = BufReader::new(File::open(&path)?);
        let file_size = file.get_ref().metadata()?.len();
        let mut header = [0u8; INDEX_HEADER_SIZE];
        if file_size < INDEX_HEADER_SIZE as u64 {
            return Err(PacketFileError::corrupt_index(&path, "short header"));
        }
        file.read_exact(&mut header)?;
        let data_has_crc = decode_index_header(&header, &path)?;
        let body = file_size - INDEX_HEADER_SIZE as u64;
        if body % INDEX_ENTRY_SIZE as u64 != 0 {
            return Err(PacketFileError::corrupt_index(
                &path,
                format!(
                    "{} bytes of entries is not a multiple of {}",
                    body, INDEX_ENTRY_SIZE
                ),
            ));
        }
        Ok(PacketIndexReader {
            path,
            file,
            data_has_crc,
            file_size,
            pos: INDEX_HEADER_SIZE as u64,
        })
    }

    /// Number of entries in the index at `path`, from its size alone
    pub fn num_packets(path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let size = fs::metadata(path)?.len();
        let body = size.saturating_sub(INDEX_HEADER_SIZE as u64);
        if size < INDEX_HEADER_SIZE as u64 || body % INDEX_ENTRY_SIZE as u64 != 0 {
            return Err(PacketFileError::corrupt_index(
                path,
                format!("{} bytes is not a whole number of entries", size),
            ));
        }
        Ok(body / INDEX_ENTRY_SIZE as u64)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data_has_crc(&self) -> bool {
        self.data_has_crc
    }

    pub fn entry_count(&self) -> u64 {
        (self.file_size - INDEX_HEADER_SIZE as u64) / INDEX_ENTRY_SIZE as u64
    }

    /// Byte offset of the next entry `read_next` returns
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Continue reading at byte offset `position` (the start of an entry)
    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        self.pos = position;
        Ok(())
    }

    pub fn read_next(&mut self) -> Result<Option<PacketIndexEntry>> {
        if self.pos + INDEX_ENTRY_SIZE as u64 > self.file_size {
            return Ok(None);
        }
        let mut bz = [0u8; INDEX_ENTRY_SIZE];
        self.file.read_exact(&mut bz)?;
        self.pos += INDEX_ENTRY_SIZE as u64;
        PacketIndexEntry::decode(&bz, &self.path).map(Some)
    }

    /// Entry number `n`; moves the read cursor just past it
    pub fn read_entry(&mut self, n: u64) -> Result<PacketIndexEntry> {
        self.seek(INDEX_HEADER_SIZE as u64 + n * INDEX_ENTRY_SIZE as u64)?;
        self.read_next()?.ok_or_else(|| {
            PacketFileError::corrupt_index(&self.path, format!("entry {} past end", n))
        })
    }

    /// Binary search a sorted index for the first entry keyed by `qt_path`
    pub fn find(&mut self, qt_path: &QuadtreePath) -> Result<Option<PacketIndexEntry>> {
        let mut lo = 0u64;
        let mut hi = self.entry_count();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.read_entry(mid)?.qt_path() < *qt_path {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == self.entry_count() {
            return Ok(None);
        }
        let entry = self.read_entry(lo)?;
        Ok((entry.qt_path() == *qt_path).then_some(entry))
    }
}

impl Iterator for PacketIndexReader {
    type Item = Result<PacketIndexEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}
