use std::fs::{self, File};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use log::debug;
use parking_lot::Mutex;

use crate::cache::ReadCache;
use crate::crc::{check_crc, CRC_SIZE};
use crate::error::{BundleError, Result};
use crate::header::{BundleHeader, HEADER_FILE_NAME};

/// Read-only view of a closed bundle. Shared between threads by reference;
/// the optional read cache is behind a mutex.
#[derive(Debug)]
pub struct FileBundleReader {
    dir: PathBuf,
    header: BundleHeader,
    segments: Vec<File>,
    cache: Mutex<Option<ReadCache>>,
}

impl FileBundleReader {
    /// Open the bundle in `dir`, validating the header and the size of
    /// every segment file against it.
    pub fn open(dir: impl AsRef<Path>) -> Result<FileBundleReader> {
        let dir = dir.as_ref().to_path_buf();
        let header_path = dir.join(HEADER_FILE_NAME);
        let bz = fs::read(&header_path)?;
        let header = BundleHeader::decode(&bz, &header_path)?;

        let mut segments = Vec::with_capacity(header.segments.len());
        for seg in &header.segments {
            let path = dir.join(&seg.name);
            let file = File::open(&path)?;
            let len = file.metadata()?.len();
            if len != seg.data_size as u64 {
                return Err(BundleError::corrupt(
                    path,
                    format!("segment is {} bytes, header says {}", len, seg.data_size),
                ));
            }
            segments.push(file);
        }
        Ok(FileBundleReader {
            dir,
            header,
            segments,
            cache: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_break(&self) -> u64 {
        self.header.segment_break
    }

    pub fn segment_count(&self) -> usize {
        self.header.segments.len()
    }

    pub fn segment_names(&self) -> impl Iterator<Item = &str> {
        self.header.segments.iter().map(|s| s.name.as_str())
    }

    /// Total bytes of data over all segments
    pub fn data_size(&self) -> u64 {
        self.header.segments.iter().map(|s| s.data_size as u64).sum()
    }

    /// Cache reads in `max_blocks` blocks of `block_size` bytes.
    /// Fewer than two blocks disables caching.
    pub fn enable_read_cache(&mut self, max_blocks: usize, block_size: usize) {
        let cache = if max_blocks < 2 || block_size == 0 {
            debug!("read cache disabled for {:?}", self.dir);
            None
        } else {
            Some(ReadCache::new(max_blocks, block_size))
        };
        *self.cache.get_mut() = cache;
    }

    pub fn cache_stats(&self) -> Option<(u64, u64)> {
        self.cache.lock().as_ref().map(|c| c.stats())
    }

    /// Check that `len` bytes at bundle `position` lie inside one segment.
    /// Returns the segment number, its size and the offset within it.
    pub fn check_range(&self, position: u64, len: usize) -> Result<(usize, u64, u64)> {
        let segment = (position / self.header.segment_break) as usize;
        let offset = position % self.header.segment_break;
        let out_of_range = || BundleError::OutOfRange { position, len };
        let info = self.header.segments.get(segment).ok_or_else(out_of_range)?;
        let segment_size = info.data_size as u64;
        if offset + len as u64 > segment_size {
            return Err(out_of_range());
        }
        Ok((segment, segment_size, offset))
    }

    /// Read `buf.len()` bytes at bundle `position`. The range must lie
    /// inside one segment.
    pub fn read_at(&self, position: u64, buf: &mut [u8]) -> Result<()> {
        let (segment, segment_size, offset) = self.check_range(position, buf.len())?;
        let file = &self.segments[segment];
        if let Some(cache) = self.cache.lock().as_mut() {
            cache.read(segment, file, segment_size, offset, buf)?;
            return Ok(());
        }
        file.read_exact_at(buf, offset)?;
        Ok(())
    }

    /// Read a `len` byte record whose last four bytes are the CRC of the
    /// rest, returning the payload without the CRC.
    pub fn read_at_crc(&self, position: u64, len: usize) -> Result<Vec<u8>> {
        if len <= CRC_SIZE {
            return Err(BundleError::RecordTooSmall(len));
        }
        self.check_range(position, len)?;
        let mut record = vec![0u8; len];
        self.read_at(position, &mut record)?;
        if !check_crc(&record) {
            let segment = (position / self.header.segment_break) as usize;
            return Err(BundleError::CrcMismatch {
                path: self.dir.join(&self.header.segments[segment].name),
                offset: position % self.header.segment_break,
                len,
            });
        }
        record.truncate(len - CRC_SIZE);
        Ok(record)
    }

    /// Map an offset into the concatenation of all segments to a bundle
    /// position.
    pub fn linear_to_bundle_position(&self, linear: u64) -> Result<u64> {
        let mut start = 0u64;
        for (id, seg) in self.header.segments.iter().enumerate() {
            let size = seg.data_size as u64;
            if linear < start + size {
                return Ok(id as u64 * self.header.segment_break + (linear - start));
            }
            start += size;
        }
        Err(BundleError::OutOfRange {
            position: linear,
            len: 0,
        })
    }
}
