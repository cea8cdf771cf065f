use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use dashmap::DashMap;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::crc::{append_crc, CRC_SIZE};
use crate::error::{BundleError, Result};
use crate::header::{
    parse_segment_file_name, segment_file_name, BundleHeader, SegmentInfo, HEADER_FILE_NAME,
    SEGMENT_FILE_COUNT_MAX,
};

#[derive(Debug)]
struct WriterState {
    // allocated bytes of each segment, the last one is the open segment
    sizes: Vec<u32>,
    closed: bool,
}

/// Writer for a multi-segment bundle.
///
/// Space is reserved with [`FileBundleWriter::allocate`] under a mutex; the
/// bytes themselves are written with positioned writes, so several threads may
/// fill disjoint allocated ranges at the same time. A record never spans two
/// segments.
#[derive(Debug)]
pub struct FileBundleWriter {
    dir: PathBuf,
    segment_break: u64,
    segments: DashMap<u32, Arc<File>>,
    state: Mutex<WriterState>,
}

impl FileBundleWriter {
    /// Create a bundle in `dir`, creating the directory if needed. A header
    /// left behind by an earlier bundle is removed first so a crash before
    /// [`close`](Self::close) never leaves a valid-looking bundle.
    ///
    /// # Parameters
    ///
    /// - `dir`: The bundle directory
    /// - `segment_break`: The maximum size of one segment file, at most `u32::MAX`
    ///
    /// # Returns
    ///
    /// A `Result` which is:
    ///
    /// - `Ok`: A writer with one empty segment
    /// - `Err`: An invalid segment break or a file system error
    pub fn create(dir: impl AsRef<Path>, segment_break: u64) -> Result<FileBundleWriter> {
        if segment_break == 0 || segment_break > u32::MAX as u64 {
            return Err(BundleError::InvalidSegmentBreak(segment_break));
        }
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let header_path = dir.join(HEADER_FILE_NAME);
        if header_path.exists() {
            debug!("removing stale bundle header {:?}", header_path);
            fs::remove_file(&header_path)?;
        }
        remove_stale_segments(&dir)?;

        let writer = FileBundleWriter {
            dir,
            segment_break,
            segments: DashMap::new(),
            state: Mutex::new(WriterState {
                sizes: Vec::new(),
                closed: false,
            }),
        };
        writer.open_segment(0)?;
        writer.state.lock().sizes.push(0);
        Ok(writer)
    }

    fn open_segment(&self, id: u32) -> Result<()> {
        let path = self.dir.join(segment_file_name(id as usize));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        self.segments.insert(id, Arc::new(file));
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_break(&self) -> u64 {
        self.segment_break
    }

    pub fn segment_count(&self) -> usize {
        self.state.lock().sizes.len()
    }

    /// Total number of bytes allocated so far, over all segments
    pub fn data_size(&self) -> u64 {
        self.state.lock().sizes.iter().map(|s| *s as u64).sum()
    }

    /// Reserve `size` bytes and return the bundle position of the range.
    /// Opens a new segment when the current one is non-empty and cannot hold it.
    pub fn allocate(&self, size: u64) -> Result<u64> {
        if size > self.segment_break {
            return Err(BundleError::RecordTooLarge {
                size,
                segment_break: self.segment_break,
            });
        }
        let mut state = self.state.lock();
        if state.closed {
            return Err(BundleError::Closed(self.dir.clone()));
        }
        let mut current = state.sizes.len() - 1;
        let used = state.sizes[current] as u64;
        if used > 0 && used + size > self.segment_break {
            if state.sizes.len() >= SEGMENT_FILE_COUNT_MAX {
                return Err(BundleError::TooManySegments(self.dir.clone()));
            }
            current += 1;
            self.open_segment(current as u32)?;
            state.sizes.push(0);
        }
        let offset = state.sizes[current] as u64;
        state.sizes[current] = (offset + size) as u32;
        Ok(current as u64 * self.segment_break + offset)
    }

    /// Write `bz` at a previously allocated `position`
    pub fn write_at(&self, position: u64, bz: &[u8]) -> Result<()> {
        let segment = (position / self.segment_break) as u32;
        let offset = position % self.segment_break;
        {
            let state = self.state.lock();
            if state.closed {
                return Err(BundleError::Closed(self.dir.clone()));
            }
            let allocated = state.sizes.get(segment as usize).copied().unwrap_or(0) as u64;
            if offset + bz.len() as u64 > allocated {
                return Err(BundleError::OutOfRange {
                    position,
                    len: bz.len(),
                });
            }
        }
        let file = self
            .segments
            .get(&segment)
            .map(|f| f.value().clone())
            .ok_or(BundleError::OutOfRange {
                position,
                len: bz.len(),
            })?;
        file.write_all_at(bz, offset)?;
        Ok(())
    }

    /// Write `payload` followed by its CRC at an allocated `position`.
    /// The allocation must be `payload.len() + CRC_SIZE` bytes.
    pub fn write_at_crc(&self, position: u64, payload: &[u8]) -> Result<()> {
        let mut record = Vec::with_capacity(payload.len() + CRC_SIZE);
        record.extend_from_slice(payload);
        append_crc(&mut record);
        self.write_at(position, &record)
    }

    pub fn append(&self, bz: &[u8]) -> Result<u64> {
        let position = self.allocate(bz.len() as u64)?;
        self.write_at(position, bz)?;
        Ok(position)
    }

    /// Append `payload ++ crc32(payload)` and return its position
    pub fn append_crc(&self, payload: &[u8]) -> Result<u64> {
        let position = self.allocate((payload.len() + CRC_SIZE) as u64)?;
        self.write_at_crc(position, payload)?;
        Ok(position)
    }

    /// Flush all segments and write the header. Allocated ranges that were
    /// never written read back as zeros.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BundleError::Closed(self.dir.clone()));
        }
        state.closed = true;

        let mut segments = Vec::with_capacity(state.sizes.len());
        for (id, size) in state.sizes.iter().enumerate() {
            if let Some(file) = self.segments.get(&(id as u32)) {
                file.set_len(*size as u64)?;
                file.sync_all()?;
            }
            segments.push(SegmentInfo {
                name: segment_file_name(id),
                data_size: *size,
            });
        }
        self.segments.clear();

        let header = BundleHeader {
            segment_break: self.segment_break,
            segments,
        };
        let header_path = self.dir.join(HEADER_FILE_NAME);
        let file = File::create(&header_path)?;
        file.write_all_at(&header.encode(), 0)?;
        file.sync_all()?;
        debug!(
            "closed bundle {:?}: {} segments",
            self.dir,
            header.segments.len()
        );
        Ok(())
    }
}

// Segment 0 is truncated when it is reopened, later ones would outlive a
// smaller rewrite.
fn remove_stale_segments(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let id = match name.to_str().and_then(parse_segment_file_name) {
            Some(id) => id,
            None => continue,
        };
        if id > 0 && entry.file_type()?.is_file() {
            debug!("removing stale segment {:?}", entry.path());
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

impl Drop for FileBundleWriter {
    fn drop(&mut self) {
        if !self.state.get_mut().closed {
            warn!("bundle {:?} dropped without close, no header written", self.dir);
        }
    }
}
