use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use log::{debug, info, warn};
use parking_lot::Mutex;
use rayon::slice::ParallelSliceMut;

use crate::def::{
    INDEX_ENTRY_SIZE, INDEX_HEADER_SIZE, INDEX_SORT_SUFFIX, INDEX_TEMP_SUFFIX, MAX_LEVEL,
    MIN_SORT_BUFFER,
};
use crate::error::{PacketFileError, Result};
use crate::index::entry::{encode_index_header, PacketIndexEntry};
use crate::index::merge::merge_regions;
use crate::index::reader::PacketIndexReader;
use crate::index::SortedRegion;
use crate::qtpath::QuadtreePath;

/// How `close` turned the temporary index into the final one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStrategy {
    /// Appended in preorder (or empty), renamed as is
    Rename,
    /// Each level appended in order, levels merged
    LevelMerge,
    /// No usable order, sorted in memory-bounded runs
    ExternalSort { runs: usize },
}

#[derive(Debug)]
struct IndexState {
    next_pos: u64,
    entry_count: u64,
    is_preorder: bool,
    is_level_ordered: bool,
    level_regions: Vec<SortedRegion>,
    last_path: QuadtreePath,
    closed: bool,
}

impl IndexState {
    fn update_preorder(&mut self, new_path: &QuadtreePath) {
        self.is_preorder = self.is_preorder && !(*new_path < self.last_path);
    }

    // Same level as the previous record: must not precede it. New level:
    // nothing may have been written at that level before.
    fn update_level_ordered(&mut self, new_path: &QuadtreePath, index_pos: u64) {
        if !self.is_level_ordered {
            return;
        }
        let same_level = new_path.level() == self.last_path.level();
        let region = &mut self.level_regions[new_path.level() as usize];
        let out_of_order = if same_level {
            *new_path < self.last_path
        } else {
            region.count != 0
        };
        if out_of_order {
            self.is_level_ordered = false;
        } else {
            if region.count == 0 {
                region.position = index_pos;
            }
            region.count += 1;
        }
    }
}

/// Builds the `packetindex` file of a packet file.
///
/// Entries go to `<index>.tmp` in arrival order. While appending, the writer
/// tracks whether the input is still in preorder and whether each level was
/// appended in order; `close` uses that to pick the cheapest way to produce a
/// sorted index. A stale final index is deleted up front so a writer that dies
/// never leaves an index that disagrees with its bundle.
#[derive(Debug)]
pub struct PacketIndexWriter {
    index_path: PathBuf,
    temp_path: PathBuf,
    data_has_crc: bool,
    file: File,
    state: Mutex<IndexState>,
}

fn create_index_file(path: &Path, data_has_crc: bool) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all_at(&encode_index_header(data_has_crc), 0)?;
    Ok(file)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

impl PacketIndexWriter {
    pub fn create(index_path: impl AsRef<Path>, data_has_crc: bool) -> Result<PacketIndexWriter> {
        let index_path = index_path.as_ref().to_path_buf();
        if index_path.exists() {
            debug!("removing stale index {:?}", index_path);
            fs::remove_file(&index_path)?;
        }
        let temp_path = with_suffix(&index_path, INDEX_TEMP_SUFFIX);
        let file = create_index_file(&temp_path, data_has_crc)?;
        Ok(PacketIndexWriter {
            index_path,
            temp_path,
            data_has_crc,
            file,
            state: Mutex::new(IndexState {
                next_pos: INDEX_HEADER_SIZE as u64,
                entry_count: 0,
                is_preorder: true,
                is_level_ordered: true,
                level_regions: vec![SortedRegion::default(); MAX_LEVEL as usize + 1],
                last_path: QuadtreePath::root(),
                closed: false,
            }),
        })
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn data_has_crc(&self) -> bool {
        self.data_has_crc
    }

    pub fn entry_count(&self) -> u64 {
        self.state.lock().entry_count
    }

    pub fn write_append(&self, entry: &PacketIndexEntry) -> Result<()> {
        let pos = self.allocate_append(&entry.qt_path())?;
        self.write_at(pos, entry)
    }

    /// Reserve the next index slot for `qt_path` and return its file offset.
    /// The slot must be filled with `write_at` before `close`.
    pub fn allocate_append(&self, qt_path: &QuadtreePath) -> Result<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PacketFileError::Closed(self.index_path.clone()));
        }
        let pos = state.next_pos;
        state.next_pos += INDEX_ENTRY_SIZE as u64;
        state.entry_count += 1;
        state.update_preorder(qt_path);
        state.update_level_ordered(qt_path, pos);
        state.last_path = *qt_path;
        Ok(pos)
    }

    pub fn write_at(&self, pos: u64, entry: &PacketIndexEntry) -> Result<()> {
        if self.state.lock().closed {
            return Err(PacketFileError::Closed(self.index_path.clone()));
        }
        self.file.write_all_at(&entry.encode(), pos)?;
        Ok(())
    }

    /// Produce the final sorted index. `max_sort_buffer` bounds the memory
    /// used when a full sort is needed.
    pub fn close(&self, max_sort_buffer: usize) -> Result<CloseStrategy> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PacketFileError::Closed(self.index_path.clone()));
        }
        state.closed = true;
        self.file.sync_all()?;

        if state.entry_count == 0 || state.is_preorder {
            fs::rename(&self.temp_path, &self.index_path)?;
            return Ok(CloseStrategy::Rename);
        }
        if state.is_level_ordered {
            let merged = merge_regions(
                &self.temp_path,
                &state.level_regions,
                &self.index_path,
                self.data_has_crc,
            )?;
            debug!("merged {} level ordered entries", merged);
            self.remove_scratch(&self.temp_path);
            return Ok(CloseStrategy::LevelMerge);
        }
        let runs = self.sort_index(max_sort_buffer)?;
        Ok(CloseStrategy::ExternalSort { runs })
    }

    fn remove_scratch(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            warn!("failed to unlink {:?}: {}", path, e);
        }
    }

    // Sort runs of at most max_sort_buffer bytes into <index>.sort.tmp, then
    // rename a single run or merge several into the final index.
    fn sort_index(&self, mut max_sort_buffer: usize) -> Result<usize> {
        if max_sort_buffer < MIN_SORT_BUFFER {
            info!(
                "sort buffer size limit {} is less than minimum {}, using minimum",
                max_sort_buffer, MIN_SORT_BUFFER
            );
            max_sort_buffer = MIN_SORT_BUFFER;
        }

        let mut unsorted = PacketIndexReader::open(&self.temp_path)?;
        let entry_count = unsorted.entry_count();
        let buffer_count = u64::min(entry_count, (max_sort_buffer / INDEX_ENTRY_SIZE) as u64);
        let sort_path = with_suffix(&self.index_path, INDEX_SORT_SUFFIX);
        let mut out = BufWriter::new(File::create(&sort_path)?);
        out.write_all(&encode_index_header(self.data_has_crc))?;

        let mut regions = Vec::new();
        let mut buffer = Vec::with_capacity(buffer_count as usize);
        let mut write_pos = INDEX_HEADER_SIZE as u64;
        let mut remaining = entry_count;
        while remaining > 0 {
            let read_count = u64::min(remaining, buffer_count);
            buffer.clear();
            for _ in 0..read_count {
                match unsorted.read_next()? {
                    Some(entry) => buffer.push(entry),
                    None => {
                        return Err(PacketFileError::corrupt_index(
                            &self.temp_path,
                            "index ends early",
                        ))
                    }
                }
            }
            buffer.par_sort_unstable();
            regions.push(SortedRegion {
                position: write_pos,
                count: read_count as u32,
            });
            for entry in &buffer {
                out.write_all(&entry.encode())?;
            }
            write_pos += read_count * INDEX_ENTRY_SIZE as u64;
            remaining -= read_count;
        }
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        drop(unsorted);
        self.remove_scratch(&self.temp_path);

        if regions.len() == 1 {
            fs::rename(&sort_path, &self.index_path)?;
            debug!("sorted {} entries in memory", entry_count);
        } else {
            merge_regions(&sort_path, &regions, &self.index_path, self.data_has_crc)?;
            self.remove_scratch(&sort_path);
            debug!(
                "sorted {} entries using a merge of {} runs",
                entry_count,
                regions.len()
            );
        }
        Ok(regions.len())
    }
}

impl Drop for PacketIndexWriter {
    fn drop(&mut self) {
        if !self.state.get_mut().closed {
            warn!("index {:?} not closed properly", self.index_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::INDEX_FILE_NAME;

    fn qt(s: &str) -> QuadtreePath {
        s.parse().unwrap()
    }

    fn write_paths(writer: &PacketIndexWriter, paths: &[&str]) {
        for (i, p) in paths.iter().enumerate() {
            writer
                .write_append(&PacketIndexEntry::new(qt(p), i as u64 * 10, 10, 0))
                .unwrap();
        }
    }

    fn read_paths(index: &Path) -> Vec<String> {
        PacketIndexReader::open(index)
            .unwrap()
            .map(|e| e.unwrap().qt_path().to_string())
            .collect()
    }

    #[test]
    fn test_preorder_is_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join(INDEX_FILE_NAME);
        let writer = PacketIndexWriter::create(&index, true).unwrap();
        write_paths(&writer, &["", "0", "00", "01", "1", "2", "2", "3"]);
        assert_eq!(writer.close(0).unwrap(), CloseStrategy::Rename);
        assert!(!with_suffix(&index, INDEX_TEMP_SUFFIX).exists());
        assert_eq!(read_paths(&index), vec!["", "0", "00", "01", "1", "2", "2", "3"]);
    }

    #[test]
    fn test_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join(INDEX_FILE_NAME);
        let writer = PacketIndexWriter::create(&index, false).unwrap();
        assert_eq!(writer.close(0).unwrap(), CloseStrategy::Rename);
        let reader = PacketIndexReader::open(&index).unwrap();
        assert_eq!(reader.entry_count(), 0);
        assert!(!reader.data_has_crc());
    }

    #[test]
    fn test_level_ordered_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join(INDEX_FILE_NAME);
        let writer = PacketIndexWriter::create(&index, true).unwrap();
        write_paths(&writer, &["01", "12", "33", "0", "2", "001", "300"]);
        assert_eq!(writer.close(0).unwrap(), CloseStrategy::LevelMerge);
        assert!(!with_suffix(&index, INDEX_TEMP_SUFFIX).exists());
        assert_eq!(
            read_paths(&index),
            vec!["0", "001", "01", "12", "2", "300", "33"]
        );
    }

    #[test]
    fn test_revisited_level_needs_sort() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join(INDEX_FILE_NAME);
        let writer = PacketIndexWriter::create(&index, true).unwrap();
        // level 2, then level 1, then level 2 again
        write_paths(&writer, &["01", "1", "00", "3", "2"]);
        assert_eq!(
            writer.close(0).unwrap(),
            CloseStrategy::ExternalSort { runs: 1 }
        );
        assert!(!with_suffix(&index, INDEX_SORT_SUFFIX).exists());
        assert_eq!(read_paths(&index), vec!["00", "01", "1", "2", "3"]);
    }

    #[test]
    fn test_external_sort_with_many_runs() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join(INDEX_FILE_NAME);
        let writer = PacketIndexWriter::create(&index, true).unwrap();
        let mut paths = Vec::new();
        let mut path = qt("00000");
        for _ in 0..200 {
            paths.push(path);
            path.advance_in_level();
        }
        // descending input is neither preorder nor level ordered
        for (i, path) in paths.iter().rev().enumerate() {
            writer
                .write_append(&PacketIndexEntry::new(*path, i as u64 * 8, 8, 0))
                .unwrap();
        }
        let strategy = writer.close(MIN_SORT_BUFFER).unwrap();
        let runs = match strategy {
            CloseStrategy::ExternalSort { runs } => runs,
            other => panic!("unexpected strategy {:?}", other),
        };
        assert!(runs > 1);
        let got: Vec<PacketIndexEntry> = PacketIndexReader::open(&index)
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(got.len(), 200);
        assert!(got.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_stale_index_removed() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join(INDEX_FILE_NAME);
        fs::write(&index, b"stale").unwrap();
        let writer = PacketIndexWriter::create(&index, true).unwrap();
        assert!(!index.exists());
        writer.close(0).unwrap();
        assert!(index.exists());
        assert!(writer.write_append(&PacketIndexEntry::default()).is_err());
    }

    #[test]
    fn test_find() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join(INDEX_FILE_NAME);
        let writer = PacketIndexWriter::create(&index, true).unwrap();
        write_paths(&writer, &["3", "1", "20", "0", "21"]);
        writer.close(0).unwrap();
        let mut reader = PacketIndexReader::open(&index).unwrap();
        assert_eq!(reader.find(&qt("20")).unwrap().unwrap().position(), 20);
        assert_eq!(reader.find(&qt("3")).unwrap().unwrap().position(), 0);
        assert!(reader.find(&qt("2")).unwrap().is_none());
        assert!(reader.find(&qt("33")).unwrap().is_none());
        assert_eq!(PacketIndexReader::num_packets(&index).unwrap(), 5);
    }
}
