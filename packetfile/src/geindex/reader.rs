use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use super::addr::{
    bucket_level, bucket_path, child_slot, entry_slot, BundleAddr, ChildBucketAddr,
    ExternalDataAddress, QUAD_LEVELS_PER_BUCKET,
};
use super::bucket::{IndexBundle, LoadedChildBucket};
use super::entries::ReadableEntry;
use super::header::{GeIndexHeader, INDEX_HEADER_FILE_NAME};
use super::MAX_LEVELS_CACHED;
use crate::error::{PacketFileError, Result};
use crate::qtpath::QuadtreePath;
use crate::reader::{ManifestEntry, PacketFileReaderBase};

/// Random access to a geindex and the packets it points at.
///
/// Child buckets of the top `levels_cached` bucket levels stay in memory
/// once loaded. Packet files are opened on first use. All lookups take
/// `&self` and may run from many threads.
pub struct GeIndexReader<E: ReadableEntry> {
    index: IndexBundle,
    levels_cached: u32,
    child_cache: Mutex<HashMap<QuadtreePath, LoadedChildBucket>>,
    packet_files: Mutex<Vec<Option<Arc<PacketFileReaderBase>>>>,
    _entry: PhantomData<fn() -> E>,
}

impl<E: ReadableEntry> GeIndexReader<E> {
    /// Open the index at `dir`. `levels_cached` is clamped to
    /// 1..=[`MAX_LEVELS_CACHED`].
    pub fn open(dir: impl AsRef<Path>, levels_cached: u32) -> Result<GeIndexReader<E>> {
        let index = IndexBundle::open(dir)?;
        index.check_entry_kind::<E>()?;
        let header = index.header();
        let levels_cached = levels_cached.clamp(1, MAX_LEVELS_CACHED);
        let packet_files = vec![None; header.packet_files.len()];
        debug!(
            "opened geindex {:?}: {} packet files, {} levels cached",
            index.dir(),
            packet_files.len(),
            levels_cached
        );
        Ok(GeIndexReader {
            index,
            levels_cached,
            child_cache: Mutex::new(HashMap::new()),
            packet_files: Mutex::new(packet_files),
            _entry: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        self.index.dir()
    }

    pub fn header(&self) -> &GeIndexHeader {
        self.index.header()
    }

    pub fn packet_extra(&self, file_num: u32) -> u32 {
        self.header().packet_extra(file_num)
    }

    /// The entry `key` selects at `path`, if any
    pub fn get_entry(&self, path: &QuadtreePath, key: &E::ReadKey) -> Result<Option<E>> {
        let bucket = bucket_path(path);
        let Some(addr) = self.entry_bucket_addr(&bucket)? else {
            return Ok(None);
        };
        let slot = entry_slot(&bucket, path)
            .ok_or_else(|| PacketFileError::InvalidPath(path.to_string()))?;
        let slots = self.index.load_entry_bucket::<E>(addr)?;
        let Some((_, candidates)) = slots.into_iter().find(|(s, _)| *s == slot) else {
            return Ok(None);
        };
        Ok(E::select(key, candidates, |n| self.packet_extra(n)))
    }

    /// The packet `key` selects at `path`, if any
    pub fn get_data(&self, path: &QuadtreePath, key: &E::ReadKey) -> Result<Option<Vec<u8>>> {
        match self.get_entry(path, key)? {
            Some(entry) => Ok(Some(self.read_data(entry.data_address())?)),
            None => Ok(None),
        }
    }

    /// The entry at `path` or, failing that, at its closest ancestor below
    /// the root, with the path it was found at
    pub fn get_nearest_ancestor_entry(
        &self,
        path: &QuadtreePath,
        key: &E::ReadKey,
    ) -> Result<Option<(QuadtreePath, E)>> {
        let mut path = *path;
        while !path.is_root() {
            if let Some(entry) = self.get_entry(&path, key)? {
                return Ok(Some((path, entry)));
            }
            path = path.prefix(path.level() - 1);
        }
        Ok(None)
    }

    pub fn get_nearest_ancestor_data(
        &self,
        path: &QuadtreePath,
        key: &E::ReadKey,
    ) -> Result<Option<(QuadtreePath, Vec<u8>)>> {
        match self.get_nearest_ancestor_entry(path, key)? {
            Some((found, entry)) => Ok(Some((found, self.read_data(entry.data_address())?))),
            None => Ok(None),
        }
    }

    /// Read the CRC-checked packet at `addr` from its packet file
    pub fn read_data(&self, addr: ExternalDataAddress) -> Result<Vec<u8>> {
        let reader = self.packet_file(addr.file_num)?;
        reader.read_at_crc(addr.offset, addr.size as usize)
    }

    /// Index header and bundle files, without the packet files
    pub fn manifest(&self) -> Result<Vec<ManifestEntry>> {
        let dir = self.index.dir();
        let mut files = vec![
            dir.join(INDEX_HEADER_FILE_NAME),
            dir.join(filebundle::HEADER_FILE_NAME),
        ];
        files.extend(self.index.bundle().segment_names().map(|n| dir.join(n)));
        files
            .into_iter()
            .map(|path| {
                let size = std::fs::metadata(&path)?.len();
                Ok(ManifestEntry {
                    path,
                    data_size: size,
                })
            })
            .collect()
    }

    fn packet_file(&self, file_num: u32) -> Result<Arc<PacketFileReaderBase>> {
        let mut files = self.packet_files.lock();
        if let Some(Some(reader)) = files.get(file_num as usize) {
            return Ok(reader.clone());
        }
        let path: PathBuf = self
            .header()
            .packet_file_path(self.dir(), file_num)
            .ok_or_else(|| {
                PacketFileError::corrupt_index(
                    self.dir(),
                    format!("entry refers to missing packet file {}", file_num),
                )
            })?;
        let reader = Arc::new(PacketFileReaderBase::open(&path)?);
        debug!("geindex {:?} opened packet file {:?}", self.dir(), path);
        files[file_num as usize] = Some(reader.clone());
        Ok(reader)
    }

    /// Address of the entry bucket at `bucket`, walking child buckets down
    /// from the root
    fn entry_bucket_addr(&self, bucket: &QuadtreePath) -> Result<Option<BundleAddr>> {
        let header = self.header();
        let target = bucket_level(bucket);
        if target == 0 {
            let addr = header.root_entry_addr;
            return Ok(addr.is_valid().then_some(addr));
        }
        let mut parent = QuadtreePath::root();
        let mut parent_addr = header.root_child_addr;
        for level in 1..=target {
            if !parent_addr.is_valid() {
                return Ok(None);
            }
            let next = bucket.prefix(level * QUAD_LEVELS_PER_BUCKET);
            let slot = child_slot(&parent, &next)
                .ok_or_else(|| PacketFileError::InvalidPath(next.to_string()))?;
            if level == target {
                let addr = self.entry_addr_in(&parent, parent_addr, slot)?;
                return Ok(addr.is_valid().then_some(addr));
            }
            parent_addr = self.child_addr_in(&parent, parent_addr, slot)?;
            parent = next;
        }
        Ok(None)
    }

    fn child_addr_in(
        &self,
        path: &QuadtreePath,
        addr: ChildBucketAddr,
        slot: u8,
    ) -> Result<ChildBucketAddr> {
        if bucket_level(path) < self.levels_cached {
            self.with_cached(path, addr, |b| b.child_addrs[slot as usize])
        } else {
            self.index.find_child_addr(addr, slot)
        }
    }

    fn entry_addr_in(&self, path: &QuadtreePath, addr: ChildBucketAddr, slot: u8) -> Result<BundleAddr> {
        if bucket_level(path) < self.levels_cached {
            self.with_cached(path, addr, |b| b.entry_addrs[slot as usize])
        } else {
            self.index.find_entry_addr(addr, slot)
        }
    }

    fn with_cached<T>(
        &self,
        path: &QuadtreePath,
        addr: ChildBucketAddr,
        f: impl FnOnce(&LoadedChildBucket) -> T,
    ) -> Result<T> {
        if let Some(bucket) = self.child_cache.lock().get(path) {
            return Ok(f(bucket));
        }
        let loaded = self.index.load_child_bucket(addr)?;
        let mut cache = self.child_cache.lock();
        Ok(f(cache.entry(*path).or_insert(loaded)))
    }

    #[cfg(test)]
    fn cached_buckets(&self) -> usize {
        self.child_cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geindex::entries::{EntryType, TypedEntry, TypedReadKey};
    use crate::geindex::writer::GeIndexWriter;
    use crate::{Config, PacketFileWriter};
    use tempfile::TempDir;

    fn qt(s: &str) -> QuadtreePath {
        s.parse().unwrap()
    }

    fn build(root: &Path, paths: &[&str]) {
        let packets = root.join("packets");
        let writer = PacketFileWriter::create(&Config::from_dir(packets.to_str().unwrap())).unwrap();
        let mut index = GeIndexWriter::<TypedEntry>::create(root.join("index")).unwrap();
        let file_num = index.add_packet_file("../packets", 0);
        for p in paths {
            let payload = format!("tile {}", p);
            let pos = writer.write_append_crc(&qt(p), payload.as_bytes()).unwrap();
            let addr = ExternalDataAddress::new(pos, file_num, payload.len() as u32 + 4);
            index
                .put(&qt(p), TypedEntry::new(addr, 1, 0, EntryType::Imagery))
                .unwrap();
        }
        writer.close().unwrap();
        index.close().unwrap();
    }

    #[test]
    fn test_cache_keeps_top_levels_only() {
        let dir = TempDir::new().unwrap();
        build(dir.path(), &["0", "01230", "012301230", "0123012301230"]);
        let key = TypedReadKey::new(EntryType::Imagery, 0, 1);

        let reader = GeIndexReader::<TypedEntry>::open(dir.path().join("index"), 1).unwrap();
        let data = reader.get_data(&qt("0123012301230"), &key).unwrap();
        assert_eq!(data.as_deref(), Some(&b"tile 0123012301230"[..]));
        assert_eq!(reader.cached_buckets(), 1);

        let reader = GeIndexReader::<TypedEntry>::open(dir.path().join("index"), 9).unwrap();
        let data = reader.get_data(&qt("0123012301230"), &key).unwrap();
        assert_eq!(data.as_deref(), Some(&b"tile 0123012301230"[..]));
        assert_eq!(reader.cached_buckets(), 3);
        assert_eq!(reader.get_entry(&qt("0123012301231"), &key).unwrap(), None);
        assert_eq!(reader.get_entry(&qt("1123012301230"), &key).unwrap(), None);
    }

    #[test]
    fn test_wrong_entry_kind_is_rejected() {
        let dir = TempDir::new().unwrap();
        build(dir.path(), &["0"]);
        let err = GeIndexReader::<crate::geindex::SimpleInsetEntry>::open(dir.path().join("index"), 1)
            .err()
            .unwrap();
        assert!(err.is_corruption());
    }
}
