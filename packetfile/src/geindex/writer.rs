use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use filebundle::{FileBundleWriter, CRC_SIZE};
use log::{debug, info};

use super::addr::{child_slot, child_slot_path, entry_slot, BundleAddr, ChildBucketAddr};
use super::bucket::{encode_child_bucket, encode_entry_bucket, SlotEntries};
use super::entries::IndexEntry;
use super::header::{GeIndexHeader, INDEX_HEADER_FILE_NAME};
use crate::def::DEFAULT_SEGMENT_BREAK;
use crate::error::{PacketFileError, Result};
use crate::qtpath::QuadtreePath;

type Node<E> = (QuadtreePath, Vec<E>);

/// Builds a geindex from entries put in preorder.
///
/// Entries are gathered in memory and written bottom-up on
/// [`close`](GeIndexWriter::close), children before the bucket that
/// addresses them. An entry with an invalid data address deletes the
/// entries it write-matches at that path.
pub struct GeIndexWriter<E: IndexEntry> {
    dir: PathBuf,
    bundle: FileBundleWriter,
    header: GeIndexHeader,
    nodes: Vec<Node<E>>,
    last: Option<QuadtreePath>,
}

impl<E: IndexEntry> GeIndexWriter<E> {
    /// Create an index in `dir`, replacing any earlier one
    pub fn create(dir: impl AsRef<Path>) -> Result<GeIndexWriter<E>> {
        Self::create_with_segment_break(dir, DEFAULT_SEGMENT_BREAK)
    }

    pub fn create_with_segment_break(
        dir: impl AsRef<Path>,
        segment_break: u64,
    ) -> Result<GeIndexWriter<E>> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        // a half-built index must not open
        match fs::remove_file(dir.join(INDEX_HEADER_FILE_NAME)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        let bundle = FileBundleWriter::create(&dir, segment_break)?;
        info!("creating geindex {:?} for {}", dir, E::CONTENT_DESC);
        Ok(GeIndexWriter {
            dir,
            bundle,
            header: GeIndexHeader::new(E::SINGLE, E::CONTENT_DESC),
            nodes: Vec::new(),
            last: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a packet file, relative to the index directory unless
    /// absolute. Returns the file number entries refer to it by.
    pub fn add_packet_file(&mut self, path: impl Into<String>, extra: u32) -> u32 {
        self.header.packet_files.push(path.into());
        self.header.packet_file_extras.push(extra);
        (self.header.packet_files.len() - 1) as u32
    }

    pub fn set_packet_extra(&mut self, file_num: u32, extra: u32) -> Result<()> {
        let slot = self
            .header
            .packet_file_extras
            .get_mut(file_num as usize)
            .ok_or(PacketFileError::UnknownPacketFile(file_num))?;
        *slot = extra;
        Ok(())
    }

    pub fn put(&mut self, path: &QuadtreePath, entry: E) -> Result<()> {
        if let Some(last) = self.last {
            if *path < last {
                return Err(PacketFileError::OutOfOrder {
                    path: path.to_string(),
                    last: last.to_string(),
                });
            }
        }
        let addr = entry.data_address();
        if addr.is_valid() && addr.file_num as usize >= self.header.packet_files.len() {
            return Err(PacketFileError::UnknownPacketFile(addr.file_num));
        }
        self.last = Some(*path);

        let same_path = matches!(self.nodes.last(), Some((p, _)) if p == path);
        if !addr.is_valid() {
            if same_path {
                if let Some((_, entries)) = self.nodes.last_mut() {
                    entries.retain(|e| !e.write_matches(&entry));
                    if entries.is_empty() {
                        self.nodes.pop();
                    }
                }
            }
            return Ok(());
        }
        if !same_path {
            self.nodes.push((*path, vec![entry]));
            return Ok(());
        }
        if let Some((_, entries)) = self.nodes.last_mut() {
            match entries.iter_mut().find(|e| e.write_matches(&entry)) {
                Some(old) => *old = entry,
                None => entries.push(entry),
            }
        }
        Ok(())
    }

    /// Write all buckets and the header. Returns the header written.
    pub fn close(mut self) -> Result<GeIndexHeader> {
        let nodes = std::mem::take(&mut self.nodes);
        let refs: Vec<&Node<E>> = nodes.iter().collect();
        let (entry_addr, child_addr) = self.write_bucket(&QuadtreePath::root(), &refs)?;
        self.header.root_entry_addr = entry_addr;
        self.header.root_child_addr = child_addr;
        self.bundle.close()?;
        fs::write(self.dir.join(INDEX_HEADER_FILE_NAME), self.header.encode())?;
        info!(
            "closed geindex {:?}: {} paths, {} bucket bytes",
            self.dir,
            nodes.len(),
            self.bundle.data_size()
        );
        Ok(self.header)
    }

    /// Write the entry bucket at `bucket` and the child bucket below it.
    /// `nodes` are the preorder nodes under `bucket`.
    fn write_bucket(
        &self,
        bucket: &QuadtreePath,
        nodes: &[&Node<E>],
    ) -> Result<(BundleAddr, ChildBucketAddr)> {
        let mut slots: SlotEntries<E> = Vec::new();
        let mut below: BTreeMap<u8, Vec<&Node<E>>> = BTreeMap::new();
        for node in nodes {
            if let Some(slot) = entry_slot(bucket, &node.0) {
                slots.push((slot, node.1.clone()));
            } else if let Some(slot) = child_slot(bucket, &node.0) {
                below.entry(slot).or_default().push(*node);
            }
        }

        let mut children = Vec::new();
        let mut entries = Vec::new();
        for (slot, group) in below {
            let sub = child_slot_path(bucket, slot)?
                .ok_or_else(|| PacketFileError::InvalidPath(bucket.to_string()))?;
            let (entry_addr, child_addr) = self.write_bucket(&sub, &group)?;
            if entry_addr.is_valid() {
                entries.push((slot, entry_addr));
            }
            if child_addr.is_valid() {
                children.push((slot, child_addr));
            }
        }

        let entry_addr = if slots.is_empty() {
            BundleAddr::default()
        } else {
            let payload = encode_entry_bucket(&slots, E::SINGLE);
            let offset = self.bundle.append_crc(&payload)?;
            BundleAddr::new(offset, (payload.len() + CRC_SIZE) as u32)
        };
        let child_addr = if children.is_empty() && entries.is_empty() {
            ChildBucketAddr::default()
        } else {
            let (record, child_size, entry_size) = encode_child_bucket(&children, &entries)?;
            let offset = self.bundle.append(&record)?;
            ChildBucketAddr::new(offset, child_size, entry_size)
        };
        debug!(
            "bucket {}: {} slots, {} child buckets",
            bucket,
            slots.len(),
            children.len() + entries.len()
        );
        Ok((entry_addr, child_addr))
    }
}
