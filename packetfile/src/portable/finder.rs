use std::io::{Read, Seek, SeekFrom};

use crate::def::INDEX_ITEM_SIZE;
use crate::error::{PacketFileError, Result};
use crate::portable::item::IndexItem;

/// Exact-key lookup in a sorted run of [`IndexItem`]s.
///
/// The run may sit anywhere inside `source`, so an index embedded in a larger
/// container file is searched in place. Items are read on demand unless
/// [`preload`](Self::preload) pulled the whole run into memory.
#[derive(Debug)]
pub struct PacketBundleFinder<R> {
    source: R,
    index_offset: u64,
    count: u64,
    preloaded: Option<Vec<IndexItem>>,
}

impl<R: Read + Seek> PacketBundleFinder<R> {
    pub fn new(source: R, index_offset: u64, index_size: u64) -> Result<Self> {
        if index_size % INDEX_ITEM_SIZE as u64 != 0 {
            return Err(PacketFileError::corrupt_index(
                format!("offset {}", index_offset),
                format!(
                    "size {} is not a multiple of {}",
                    index_size, INDEX_ITEM_SIZE
                ),
            ));
        }
        Ok(PacketBundleFinder {
            source,
            index_offset,
            count: index_size / INDEX_ITEM_SIZE as u64,
            preloaded: None,
        })
    }

    pub fn item_count(&self) -> u64 {
        self.count
    }

    /// Read every item into memory; later lookups do no I/O
    pub fn preload(&mut self) -> Result<()> {
        if self.preloaded.is_some() {
            return Ok(());
        }
        self.source.seek(SeekFrom::Start(self.index_offset))?;
        let mut bz = vec![0u8; self.count as usize * INDEX_ITEM_SIZE];
        self.source.read_exact(&mut bz)?;
        let items = bz
            .chunks_exact(INDEX_ITEM_SIZE)
            .map(|chunk| {
                let mut buf = [0u8; INDEX_ITEM_SIZE];
                buf.copy_from_slice(chunk);
                IndexItem::decode(&buf)
            })
            .collect();
        self.preloaded = Some(items);
        Ok(())
    }

    /// Item number `i` of the run
    pub fn read_item(&mut self, i: u64) -> Result<IndexItem> {
        if i >= self.count {
            return Err(PacketFileError::corrupt_index(
                format!("offset {}", self.index_offset),
                format!("item {} past end ({} items)", i, self.count),
            ));
        }
        if let Some(items) = &self.preloaded {
            return Ok(items[i as usize]);
        }
        self.source
            .seek(SeekFrom::Start(self.index_offset + i * INDEX_ITEM_SIZE as u64))?;
        let mut buf = [0u8; INDEX_ITEM_SIZE];
        self.source.read_exact(&mut buf)?;
        Ok(IndexItem::decode(&buf))
    }

    /// Binary search for the key of `item`. On an exact match the location
    /// fields of `item` are filled in and `true` is returned.
    pub fn find_packet_in_index(&mut self, item: &mut IndexItem) -> Result<bool> {
        let mut lo = 0u64;
        let mut hi = self.count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let found = self.read_item(mid)?;
            match found.cmp(item) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => {
                    item.file_id = found.file_id;
                    item.offset = found.offset;
                    item.packet_size = found.packet_size;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
