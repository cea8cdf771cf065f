//! Addresses stored in a geindex and the bucket arithmetic on quadtree paths.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Result;
use crate::qtpath::QuadtreePath;

/// Quadtree levels covered by one entry bucket
pub const QUAD_LEVELS_PER_BUCKET: u32 = 4;

/// Slots of an entry bucket: every path of depth 0 to 3 below the bucket
/// path, numbered in preorder (1 + 4 + 16 + 64)
pub const ENTRY_SLOTS_PER_BUCKET: usize = 85;

/// Slots of a child bucket: every path exactly 4 levels below it
pub const CHILD_ADDRS_PER_BUCKET: usize = 256;

// preorder size of a full subtree rooted at depth 1, 2 and 3 of a bucket
const SUBTREE_SLOTS: [u32; 4] = [85, 21, 5, 1];

/// A CRC'd record inside the index bundle. `size` includes the CRC; a zero
/// size means "no such record".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BundleAddr {
    pub offset: u64,
    pub size: u32,
}

impl BundleAddr {
    pub const SIZE: usize = 12;

    pub fn new(offset: u64, size: u32) -> Self {
        Self { offset, size }
    }

    pub fn is_valid(&self) -> bool {
        self.size != 0
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut bz = [0u8; Self::SIZE];
        LittleEndian::write_u64(&mut bz[0..8], self.offset);
        LittleEndian::write_u32(&mut bz[8..12], self.size);
        out.extend_from_slice(&bz);
    }

    pub fn decode(bz: &[u8]) -> Self {
        Self {
            offset: LittleEndian::read_u64(&bz[0..8]),
            size: LittleEndian::read_u32(&bz[8..12]),
        }
    }
}

/// A child bucket is stored as two CRC'd halves back to back: the child
/// bucket addresses, then the entry bucket addresses. Either half may be
/// empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildBucketAddr {
    pub offset: u64,
    pub child_buckets_size: u32,
    pub entry_buckets_size: u32,
}

impl ChildBucketAddr {
    pub const SIZE: usize = 16;

    pub fn new(offset: u64, child_buckets_size: u32, entry_buckets_size: u32) -> Self {
        Self {
            offset,
            child_buckets_size,
            entry_buckets_size,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.total_size() != 0
    }

    pub fn total_size(&self) -> u64 {
        self.child_buckets_size as u64 + self.entry_buckets_size as u64
    }

    pub fn child_buckets_addr(&self) -> BundleAddr {
        BundleAddr::new(self.offset, self.child_buckets_size)
    }

    pub fn entry_buckets_addr(&self) -> BundleAddr {
        BundleAddr::new(
            self.offset + self.child_buckets_size as u64,
            self.entry_buckets_size,
        )
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut bz = [0u8; Self::SIZE];
        LittleEndian::write_u64(&mut bz[0..8], self.offset);
        LittleEndian::write_u32(&mut bz[8..12], self.child_buckets_size);
        LittleEndian::write_u32(&mut bz[12..16], self.entry_buckets_size);
        out.extend_from_slice(&bz);
    }

    pub fn decode(bz: &[u8]) -> Self {
        Self {
            offset: LittleEndian::read_u64(&bz[0..8]),
            child_buckets_size: LittleEndian::read_u32(&bz[8..12]),
            entry_buckets_size: LittleEndian::read_u32(&bz[12..16]),
        }
    }
}

/// Where a packet lives: a record of `size` bytes (CRC included) at bundle
/// position `offset` of packet file number `file_num` in the index header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ExternalDataAddress {
    pub offset: u64,
    pub file_num: u32,
    pub size: u32,
}

impl ExternalDataAddress {
    pub const SIZE: usize = 16;

    pub fn new(offset: u64, file_num: u32, size: u32) -> Self {
        Self {
            offset,
            file_num,
            size,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.size != 0
    }

    pub fn write(&self, bz: &mut [u8]) {
        LittleEndian::write_u64(&mut bz[0..8], self.offset);
        LittleEndian::write_u32(&mut bz[8..12], self.file_num);
        LittleEndian::write_u32(&mut bz[12..16], self.size);
    }

    pub fn read(bz: &[u8]) -> Self {
        Self {
            offset: LittleEndian::read_u64(&bz[0..8]),
            file_num: LittleEndian::read_u32(&bz[8..12]),
            size: LittleEndian::read_u32(&bz[12..16]),
        }
    }
}

/// The entry bucket holding `path`
pub fn bucket_path(path: &QuadtreePath) -> QuadtreePath {
    path.prefix(path.level() / QUAD_LEVELS_PER_BUCKET * QUAD_LEVELS_PER_BUCKET)
}

pub fn bucket_level(bucket: &QuadtreePath) -> u32 {
    bucket.level() / QUAD_LEVELS_PER_BUCKET
}

/// Preorder slot of `path` inside the entry bucket at `bucket`
pub fn entry_slot(bucket: &QuadtreePath, path: &QuadtreePath) -> Option<u8> {
    let rel = QuadtreePath::relative_path(bucket, path)?;
    if rel.level() >= QUAD_LEVELS_PER_BUCKET {
        return None;
    }
    let slot: u32 = rel
        .digits()
        .enumerate()
        .map(|(i, d)| 1 + d as u32 * SUBTREE_SLOTS[i + 1])
        .sum();
    Some(slot as u8)
}

/// Slot of the bucket 4 levels below `bucket` on the way to `path`
pub fn child_slot(bucket: &QuadtreePath, path: &QuadtreePath) -> Option<u8> {
    if path.level() < bucket.level() + QUAD_LEVELS_PER_BUCKET {
        return None;
    }
    let rel = QuadtreePath::relative_path(bucket, path)?;
    Some(rel.as_index(QUAD_LEVELS_PER_BUCKET) as u8)
}

/// The bucket path stored in child slot `slot` of `bucket`
pub fn child_slot_path(bucket: &QuadtreePath, slot: u8) -> Result<Option<QuadtreePath>> {
    let digits = [(slot >> 6) & 3, (slot >> 4) & 3, (slot >> 2) & 3, slot & 3];
    let rel = QuadtreePath::from_digits(&digits)?;
    Ok(bucket.concatenate(&rel))
}

/// The paths of the entry slots of `bucket`, in slot order. Fewer than
/// [`ENTRY_SLOTS_PER_BUCKET`] near the deepest level.
pub fn entry_slot_paths(bucket: &QuadtreePath) -> Vec<QuadtreePath> {
    let limit = (bucket.level() + QUAD_LEVELS_PER_BUCKET - 1).min(crate::def::MAX_LEVEL);
    let mut paths = Vec::with_capacity(ENTRY_SLOTS_PER_BUCKET);
    let mut path = *bucket;
    loop {
        paths.push(path);
        if paths.len() == ENTRY_SLOTS_PER_BUCKET || !path.advance(limit) {
            break;
        }
        if !bucket.is_ancestor_of(&path) {
            break;
        }
    }
    paths
}
