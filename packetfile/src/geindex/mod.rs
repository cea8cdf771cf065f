//! Geindex: the bucketed quadtree index that serves packets out of many
//! packet files.
//!
//! A geindex directory holds an `index.hdr` ([`GeIndexHeader`]) and a file
//! bundle of CRC'd buckets:
//! - an entry bucket covers 4 quadtree levels below a bucket path (a path
//!   whose level is a multiple of 4) and holds the entries of those 85 paths
//! - a child bucket holds, for each of the 256 paths 4 levels below it, the
//!   address of their entry bucket and of their own child bucket
//!
//! The root entry bucket and the root child bucket are addressed from the
//! header. An entry points at a CRC'd record of one of the packet files
//! listed in the header.
//!
//! - [`GeIndexWriter`] builds an index from entries put in preorder
//! - [`GeIndexReader`] looks entries and packets up by path and key
//! - [`GeIndexTraverser`] walks every non-empty path in preorder

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{PacketFileError, Result};

pub mod addr;
pub mod bucket;
pub mod entries;
pub mod header;
pub mod reader;
pub mod traverser;
pub mod writer;

pub use addr::{BundleAddr, ChildBucketAddr, ExternalDataAddress};
pub use entries::{
    BlendEntry, ChannelledEntry, EntryType, IndexEntry, ReadableEntry, SimpleInsetEntry,
    TypedEntry, TypedReadKey,
};
pub use header::{GeIndexHeader, INDEX_HEADER_FILE_NAME};
pub use reader::GeIndexReader;
pub use traverser::GeIndexTraverser;
pub use writer::GeIndexWriter;

/// Deepest child bucket level a reader may keep in memory
pub const MAX_LEVELS_CACHED: u32 = 3;

/// Whether `dir` looks like a geindex directory
pub fn is_geindex(dir: impl AsRef<Path>) -> bool {
    let dir = dir.as_ref();
    dir.join(INDEX_HEADER_FILE_NAME).is_file() && dir.join(filebundle::HEADER_FILE_NAME).is_file()
}

/// Bounds-checked little-endian field reader. Running off the end is a
/// corrupt index.
pub(crate) struct FieldReader<'a> {
    bz: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(bz: &'a [u8], path: &'a Path) -> Self {
        Self { bz, pos: 0, path }
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bz.len() - self.pos < n {
            return Err(PacketFileError::corrupt_index(
                self.path,
                format!("truncated at byte {} reading {} more", self.pos, n),
            ));
        }
        let out = &self.bz[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    pub(crate) fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bz = self.bytes(len)?;
        String::from_utf8(bz.to_vec())
            .map_err(|_| PacketFileError::corrupt_index(self.path, "string is not UTF-8"))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos == self.bz.len()
    }

    /// Fail if any bytes are left
    pub(crate) fn finish(&self) -> Result<()> {
        if !self.is_empty() {
            return Err(PacketFileError::corrupt_index(
                self.path,
                format!("{} trailing bytes", self.bz.len() - self.pos),
            ));
        }
        Ok(())
    }
}
