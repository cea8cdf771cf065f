//! Packet index: sorted `(quadtree path -> bundle position)` records.
//!
//! The writer accepts entries in any order and sorts them on close; the
//! reader streams them back in preorder and can binary search for a path.

pub mod entry;
pub mod merge;
pub mod reader;
pub mod writer;

pub use entry::PacketIndexEntry;
pub use reader::PacketIndexReader;
pub use writer::{CloseStrategy, PacketIndexWriter};

/// A run of `count` sorted entries starting at byte offset `position` of an
/// index file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortedRegion {
    pub position: u64,
    pub count: u32,
}
