//! Core definitions and constants for packet files.
//!
//! This module gathers the on-disk constants shared by the index writer,
//! the readers and the portable bundle format:
//! - File names inside a packet file or portable bundle directory
//! - Index header and entry layouts
//! - Sort buffer limits used when the index has to be sorted on close
//! - Quadtree depth limits
//!
//! # Index file layout
//! ```text
//! +------------------+-------------+------------------+-----------+
//! | "PktIndex" (8B)  | version (2B)| data_has_crc (2B)| crc32 (4B)|
//! +------------------+-------------+------------------+-----------+
//! | entry 0 (28B) | entry 1 (28B) | ...                           |
//! +---------------------------------------------------------------+
//! ```

/// Deepest level a quadtree path can reach.
pub const MAX_LEVEL: u32 = 24;

/// Name of the index file inside a packet file directory.
pub const INDEX_FILE_NAME: &str = "packetindex";

/// Suffix of the index file while it is being written.
pub const INDEX_TEMP_SUFFIX: &str = ".tmp";

/// Suffix of the scratch file holding sorted runs during an external sort.
pub const INDEX_SORT_SUFFIX: &str = ".sort.tmp";

/// Signature at the start of every packet index.
pub const INDEX_SIGNATURE: &[u8; 8] = b"PktIndex";

/// Current packet index format version.
pub const INDEX_FORMAT_VERSION: u16 = 1;

/// Size of the index header: signature, version, data_has_crc flag and a CRC
/// of the preceding 12 bytes.
pub const INDEX_HEADER_SIZE: usize = 16;

/// Size of one stored index entry.
/// Layout:
/// +-------------+---------------+------------------+------------+-----------+
/// | path (8B)   | position (8B) | record size (4B) | extra (4B) | crc32 (4B)|
/// +-------------+---------------+------------------+------------+-----------+
pub const INDEX_ENTRY_SIZE: usize = 28;

/// Bytes of an index entry covered by its CRC.
pub const INDEX_ENTRY_DATA_SIZE: usize = INDEX_ENTRY_SIZE - filebundle::CRC_SIZE;

/// Smallest sort buffer accepted on close (1KB, 36 entries). Smaller requests
/// are raised to this value.
pub const MIN_SORT_BUFFER: usize = 1024;

/// Default sort buffer used when the index has to be sorted on close (64MB).
pub const DEFAULT_MAX_SORT_BUFFER: usize = 64 * 1024 * 1024;

/// Default size of one bundle segment (1GB).
pub const DEFAULT_SEGMENT_BREAK: u64 = 1024 * 1024 * 1024;

/// Default number of read cache blocks for pooled readers.
pub const DEFAULT_READ_CACHE_BLOCKS: usize = 2;

/// Default size of one read cache block for pooled readers (1MB).
pub const DEFAULT_READ_CACHE_BLOCK_SIZE: usize = 1024 * 1024;

/// Index file of a portable packet bundle.
pub const PORTABLE_INDEX_FILE_NAME: &str = "index";

/// Prefix of the data files of a portable packet bundle (`pbundle_0000`, ...).
pub const PORTABLE_FILE_PREFIX: &str = "pbundle_";

/// Size of one portable index item.
pub const INDEX_ITEM_SIZE: usize = 24;

/// Magic number heading a compressed packet.
pub const COMPRESSION_MAGIC: u32 = 0x7468_DEAD;

/// Size of the compressed packet header: magic and uncompressed length.
pub const COMPRESSION_HEADER_SIZE: usize = 8;
