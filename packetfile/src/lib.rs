//! Packet files: storage for map tiles and other packets keyed by quadtree
//! path.
//!
//! # Overview
//! A packet file is a directory holding:
//! - a file bundle (`bundle.hdr` plus `bundle.NNNN` segments, see the
//!   `filebundle` crate) with the packet records back to back
//! - a `packetindex` mapping every quadtree path to the bundle position and
//!   size of its record, sorted in preorder
//!
//! # Architecture
//!
//! ## Writing
//! - [`PacketFileWriter`]: appends records, or allocates room and fills it
//!   later from any thread
//!   - Bundle range and index slot are reserved under one lock
//!   - Records may carry a trailing CRC32
//! - [`index::PacketIndexWriter`]: builds the index and sorts it on close
//!   - Already sorted input is renamed into place
//!   - Input sorted by level is merged level by level
//!   - Anything else is sorted in runs bounded by the sort buffer and merged
//!
//! ## Reading
//! - [`PacketFileReader`]: walks a packet file in preorder or looks up paths
//! - [`PacketFileReaderPool`]: many open packet files addressed by small,
//!   checked [`ReaderToken`]s
//!
//! ## Geindex
//! - [`geindex`]: the bucketed index that serves packets out of many packet
//!   files, keyed by path plus a per-kind read key
//!   - [`GeIndexWriter`] builds one from entries put in preorder
//!   - [`GeIndexReader`] looks entries and packets up, caching the top child
//!     buckets
//!   - [`GeIndexTraverser`] walks every path in preorder
//!
//! ## Portable bundles
//! - [`portable`]: the self-contained export format with a flat 24 byte
//!   index item per packet, optional delta bundles against a base
//!
//! ## Supporting pieces
//! - [`QuadtreePath`]: the packed 64-bit key
//! - [`compress`]: the zlib packet envelope
//!
//! # Example Usage
//! ```no_run
//! use packetfile::{Config, PacketFileReader, PacketFileWriter, QuadtreePath};
//!
//! let config = Config::from_dir("/tmp/packets");
//! let writer = PacketFileWriter::create(&config)?;
//! let path: QuadtreePath = "0123".parse()?;
//! writer.write_append_crc(&path, b"tile bytes")?;
//! writer.close()?;
//!
//! let mut reader = PacketFileReader::open("/tmp/packets")?;
//! assert_eq!(reader.find_packet(&path)?.as_deref(), Some(&b"tile bytes"[..]));
//! # Ok::<(), packetfile::PacketFileError>(())
//! ```

pub mod compress;
pub mod config;
pub mod def;
pub mod error;
pub mod geindex;
pub mod index;
pub mod pool;
pub mod portable;
pub mod qtpath;
pub mod reader;
pub mod writer;

pub use compress::{PacketCodec, ZlibCodec};
pub use config::Config;
pub use error::{PacketFileError, Result};
pub use geindex::{GeIndexReader, GeIndexTraverser, GeIndexWriter};
pub use index::{CloseStrategy, PacketIndexEntry, PacketIndexReader, PacketIndexWriter};
pub use pool::{PacketFileReaderPool, ReaderToken};
pub use qtpath::QuadtreePath;
pub use reader::{ManifestEntry, PacketFileReader, PacketFileReaderBase};
pub use writer::{AllocatedBlock, PacketFileWriter};
