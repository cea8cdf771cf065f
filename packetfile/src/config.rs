//! Configuration for packet file writers and reader pools.
//!
//! This module provides the knobs that control how packet files are laid out
//! on disk and how much memory the index writer and readers may use:
//! - Bundle segment size
//! - Sort buffer limit for closing an unordered index
//! - Whether stored records carry a trailing CRC32
//! - Read cache geometry for pooled readers
//!
//! # Performance Tuning
//!
//! ## Storage Management
//! - `segment_break`: Size limit of one bundle segment (default: 1GB)
//!   - A single record can never be larger than this
//!   - Smaller values produce more, smaller files
//!
//! ## Memory Management
//! - `max_sort_buffer`: Memory allowed for sorting the index on close
//!   (default: 64MB)
//!   - Only used when records were appended in no recognizable order
//!   - Indexes larger than this are sorted in runs and merged from disk
//!   - Values below `MIN_SORT_BUFFER` are raised to it
//!
//! ## Read Caching
//! - `read_cache_blocks` / `read_cache_block_size`: per-reader block cache
//!   (default: 2 blocks of 1MB)
//!   - Helps readers walking a bundle in index order
//!   - Fewer than 2 blocks disables the cache
//!
//! # Usage Examples
//! ```no_run
//! use packetfile::config::Config;
//!
//! // Default configuration with custom directory
//! let config = Config::from_dir("/path/to/packets");
//!
//! // Small segments and a tight sort buffer
//! let mut config = Config::new("/path/to/packets", 1 << 20, 1 << 16, true, 2, 1 << 20);
//! config.set_data_has_crc(false);
//! ```

use crate::def::{
    DEFAULT_MAX_SORT_BUFFER, DEFAULT_READ_CACHE_BLOCKS, DEFAULT_READ_CACHE_BLOCK_SIZE,
    DEFAULT_SEGMENT_BREAK,
};

/// Configuration for a packet file.
///
/// # Fields
/// The directory is the packet file itself: it holds the bundle header, the
/// bundle segments and the `packetindex` file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory of the packet file
    pub dir: String,
    /// Size of one bundle segment in bytes (default: 1GB)
    pub segment_break: u64,
    /// Memory limit for sorting the index on close (default: 64MB)
    pub max_sort_buffer: usize,
    /// Whether records written through this file carry a CRC32
    pub data_has_crc: bool,
    /// Number of read cache blocks per reader
    pub read_cache_blocks: usize,
    /// Size of one read cache block in bytes
    pub read_cache_block_size: usize,
}

impl Default for Config {
    /// Creates a new Config instance with default values.
    ///
    /// # Default Values
    /// - `segment_break`: 1GB
    /// - `max_sort_buffer`: 64MB
    /// - `data_has_crc`: true
    /// - `read_cache_blocks`: 2
    /// - `read_cache_block_size`: 1MB
    fn default() -> Self {
        Self {
            dir: "default".to_string(),
            segment_break: DEFAULT_SEGMENT_BREAK,
            max_sort_buffer: DEFAULT_MAX_SORT_BUFFER,
            data_has_crc: true,
            read_cache_blocks: DEFAULT_READ_CACHE_BLOCKS,
            read_cache_block_size: DEFAULT_READ_CACHE_BLOCK_SIZE,
        }
    }
}

impl Config {
    pub fn new(
        dir: &str,
        segment_break: u64,
        max_sort_buffer: usize,
        data_has_crc: bool,
        read_cache_blocks: usize,
        read_cache_block_size: usize,
    ) -> Self {
        Self {
            dir: dir.to_string(),
            segment_break,
            max_sort_buffer,
            data_has_crc,
            read_cache_blocks,
            read_cache_block_size,
        }
    }

    /// Default configuration rooted at `dir`
    pub fn from_dir(dir: &str) -> Self {
        Config {
            dir: dir.to_string(),
            ..Config::default()
        }
    }

    pub fn set_segment_break(&mut self, segment_break: u64) {
        self.segment_break = segment_break;
    }

    pub fn set_max_sort_buffer(&mut self, max_sort_buffer: usize) {
        self.max_sort_buffer = max_sort_buffer;
    }

    pub fn set_data_has_crc(&mut self, data_has_crc: bool) {
        self.data_has_crc = data_has_crc;
    }

    pub fn set_read_cache(&mut self, blocks: usize, block_size: usize) {
        self.read_cache_blocks = blocks;
        self.read_cache_block_size = block_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_dir_keeps_defaults() {
        let config = Config::from_dir("/tmp/pf");
        assert_eq!(config.dir, "/tmp/pf");
        assert_eq!(config.segment_break, DEFAULT_SEGMENT_BREAK);
        assert_eq!(config.max_sort_buffer, DEFAULT_MAX_SORT_BUFFER);
        assert!(config.data_has_crc);
        assert_eq!(config.read_cache_blocks, 2);
    }

    #[test]
    fn test_setters() {
        let mut config = Config::default();
        config.set_segment_break(4096);
        config.set_max_sort_buffer(100);
        config.set_data_has_crc(false);
        config.set_read_cache(0, 0);
        assert_eq!(config.segment_break, 4096);
        assert_eq!(config.max_sort_buffer, 100);
        assert!(!config.data_has_crc);
        assert_eq!(config.read_cache_blocks, 0);
    }
}
