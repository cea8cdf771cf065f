//! Pool of open packet file readers addressed by small tokens.
//!
//! Merge pipelines keep millions of records that each point at one of a few
//! hundred packet files. Instead of a reference, each record carries a
//! [`ReaderToken`]: eight bytes naming the pool and a slot in it. Tokens are
//! checked on every use, so a token from another pool or for a closed reader
//! is an error rather than a read from the wrong file.
//!
//! Slots are never reused or compacted. Closing a reader empties its slot and
//! every other token stays valid.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;
use xxhash_rust::xxh32::xxh32;

use crate::config::Config;
use crate::error::{PacketFileError, Result};
use crate::reader::PacketFileReaderBase;

static POOL_NONCE: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderToken {
    pool_hash: u32,
    file_index: u32,
}

impl ReaderToken {
    pub fn pool_hash(&self) -> u32 {
        self.pool_hash
    }

    pub fn file_index(&self) -> u32 {
        self.file_index
    }
}

#[derive(Debug)]
pub struct PacketFileReaderPool {
    name: String,
    pool_hash: u32,
    cache_blocks: usize,
    cache_block_size: usize,
    readers: Vec<Option<Box<PacketFileReaderBase>>>,
    open_count: usize,
}

impl PacketFileReaderPool {
    /// Every reader added gets a read cache of `cache_blocks` blocks of
    /// `cache_block_size` bytes (fewer than 2 blocks: no cache).
    pub fn new(name: &str, cache_blocks: usize, cache_block_size: usize) -> Self {
        let nonce = POOL_NONCE.fetch_add(1, Ordering::Relaxed);
        Self {
            name: name.to_string(),
            pool_hash: xxh32(name.as_bytes(), nonce),
            cache_blocks,
            cache_block_size,
            readers: Vec::new(),
            open_count: 0,
        }
    }

    /// Pool whose readers use the read cache geometry of `config`
    pub fn with_config(name: &str, config: &Config) -> Self {
        Self::new(name, config.read_cache_blocks, config.read_cache_block_size)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool_hash(&self) -> u32 {
        self.pool_hash
    }

    /// Readers currently open
    pub fn open_count(&self) -> usize {
        self.open_count
    }

    /// Slots handed out so far, open or closed
    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    pub fn add(&mut self, dir: impl AsRef<Path>) -> Result<ReaderToken> {
        let mut reader = PacketFileReaderBase::open(dir)?;
        reader.enable_read_cache(self.cache_blocks, self.cache_block_size);
        let token = ReaderToken {
            pool_hash: self.pool_hash,
            file_index: self.readers.len() as u32,
        };
        debug!(
            "pool {}: slot {} -> {:?}",
            self.name,
            token.file_index,
            reader.dir()
        );
        self.readers.push(Some(Box::new(reader)));
        self.open_count += 1;
        Ok(token)
    }

    pub fn add_all<P: AsRef<Path>>(&mut self, dirs: &[P]) -> Result<Vec<ReaderToken>> {
        dirs.iter().map(|dir| self.add(dir)).collect()
    }

    fn slot(&self, token: ReaderToken) -> Result<usize> {
        if token.pool_hash != self.pool_hash {
            return Err(PacketFileError::ForeignToken {
                token,
                pool: self.name.clone(),
            });
        }
        let idx = token.file_index as usize;
        if idx >= self.readers.len() {
            return Err(PacketFileError::TokenOutOfRange {
                token,
                pool: self.name.clone(),
                len: self.readers.len(),
            });
        }
        Ok(idx)
    }

    pub fn reader(&self, token: ReaderToken) -> Result<&PacketFileReaderBase> {
        let idx = self.slot(token)?;
        self.readers[idx]
            .as_deref()
            .ok_or_else(|| PacketFileError::ReaderClosed {
                token,
                pool: self.name.clone(),
            })
    }

    pub fn close(&mut self, token: ReaderToken) -> Result<()> {
        let idx = self.slot(token)?;
        if self.readers[idx].take().is_none() {
            return Err(PacketFileError::ReaderClosed {
                token,
                pool: self.name.clone(),
            });
        }
        self.open_count -= 1;
        Ok(())
    }

    pub fn close_all(&mut self, tokens: &[ReaderToken]) -> Result<()> {
        for token in tokens {
            self.close(*token)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::PacketFileWriter;
    use crate::QuadtreePath;

    #[test]
    fn test_token_past_end() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PacketFileWriter::create(&Config::from_dir(dir.path().to_str().unwrap())).unwrap();
        writer.write_append_crc(&QuadtreePath::root(), b"root").unwrap();
        writer.close().unwrap();

        let mut pool = PacketFileReaderPool::new("bounds", 2, 4096);
        let token = pool.add(dir.path()).unwrap();
        let past_end = ReaderToken {
            file_index: token.file_index() + 1,
            ..token
        };
        assert!(matches!(
            pool.reader(past_end),
            Err(PacketFileError::TokenOutOfRange { len: 1, .. })
        ));
        assert!(pool.reader(token).is_ok());
    }

    #[test]
    fn test_hash_depends_on_nonce() {
        let a = PacketFileReaderPool::new("pool", 2, 4096);
        let b = PacketFileReaderPool::new("pool", 2, 4096);
        assert_ne!(a.pool_hash(), b.pool_hash());
        assert_eq!(a.name(), b.name());
    }
}
