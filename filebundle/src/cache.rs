use std::fs::File;
use std::io;

#[cfg(unix)]
use std::os::unix::fs::FileExt;

pub const IO_BLK_SIZE: u64 = 512;

/// One cached chunk of a segment file
#[derive(Debug)]
struct CacheBlock {
    buffer: Box<[u8]>,
    segment: usize,
    start: u64,
    end: u64,
    last_used: u64,
}

impl CacheBlock {
    fn try_read(&self, segment: usize, start: u64, bz: &mut [u8]) -> bool {
        if segment == self.segment && self.start <= start && start + bz.len() as u64 <= self.end
        {
            let offset = (start - self.start) as usize;
            bz.copy_from_slice(&self.buffer[offset..offset + bz.len()]);
            true
        } else {
            false
        }
    }
}

/// Read-ahead cache holding `max_blocks` chunks of `block_size` bytes.
///
/// Sequential or clustered readers (index-ordered crawls, quadtree traversals)
/// hit the same chunk many times; the least recently used chunk is refilled
/// on a miss. Requests larger than a block bypass the cache.
#[derive(Debug)]
pub struct ReadCache {
    blocks: Vec<CacheBlock>,
    max_blocks: usize,
    block_size: usize,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl ReadCache {
    pub fn new(max_blocks: usize, block_size: usize) -> Self {
        Self {
            blocks: Vec::with_capacity(max_blocks),
            max_blocks,
            block_size,
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn max_blocks(&self) -> usize {
        self.max_blocks
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Fill `bz` from `file` at `pos`, going through the cache.
    /// `segment_size` bounds how far a block may read ahead.
    pub fn read(
        &mut self,
        segment: usize,
        file: &File,
        segment_size: u64,
        pos: u64,
        bz: &mut [u8],
    ) -> io::Result<()> {
        self.clock += 1;
        let clock = self.clock;
        for block in self.blocks.iter_mut() {
            if block.try_read(segment, pos, bz) {
                block.last_used = clock;
                self.hits += 1;
                return Ok(());
            }
        }
        self.misses += 1;

        if bz.len() > self.block_size {
            return file.read_exact_at(bz, pos);
        }

        let mut aligned_pos = (pos / IO_BLK_SIZE) * IO_BLK_SIZE;
        if aligned_pos + (self.block_size as u64) < pos + bz.len() as u64 {
            aligned_pos = pos;
        }
        let end = u64::min(aligned_pos + self.block_size as u64, segment_size);

        let idx = if self.blocks.len() < self.max_blocks {
            self.blocks.push(CacheBlock {
                buffer: vec![0u8; self.block_size].into_boxed_slice(),
                segment,
                start: 0,
                end: 0,
                last_used: 0,
            });
            self.blocks.len() - 1
        } else {
            self.blocks
                .iter()
                .enumerate()
                .min_by_key(|(_, b)| b.last_used)
                .map(|(i, _)| i)
                .unwrap_or(0)
        };

        let block = &mut self.blocks[idx];
        // invalidate first so a failed read cannot leave stale bounds behind
        block.end = block.start;
        let len = (end - aligned_pos) as usize;
        file.read_exact_at(&mut block.buffer[..len], aligned_pos)?;
        block.segment = segment;
        block.start = aligned_pos;
        block.end = end;
        block.last_used = clock;

        if !block.try_read(segment, pos, bz) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "cannot read {} bytes at {} of segment {} (size {})",
                    bz.len(),
                    pos,
                    segment,
                    segment_size
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_cache_hits() {
        let dir = tempfile::Builder::new()
            .prefix("read_cache")
            .tempdir()
            .unwrap();
        let path = dir.path().join("seg");
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        File::create(&path).unwrap().write_all(&data).unwrap();
        let file = File::open(&path).unwrap();

        let mut cache = ReadCache::new(2, 1024);
        let mut buf = [0u8; 16];
        cache.read(0, &file, 4096, 100, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[100..116]);
        cache.read(0, &file, 4096, 200, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[200..216]);
        assert_eq!(cache.stats(), (1, 1));

        // second block, then the first one must still be cached
        cache.read(0, &file, 4096, 3000, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[3000..3016]);
        cache.read(0, &file, 4096, 10, &mut buf).unwrap();
        assert_eq!(cache.stats(), (2, 2));

        // a third block evicts the least recently used one (offset 3000)
        cache.read(0, &file, 4096, 2000, &mut buf).unwrap();
        cache.read(0, &file, 4096, 3000, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[3000..3016]);
        assert_eq!(cache.stats(), (2, 4));
    }

    #[test]
    fn test_large_read_bypasses_cache() {
        let dir = tempfile::Builder::new()
            .prefix("read_cache")
            .tempdir()
            .unwrap();
        let path = dir.path().join("seg");
        let data = vec![9u8; 3000];
        File::create(&path).unwrap().write_all(&data).unwrap();
        let file = File::open(&path).unwrap();

        let mut cache = ReadCache::new(2, 512);
        let mut buf = vec![0u8; 2000];
        cache.read(0, &file, 3000, 500, &mut buf).unwrap();
        assert_eq!(buf, vec![9u8; 2000]);
        assert!(cache.blocks.is_empty());
    }
}
