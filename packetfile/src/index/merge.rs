use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;

use crate::error::{PacketFileError, Result};
use crate::index::entry::{encode_index_header, PacketIndexEntry};
use crate::index::reader::PacketIndexReader;
use crate::index::SortedRegion;

const WRITE_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Streams the entries of one sorted region of an index file
struct RegionSource {
    reader: PacketIndexReader,
    remaining: u32,
}

impl RegionSource {
    fn open(index_path: &Path, region: &SortedRegion) -> Result<Self> {
        let mut reader = PacketIndexReader::open(index_path)?;
        reader.seek(region.position)?;
        Ok(RegionSource {
            reader,
            remaining: region.count,
        })
    }

    fn next_entry(&mut self) -> Result<Option<PacketIndexEntry>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        match self.reader.read_next()? {
            Some(entry) => Ok(Some(entry)),
            None => Err(PacketFileError::corrupt_index(
                self.reader.path(),
                "sorted region ends early",
            )),
        }
    }
}

/// Merge the sorted `regions` of `source_path` into a new index at `dest_path`.
/// Empty regions are skipped.
pub fn merge_regions(
    source_path: &Path,
    regions: &[SortedRegion],
    dest_path: &Path,
    data_has_crc: bool,
) -> Result<u64> {
    let mut sources = Vec::with_capacity(regions.len());
    let mut heap = BinaryHeap::with_capacity(regions.len());
    for region in regions.iter().filter(|r| r.count != 0) {
        let mut source = RegionSource::open(source_path, region)?;
        if let Some(entry) = source.next_entry()? {
            heap.push(Reverse((entry, sources.len())));
        }
        sources.push(source);
    }
    debug!(
        "merging {} regions of {:?} into {:?}",
        sources.len(),
        source_path,
        dest_path
    );

    let mut out = BufWriter::with_capacity(WRITE_BUFFER_SIZE, File::create(dest_path)?);
    out.write_all(&encode_index_header(data_has_crc))?;
    let mut written = 0u64;
    while let Some(Reverse((entry, idx))) = heap.pop() {
        out.write_all(&entry.encode())?;
        written += 1;
        if let Some(next) = sources[idx].next_entry()? {
            heap.push(Reverse((next, idx)));
        }
    }
    let file = out.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(written)
}
