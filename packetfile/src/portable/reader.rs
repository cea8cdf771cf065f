use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::def::PORTABLE_INDEX_FILE_NAME;
use crate::error::Result;
use crate::portable::bundle_file_name;
use crate::portable::finder::PacketBundleFinder;
use crate::portable::item::IndexItem;

/// Reads packets of a portable bundle directory by key.
#[derive(Debug)]
pub struct PacketBundleReader {
    dir: PathBuf,
    finder: PacketBundleFinder<BufReader<File>>,
    files: HashMap<u16, File>,
}

impl PacketBundleReader {
    pub fn open(dir: impl AsRef<Path>) -> Result<PacketBundleReader> {
        let dir = dir.as_ref().to_path_buf();
        let index = File::open(dir.join(PORTABLE_INDEX_FILE_NAME))?;
        let index_size = index.metadata()?.len();
        let finder = PacketBundleFinder::new(BufReader::new(index), 0, index_size)?;
        Ok(PacketBundleReader {
            dir,
            finder,
            files: HashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn packet_count(&self) -> u64 {
        self.finder.item_count()
    }

    /// Keep the whole index in memory
    pub fn preload(&mut self) -> Result<()> {
        self.finder.preload()
    }

    /// Look up a key without reading the packet
    pub fn find(&mut self, address: &str, packet_type: u8, channel: u16) -> Result<Option<IndexItem>> {
        let mut item = IndexItem::new(address, packet_type, channel)?;
        Ok(self.finder.find_packet_in_index(&mut item)?.then_some(item))
    }

    /// Read the packet stored under the key into `buf`. Returns `false`, with
    /// `buf` untouched, when the bundle has no such packet.
    pub fn read_packet(
        &mut self,
        address: &str,
        packet_type: u8,
        channel: u16,
        buf: &mut Vec<u8>,
    ) -> Result<bool> {
        let item = match self.find(address, packet_type, channel)? {
            Some(item) => item,
            None => return Ok(false),
        };
        let file = match self.files.entry(item.file_id) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(File::open(self.dir.join(bundle_file_name(item.file_id)))?)
            }
        };
        buf.resize(item.packet_size as usize, 0);
        file.read_exact_at(buf, item.offset)?;
        Ok(true)
    }
}
