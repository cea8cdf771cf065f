//! Bucket encodings and the bundle they are loaded from.
//!
//! Child bucket, two CRC'd halves (either may be absent):
//! ```text
//! child half:  per slot  u8 slot, u64 offset, u32 child size, u32 entry size
//! entry half:  per slot  u8 slot, u64 offset, u32 size
//! ```
//! Entry bucket, CRC'd:
//! ```text
//! single slots, sparse:   u16 n, u8 slot[n], entry[n]
//! single slots, full:     u16 n, entry[85] (an empty slot has a zero size)
//! multiple slots:         u16 n, (u8 slot, u16 count)[n], entries
//! ```
//! Single-slot buckets are sparse whenever that is the smaller encoding.

use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use filebundle::crc::store_crc;
use filebundle::{BundleError, FileBundleReader, CRC_SIZE};

use super::addr::{BundleAddr, ChildBucketAddr, CHILD_ADDRS_PER_BUCKET, ENTRY_SLOTS_PER_BUCKET};
use super::entries::IndexEntry;
use super::header::GeIndexHeader;
use super::FieldReader;
use crate::error::{PacketFileError, Result};

const CHILD_ITEM_SIZE: usize = 1 + ChildBucketAddr::SIZE;
const ENTRY_ITEM_SIZE: usize = 1 + BundleAddr::SIZE;

/// Entries of the non-empty slots of one entry bucket, by ascending slot
pub type SlotEntries<E> = Vec<(u8, Vec<E>)>;

/// The header and bucket bundle of an open geindex
#[derive(Debug)]
pub struct IndexBundle {
    dir: PathBuf,
    header: GeIndexHeader,
    bundle: FileBundleReader,
}

impl IndexBundle {
    pub fn open(dir: impl AsRef<Path>) -> Result<IndexBundle> {
        let dir = dir.as_ref().to_path_buf();
        let header = GeIndexHeader::read(&dir)?;
        let bundle = FileBundleReader::open(&dir)?;
        Ok(IndexBundle {
            dir,
            header,
            bundle,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn header(&self) -> &GeIndexHeader {
        &self.header
    }

    pub fn bundle(&self) -> &FileBundleReader {
        &self.bundle
    }

    /// Fail unless the index stores entries of kind `E`
    pub fn check_entry_kind<E: IndexEntry>(&self) -> Result<()> {
        if self.header.slots_are_single != E::SINGLE {
            return Err(PacketFileError::corrupt_index(
                &self.dir,
                format!(
                    "index {:?} does not hold {} entries",
                    self.header.content_desc,
                    E::CONTENT_DESC
                ),
            ));
        }
        Ok(())
    }

    /// Read the CRC'd record at `addr` and return its payload. An address
    /// outside the bundle is a corrupt index.
    pub fn load(&self, addr: BundleAddr) -> Result<Vec<u8>> {
        self.bundle
            .read_at_crc(addr.offset, addr.size as usize)
            .map_err(|e| match e {
                BundleError::OutOfRange { .. } | BundleError::RecordTooSmall(_) => {
                    PacketFileError::corrupt_index(&self.dir, e.to_string())
                }
                e if e.is_corruption() => PacketFileError::corrupt_index(&self.dir, e.to_string()),
                e => e.into(),
            })
    }

    pub fn load_child_bucket(&self, addr: ChildBucketAddr) -> Result<LoadedChildBucket> {
        let mut bucket = LoadedChildBucket::default();
        if addr.child_buckets_size != 0 {
            let bz = self.load(addr.child_buckets_addr())?;
            for (slot, child) in decode_child_half(&bz, &self.dir)? {
                bucket.child_addrs[slot as usize] = child;
            }
        }
        if addr.entry_buckets_size != 0 {
            let bz = self.load(addr.entry_buckets_addr())?;
            for (slot, entry) in decode_entry_half(&bz, &self.dir)? {
                bucket.entry_addrs[slot as usize] = entry;
            }
        }
        Ok(bucket)
    }

    /// Address of the child bucket in `slot`, reading only the child half
    pub fn find_child_addr(&self, addr: ChildBucketAddr, slot: u8) -> Result<ChildBucketAddr> {
        if addr.child_buckets_size == 0 {
            return Ok(ChildBucketAddr::default());
        }
        let bz = self.load(addr.child_buckets_addr())?;
        Ok(decode_child_half(&bz, &self.dir)?
            .into_iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, a)| a)
            .unwrap_or_default())
    }

    /// Address of the entry bucket in `slot`, reading only the entry half
    pub fn find_entry_addr(&self, addr: ChildBucketAddr, slot: u8) -> Result<BundleAddr> {
        if addr.entry_buckets_size == 0 {
            return Ok(BundleAddr::default());
        }
        let bz = self.load(addr.entry_buckets_addr())?;
        Ok(decode_entry_half(&bz, &self.dir)?
            .into_iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, a)| a)
            .unwrap_or_default())
    }

    pub fn load_entry_bucket<E: IndexEntry>(&self, addr: BundleAddr) -> Result<SlotEntries<E>> {
        let bz = self.load(addr)?;
        decode_entry_bucket(&bz, self.header.slots_are_single, &self.dir)
    }
}

/// Both halves of a child bucket, indexed by child slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedChildBucket {
    pub child_addrs: Vec<ChildBucketAddr>,
    pub entry_addrs: Vec<BundleAddr>,
}

impl Default for LoadedChildBucket {
    fn default() -> Self {
        Self {
            child_addrs: vec![ChildBucketAddr::default(); CHILD_ADDRS_PER_BUCKET],
            entry_addrs: vec![BundleAddr::default(); CHILD_ADDRS_PER_BUCKET],
        }
    }
}

fn decode_child_half(bz: &[u8], path: &Path) -> Result<Vec<(u8, ChildBucketAddr)>> {
    if bz.len() % CHILD_ITEM_SIZE != 0 {
        return Err(PacketFileError::corrupt_index(
            path,
            format!("child bucket half of {} bytes", bz.len()),
        ));
    }
    Ok(bz
        .chunks_exact(CHILD_ITEM_SIZE)
        .map(|c| (c[0], ChildBucketAddr::decode(&c[1..])))
        .collect())
}

fn decode_entry_half(bz: &[u8], path: &Path) -> Result<Vec<(u8, BundleAddr)>> {
    if bz.len() % ENTRY_ITEM_SIZE != 0 {
        return Err(PacketFileError::corrupt_index(
            path,
            format!("entry bucket half of {} bytes", bz.len()),
        ));
    }
    Ok(bz
        .chunks_exact(ENTRY_ITEM_SIZE)
        .map(|c| (c[0], BundleAddr::decode(&c[1..])))
        .collect())
}

/// Encode a child bucket with the CRC of each half in place. Returns the
/// record and the sizes of its two halves.
pub fn encode_child_bucket(
    children: &[(u8, ChildBucketAddr)],
    entries: &[(u8, BundleAddr)],
) -> Result<(Vec<u8>, u32, u32)> {
    let mut buf = Vec::with_capacity(
        children.len() * CHILD_ITEM_SIZE + entries.len() * ENTRY_ITEM_SIZE + 2 * CRC_SIZE,
    );
    if !children.is_empty() {
        for (slot, addr) in children {
            buf.push(*slot);
            addr.encode(&mut buf);
        }
        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        store_crc(&mut buf)?;
    }
    let child_size = buf.len();
    if !entries.is_empty() {
        for (slot, addr) in entries {
            buf.push(*slot);
            addr.encode(&mut buf);
        }
        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        store_crc(&mut buf[child_size..])?;
    }
    let entry_size = buf.len() - child_size;
    Ok((buf, child_size as u32, entry_size as u32))
}

fn stores_singles_sparsely(entry_size: usize, num_slots: usize) -> bool {
    num_slots * (1 + entry_size) < ENTRY_SLOTS_PER_BUCKET * entry_size
}

fn check_slot(slot: u8, prev: Option<u8>, path: &Path) -> Result<()> {
    if slot as usize >= ENTRY_SLOTS_PER_BUCKET || prev.map_or(false, |p| slot <= p) {
        return Err(PacketFileError::corrupt_index(
            path,
            format!("entry bucket slot {} out of order", slot),
        ));
    }
    Ok(())
}

/// Decode the payload of an entry bucket. `path` is only used in errors.
pub fn decode_entry_bucket<E: IndexEntry>(
    bz: &[u8],
    single: bool,
    path: &Path,
) -> Result<SlotEntries<E>> {
    let mut r = FieldReader::new(bz, path);
    let num_slots = r.u16()? as usize;
    if num_slots > ENTRY_SLOTS_PER_BUCKET {
        return Err(PacketFileError::corrupt_index(
            path,
            format!("entry bucket with {} slots", num_slots),
        ));
    }
    let mut out = Vec::with_capacity(num_slots);

    if single && stores_singles_sparsely(E::SIZE, num_slots) {
        let slots = r.bytes(num_slots)?;
        let mut prev = None;
        for &slot in slots {
            check_slot(slot, prev, path)?;
            prev = Some(slot);
            out.push((slot, vec![E::decode(r.bytes(E::SIZE)?)?]));
        }
    } else if single {
        for slot in 0..ENTRY_SLOTS_PER_BUCKET {
            let bz = r.bytes(E::SIZE)?;
            let entry = E::decode(bz)?;
            if entry.data_address().is_valid() {
                out.push((slot as u8, vec![entry]));
            }
        }
        if out.len() != num_slots {
            return Err(PacketFileError::corrupt_index(
                path,
                format!("entry bucket claims {} slots, holds {}", num_slots, out.len()),
            ));
        }
    } else {
        let mut counts = Vec::with_capacity(num_slots);
        let mut prev = None;
        for _ in 0..num_slots {
            let slot = r.u8()?;
            check_slot(slot, prev, path)?;
            prev = Some(slot);
            counts.push((slot, r.u16()? as usize));
        }
        for (slot, count) in counts {
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(E::decode(r.bytes(E::SIZE)?)?);
            }
            out.push((slot, entries));
        }
    }
    r.finish()?;
    Ok(out)
}

/// Encode the payload of an entry bucket, without its CRC. Slots must be
/// ascending; a single-slot bucket keeps the first entry of each slot.
pub fn encode_entry_bucket<E: IndexEntry>(slots: &SlotEntries<E>, single: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 2];
    LittleEndian::write_u16(&mut tmp, slots.len() as u16);
    buf.extend_from_slice(&tmp);

    if single && stores_singles_sparsely(E::SIZE, slots.len()) {
        buf.extend(slots.iter().map(|(slot, _)| *slot));
        for (_, entries) in slots {
            if let Some(e) = entries.first() {
                e.encode(&mut buf);
            }
        }
    } else if single {
        let mut next = slots.iter().peekable();
        for slot in 0..ENTRY_SLOTS_PER_BUCKET {
            match next.next_if(|(s, _)| *s as usize == slot) {
                Some((_, entries)) if !entries.is_empty() => entries[0].encode(&mut buf),
                _ => buf.resize(buf.len() + E::SIZE, 0),
            }
        }
    } else {
        for (slot, entries) in slots {
            buf.push(*slot);
            LittleEndian::write_u16(&mut tmp, entries.len() as u16);
            buf.extend_from_slice(&tmp);
        }
        for (_, entries) in slots {
            for e in entries {
                e.encode(&mut buf);
            }
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geindex::addr::ExternalDataAddress;
    use crate::geindex::entries::{EntryType, SimpleInsetEntry, TypedEntry};
    use filebundle::crc::check_crc;

    fn inset(slot: u8) -> SimpleInsetEntry {
        SimpleInsetEntry::new(ExternalDataAddress::new(slot as u64 * 100, 0, 50), 1, slot as u32)
    }

    #[test]
    fn test_single_slots_sparse_and_full() {
        let path = Path::new("idx");
        let few: SlotEntries<SimpleInsetEntry> = vec![(0, vec![inset(0)]), (84, vec![inset(84)])];
        let bz = encode_entry_bucket(&few, true);
        assert_eq!(bz.len(), 2 + 2 + 2 * SimpleInsetEntry::SIZE);
        assert_eq!(decode_entry_bucket::<SimpleInsetEntry>(&bz, true, path).unwrap(), few);

        let many: SlotEntries<SimpleInsetEntry> =
            (0..84u8).map(|s| (s, vec![inset(s)])).collect();
        let bz = encode_entry_bucket(&many, true);
        assert_eq!(bz.len(), 2 + ENTRY_SLOTS_PER_BUCKET * SimpleInsetEntry::SIZE);
        assert_eq!(decode_entry_bucket::<SimpleInsetEntry>(&bz, true, path).unwrap(), many);
    }

    #[test]
    fn test_multiple_slots() {
        let path = Path::new("idx");
        let e = |t, v| TypedEntry::new(ExternalDataAddress::new(8, 1, 20), v, 0, t);
        let slots: SlotEntries<TypedEntry> = vec![
            (3, vec![e(EntryType::Imagery, 1), e(EntryType::Terrain, 1)]),
            (40, vec![e(EntryType::QtPacket, 2)]),
        ];
        let bz = encode_entry_bucket(&slots, false);
        assert_eq!(bz.len(), 2 + 2 * 3 + 3 * TypedEntry::SIZE);
        assert_eq!(decode_entry_bucket::<TypedEntry>(&bz, false, path).unwrap(), slots);

        assert!(decode_entry_bucket::<TypedEntry>(&bz[..bz.len() - 1], false, path)
            .unwrap_err()
            .is_corruption());
        let mut swapped = bz.clone();
        swapped[5] = 2;
        assert!(decode_entry_bucket::<TypedEntry>(&swapped, false, path)
            .unwrap_err()
            .is_corruption());
    }

    #[test]
    fn test_child_bucket_halves_carry_crcs() {
        let children = vec![(7u8, ChildBucketAddr::new(0, 30, 17))];
        let entries = vec![(7u8, BundleAddr::new(90, 40)), (9, BundleAddr::new(130, 40))];
        let (bz, child_size, entry_size) = encode_child_bucket(&children, &entries).unwrap();
        assert_eq!(child_size as usize, CHILD_ITEM_SIZE + CRC_SIZE);
        assert_eq!(entry_size as usize, 2 * ENTRY_ITEM_SIZE + CRC_SIZE);
        assert!(check_crc(&bz[..child_size as usize]));
        assert!(check_crc(&bz[child_size as usize..]));

        let path = Path::new("idx");
        let payload = &bz[..child_size as usize - CRC_SIZE];
        assert_eq!(decode_child_half(payload, path).unwrap(), children);
        let payload = &bz[child_size as usize..bz.len() - CRC_SIZE];
        assert_eq!(decode_entry_half(payload, path).unwrap(), entries);
        assert!(decode_entry_half(&payload[1..], path).is_err());

        let (bz, child_size, entry_size) = encode_child_bucket(&[], &entries).unwrap();
        assert_eq!(child_size, 0);
        assert_eq!(entry_size as usize, bz.len());
    }
}
