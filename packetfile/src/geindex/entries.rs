//! The entry kinds a geindex can hold. Every entry starts with the
//! [`ExternalDataAddress`] of its packet; the rest is per-kind metadata.
//!
//! | kind | bytes | slots |
//! |------|-------|-------|
//! | [`TypedEntry`] | 25 | many per path |
//! | [`BlendEntry`] | 24 | many per path |
//! | [`ChannelledEntry`] | 28 | many per path |
//! | [`SimpleInsetEntry`] | 24 | one per path |

use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};

use super::addr::ExternalDataAddress;
use crate::error::{PacketFileError, Result};

pub trait IndexEntry: Sized + Clone + fmt::Debug {
    /// Encoded size in bytes
    const SIZE: usize;
    /// Whether a path holds at most one entry of this kind
    const SINGLE: bool;
    /// Stored in the index header to tell index kinds apart
    const CONTENT_DESC: &'static str;

    fn data_address(&self) -> ExternalDataAddress;

    fn encode(&self, out: &mut Vec<u8>);

    /// `bz` is exactly [`Self::SIZE`] bytes
    fn decode(bz: &[u8]) -> Result<Self>;

    /// Whether `other` replaces `self` when both are written to one path
    fn write_matches(&self, other: &Self) -> bool;
}

/// An entry kind that supports keyed lookups
pub trait ReadableEntry: IndexEntry {
    type ReadKey;

    fn read_matches(&self, key: &Self::ReadKey) -> bool;

    /// Pick the entry a lookup returns among the entries of one path.
    /// `packet_extra` maps a packet file number to its extra value.
    fn select(
        key: &Self::ReadKey,
        candidates: Vec<Self>,
        _packet_extra: impl Fn(u32) -> u32,
    ) -> Option<Self> {
        candidates.into_iter().find(|e| e.read_matches(key))
    }
}

/// Packet kinds held by a unified index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum EntryType {
    QtPacket = 0,
    Imagery = 1,
    Terrain = 2,
    VectorGe = 3,
    VectorMaps = 4,
    VectorMapsRaster = 5,
    Unified = 6,
    DatedImagery = 7,
    QtPacket2 = 8,
}

impl EntryType {
    pub const ALL: [EntryType; 9] = [
        EntryType::QtPacket,
        EntryType::Imagery,
        EntryType::Terrain,
        EntryType::VectorGe,
        EntryType::VectorMaps,
        EntryType::VectorMapsRaster,
        EntryType::Unified,
        EntryType::DatedImagery,
        EntryType::QtPacket2,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EntryType::QtPacket => "QTPacket",
            EntryType::Imagery => "Imagery",
            EntryType::Terrain => "Terrain",
            EntryType::VectorGe => "VectorGE",
            EntryType::VectorMaps => "VectorMaps",
            EntryType::VectorMapsRaster => "VectorMapsRaster",
            EntryType::Unified => "Unified",
            EntryType::DatedImagery => "DatedImagery",
            EntryType::QtPacket2 => "QTPacket2",
        }
    }
}

impl TryFrom<u8> for EntryType {
    type Error = PacketFileError;

    fn try_from(v: u8) -> Result<Self> {
        EntryType::ALL
            .get(v as usize)
            .copied()
            .ok_or_else(|| PacketFileError::CorruptRecord(format!("unknown entry type {}", v)))
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        EntryType::ALL
            .iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown entry type {:?}", s))
    }
}

/// Entry of a unified index: one packet per (type, channel, version)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedEntry {
    pub data_address: ExternalDataAddress,
    pub version: u32,
    pub channel: u32,
    pub entry_type: EntryType,
}

/// Lookup key of a [`TypedEntry`]. The version only counts when
/// `version_matters` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedReadKey {
    pub version: u32,
    pub channel: u32,
    pub entry_type: EntryType,
    pub version_matters: bool,
}

impl TypedReadKey {
    pub fn new(entry_type: EntryType, channel: u32, version: u32) -> Self {
        Self {
            version,
            channel,
            entry_type,
            version_matters: true,
        }
    }

    pub fn any_version(entry_type: EntryType, channel: u32) -> Self {
        Self {
            version: 0,
            channel,
            entry_type,
            version_matters: false,
        }
    }
}

impl TypedEntry {
    pub fn new(
        data_address: ExternalDataAddress,
        version: u32,
        channel: u32,
        entry_type: EntryType,
    ) -> Self {
        Self {
            data_address,
            version,
            channel,
            entry_type,
        }
    }
}

impl IndexEntry for TypedEntry {
    const SIZE: usize = 25;
    const SINGLE: bool = false;
    const CONTENT_DESC: &'static str = "UnifiedIndex";

    fn data_address(&self) -> ExternalDataAddress {
        self.data_address
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let mut bz = [0u8; Self::SIZE];
        self.data_address.write(&mut bz[0..16]);
        LittleEndian::write_u32(&mut bz[16..20], self.version);
        LittleEndian::write_u32(&mut bz[20..24], self.channel);
        bz[24] = self.entry_type as u8;
        out.extend_from_slice(&bz);
    }

    fn decode(bz: &[u8]) -> Result<Self> {
        Ok(Self {
            data_address: ExternalDataAddress::read(&bz[0..16]),
            version: LittleEndian::read_u32(&bz[16..20]),
            channel: LittleEndian::read_u32(&bz[20..24]),
            entry_type: EntryType::try_from(bz[24])?,
        })
    }

    fn write_matches(&self, other: &Self) -> bool {
        self.channel == other.channel
            && self.entry_type == other.entry_type
            && self.version == other.version
    }
}

impl ReadableEntry for TypedEntry {
    type ReadKey = TypedReadKey;

    fn read_matches(&self, key: &TypedReadKey) -> bool {
        self.channel == key.channel
            && self.entry_type == key.entry_type
            && (!key.version_matters || self.version == key.version)
    }
}

impl fmt::Display for TypedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} channel={} version={} file={} offset={} size={}",
            self.entry_type,
            self.channel,
            self.version,
            self.data_address.file_num,
            self.data_address.offset,
            self.data_address.size
        )
    }
}

/// Entry of a blend (imagery) index. Lookups return the entry from the
/// packet file with the largest extra value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendEntry {
    pub data_address: ExternalDataAddress,
    pub version: u32,
    pub inset_id: u32,
}

impl BlendEntry {
    pub fn new(data_address: ExternalDataAddress, version: u32, inset_id: u32) -> Self {
        Self {
            data_address,
            version,
            inset_id,
        }
    }
}

impl IndexEntry for BlendEntry {
    const SIZE: usize = 24;
    const SINGLE: bool = false;
    const CONTENT_DESC: &'static str = "BlendIndex";

    fn data_address(&self) -> ExternalDataAddress {
        self.data_address
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let mut bz = [0u8; Self::SIZE];
        self.data_address.write(&mut bz[0..16]);
        LittleEndian::write_u32(&mut bz[16..20], self.version);
        LittleEndian::write_u32(&mut bz[20..24], self.inset_id);
        out.extend_from_slice(&bz);
    }

    fn decode(bz: &[u8]) -> Result<Self> {
        Ok(Self {
            data_address: ExternalDataAddress::read(&bz[0..16]),
            version: LittleEndian::read_u32(&bz[16..20]),
            inset_id: LittleEndian::read_u32(&bz[20..24]),
        })
    }

    fn write_matches(&self, other: &Self) -> bool {
        self.inset_id == other.inset_id
    }
}

impl ReadableEntry for BlendEntry {
    type ReadKey = ();

    fn read_matches(&self, _key: &()) -> bool {
        true
    }

    fn select(_key: &(), candidates: Vec<Self>, packet_extra: impl Fn(u32) -> u32) -> Option<Self> {
        // first entry wins a tie
        let mut best: Option<(u32, Self)> = None;
        for e in candidates {
            let extra = packet_extra(e.data_address.file_num);
            if best.as_ref().map_or(true, |(b, _)| extra > *b) {
                best = Some((extra, e));
            }
        }
        best.map(|(_, e)| e)
    }
}

impl fmt::Display for BlendEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blend inset={} version={} file={} offset={} size={}",
            self.inset_id,
            self.version,
            self.data_address.file_num,
            self.data_address.offset,
            self.data_address.size
        )
    }
}

/// Entry of a vector index, one per channel. Only traversed, never looked
/// up by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelledEntry {
    pub data_address: ExternalDataAddress,
    pub version: u32,
    pub channel: u32,
}

impl ChannelledEntry {
    pub fn new(data_address: ExternalDataAddress, version: u32, channel: u32) -> Self {
        Self {
            data_address,
            version,
            channel,
        }
    }
}

impl IndexEntry for ChannelledEntry {
    const SIZE: usize = 28;
    const SINGLE: bool = false;
    const CONTENT_DESC: &'static str = "VectorIndex";

    fn data_address(&self) -> ExternalDataAddress {
        self.data_address
    }

    // last four bytes are reserved and written as zero
    fn encode(&self, out: &mut Vec<u8>) {
        let mut bz = [0u8; Self::SIZE];
        self.data_address.write(&mut bz[0..16]);
        LittleEndian::write_u32(&mut bz[16..20], self.version);
        LittleEndian::write_u32(&mut bz[20..24], self.channel);
        out.extend_from_slice(&bz);
    }

    fn decode(bz: &[u8]) -> Result<Self> {
        Ok(Self {
            data_address: ExternalDataAddress::read(&bz[0..16]),
            version: LittleEndian::read_u32(&bz[16..20]),
            channel: LittleEndian::read_u32(&bz[20..24]),
        })
    }

    fn write_matches(&self, other: &Self) -> bool {
        self.channel == other.channel
    }
}

impl fmt::Display for ChannelledEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vector channel={} version={} file={} offset={} size={}",
            self.channel,
            self.version,
            self.data_address.file_num,
            self.data_address.offset,
            self.data_address.size
        )
    }
}

/// Entry of a terrain index built from insets: at most one per path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleInsetEntry {
    pub data_address: ExternalDataAddress,
    pub version: u32,
    pub inset_id: u32,
}

impl SimpleInsetEntry {
    pub fn new(data_address: ExternalDataAddress, version: u32, inset_id: u32) -> Self {
        Self {
            data_address,
            version,
            inset_id,
        }
    }
}

impl IndexEntry for SimpleInsetEntry {
    const SIZE: usize = 24;
    const SINGLE: bool = true;
    const CONTENT_DESC: &'static str = "CombinedTerrainIndex";

    fn data_address(&self) -> ExternalDataAddress {
        self.data_address
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let mut bz = [0u8; Self::SIZE];
        self.data_address.write(&mut bz[0..16]);
        LittleEndian::write_u32(&mut bz[16..20], self.version);
        LittleEndian::write_u32(&mut bz[20..24], self.inset_id);
        out.extend_from_slice(&bz);
    }

    fn decode(bz: &[u8]) -> Result<Self> {
        Ok(Self {
            data_address: ExternalDataAddress::read(&bz[0..16]),
            version: LittleEndian::read_u32(&bz[16..20]),
            inset_id: LittleEndian::read_u32(&bz[20..24]),
        })
    }

    fn write_matches(&self, _other: &Self) -> bool {
        true
    }
}

impl ReadableEntry for SimpleInsetEntry {
    type ReadKey = ();

    fn read_matches(&self, _key: &()) -> bool {
        true
    }
}

impl fmt::Display for SimpleInsetEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inset={} version={} file={} offset={} size={}",
            self.inset_id,
            self.version,
            self.data_address.file_num,
            self.data_address.offset,
            self.data_address.size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(file_num: u32) -> ExternalDataAddress {
        ExternalDataAddress::new(64, file_num, 100)
    }

    #[test]
    fn test_typed_entry_layout() {
        let e = TypedEntry::new(addr(2), 7, 1001, EntryType::Terrain);
        let mut out = Vec::new();
        e.encode(&mut out);
        assert_eq!(out.len(), TypedEntry::SIZE);
        assert_eq!(out[24], 2);
        assert_eq!(TypedEntry::decode(&out).unwrap(), e);

        out[24] = 9;
        assert!(TypedEntry::decode(&out).unwrap_err().is_corruption());
    }

    #[test]
    fn test_typed_read_key() {
        let e = TypedEntry::new(addr(0), 7, 3, EntryType::Imagery);
        assert!(e.read_matches(&TypedReadKey::new(EntryType::Imagery, 3, 7)));
        assert!(!e.read_matches(&TypedReadKey::new(EntryType::Imagery, 3, 8)));
        assert!(e.read_matches(&TypedReadKey::any_version(EntryType::Imagery, 3)));
        assert!(!e.read_matches(&TypedReadKey::any_version(EntryType::Imagery, 4)));
        assert!(!e.read_matches(&TypedReadKey::any_version(EntryType::Terrain, 3)));
    }

    #[test]
    fn test_entry_type_names() {
        for t in EntryType::ALL {
            assert_eq!(t.name().parse::<EntryType>().unwrap(), t);
            assert_eq!(EntryType::try_from(t as u8).unwrap(), t);
        }
        assert_eq!("vectorge".parse::<EntryType>().unwrap(), EntryType::VectorGe);
        assert!("Elevation".parse::<EntryType>().is_err());
    }

    #[test]
    fn test_blend_select_prefers_largest_extra() {
        let extras = [5u32, 9, 9];
        let candidates = vec![
            BlendEntry::new(addr(0), 1, 10),
            BlendEntry::new(addr(1), 1, 11),
            BlendEntry::new(addr(2), 1, 12),
        ];
        let best = BlendEntry::select(&(), candidates, |n| extras[n as usize]).unwrap();
        assert_eq!(best.inset_id, 11);
        assert!(BlendEntry::select(&(), Vec::new(), |_| 0).is_none());
    }

    #[test]
    fn test_channelled_reserved_bytes() {
        let e = ChannelledEntry::new(addr(1), 4, 2000);
        let mut out = Vec::new();
        e.encode(&mut out);
        assert_eq!(out.len(), ChannelledEntry::SIZE);
        assert_eq!(&out[24..], &[0, 0, 0, 0]);
        assert_eq!(ChannelledEntry::decode(&out).unwrap(), e);
    }
}
