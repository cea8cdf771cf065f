use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use crate::def::{INDEX_ITEM_SIZE, MAX_LEVEL};
use crate::error::{PacketFileError, Result};
use crate::qtpath::QuadtreePath;

pub const IMAGE_PACKET: u8 = 0;
pub const TERRAIN_PACKET: u8 = 1;
pub const VECTOR_PACKET: u8 = 2;
pub const QTP_PACKET: u8 = 3;
pub const DBROOT_PACKET: u8 = 4;

/// One packet of a portable bundle index.
///
/// The quadtree address is packed the same way as a [`QuadtreePath`]: digits
/// 0..15 in `btree_high` with digit 0 in the top two bits, digits 16..23 in
/// `btree_low`. Ordering and equality look only at the key fields
/// `(btree_high, btree_low, level, packet_type, channel)`; the location
/// fields ride along.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexItem {
    pub btree_high: u32,
    pub btree_low: u16,
    pub level: u8,
    pub packet_type: u8,
    pub channel: u16,
    pub file_id: u16,
    pub packet_size: u32,
    pub offset: u64,
}

impl IndexItem {
    /// Key-only item for `address`, ready for a lookup
    pub fn new(address: &str, packet_type: u8, channel: u16) -> Result<Self> {
        let mut item = IndexItem::default();
        item.fill(address, packet_type, channel)?;
        Ok(item)
    }

    /// Set the key fields from an address of the form `"0"` + digits. The
    /// location fields are cleared.
    pub fn fill(&mut self, address: &str, packet_type: u8, channel: u16) -> Result<()> {
        let digits = address
            .strip_prefix('0')
            .ok_or_else(|| PacketFileError::InvalidPath(address.to_string()))?;
        let path: QuadtreePath = digits
            .parse()
            .map_err(|_| PacketFileError::InvalidPath(address.to_string()))?;
        self.set_path(&path);
        self.packet_type = packet_type;
        self.channel = channel;
        self.file_id = 0;
        self.packet_size = 0;
        self.offset = 0;
        Ok(())
    }

    fn set_path(&mut self, path: &QuadtreePath) {
        let raw = path.raw();
        self.btree_high = (raw >> 32) as u32;
        self.btree_low = (raw >> 16) as u16;
        self.level = path.level() as u8;
    }

    pub fn quadtree_path(&self) -> Result<QuadtreePath> {
        if self.level as u32 > MAX_LEVEL {
            return Err(PacketFileError::InvalidPath(format!(
                "index item level {}",
                self.level
            )));
        }
        let digits: Vec<u8> = self.quadtree_address().bytes().skip(1).map(|c| c - b'0').collect();
        QuadtreePath::from_digits(&digits)
    }

    /// The address with its leading root character, e.g. `"0301"`
    pub fn quadtree_address(&self) -> String {
        let level = (self.level as u32).min(MAX_LEVEL);
        let blist = ((self.btree_high as u64) << 32) | ((self.btree_low as u64) << 16);
        let mut address = String::with_capacity(level as usize + 1);
        address.push('0');
        for i in 0..level {
            let digit = (blist >> (62 - 2 * i)) & 3;
            address.push(char::from(b'0' + digit as u8));
        }
        address
    }

    fn key(&self) -> (u32, u16, u8, u8, u16) {
        (
            self.btree_high,
            self.btree_low,
            self.level,
            self.packet_type,
            self.channel,
        )
    }

    pub fn encode(&self) -> [u8; INDEX_ITEM_SIZE] {
        let mut bz = [0u8; INDEX_ITEM_SIZE];
        LittleEndian::write_u32(&mut bz[0..4], self.btree_high);
        LittleEndian::write_u16(&mut bz[4..6], self.btree_low);
        bz[6] = self.level;
        bz[7] = self.packet_type;
        LittleEndian::write_u16(&mut bz[8..10], self.channel);
        LittleEndian::write_u16(&mut bz[10..12], self.file_id);
        LittleEndian::write_u32(&mut bz[12..16], self.packet_size);
        LittleEndian::write_u64(&mut bz[16..24], self.offset);
        bz
    }

    pub fn decode(bz: &[u8; INDEX_ITEM_SIZE]) -> Self {
        IndexItem {
            btree_high: LittleEndian::read_u32(&bz[0..4]),
            btree_low: LittleEndian::read_u16(&bz[4..6]),
            level: bz[6],
            packet_type: bz[7],
            channel: LittleEndian::read_u16(&bz[8..10]),
            file_id: LittleEndian::read_u16(&bz[10..12]),
            packet_size: LittleEndian::read_u32(&bz[12..16]),
            offset: LittleEndian::read_u64(&bz[16..24]),
        }
    }
}

impl PartialEq for IndexItem {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for IndexItem {}

impl PartialOrd for IndexItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IndexItem {
        IndexItem {
            btree_high: 0x8000_0000,
            btree_low: 0x8000,
            level: 0x80,
            packet_type: 0x80,
            channel: 5,
            file_id: 0x3784,
            packet_size: 0x9202,
            offset: 0x9293_9202,
        }
    }

    #[test]
    fn test_key_fields_order() {
        let a = sample();
        let mut b = IndexItem {
            file_id: 0x1847,
            packet_size: 0x3902,
            offset: 0x84_7201,
            ..a
        };
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);

        b.btree_high = 0x7fff_ffff;
        assert!(b < a);
        b.btree_high = a.btree_high;

        b.btree_low = 0x7fff;
        assert!(b < a);
        b.btree_low = a.btree_low;

        b.level = 0x7f;
        assert!(b < a);
        b.level = a.level;

        b.packet_type = 0x7f;
        assert!(b < a);
        b.packet_type = a.packet_type;

        b.channel = 4;
        assert!(b < a);
        assert_ne!(a, b);
    }

    #[test]
    fn test_quadtree_address() {
        let mut item = IndexItem {
            btree_high: 0x1234_5678,
            btree_low: 0x9abc,
            ..Default::default()
        };
        let full = "0010203101112132021222330";
        for level in 0..=24u8 {
            item.level = level;
            assert_eq!(item.quadtree_address(), &full[..level as usize + 1]);
        }
    }

    #[test]
    fn test_fill_matches_address() {
        let mut item = sample();
        item.fill("0010203101112132021222330", TERRAIN_PACKET, 2)
            .unwrap();
        assert_eq!(item.btree_high, 0x1234_5678);
        assert_eq!(item.btree_low, 0x9abc);
        assert_eq!(item.level, 24);
        assert_eq!(item.packet_type, TERRAIN_PACKET);
        assert_eq!(item.channel, 2);
        assert_eq!(item.offset, 0);
        assert_eq!(item.quadtree_path().unwrap().to_string(), "010203101112132021222330");

        let root = IndexItem::new("0", DBROOT_PACKET, 0).unwrap();
        assert_eq!(root.level, 0);
        assert_eq!(root.quadtree_address(), "0");

        assert!(IndexItem::new("", IMAGE_PACKET, 0).is_err());
        assert!(IndexItem::new("1", IMAGE_PACKET, 0).is_err());
        assert!(IndexItem::new("0124", IMAGE_PACKET, 0).is_err());
    }

    #[test]
    fn test_encode_layout() {
        let item = sample();
        let bz = item.encode();
        assert_eq!(&bz[0..4], &[0, 0, 0, 0x80]);
        assert_eq!(bz[6], 0x80);
        assert_eq!(&bz[10..12], &[0x84, 0x37]);
        let back = IndexItem::decode(&bz);
        assert_eq!(back, item);
        assert_eq!(back.file_id, item.file_id);
        assert_eq!(back.offset, item.offset);
        assert_eq!(back.packet_size, item.packet_size);
    }
}
