use std::fs::{self, File};
use std::path::Path;

use packetfile::def::{INDEX_ITEM_SIZE, PORTABLE_INDEX_FILE_NAME};
use packetfile::portable::{
    bundle_file_name, IndexItem, PacketBundleFinder, PacketBundleReader, PacketBundleWriter,
    IMAGE_PACKET, TERRAIN_PACKET,
};
use tempfile::TempDir;

const PACKET_SIZE: usize = 25 * 256;

// Quadtree address with the leading root character for the first `level`
// digits of `blist`, digit 0 in the top two bits.
fn address(blist: u64, level: u32) -> String {
    let mut s = String::from("0");
    for i in 0..level {
        let digit = (blist >> (62 - 2 * i)) & 3;
        s.push(char::from(b'0' + digit as u8));
    }
    s
}

fn packet(first_byte: u8) -> Vec<u8> {
    let mut data: Vec<u8> = (0..PACKET_SIZE).map(|i| (i & 0xff) as u8).collect();
    data[0] = first_byte;
    data
}

fn check_packet(data: &[u8], first_byte: u8) {
    assert_eq!(data.len(), PACKET_SIZE);
    assert_eq!(data[0], first_byte);
    for (i, b) in data.iter().enumerate().skip(1) {
        assert_eq!(*b, (i & 0xff) as u8);
    }
}

fn write_bundle(dir: &Path, max_file_size: u64, num_packets: u64) -> u32 {
    let mut writer = PacketBundleWriter::create(dir, max_file_size).unwrap();
    let mut blist = 0u64;
    for i in 0..num_packets {
        let data = packet(i as u8);
        assert!(writer
            .append_packet(&address(blist, 24), IMAGE_PACKET, 0, &data)
            .unwrap());
        blist += 0x1_0000;
    }
    writer.close().unwrap();
    writer.file_count()
}

fn basic_read_write(max_file_size: u64, multi_file: bool) {
    let dir = TempDir::new().unwrap();
    let num_packets = 1200u64;
    let file_count = write_bundle(dir.path(), max_file_size, num_packets);
    assert_eq!(file_count > 1, multi_file);

    let index_path = dir.path().join(PORTABLE_INDEX_FILE_NAME);
    let index_size = fs::metadata(&index_path).unwrap().len();
    assert_eq!(index_size, num_packets * INDEX_ITEM_SIZE as u64);
    let mut finder = PacketBundleFinder::new(File::open(&index_path).unwrap(), 0, index_size).unwrap();
    let mut reader = PacketBundleReader::open(dir.path()).unwrap();
    let mut data = Vec::new();

    let last = (num_packets - 1) * 0x1_0000;
    assert!(reader
        .read_packet(&address(last, 24), IMAGE_PACKET, 0, &mut data)
        .unwrap());
    check_packet(&data, (num_packets - 1) as u8);
    let mut item = IndexItem::new(&address(last, 24), IMAGE_PACKET, 0).unwrap();
    assert!(finder.find_packet_in_index(&mut item).unwrap());
    assert_eq!(item.packet_size as usize, PACKET_SIZE);
    let last_offset = (num_packets - 1) * PACKET_SIZE as u64;
    if !multi_file {
        assert_eq!(item.offset, last_offset);
    }

    for (blist, first_byte) in [(0u64, 0x00u8), (0x7_0000, 0x07), (0x187_0000, 0x87), (0x391_0000, 0x91)] {
        let addr = address(blist, 24);
        assert!(reader.read_packet(&addr, IMAGE_PACKET, 0, &mut data).unwrap());
        check_packet(&data, first_byte);

        let mut item = IndexItem::new(&addr, IMAGE_PACKET, 0).unwrap();
        assert!(finder.find_packet_in_index(&mut item).unwrap());
        assert_eq!(item.quadtree_address(), addr);
        assert_eq!(item.packet_size as usize, PACKET_SIZE);
        if !multi_file {
            assert!(item.offset <= last_offset);
            assert_eq!(item.offset % PACKET_SIZE as u64, 0);
        }
    }

    // Shallower ancestors, other packet types and other subtrees are absent.
    let shallow = address(0x391_0000, 23);
    assert!(!reader.read_packet(&shallow, IMAGE_PACKET, 0, &mut data).unwrap());
    let mut item = IndexItem::new(&shallow, IMAGE_PACKET, 0).unwrap();
    assert!(!finder.find_packet_in_index(&mut item).unwrap());
    assert!(!reader.read_packet(&address(0, 24), TERRAIN_PACKET, 0, &mut data).unwrap());
    let elsewhere = address(0x8000_0000_0391_0000, 23);
    assert!(!reader.read_packet(&elsewhere, IMAGE_PACKET, 0, &mut data).unwrap());
}

#[test]
fn test_single_file_read_write() {
    basic_read_write(1 << 62, false);
}

#[test]
fn test_multi_file_read_write() {
    basic_read_write(1_000_000, true);
}

#[test]
fn test_index_embedded_in_container() {
    let dir = TempDir::new().unwrap();
    write_bundle(dir.path(), 1 << 30, 50);
    let index = fs::read(dir.path().join(PORTABLE_INDEX_FILE_NAME)).unwrap();

    let mut container = b"container header".to_vec();
    let index_offset = container.len() as u64;
    container.extend_from_slice(&index);
    container.extend_from_slice(b"more files");
    let mut finder = PacketBundleFinder::new(
        std::io::Cursor::new(container),
        index_offset,
        index.len() as u64,
    )
    .unwrap();
    finder.preload().unwrap();
    let mut item = IndexItem::new(&address(0x31_0000, 24), IMAGE_PACKET, 0).unwrap();
    assert!(finder.find_packet_in_index(&mut item).unwrap());
    assert_eq!(item.offset, 0x31 * PACKET_SIZE as u64);
    assert_eq!(item.file_id, 0);
}

#[test]
fn test_delta_holds_only_new_packets() {
    let root = TempDir::new().unwrap();
    let base_dir = root.path().join("data");
    let delta_dir = root.path().join("delta");
    let num_packets = 1200u64;
    let skip_interval = 100u64;
    let skipped = |i: u64| i % skip_interval == skip_interval - 1;

    let mut writer = PacketBundleWriter::create(&base_dir, 1 << 40).unwrap();
    for i in 0..num_packets {
        if !skipped(i) {
            writer
                .append_packet(&address(i * 0x1_0000, 24), IMAGE_PACKET, 0, &packet(i as u8))
                .unwrap();
        }
    }
    writer.close().unwrap();

    let mut delta = PacketBundleWriter::create_delta(&delta_dir, &base_dir, 1 << 40).unwrap();
    let mut write_count = 0;
    for i in 0..num_packets {
        if delta
            .append_packet(&address(i * 0x1_0000, 24), IMAGE_PACKET, 0, &packet(i as u8))
            .unwrap()
        {
            write_count += 1;
        }
    }
    delta.close().unwrap();
    assert_eq!(write_count, num_packets / skip_interval);
    assert_eq!(delta.packet_count() as u64, write_count);

    let mut base_reader = PacketBundleReader::open(&base_dir).unwrap();
    let mut delta_reader = PacketBundleReader::open(&delta_dir).unwrap();
    delta_reader.preload().unwrap();
    let mut data = Vec::new();
    for i in 0..num_packets {
        let addr = address(i * 0x1_0000, 24);
        let (present, absent) = if skipped(i) {
            (&mut delta_reader, &mut base_reader)
        } else {
            (&mut base_reader, &mut delta_reader)
        };
        assert!(!absent.read_packet(&addr, IMAGE_PACKET, 0, &mut data).unwrap());
        assert!(present.read_packet(&addr, IMAGE_PACKET, 0, &mut data).unwrap());
        assert_eq!(data[0], i as u8);
    }
}

#[test]
fn test_stale_index_removed_on_create() {
    let dir = TempDir::new().unwrap();
    write_bundle(dir.path(), 1 << 30, 3);
    let _writer = PacketBundleWriter::create(dir.path(), 1 << 30).unwrap();
    assert!(!dir.path().join(PORTABLE_INDEX_FILE_NAME).exists());
    assert!(dir.path().join(bundle_file_name(0)).exists());
}
