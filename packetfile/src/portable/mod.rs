//! Portable packet bundles.
//!
//! A self-contained format for shipping a globe: packets of any type keyed by
//! `(quadtree address, packet type, channel)`, appended to `pbundle_NNNN`
//! files, plus one `index` file holding the sorted 24 byte [`IndexItem`]s.
//! There is no header or checksum; the index is looked up in place by binary
//! search, also when it is embedded in a larger container file.

pub mod finder;
pub mod item;
pub mod reader;
pub mod writer;

pub use finder::PacketBundleFinder;
pub use item::{IndexItem, DBROOT_PACKET, IMAGE_PACKET, QTP_PACKET, TERRAIN_PACKET, VECTOR_PACKET};
pub use reader::PacketBundleReader;
pub use writer::PacketBundleWriter;

use crate::def::PORTABLE_FILE_PREFIX;

/// File name of bundle file `file_id`
pub fn bundle_file_name(file_id: u16) -> String {
    format!("{}{:04}", PORTABLE_FILE_PREFIX, file_id)
}

/// File id of a `pbundle_NNNN` file name
pub fn parse_bundle_file_name(name: &str) -> Option<u16> {
    let digits = name.strip_prefix(PORTABLE_FILE_PREFIX)?;
    if digits.len() < 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let file_id: u16 = digits.parse().ok()?;
    (bundle_file_name(file_id) == name).then_some(file_id)
}
