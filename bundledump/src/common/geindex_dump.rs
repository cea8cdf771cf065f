use std::fmt::Display;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use packetfile::geindex::{
    BlendEntry, ChannelledEntry, GeIndexHeader, IndexEntry, SimpleInsetEntry, TypedEntry,
    TypedReadKey,
};
use packetfile::{GeIndexReader, GeIndexTraverser, QuadtreePath};

/// Entry kind of a geindex, from its content description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Unified,
    Blend,
    Vector,
    Inset,
}

impl IndexKind {
    pub fn of(header: &GeIndexHeader) -> IndexKind {
        match header.content_desc.as_str() {
            d if d == TypedEntry::CONTENT_DESC => IndexKind::Unified,
            d if d == BlendEntry::CONTENT_DESC => IndexKind::Blend,
            d if d == ChannelledEntry::CONTENT_DESC => IndexKind::Vector,
            d if d == SimpleInsetEntry::CONTENT_DESC => IndexKind::Inset,
            _ if header.slots_are_single => IndexKind::Inset,
            _ => IndexKind::Unified,
        }
    }
}

/// Print the header summary of the index at `dir`
pub fn describe(dir: &Path, out: &mut impl Write) -> anyhow::Result<IndexKind> {
    let header = GeIndexHeader::read(dir).with_context(|| format!("reading header of {:?}", dir))?;
    let kind = IndexKind::of(&header);
    writeln!(
        out,
        "{:?}: {:?} index {:?}, {} packet files, {} wasted bytes",
        dir,
        kind,
        header.content_desc,
        header.packet_files.len(),
        header.wasted_space
    )?;
    for (n, file) in header.packet_files.iter().enumerate() {
        let shown = if file.is_empty() { "(removed)" } else { file.as_str() };
        writeln!(out, "  file {:>4} extra {:>6} {}", n, header.packet_extra(n as u32), shown)?;
    }
    Ok(kind)
}

/// List up to `limit` paths (0 for all) with their entries. Returns the
/// number of paths and entries listed.
pub fn list<E: IndexEntry + Display>(
    dir: &Path,
    limit: u64,
    out: &mut impl Write,
) -> anyhow::Result<(u64, u64)> {
    let traverser = GeIndexTraverser::<E>::open(dir)
        .with_context(|| format!("opening geindex {:?}", dir))?;
    let mut paths = 0u64;
    let mut entries = 0u64;
    for item in traverser {
        if limit != 0 && paths == limit {
            break;
        }
        let (path, slot) = item.with_context(|| format!("walking {:?} after {} paths", dir, paths))?;
        for e in &slot {
            writeln!(out, "{:>10} {:<26} {}", paths, path.to_string(), e)?;
        }
        paths += 1;
        entries += slot.len() as u64;
    }
    Ok((paths, entries))
}

/// Look up one typed entry, following `version` when given
pub fn lookup_typed(
    dir: &Path,
    path: &QuadtreePath,
    key: &TypedReadKey,
) -> anyhow::Result<Option<(TypedEntry, usize)>> {
    let reader = GeIndexReader::<TypedEntry>::open(dir, 1)
        .with_context(|| format!("opening geindex {:?}", dir))?;
    let Some(entry) = reader.get_entry(path, key)? else {
        return Ok(None);
    };
    let data = reader
        .read_data(entry.data_address)
        .with_context(|| format!("reading packet of {}", path))?;
    Ok(Some((entry, data.len())))
}
