// List a geindex or the index items of a portable packet bundle, or look up
// one key in either.
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use bundledump::common::cli::{packet_type_name, IndexDumpCli};
use bundledump::common::geindex_dump::{self, IndexKind};
use bundledump::common::utils;
use log::debug;
use packetfile::def::PORTABLE_INDEX_FILE_NAME;
use packetfile::geindex::{
    is_geindex, BlendEntry, ChannelledEntry, SimpleInsetEntry, TypedEntry, TypedReadKey,
};
use packetfile::portable::{IndexItem, PacketBundleFinder};
use packetfile::QuadtreePath;

fn print_item(n: u64, item: &IndexItem) {
    println!(
        "{:>10} {:<26} {:<8} ch {:>4} file {:>4} offset {:>14} size {:>10}",
        n,
        item.quadtree_address(),
        packet_type_name(item.packet_type),
        item.channel,
        item.file_id,
        item.offset,
        item.packet_size
    );
}

fn run_geindex(args: &IndexDumpCli, dir: &Path) -> anyhow::Result<ExitCode> {
    let mut out = io::stdout().lock();
    let kind = geindex_dump::describe(dir, &mut out)?;

    if let Some(qtpath) = &args.qtpath {
        if kind != IndexKind::Unified {
            anyhow::bail!("lookups need a unified index, {:?} is a {:?} index", dir, kind);
        }
        let path: QuadtreePath = qtpath
            .parse()
            .with_context(|| format!("bad quadtree path {:?}", qtpath))?;
        let channel = args.channel as u32;
        let key = match args.version {
            Some(version) => TypedReadKey::new(args.entry_type, channel, version),
            None => TypedReadKey::any_version(args.entry_type, channel),
        };
        return match geindex_dump::lookup_typed(dir, &path, &key)? {
            Some((entry, size)) => {
                println!("{} {} ({} payload bytes)", path, entry, size);
                Ok(ExitCode::SUCCESS)
            }
            None => {
                println!("{} {} ch {}: not found", path, args.entry_type, channel);
                Ok(ExitCode::FAILURE)
            }
        };
    }

    let (paths, entries) = match kind {
        IndexKind::Unified => geindex_dump::list::<TypedEntry>(dir, args.count, &mut out)?,
        IndexKind::Blend => geindex_dump::list::<BlendEntry>(dir, args.count, &mut out)?,
        IndexKind::Vector => geindex_dump::list::<ChannelledEntry>(dir, args.count, &mut out)?,
        IndexKind::Inset => geindex_dump::list::<SimpleInsetEntry>(dir, args.count, &mut out)?,
    };
    println!("listed {} entries at {} paths", entries, paths);
    Ok(ExitCode::SUCCESS)
}

fn run_portable(args: &IndexDumpCli, dir: &Path) -> anyhow::Result<ExitCode> {
    let index_path = dir.join(PORTABLE_INDEX_FILE_NAME);
    let file = File::open(&index_path).with_context(|| format!("opening {:?}", index_path))?;
    let index_size = file.metadata()?.len();
    let mut finder = PacketBundleFinder::new(BufReader::new(file), 0, index_size)
        .with_context(|| format!("reading {:?}", index_path))?;
    debug!("{:?}: {} items", index_path, finder.item_count());

    if let Some(address) = &args.qtpath {
        let mut item = IndexItem::new(address, args.packet_type, args.channel)
            .with_context(|| format!("bad quadtree address {:?}", address))?;
        if !finder.find_packet_in_index(&mut item)? {
            println!(
                "{} {} ch {}: not found",
                address,
                packet_type_name(args.packet_type),
                args.channel
            );
            return Ok(ExitCode::FAILURE);
        }
        print_item(0, &item);
        return Ok(ExitCode::SUCCESS);
    }

    let total = finder.item_count();
    let limit = if args.count == 0 { total } else { args.count.min(total) };
    for n in 0..limit {
        let item = finder
            .read_item(n)
            .with_context(|| format!("reading item {}", n))?;
        print_item(n, &item);
    }
    println!("listed {} of {} items", limit, total);
    Ok(ExitCode::SUCCESS)
}

fn run(args: &IndexDumpCli) -> anyhow::Result<ExitCode> {
    let dir = Path::new(&args.path);
    if is_geindex(dir) {
        run_geindex(args, dir)
    } else {
        run_portable(args, dir)
    }
}

fn main() -> ExitCode {
    let args: IndexDumpCli = match utils::parse_args() {
        Ok(args) => args,
        Err(code) => return code,
    };
    utils::init_logging(args.verbose);
    utils::report(run(&args))
}
