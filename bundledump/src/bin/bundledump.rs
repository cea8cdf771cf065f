// Dump a packet file: one line per index entry, optional hex dump of the
// payloads, optional payload size histogram, then a summary.
use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use bundledump::common::cli::BundleDumpCli;
use bundledump::common::utils::{self, SizeHistogram};
use filebundle::CRC_SIZE;
use log::{debug, info, warn};
use packetfile::def::INDEX_FILE_NAME;
use packetfile::{PacketFileReaderBase, PacketIndexReader};

fn dump(args: &BundleDumpCli) -> anyhow::Result<ExitCode> {
    let dir = Path::new(&args.path);
    let base = PacketFileReaderBase::open(dir)
        .with_context(|| format!("opening packet file {}", args.path))?;
    let index = PacketIndexReader::open(dir.join(INDEX_FILE_NAME))
        .with_context(|| format!("opening index of {}", args.path))?;
    let data_has_crc = index.data_has_crc();
    let total = index.entry_count();
    println!(
        "{}: {} entries, records {} CRC",
        args.path,
        total,
        if data_has_crc { "with" } else { "without" }
    );
    for file in base.manifest()? {
        debug!("{:?}: {} bytes", file.path, file.data_size);
    }

    let limit = if args.count == 0 { total } else { args.count.min(total) };
    let mut sizes = Vec::with_capacity(limit as usize);
    let mut payload_bytes = 0u64;
    let mut corrupt = 0u64;
    for (n, entry) in index.take(limit as usize).enumerate() {
        let entry = entry.with_context(|| format!("reading index entry {}", n))?;
        println!(
            "{:>10} {:<24} pos {:>14} size {:>10} extra {}",
            n,
            entry.qt_path().to_string(),
            entry.position(),
            entry.record_size(),
            entry.extra()
        );
        let record_size = entry.record_size() as usize;
        let payload = if data_has_crc {
            base.read_at_crc(entry.position(), record_size)
        } else {
            let mut buf = vec![0u8; record_size];
            base.read_at(entry.position(), &mut buf).map(|_| buf)
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) if e.is_corruption() => {
                warn!("entry {} ({}): {}", n, entry.qt_path(), e);
                corrupt += 1;
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("reading record of entry {}", n)),
        };
        if args.dump {
            print!("{}", utils::hex_dump(&payload));
        }
        payload_bytes += payload.len() as u64;
        sizes.push(payload.len() as u64);
    }

    if let Some(buckets) = args.histogram {
        println!("payload size histogram:");
        print!("{}", SizeHistogram::compute(&sizes, buckets).render());
    }
    let crc_bytes = if data_has_crc { CRC_SIZE as u64 * sizes.len() as u64 } else { 0 };
    println!(
        "read {} of {} entries, {} payload bytes, {} CRC bytes, {} corrupt records",
        sizes.len() as u64 + corrupt,
        total,
        payload_bytes,
        crc_bytes,
        corrupt
    );
    if corrupt > 0 {
        return Ok(ExitCode::FAILURE);
    }
    info!("{} looks healthy", args.path);
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let args: BundleDumpCli = match utils::parse_args() {
        Ok(args) => args,
        Err(code) => return code,
    };
    utils::init_logging(args.verbose);
    utils::report(dump(&args))
}
