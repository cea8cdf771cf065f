use std::fmt::Write as _;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use log::error;

pub fn init_logging(verbose: bool) {
    let max_level = if verbose { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::default().default_filter_or(max_level));
}

/// Parse the command line. Help and version print and exit 0, any other
/// parse failure is a usage error and exits 1.
pub fn parse_args<T: Parser>() -> Result<T, ExitCode> {
    T::try_parse().map_err(|e| {
        let _ = e.print();
        match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
            _ => ExitCode::FAILURE,
        }
    })
}

/// Log a fatal error with its context chain and turn it into exit code 1
pub fn report(result: anyhow::Result<ExitCode>) -> ExitCode {
    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Classic 16 bytes per line hex dump with an ASCII column
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "  {:08x} ", line * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, " {:02x}", b);
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("  |");
        for b in chunk {
            out.push(if b.is_ascii_graphic() || *b == b' ' {
                char::from(*b)
            } else {
                '.'
            });
        }
        out.push_str("|\n");
    }
    out
}

/// Equal width buckets over the observed size range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeHistogram {
    pub min: u64,
    pub max: u64,
    pub buckets: Vec<u64>,
}

impl SizeHistogram {
    pub fn compute(sizes: &[u64], bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1);
        let min = sizes.iter().copied().min().unwrap_or(0);
        let max = sizes.iter().copied().max().unwrap_or(0);
        let width = ((max - min) / bucket_count as u64).max(1);
        let mut buckets = vec![0u64; bucket_count];
        for size in sizes {
            let idx = (((size - min) / width) as usize).min(bucket_count - 1);
            buckets[idx] += 1;
        }
        Self { min, max, buckets }
    }

    fn width(&self) -> u64 {
        ((self.max - self.min) / self.buckets.len() as u64).max(1)
    }

    pub fn render(&self) -> String {
        let peak = self.buckets.iter().copied().max().unwrap_or(0).max(1);
        let width = self.width();
        let mut out = String::new();
        for (i, count) in self.buckets.iter().enumerate() {
            let lo = self.min + i as u64 * width;
            let hi = if i + 1 == self.buckets.len() {
                self.max
            } else {
                lo + width - 1
            };
            let bar = "#".repeat((count * 50 / peak) as usize);
            let _ = writeln!(out, "  {:>10} - {:>10}: {:>8} {}", lo, hi, count, bar);
        }
        out
    }
}
