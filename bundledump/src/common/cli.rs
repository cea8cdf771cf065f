use clap::Parser;
use packetfile::geindex::EntryType;

/// Dump the packet index and records of a packet file
#[derive(Parser, Debug, Clone)]
#[command(name = "bundledump")]
pub struct BundleDumpCli {
    /// Packet file directory (holds bundle.hdr and packetindex)
    #[arg(long)]
    pub path: String,

    /// Stop after this many entries, 0 for all
    #[arg(long, default_value_t = 0)]
    pub count: u64,

    /// Debug logging
    #[arg(long, default_value_t = false)]
    pub verbose: bool,

    /// Hex dump every record payload
    #[arg(long, default_value_t = false)]
    pub dump: bool,

    /// Print a payload size histogram with this many buckets
    #[arg(long, num_args = 0..=1, default_missing_value = "10")]
    pub histogram: Option<usize>,
}

/// List or look up the entries of a geindex, or the index items of a
/// portable packet bundle
#[derive(Parser, Debug, Clone)]
#[command(name = "indexdump")]
pub struct IndexDumpCli {
    /// Geindex directory (holds index.hdr and bundle.hdr) or portable bundle
    /// directory (holds index and pbundle_NNNN files)
    #[arg(long)]
    pub path: String,

    /// Look up this quadtree address (leading root "0" included) instead of
    /// listing
    #[arg(long)]
    pub qtpath: Option<String>,

    /// Packet type for the lookup: imagery, terrain, vector, qtp, dbroot or a
    /// number
    #[arg(long, default_value = "imagery", value_parser = parse_packet_type)]
    pub packet_type: u8,

    /// Entry type for a geindex lookup, e.g. Imagery, Terrain, QTPacket2
    #[arg(long, default_value = "Imagery")]
    pub entry_type: EntryType,

    /// Version for a geindex lookup, any version when omitted
    #[arg(long)]
    pub version: Option<u32>,

    /// Channel for the lookup
    #[arg(long, default_value_t = 0)]
    pub channel: u16,

    /// Stop listing after this many items, 0 for all
    #[arg(long, default_value_t = 0)]
    pub count: u64,

    /// Debug logging
    #[arg(long, default_value_t = false)]
    pub verbose: bool,
}

pub fn parse_packet_type(s: &str) -> Result<u8, String> {
    use packetfile::portable::{
        DBROOT_PACKET, IMAGE_PACKET, QTP_PACKET, TERRAIN_PACKET, VECTOR_PACKET,
    };
    match s {
        "imagery" | "image" => Ok(IMAGE_PACKET),
        "terrain" => Ok(TERRAIN_PACKET),
        "vector" => Ok(VECTOR_PACKET),
        "qtp" => Ok(QTP_PACKET),
        "dbroot" => Ok(DBROOT_PACKET),
        _ => s
            .parse::<u8>()
            .map_err(|_| format!("unknown packet type {:?}", s)),
    }
}

pub fn packet_type_name(packet_type: u8) -> String {
    use packetfile::portable::{
        DBROOT_PACKET, IMAGE_PACKET, QTP_PACKET, TERRAIN_PACKET, VECTOR_PACKET,
    };
    match packet_type {
        IMAGE_PACKET => "imagery".to_string(),
        TERRAIN_PACKET => "terrain".to_string(),
        VECTOR_PACKET => "vector".to_string(),
        QTP_PACKET => "qtp".to_string(),
        DBROOT_PACKET => "dbroot".to_string(),
        other => other.to_string(),
    }
}
