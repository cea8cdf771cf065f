pub mod cli;
pub mod geindex_dump;
pub mod utils;
