use std::path::{Path, PathBuf};

use packetfile::{
    config::Config, PacketFileError, PacketFileReaderPool, PacketFileWriter, QuadtreePath,
};
use tempfile::TempDir;

// Writes one packet file per entry of `names`, each holding a single record
// for path "0" whose payload is the name. Returns the directories and the
// record positions.
fn make_files(root: &Path, names: &[&str]) -> (Vec<PathBuf>, Vec<(u64, usize)>) {
    let mut dirs = Vec::new();
    let mut records = Vec::new();
    for name in names {
        let dir = root.join(name);
        let mut config = Config::from_dir(dir.to_str().unwrap());
        config.set_segment_break(1 << 16);
        let writer = PacketFileWriter::create(&config).unwrap();
        writer.write_append_crc(&"0".parse::<QuadtreePath>().unwrap(), b"pad").unwrap();
        let position = writer
            .write_append_crc(&"1".parse::<QuadtreePath>().unwrap(), name.as_bytes())
            .unwrap();
        writer.close().unwrap();
        dirs.push(dir);
        records.push((position, name.len() + 4));
    }
    (dirs, records)
}

#[test]
fn test_tokens_read_their_own_file() {
    let root = TempDir::new().unwrap();
    let names = ["alpha", "beta", "gamma"];
    let (dirs, records) = make_files(root.path(), &names);

    let mut pool = PacketFileReaderPool::new("tiles", 4, 4096);
    let tokens = pool.add_all(&dirs).unwrap();
    assert_eq!(pool.len(), 3);
    assert_eq!(pool.open_count(), 3);
    for ((token, name), (position, size)) in tokens.iter().zip(names.iter()).zip(records.iter()) {
        assert_eq!(token.pool_hash(), pool.pool_hash());
        let payload = pool.reader(*token).unwrap().read_at_crc(*position, *size).unwrap();
        assert_eq!(payload, name.as_bytes());
    }
}

#[test]
fn test_foreign_token_is_rejected() {
    let root = TempDir::new().unwrap();
    let (dirs, _) = make_files(root.path(), &["one"]);

    // Same name, different pools: the tokens must still not mix.
    let mut first = PacketFileReaderPool::new("same", 2, 4096);
    let mut second = PacketFileReaderPool::with_config("same", &Config::default());
    let token = first.add(&dirs[0]).unwrap();
    second.add(&dirs[0]).unwrap();
    assert_ne!(first.pool_hash(), second.pool_hash());

    let err = second.reader(token).unwrap_err();
    assert!(matches!(err, PacketFileError::ForeignToken { .. }));
    assert!(err.is_token_error());
    assert!(second.close(token).is_err());
    assert_eq!(second.open_count(), 1);
}

#[test]
fn test_close_keeps_other_tokens_valid() {
    let root = TempDir::new().unwrap();
    let names = ["f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9"];
    let (dirs, records) = make_files(root.path(), &names);

    let mut pool = PacketFileReaderPool::new("merge", 0, 0);
    let tokens = pool.add_all(&dirs).unwrap();
    pool.close_all(&[tokens[3], tokens[7]]).unwrap();
    assert_eq!(pool.open_count(), 8);
    assert_eq!(pool.len(), 10);

    assert!(matches!(
        pool.reader(tokens[3]),
        Err(PacketFileError::ReaderClosed { .. })
    ));
    assert!(matches!(
        pool.close(tokens[7]),
        Err(PacketFileError::ReaderClosed { .. })
    ));
    for i in [0, 4, 9] {
        let (position, size) = records[i];
        let reader = pool.reader(tokens[i]).unwrap();
        assert_eq!(reader.dir(), dirs[i].as_path());
        let payload = reader.read_at_crc(position, size).unwrap();
        assert_eq!(payload, names[i].as_bytes());
    }

    // New readers get fresh slots, closed ones are never reused.
    let token = pool.add(&dirs[3]).unwrap();
    assert_eq!(token.file_index(), 10);
    assert_eq!(pool.open_count(), 9);
}

#[test]
fn test_missing_file_is_not_added() {
    let root = TempDir::new().unwrap();
    let mut pool = PacketFileReaderPool::new("missing", 2, 4096);
    assert!(pool.add(root.path().join("nothing here")).is_err());
    assert!(pool.is_empty());
    assert_eq!(pool.open_count(), 0);
}
