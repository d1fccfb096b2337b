use std::fs;
use tempfile::tempdir;

use hashdupe_core::inventory::{self, InventorySource};
use hashdupe_core::record::{
    parse_line, parse_line_with, serialize_record, FileRecord, HashAlgorithm, Layout, ParseError,
};
use hashdupe_core::{Error, SilentReporter};

const SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
const MD5: &str = "5d41402abc4b2a76b9719d911017c592";

fn record(path: &str, size: u64, mtime: i64) -> FileRecord {
    FileRecord {
        path: path.to_string(),
        size,
        mtime,
        algorithm: HashAlgorithm::Sha256,
        hash: SHA256.to_string(),
    }
}

#[test]
fn test_round_trip_messy_paths() {
    let paths = [
        "/plain/file.txt",
        "/with,comma/a,b.txt",
        "/with \"quotes\"/x.txt",
        "/both \"a,b\",c/ünïcødé 文件.txt",
        "/trailing,1,2",
        "/ spaced /  file  ",
        "/emoji/📷,2024.jpg",
    ];
    for path in paths {
        let original = record(path, 1024, 1_699_999_999);
        let line = serialize_record(&original, true).unwrap();
        let parsed = parse_line(line.as_bytes())
            .unwrap_or_else(|e| panic!("failed to parse {:?}: {}", line, e));
        assert_eq!(parsed.record, original, "round trip of {:?}", path);
    }
}

#[test]
fn test_round_trip_without_mtime() {
    for path in ["/a/b.txt", "/x,y/z", "/q\"uote"] {
        let original = record(path, 7, 0);
        let line = serialize_record(&original, false).unwrap();
        let parsed = parse_line_with(line.as_bytes(), Layout::WithoutMtime).unwrap();
        assert_eq!(parsed.record, original);
    }
}

#[test]
fn test_right_split_with_trailing_field_lookalikes() {
    let messy = format!("a,b,c,1024,1699999999,sha256,{}", SHA256);
    let line = format!("{},10,1700000000,sha256,{}", messy, SHA256);
    let parsed = parse_line(line.as_bytes()).unwrap();
    assert_eq!(parsed.record.path, messy);
    assert_eq!(parsed.record.size, 10);
    assert_eq!(parsed.record.mtime, 1_700_000_000);
    assert_eq!(parsed.record.algorithm, HashAlgorithm::Sha256);
}

#[test]
fn test_algorithm_is_part_of_identity() {
    let line = format!("/a,1,md5,{}", MD5);
    let parsed = parse_line(line.as_bytes()).unwrap();
    assert_eq!(parsed.record.algorithm, HashAlgorithm::Md5);
    assert_eq!(parsed.record.key().to_string(), format!("md5:{}", MD5));
}

#[test]
fn test_rejections() {
    assert!(matches!(
        parse_line(b"/a,sha256"),
        Err(ParseError::TooFewFields { .. })
    ));
    assert!(matches!(
        parse_line(format!(",1,sha256,{}", SHA256).as_bytes()),
        Err(ParseError::EmptyPath)
    ));
    assert!(matches!(
        parse_line(format!("/a,1,crc32,{}", SHA256).as_bytes()),
        Err(ParseError::UnknownAlgorithm(_))
    ));
    assert!(matches!(
        parse_line(format!("/a,1,sha256,{}", MD5).as_bytes()),
        Err(ParseError::HashLength { .. })
    ));
    assert!(matches!(
        parse_line(&[b'/', 0xff, b',', b'1']),
        Err(ParseError::Encoding)
    ));
}

#[test]
fn test_loader_resolves_repeated_paths() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("inventory.csv");
    let text = format!(
        "path,size,mtime,algo,hash\n\
         /a,1,100,md5,{md5}\n\
         /b,2,100,md5,{md5}\n\
         /a,3,50,md5,{md5}\n\
         /b,4,100,md5,{md5}\n",
        md5 = MD5
    );
    fs::write(&input, text).unwrap();

    let inventory = inventory::load(&InventorySource::new(&input), &SilentReporter).unwrap();
    assert_eq!(inventory.records.len(), 2);
    assert_eq!(inventory.records[0].path, "/a");
    assert_eq!(inventory.records[0].size, 1, "older row must not replace newer");
    assert_eq!(inventory.records[1].path, "/b");
    assert_eq!(inventory.records[1].size, 4, "equal mtime: later row wins");
    assert_eq!(inventory.stats.superseded, 2);
    assert!(inventory.stats.header);
}

#[test]
fn test_loader_is_restartable() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("inventory.csv");
    fs::write(
        &input,
        format!("\u{feff}/x,1,md5,{md5}\n/y,1,md5,{md5}\nbroken\n", md5 = MD5),
    )
    .unwrap();

    let source = InventorySource::new(&input);
    let first: Vec<FileRecord> = source.records().unwrap().map(|r| r.unwrap()).collect();
    let second: Vec<FileRecord> = source.records().unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(first, second);
    assert_eq!(first[0].path, "/x", "byte order mark must be stripped");
}

#[test]
fn test_loader_rejects_input_with_no_valid_rows() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("inventory.csv");
    fs::write(&input, "nonsense\nmore nonsense\n").unwrap();
    let result = inventory::load(&InventorySource::new(&input), &SilentReporter);
    assert!(matches!(result, Err(Error::Inventory(_))));
}

#[test]
fn test_loader_accepts_empty_input() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("inventory.csv");
    fs::write(&input, "path,size,algo,hash\n").unwrap();
    let inventory = inventory::load(&InventorySource::new(&input), &SilentReporter).unwrap();
    assert!(inventory.records.is_empty());
}

#[test]
fn test_loader_excludes_globs() {
    let tmp = tempdir().unwrap();
    let input = tmp.path().join("inventory.csv");
    fs::write(
        &input,
        format!("/v/@eaDir/a,1,md5,{md5}\n/v/a,1,md5,{md5}\n", md5 = MD5),
    )
    .unwrap();
    let source = InventorySource::new(&input)
        .with_exclude_patterns(&["*/@eaDir/*".to_string()])
        .unwrap();
    let inventory = inventory::load(&source, &SilentReporter).unwrap();
    assert_eq!(inventory.records.len(), 1);
    assert_eq!(inventory.stats.excluded, 1);

    assert!(InventorySource::new(&input)
        .with_exclude_patterns(&["[".to_string()])
        .is_err());
}
