use std::collections::BTreeSet;

use hashdupe_core::grouping::{
    build_signatures, group_files, NestedPolicy, Scope, SignatureMode, SignatureOptions,
};
use hashdupe_core::keeper::{select_keeper, KeepPolicy};
use hashdupe_core::record::{FileRecord, HashAlgorithm};

fn hash(c: char) -> String {
    std::iter::repeat(c).take(64).collect()
}

fn rec(path: &str, size: u64, c: char) -> FileRecord {
    FileRecord {
        path: path.to_string(),
        size,
        mtime: 0,
        algorithm: HashAlgorithm::Sha256,
        hash: hash(c),
    }
}

fn options(scope: Scope, mode: SignatureMode, nested: NestedPolicy) -> SignatureOptions {
    SignatureOptions {
        scope,
        mode,
        min_group_size: 2,
        nested,
        root: None,
    }
}

fn membership(records: &[FileRecord]) -> BTreeSet<BTreeSet<String>> {
    group_files(records, 2)
        .values()
        .map(|g| g.members.iter().map(|m| m.path.clone()).collect())
        .collect()
}

#[test]
fn test_grouping_is_idempotent_and_order_independent() {
    let records = vec![
        rec("/a/1.txt", 10, 'a'),
        rec("/b/1.txt", 10, 'a'),
        rec("/c/1.txt", 10, 'b'),
        rec("/d/1.txt", 20, 'c'),
        rec("/e/1.txt", 20, 'c'),
        rec("/f/1.txt", 20, 'c'),
    ];
    let mut reversed = records.clone();
    reversed.reverse();

    assert_eq!(membership(&records), membership(&records));
    assert_eq!(membership(&records), membership(&reversed));
    assert_eq!(membership(&records).len(), 2);
}

#[test]
fn test_same_hash_different_algorithm_not_grouped() {
    let mut md5 = rec("/b", 1, 'a');
    md5.algorithm = HashAlgorithm::Md5;
    md5.hash = std::iter::repeat('a').take(32).collect();
    let mut sha = rec("/a", 1, 'a');
    sha.hash = md5.hash.clone();
    sha.algorithm = HashAlgorithm::Blake2;
    assert!(group_files(&[sha, md5], 2).is_empty());
}

#[test]
fn test_min_group_size_filters() {
    let records = vec![rec("/a", 1, 'a'), rec("/b", 1, 'a'), rec("/c", 1, 'b'), rec("/d", 1, 'b'), rec("/e", 1, 'b')];
    let groups = group_files(&records, 3);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups.values().next().unwrap().members.len(), 3);
}

#[test]
fn test_size_mismatch_flagged() {
    let records = vec![rec("/a", 1, 'a'), rec("/b", 2, 'a')];
    let groups = group_files(&records, 2);
    let group = groups.values().next().unwrap();
    let warning = group.integrity().expect("differing sizes must be flagged");
    assert_eq!(warning.members.len(), 2);
}

#[test]
fn test_signature_independent_of_visit_order() {
    let forward = vec![
        rec("/x/dup/a.txt", 1, '1'),
        rec("/x/dup/sub/b.txt", 2, '2'),
        rec("/y/copy/a.txt", 1, '1'),
        rec("/y/copy/sub/b.txt", 2, '2'),
    ];
    let shuffled = vec![
        forward[3].clone(),
        forward[0].clone(),
        forward[2].clone(),
        forward[1].clone(),
    ];
    let opts = options(Scope::Recursive, SignatureMode::NameAndContent, NestedPolicy::Report);
    let a = build_signatures(&forward, &opts);
    let b = build_signatures(&shuffled, &opts);
    let keys_a: Vec<&String> = a.groups.keys().collect();
    let keys_b: Vec<&String> = b.groups.keys().collect();
    assert_eq!(keys_a, keys_b, "signatures must not depend on record order");
}

#[test]
fn test_directory_scenario_shortest_path() {
    // Same two files, recorded in different orders.
    let records = vec![
        rec("/vol/original/a.txt", 5, '1'),
        rec("/vol/original/b.txt", 7, '2'),
        rec("/vol/backup-copy/b.txt", 7, '2'),
        rec("/vol/backup-copy/a.txt", 5, '1'),
    ];
    let result = build_signatures(
        &records,
        &options(Scope::Recursive, SignatureMode::NameAndContent, NestedPolicy::Suppress),
    );
    assert_eq!(result.groups.len(), 1);
    let group = result.groups.values().next().unwrap();
    let paths: BTreeSet<&str> = group.members.iter().map(|m| m.path.as_str()).collect();
    assert_eq!(
        paths,
        BTreeSet::from(["/vol/original", "/vol/backup-copy"])
    );
    assert!(group.members.iter().all(|m| m.total_size == 12));

    let keeper = select_keeper(&group.members, KeepPolicy::ShortestPath);
    assert_eq!(group.members[keeper].path, "/vol/original");
}

#[test]
fn test_content_only_ignores_names() {
    let records = vec![
        rec("/p/one/a.txt", 1, '1'),
        rec("/q/two/renamed.txt", 1, '1'),
    ];
    let named = build_signatures(
        &records,
        &options(Scope::Shallow, SignatureMode::NameAndContent, NestedPolicy::Report),
    );
    assert!(named.groups.is_empty());

    let content = build_signatures(
        &records,
        &options(Scope::Shallow, SignatureMode::ContentOnly, NestedPolicy::Report),
    );
    assert_eq!(content.groups.len(), 1);
}

#[test]
fn test_shallow_scope_ignores_subdirectories() {
    let records = vec![
        rec("/m/a/f.txt", 1, '1'),
        rec("/m/a/deep/g.txt", 1, '2'),
        rec("/n/a/f.txt", 1, '1'),
        rec("/n/a/deep/other.txt", 1, '3'),
    ];
    let shallow = build_signatures(
        &records,
        &options(Scope::Shallow, SignatureMode::NameAndContent, NestedPolicy::Report),
    );
    let paths: BTreeSet<String> = shallow
        .groups
        .values()
        .flat_map(|g| g.members.iter().map(|m| m.path.clone()))
        .collect();
    assert!(paths.contains("/m/a") && paths.contains("/n/a"));

    let recursive = build_signatures(
        &records,
        &options(Scope::Recursive, SignatureMode::NameAndContent, NestedPolicy::Report),
    );
    assert!(recursive
        .groups
        .values()
        .all(|g| g.members.iter().all(|m| m.path != "/m/a")));
}

#[test]
fn test_nested_groups_suppressed_by_default() {
    let records = vec![
        rec("/r1/tree/sub/a.txt", 1, '1'),
        rec("/r1/tree/b.txt", 1, '2'),
        rec("/r2/tree/sub/a.txt", 1, '1'),
        rec("/r2/tree/b.txt", 1, '2'),
    ];
    let reported = build_signatures(
        &records,
        &options(Scope::Recursive, SignatureMode::NameAndContent, NestedPolicy::Report),
    );
    let suppressed = build_signatures(
        &records,
        &options(Scope::Recursive, SignatureMode::NameAndContent, NestedPolicy::Suppress),
    );
    // r1/r2 themselves, tree, and tree/sub all match.
    assert_eq!(reported.groups.len(), 3);
    assert_eq!(suppressed.groups.len(), 1);
    assert_eq!(suppressed.nested_suppressed, 2);
    let top = suppressed.groups.values().next().unwrap();
    assert!(top.members.iter().any(|m| m.path == "/r1"));
}

#[test]
fn test_duplicates_within_one_tree_not_hidden_by_enclosing_group() {
    let records = vec![
        rec("/x/a/f", 1, '1'),
        rec("/x/b/f", 1, '1'),
        rec("/y/a/f", 1, '1'),
        rec("/y/b/f", 1, '1'),
    ];
    let result = build_signatures(
        &records,
        &options(Scope::Recursive, SignatureMode::NameAndContent, NestedPolicy::Suppress),
    );
    let groups: BTreeSet<BTreeSet<&str>> = result
        .groups
        .values()
        .map(|g| g.members.iter().map(|m| m.path.as_str()).collect())
        .collect();
    assert!(groups.contains(&BTreeSet::from(["/x", "/y"])));
    assert!(
        groups.contains(&BTreeSet::from(["/x/a", "/x/b"])),
        "/x/a and /x/b stay duplicates once /y is gone: {:?}",
        groups
    );

    // Once /y is removed the pair is still found on its own.
    let remaining: Vec<FileRecord> = records.into_iter().filter(|r| r.path.starts_with("/x/")).collect();
    let after = build_signatures(
        &remaining,
        &options(Scope::Recursive, SignatureMode::NameAndContent, NestedPolicy::Suppress),
    );
    assert_eq!(after.groups.len(), 1);
}

#[test]
fn test_root_bounds_ancestors() {
    let records = vec![
        rec("/scan/a/f.txt", 1, '1'),
        rec("/scan/b/f.txt", 1, '1'),
    ];
    let mut opts = options(Scope::Recursive, SignatureMode::ContentOnly, NestedPolicy::Report);
    opts.root = Some("/scan".into());
    let result = build_signatures(&records, &opts);
    // "/scan/a", "/scan/b" and "/scan" itself; nothing above the root.
    assert_eq!(result.directories_seen, 3);
}

#[test]
fn test_files_without_parent_directories_skipped() {
    let records = vec![rec("/a.txt", 1, '1'), rec("/b.txt", 1, '1')];
    let result = build_signatures(
        &records,
        &options(Scope::Recursive, SignatureMode::ContentOnly, NestedPolicy::Report),
    );
    assert!(result.groups.is_empty());
    assert_eq!(result.directories_seen, 0);
}
