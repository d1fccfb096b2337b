use crate::keeper::Candidate;
use crate::record::FileRecord;
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Which files contribute to a directory's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// Every descendant file, keyed by its path relative to the directory.
    #[default]
    Recursive,
    /// Immediate children only.
    Shallow,
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recursive" => Ok(Scope::Recursive),
            "shallow" => Ok(Scope::Shallow),
            other => Err(format!("unknown scope '{}' (expected recursive or shallow)", other)),
        }
    }
}

/// Whether relative names take part in the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignatureMode {
    #[default]
    #[serde(rename = "name+content")]
    NameAndContent,
    #[serde(rename = "content-only")]
    ContentOnly,
}

impl FromStr for SignatureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name+content" => Ok(SignatureMode::NameAndContent),
            "content-only" => Ok(SignatureMode::ContentOnly),
            other => Err(format!(
                "unknown signature mode '{}' (expected name+content or content-only)",
                other
            )),
        }
    }
}

/// Treatment of duplicate groups that sit inside other duplicate groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NestedPolicy {
    /// Collapse groups that only mirror the contents of an enclosing reported group.
    #[default]
    Suppress,
    Report,
}

impl FromStr for NestedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "suppress" => Ok(NestedPolicy::Suppress),
            "report" => Ok(NestedPolicy::Report),
            other => Err(format!("unknown nested policy '{}' (expected suppress or report)", other)),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Recursive => "recursive",
            Scope::Shallow => "shallow",
        })
    }
}

impl fmt::Display for SignatureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignatureMode::NameAndContent => "name+content",
            SignatureMode::ContentOnly => "content-only",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignatureOptions {
    pub scope: Scope,
    pub mode: SignatureMode,
    pub min_group_size: usize,
    pub nested: NestedPolicy,
    /// Ancestors above this directory are not considered.
    pub root: Option<PathBuf>,
}

/// One directory of a directory duplicate group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub path: String,
    pub file_count: usize,
    pub total_size: u64,
    /// Newest mtime among contributing files.
    pub newest_mtime: i64,
    first_seen: usize,
}

impl Candidate for DirectoryEntry {
    fn path(&self) -> &str {
        &self.path
    }

    fn mtime(&self) -> i64 {
        self.newest_mtime
    }

    fn size(&self) -> u64 {
        self.total_size
    }
}

/// Directories with identical signatures, ordered by first appearance in the
/// inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryDuplicateGroup {
    pub signature: String,
    pub members: Vec<DirectoryEntry>,
}

impl DirectoryDuplicateGroup {
    pub fn reclaimable_bytes(&self) -> u64 {
        let total: u64 = self.members.iter().map(|m| m.total_size).sum();
        let largest = self.members.iter().map(|m| m.total_size).max().unwrap_or(0);
        total - largest
    }

    fn min_depth(&self) -> usize {
        self.members
            .iter()
            .map(|m| Path::new(&m.path).components().count())
            .min()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryGroups {
    pub groups: BTreeMap<String, DirectoryDuplicateGroup>,
    pub directories_seen: usize,
    pub nested_suppressed: usize,
}

#[derive(Default)]
struct DirAccumulator {
    first_seen: usize,
    /// (relative path, "algo:hash")
    entries: Vec<(String, String)>,
    total_size: u64,
    newest_mtime: i64,
}

/// Compute a signature for every directory that holds at least one hashed file
/// and group directories whose signatures match.
pub fn build_signatures(records: &[FileRecord], options: &SignatureOptions) -> DirectoryGroups {
    let mut dirs: AHashMap<String, DirAccumulator> = AHashMap::new();
    let root = options.root.as_deref();

    for (position, record) in records.iter().enumerate() {
        let file = Path::new(&record.path);
        let Some(parent) = file.parent() else {
            continue;
        };
        let key = record.key().to_string();

        for dir in parent.ancestors() {
            // The filesystem root and the empty relative base never form a group.
            if dir.as_os_str().is_empty() || dir.parent().is_none() {
                break;
            }
            if let Some(root) = root {
                if !dir.starts_with(root) {
                    break;
                }
            }
            let Ok(relative) = file.strip_prefix(dir) else {
                break;
            };

            let acc = dirs
                .entry(dir.to_string_lossy().into_owned())
                .or_insert_with(|| DirAccumulator {
                    first_seen: position,
                    ..Default::default()
                });
            acc.entries
                .push((relative.to_string_lossy().into_owned(), key.clone()));
            acc.total_size += record.size;
            acc.newest_mtime = acc.newest_mtime.max(record.mtime);

            if options.scope == Scope::Shallow || Some(dir) == root {
                break;
            }
        }
    }

    let directories_seen = dirs.len();
    let mut by_signature: AHashMap<String, Vec<DirectoryEntry>> = AHashMap::new();
    for (path, mut acc) in dirs {
        let signature = signature(&mut acc.entries, options.mode);
        by_signature.entry(signature).or_default().push(DirectoryEntry {
            path,
            file_count: acc.entries.len(),
            total_size: acc.total_size,
            newest_mtime: acc.newest_mtime,
            first_seen: acc.first_seen,
        });
    }

    let min = options.min_group_size.max(2);
    let groups: BTreeMap<String, DirectoryDuplicateGroup> = by_signature
        .into_iter()
        .filter(|(_, members)| members.len() >= min)
        .map(|(signature, mut members)| {
            members.sort_by(|a, b| (a.first_seen, &a.path).cmp(&(b.first_seen, &b.path)));
            (
                signature.clone(),
                DirectoryDuplicateGroup { signature, members },
            )
        })
        .collect();

    let found = groups.len();
    let (groups, nested_suppressed) = match options.nested {
        NestedPolicy::Suppress => suppress_nested(groups, min),
        NestedPolicy::Report => (groups, 0),
    };

    info!(
        "{} directories fingerprinted ({} scope, {}), {} duplicate groups, {} nested groups suppressed",
        directories_seen,
        options.scope,
        options.mode,
        found,
        nested_suppressed,
    );

    DirectoryGroups {
        groups,
        directories_seen,
        nested_suppressed,
    }
}

/// Order-independent fingerprint of a directory's entries.
fn signature(entries: &mut [(String, String)], mode: SignatureMode) -> String {
    let mut hasher = blake3::Hasher::new();
    match mode {
        SignatureMode::NameAndContent => {
            entries.sort_unstable();
            for (relative, key) in entries.iter() {
                hasher.update(relative.as_bytes());
                hasher.update(b"\0");
                hasher.update(key.as_bytes());
                hasher.update(b"\n");
            }
        }
        SignatureMode::ContentOnly => {
            let mut keys: Vec<&str> = entries.iter().map(|(_, key)| key.as_str()).collect();
            keys.sort_unstable();
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update(b"\n");
            }
        }
    }
    hasher.finalize().to_hex().to_string()
}

/// Collapse groups nested inside shallower reported groups.
///
/// A member whose nearest reported ancestor belongs to group `E` is matched
/// with the members lying under the other members of `E`: the k-th nested
/// member (by relative path) under one `E` member mirrors the k-th under each
/// of the others. Only the first member of each mirror class is kept, so a
/// group that is purely a mirror of its enclosing group disappears while
/// duplicates living side by side inside one tree are still reported.
fn suppress_nested(
    groups: BTreeMap<String, DirectoryDuplicateGroup>,
    min_group_size: usize,
) -> (BTreeMap<String, DirectoryDuplicateGroup>, usize) {
    let mut ordered: Vec<DirectoryDuplicateGroup> = groups.into_values().collect();
    ordered.sort_by(|a, b| (a.min_depth(), &a.signature).cmp(&(b.min_depth(), &b.signature)));

    // reported directory -> signature of the group that reported it
    let mut reported: AHashMap<String, String> = AHashMap::new();
    let mut kept = BTreeMap::new();
    let mut suppressed = 0;

    for mut group in ordered {
        let classes = mirror_classes(&group, &reported);
        let mut seen: AHashSet<(String, usize)> = AHashSet::new();
        let before = group.members.len();
        let mut index = 0;
        group.members.retain(|_| {
            let keep = match &classes[index] {
                Some(class) => seen.insert(class.clone()),
                None => true,
            };
            index += 1;
            keep
        });

        if group.members.len() < min_group_size {
            debug!("Suppressing nested directory group {}", group.signature);
            suppressed += 1;
            continue;
        }
        if group.members.len() < before {
            debug!(
                "Trimmed {} mirrored members from nested directory group {}",
                before - group.members.len(),
                group.signature
            );
        }
        for member in &group.members {
            reported.insert(member.path.clone(), group.signature.clone());
        }
        kept.insert(group.signature.clone(), group);
    }

    (kept, suppressed)
}

/// Mirror class of each member: (enclosing group signature, ordinal under its
/// enclosing member), or `None` when no reported directory contains it.
fn mirror_classes(
    group: &DirectoryDuplicateGroup,
    reported: &AHashMap<String, String>,
) -> Vec<Option<(String, usize)>> {
    let enclosing: Vec<Option<(String, &String)>> = group
        .members
        .iter()
        .map(|m| {
            Path::new(&m.path).ancestors().skip(1).find_map(|a| {
                let key = a.to_string_lossy();
                reported
                    .get_key_value(key.as_ref())
                    .map(|(path, signature)| (path.clone(), signature))
            })
        })
        .collect();

    // (enclosing member, group signature) -> [(relative path, member index)]
    let mut under: BTreeMap<(&str, &str), Vec<(String, usize)>> = BTreeMap::new();
    for (i, found) in enclosing.iter().enumerate() {
        if let Some((ancestor, signature)) = found {
            let relative = Path::new(&group.members[i].path)
                .strip_prefix(ancestor)
                .map(|r| r.to_string_lossy().into_owned())
                .unwrap_or_default();
            under
                .entry((ancestor.as_str(), signature.as_str()))
                .or_default()
                .push((relative, i));
        }
    }

    let mut classes = vec![None; group.members.len()];
    for ((_, signature), mut members) in under {
        members.sort();
        for (ordinal, (_, i)) in members.into_iter().enumerate() {
            classes[i] = Some((signature.to_string(), ordinal));
        }
    }
    classes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::HashAlgorithm;

    fn rec(path: &str, size: u64, hash_char: char) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            size,
            mtime: 0,
            algorithm: HashAlgorithm::Md5,
            hash: std::iter::repeat(hash_char).take(32).collect(),
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

    #[test]
    fn test_signature_ignores_entry_order() {
        let mut a = vec![
            ("b.txt".to_string(), "md5:2".to_string()),
            ("a.txt".to_string(), "md5:1".to_string()),
        ];
        let mut b = vec![
            ("a.txt".to_string(), "md5:1".to_string()),
            ("b.txt".to_string(), "md5:2".to_string()),
        ];
        assert_eq!(
            signature(&mut a, SignatureMode::NameAndContent),
            signature(&mut b, SignatureMode::NameAndContent)
        );
    }

    #[test]
    fn test_content_only_is_a_multiset() {
        let mut once = vec![("a".to_string(), "md5:1".to_string())];
        let mut twice = vec![
            ("a".to_string(), "md5:1".to_string()),
            ("b".to_string(), "md5:1".to_string()),
        ];
        assert_ne!(
            signature(&mut once, SignatureMode::ContentOnly),
            signature(&mut twice, SignatureMode::ContentOnly)
        );
    }

    #[test]
    fn test_shallow_scope_only_pairs_parent() {
        let records = vec![
            rec("/x/one/a.txt", 1, '1'),
            rec("/y/one/a.txt", 1, '1'),
        ];
        let result = build_signatures(
            &records,
            &options(Scope::Shallow, SignatureMode::NameAndContent, NestedPolicy::Report),
        );
        assert_eq!(result.directories_seen, 2);
        assert_eq!(result.groups.len(), 1);
    }

    #[test]
    fn test_recursive_scope_includes_ancestors() {
        let records = vec![
            rec("/x/one/a.txt", 1, '1'),
            rec("/y/one/a.txt", 1, '1'),
        ];
        let result = build_signatures(
            &records,
            &options(Scope::Recursive, SignatureMode::NameAndContent, NestedPolicy::Report),
        );
        // /x, /x/one, /y, /y/one; /x~/y and /x/one~/y/one
        assert_eq!(result.directories_seen, 4);
        assert_eq!(result.groups.len(), 2);
    }

    #[test]
    fn test_nested_groups_suppressed() {
        let records = vec![
            rec("/x/one/a.txt", 1, '1'),
            rec("/y/one/a.txt", 1, '1'),
        ];
        let result = build_signatures(
            &records,
            &options(Scope::Recursive, SignatureMode::NameAndContent, NestedPolicy::Suppress),
        );
        assert_eq!(result.groups.len(), 1);
        assert_eq!(result.nested_suppressed, 1);
        let group = result.groups.values().next().unwrap();
        let paths: Vec<&str> = group.members.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["/x", "/y"]);
    }

    #[test]
    fn test_sibling_duplicates_inside_mirrored_trees_survive() {
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
        let mut groups: Vec<Vec<&str>> = result
            .groups
            .values()
            .map(|g| g.members.iter().map(|m| m.path.as_str()).collect())
            .collect();
        groups.sort();
        assert_eq!(groups, vec![vec!["/x", "/y"], vec!["/x/a", "/x/b"]]);
        assert_eq!(result.nested_suppressed, 0);
    }

    #[test]
    fn test_content_only_mirror_with_renamed_child_suppressed() {
        let records = vec![
            rec("/x/set/a", 1, '1'),
            rec("/y/set-copy/a", 1, '1'),
        ];
        let result = build_signatures(
            &records,
            &options(Scope::Recursive, SignatureMode::ContentOnly, NestedPolicy::Suppress),
        );
        assert_eq!(result.groups.len(), 1);
        assert_eq!(result.nested_suppressed, 1);
    }

    #[test]
    fn test_root_bounds_ancestors() {
        let records = vec![
            rec("/vol/x/a.txt", 1, '1'),
            rec("/vol/y/a.txt", 1, '1'),
        ];
        let mut opts = options(Scope::Recursive, SignatureMode::NameAndContent, NestedPolicy::Report);
        opts.root = Some(PathBuf::from("/vol"));
        let result = build_signatures(&records, &opts);
        // /vol/x, /vol/y, /vol
        assert_eq!(result.directories_seen, 3);
    }

    #[test]
    fn test_aggregate_size_and_mtime() {
        let mut records = vec![
            rec("/x/a.txt", 10, '1'),
            rec("/x/b.txt", 5, '2'),
            rec("/y/a.txt", 10, '1'),
            rec("/y/b.txt", 5, '2'),
        ];
        records[1].mtime = 42;
        let result = build_signatures(
            &records,
            &options(Scope::Shallow, SignatureMode::NameAndContent, NestedPolicy::Report),
        );
        let group = result.groups.values().next().unwrap();
        assert_eq!(group.members[0].path, "/x");
        assert_eq!(group.members[0].total_size, 15);
        assert_eq!(group.members[0].file_count, 2);
        assert_eq!(group.members[0].newest_mtime, 42);
        assert_eq!(group.reclaimable_bytes(), 15);
    }
}
