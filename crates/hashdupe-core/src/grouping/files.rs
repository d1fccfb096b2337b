use crate::keeper::Candidate;
use crate::record::{FileRecord, HashKey};
use ahash::AHashMap;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Two or more files sharing an (algorithm, hash) pair, in inventory order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub key: HashKey,
    pub members: Vec<FileRecord>,
}

impl DuplicateGroup {
    /// Size of the first member. Only meaningful when [`Self::integrity`] is clean.
    pub fn file_size(&self) -> u64 {
        self.members.first().map(|m| m.size).unwrap_or(0)
    }

    pub fn reclaimable_bytes(&self) -> u64 {
        self.file_size() * (self.members.len() as u64).saturating_sub(1)
    }

    /// Same hash means same content and therefore same size. A mismatch means
    /// the inventory cannot be trusted for this group.
    pub fn integrity(&self) -> Option<IntegrityWarning> {
        let first = self.file_size();
        if self.members.iter().all(|m| m.size == first) {
            return None;
        }
        Some(IntegrityWarning {
            key: self.key.clone(),
            members: self
                .members
                .iter()
                .map(|m| (m.path.clone(), m.size))
                .collect(),
        })
    }
}

/// A group whose members disagree on size despite sharing a hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityWarning {
    pub key: HashKey,
    pub members: Vec<(String, u64)>,
}

impl fmt::Display for IntegrityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sizes: Vec<String> = self
            .members
            .iter()
            .map(|(path, size)| format!("{} ({} bytes)", path, size))
            .collect();
        write!(f, "{} has differing sizes: {}", self.key, sizes.join(", "))
    }
}

impl Candidate for FileRecord {
    fn path(&self) -> &str {
        &self.path
    }

    fn mtime(&self) -> i64 {
        self.mtime
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Bucket records by (algorithm, hash) in one pass and keep buckets holding at
/// least `min_group_size` members (never fewer than two).
pub fn group_files<'a, I>(records: I, min_group_size: usize) -> BTreeMap<HashKey, DuplicateGroup>
where
    I: IntoIterator<Item = &'a FileRecord>,
{
    let min = min_group_size.max(2);
    let mut buckets: AHashMap<HashKey, Vec<FileRecord>> = AHashMap::new();

    for record in records {
        buckets.entry(record.key()).or_default().push(record.clone());
    }

    let total_buckets = buckets.len();
    let groups: BTreeMap<HashKey, DuplicateGroup> = buckets
        .into_iter()
        .filter(|(_, members)| members.len() >= min)
        .map(|(key, members)| (key.clone(), DuplicateGroup { key, members }))
        .collect();

    for group in groups.values() {
        if let Some(warning) = group.integrity() {
            warn!("Integrity warning: {}", warning);
        }
    }

    debug!(
        "Grouped {} distinct hashes into {} duplicate groups",
        total_buckets,
        groups.len()
    );
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::HashAlgorithm;

    fn rec(path: &str, size: u64, algorithm: HashAlgorithm, hash: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            size,
            mtime: 0,
            algorithm,
            hash: hash.to_string(),
        }
    }

    const H: &str = "00000000000000000000000000000000";

    #[test]
    fn test_singletons_dropped() {
        let records = vec![
            rec("/a", 1, HashAlgorithm::Md5, H),
            rec("/b", 1, HashAlgorithm::Md5, "11111111111111111111111111111111"),
        ];
        assert!(group_files(&records, 2).is_empty());
    }

    #[test]
    fn test_algorithm_is_part_of_identity() {
        // A 32-char blake2 digest textually equal to an md5 digest is a different key.
        let records = vec![
            rec("/a", 1, HashAlgorithm::Md5, H),
            rec("/b", 1, HashAlgorithm::Blake2, H),
        ];
        assert!(group_files(&records, 2).is_empty());
    }

    #[test]
    fn test_min_group_size_filters() {
        let records = vec![
            rec("/a", 1, HashAlgorithm::Md5, H),
            rec("/b", 1, HashAlgorithm::Md5, H),
        ];
        assert_eq!(group_files(&records, 2).len(), 1);
        assert!(group_files(&records, 3).is_empty());
        // Values below two are clamped.
        assert_eq!(group_files(&records, 0).len(), 1);
    }

    #[test]
    fn test_integrity_warning_on_size_mismatch() {
        let records = vec![
            rec("/a", 1, HashAlgorithm::Md5, H),
            rec("/b", 2, HashAlgorithm::Md5, H),
        ];
        let groups = group_files(&records, 2);
        let group = groups.values().next().unwrap();
        let warning = group.integrity().expect("sizes differ");
        assert_eq!(warning.members.len(), 2);
        assert!(warning.to_string().contains("differing sizes"));
    }

    #[test]
    fn test_reclaimable_bytes() {
        let records = vec![
            rec("/a", 10, HashAlgorithm::Md5, H),
            rec("/b", 10, HashAlgorithm::Md5, H),
            rec("/c", 10, HashAlgorithm::Md5, H),
        ];
        let groups = group_files(&records, 2);
        assert_eq!(groups.values().next().unwrap().reclaimable_bytes(), 20);
    }
}
