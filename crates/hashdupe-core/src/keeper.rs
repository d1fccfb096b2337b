use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a keep policy needs to know about a group member.
pub trait Candidate {
    fn path(&self) -> &str;
    fn mtime(&self) -> i64;
    fn size(&self) -> u64;
}

/// Rule naming the one group member that survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeepPolicy {
    ShortestPath,
    LongestPath,
    Newest,
    Oldest,
    /// Directory groups only; file group members share a size.
    Largest,
    Smallest,
    #[default]
    #[serde(alias = "first")]
    FirstSeen,
    Last,
}

impl KeepPolicy {
    pub const ALL: [KeepPolicy; 8] = [
        KeepPolicy::ShortestPath,
        KeepPolicy::LongestPath,
        KeepPolicy::Newest,
        KeepPolicy::Oldest,
        KeepPolicy::Largest,
        KeepPolicy::Smallest,
        KeepPolicy::FirstSeen,
        KeepPolicy::Last,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeepPolicy::ShortestPath => "shortest-path",
            KeepPolicy::LongestPath => "longest-path",
            KeepPolicy::Newest => "newest",
            KeepPolicy::Oldest => "oldest",
            KeepPolicy::Largest => "largest",
            KeepPolicy::Smallest => "smallest",
            KeepPolicy::FirstSeen => "first-seen",
            KeepPolicy::Last => "last",
        }
    }

    /// Whether the policy can tell file group members apart.
    pub fn meaningful_for_files(&self) -> bool {
        !matches!(self, KeepPolicy::Largest | KeepPolicy::Smallest)
    }
}

impl fmt::Display for KeepPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeepPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "first" {
            return Ok(KeepPolicy::FirstSeen);
        }
        KeepPolicy::ALL
            .iter()
            .find(|policy| policy.as_str() == s)
            .copied()
            .ok_or_else(|| {
                let names: Vec<&str> = KeepPolicy::ALL.iter().map(|p| p.as_str()).collect();
                format!("unknown keep policy '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

/// Index of the member to retain. Ties go to the earliest member, so the
/// result only depends on member order and values.
///
/// Groups reaching here hold at least two members; an empty slice yields 0.
pub fn select_keeper<C: Candidate>(members: &[C], policy: KeepPolicy) -> usize {
    match policy {
        KeepPolicy::FirstSeen => 0,
        KeepPolicy::Last => members.len().saturating_sub(1),
        KeepPolicy::ShortestPath => best_by(members, |a, b| path_len(a) < path_len(b)),
        KeepPolicy::LongestPath => best_by(members, |a, b| path_len(a) > path_len(b)),
        KeepPolicy::Newest => best_by(members, |a, b| a.mtime() > b.mtime()),
        KeepPolicy::Oldest => best_by(members, |a, b| a.mtime() < b.mtime()),
        KeepPolicy::Largest => best_by(members, |a, b| a.size() > b.size()),
        KeepPolicy::Smallest => best_by(members, |a, b| a.size() < b.size()),
    }
}

fn path_len<C: Candidate>(candidate: &C) -> usize {
    candidate.path().chars().count()
}

fn best_by<C, F>(members: &[C], better: F) -> usize
where
    F: Fn(&C, &C) -> bool,
{
    let mut best = 0;
    for (i, member) in members.iter().enumerate().skip(1) {
        if better(member, &members[best]) {
            best = i;
        }
    }
    best
}
