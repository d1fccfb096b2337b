use crate::grouping::{DirectoryDuplicateGroup, DuplicateGroup, IntegrityWarning};
use crate::keeper::{select_keeper, Candidate, KeepPolicy};
use crate::record::HashKey;
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Granularity a plan acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanLevel {
    #[default]
    File,
    Dir,
}

impl PlanLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanLevel::File => "file",
            PlanLevel::Dir => "dir",
        }
    }
}

impl fmt::Display for PlanLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" | "files" => Ok(PlanLevel::File),
            "dir" | "dirs" | "directory" => Ok(PlanLevel::Dir),
            other => Err(format!("unknown level '{}' (expected file or dir)", other)),
        }
    }
}

/// What the plan does with a group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Keep,
    Extra,
    /// Would have been an extra, but it contains or is contained by a keeper.
    Protected,
    /// Already removed along with a planned ancestor directory.
    Covered,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Keep => "keep",
            Role::Extra => "extra",
            Role::Protected => "protected",
            Role::Covered => "covered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMember {
    pub path: String,
    pub size: u64,
    pub mtime: i64,
    pub role: Role,
}

impl Candidate for PlannedMember {
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

/// A group with its keeper decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedGroup {
    /// `algo:hash` for file groups, the signature for directory groups.
    pub key: String,
    /// Report header, e.g. `HASH <digest> (3 files):`.
    pub header: String,
    pub members: Vec<PlannedMember>,
    /// Index the policy chose. Stays put even if review mode overrides it.
    pub suggested: usize,
    pub low_value: bool,
}

impl PlannedGroup {
    pub fn extras(&self) -> impl Iterator<Item = &str> {
        self.members
            .iter()
            .filter(|m| m.role == Role::Extra)
            .map(|m| m.path.as_str())
    }

    pub fn reclaimable_bytes(&self) -> u64 {
        self.members
            .iter()
            .filter(|m| m.role == Role::Extra)
            .map(|m| m.size)
            .sum()
    }

    fn min_depth(&self) -> usize {
        self.members
            .iter()
            .map(|m| Path::new(&m.path).components().count())
            .min()
            .unwrap_or(0)
    }

    fn write_block(&self, out: &mut String) {
        out.push_str(&self.header);
        out.push('\n');
        for member in &self.members {
            out.push_str("  ");
            out.push_str(&member.path);
            out.push('\n');
        }
        out.push('\n');
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub policy: KeepPolicy,
    /// Groups whose members are all smaller than this go to the low-value list.
    pub low_value_below: Option<u64>,
}

/// Decisions for one run: which members survive and which are extras.
#[derive(Debug, Clone)]
pub struct Plan {
    pub level: PlanLevel,
    pub policy: KeepPolicy,
    pub groups: Vec<PlannedGroup>,
    pub low_value_groups: Vec<PlannedGroup>,
    pub integrity: Vec<IntegrityWarning>,
    pub protected: usize,
    pub covered: usize,
}

impl Plan {
    pub fn entries(&self) -> Vec<&str> {
        self.groups.iter().flat_map(|g| g.extras()).collect()
    }

    pub fn low_value_entries(&self) -> Vec<&str> {
        self.low_value_groups.iter().flat_map(|g| g.extras()).collect()
    }

    pub fn reclaimable_bytes(&self) -> u64 {
        self.groups.iter().map(|g| g.reclaimable_bytes()).sum()
    }

    /// Plan file contents. Identical input and policy give identical bytes.
    pub fn plan_text(&self) -> String {
        render_entries(plan_header(self.level, self.policy), self.entries())
    }

    pub fn low_value_text(&self) -> String {
        render_entries(plan_header(self.level, self.policy), self.low_value_entries())
    }

    pub fn report(&self) -> String {
        render_report(&self.groups)
    }

    pub fn low_value_report(&self) -> String {
        render_report(&self.low_value_groups)
    }

    pub fn integrity_report(&self) -> String {
        let mut out = String::new();
        for warning in &self.integrity {
            out.push_str(&format!(
                "INTEGRITY {} ({} files):\n",
                warning.key.hash,
                warning.members.len()
            ));
            for (path, size) in &warning.members {
                out.push_str(&format!("  {}\t{}\n", path, size));
            }
            out.push('\n');
        }
        out
    }

    pub(crate) fn keeper_index(&self) -> KeeperIndex {
        KeeperIndex::new(
            self.groups
                .iter()
                .chain(self.low_value_groups.iter())
                .flat_map(|g| g.members.iter())
                .filter(|m| m.role == Role::Keep)
                .map(|m| m.path.as_str()),
        )
    }
}

/// Comment lines at the top of every plan file. Also tells the executor what
/// kind of entry to expect.
pub fn plan_header(level: PlanLevel, policy: KeepPolicy) -> String {
    format!("# hashdupe plan\n# level: {}\n# keep: {}\n", level, policy)
}

fn render_entries(mut out: String, entries: Vec<&str>) -> String {
    for entry in entries {
        out.push_str(entry);
        out.push('\n');
    }
    out
}

fn render_report(groups: &[PlannedGroup]) -> String {
    let mut out = String::new();
    for group in groups {
        group.write_block(&mut out);
    }
    out
}

pub fn build_file_plan(groups: &BTreeMap<HashKey, DuplicateGroup>, options: &PlanOptions) -> Plan {
    if !options.policy.meaningful_for_files() {
        warn!(
            "Keep policy '{}' cannot distinguish same-hash files; the first member is kept",
            options.policy
        );
    }

    let mut integrity = Vec::new();
    let mut drafts = Vec::with_capacity(groups.len());

    for group in groups.values() {
        if let Some(warning) = group.integrity() {
            integrity.push(warning);
            continue;
        }
        let members: Vec<PlannedMember> = group
            .members
            .iter()
            .map(|m| PlannedMember {
                path: m.path.clone(),
                size: m.size,
                mtime: m.mtime,
                role: Role::Extra,
            })
            .collect();
        drafts.push(draft(
            group.key.to_string(),
            format!("HASH {} ({} files):", group.key.hash, members.len()),
            members,
            options,
        ));
    }

    finish(drafts, PlanLevel::File, options, integrity)
}

pub fn build_directory_plan(
    groups: &BTreeMap<String, DirectoryDuplicateGroup>,
    options: &PlanOptions,
) -> Plan {
    let drafts = groups
        .values()
        .map(|group| {
            let members: Vec<PlannedMember> = group
                .members
                .iter()
                .map(|m| PlannedMember {
                    path: m.path.clone(),
                    size: m.total_size,
                    mtime: m.newest_mtime,
                    role: Role::Extra,
                })
                .collect();
            draft(
                group.signature.clone(),
                format!("GROUP {} ({} dirs):", group.signature, members.len()),
                members,
                options,
            )
        })
        .collect();

    finish(drafts, PlanLevel::Dir, options, Vec::new())
}

fn draft(key: String, header: String, mut members: Vec<PlannedMember>, options: &PlanOptions) -> PlannedGroup {
    let keeper = select_keeper(&members, options.policy);
    members[keeper].role = Role::Keep;
    let low_value = options
        .low_value_below
        .map(|threshold| members.iter().all(|m| m.size < threshold))
        .unwrap_or(false);
    PlannedGroup {
        key,
        header,
        members,
        suggested: keeper,
        low_value,
    }
}

fn finish(
    mut drafts: Vec<PlannedGroup>,
    level: PlanLevel,
    options: &PlanOptions,
    integrity: Vec<IntegrityWarning>,
) -> Plan {
    let mut protected = 0;
    let mut covered = 0;

    if level == PlanLevel::Dir {
        let keepers = KeeperIndex::new(
            drafts
                .iter()
                .flat_map(|g| g.members.iter())
                .filter(|m| m.role == Role::Keep)
                .map(|m| m.path.as_str()),
        );

        // Shallow groups first so an ancestor extra is planned before anything under it.
        drafts.sort_by(|a, b| (a.min_depth(), &a.key).cmp(&(b.min_depth(), &b.key)));
        let mut planned: AHashSet<String> = AHashSet::new();
        for group in drafts.iter_mut() {
            for member in group.members.iter_mut().filter(|m| m.role == Role::Extra) {
                if keepers.conflicts(&member.path) {
                    debug!("Protecting {}: it contains or lies inside a keeper", member.path);
                    member.role = Role::Protected;
                    protected += 1;
                } else if has_ancestor_in(&member.path, &planned) {
                    member.role = Role::Covered;
                    covered += 1;
                } else {
                    planned.insert(member.path.clone());
                }
            }
        }
    }

    drafts.sort_by(|a, b| {
        b.reclaimable_bytes()
            .cmp(&a.reclaimable_bytes())
            .then_with(|| a.key.cmp(&b.key))
    });
    let (low_value_groups, groups): (Vec<_>, Vec<_>) = drafts.into_iter().partition(|g| g.low_value);

    let plan = Plan {
        level,
        policy: options.policy,
        groups,
        low_value_groups,
        integrity,
        protected,
        covered,
    };

    info!(
        "Plan: {} groups, {} extras, {} low-value groups, {} integrity exclusions, {} protected",
        plan.groups.len(),
        plan.entries().len(),
        plan.low_value_groups.len(),
        plan.integrity.len(),
        plan.protected,
    );
    plan
}

fn has_ancestor_in(path: &str, set: &AHashSet<String>) -> bool {
    Path::new(path)
        .ancestors()
        .skip(1)
        .any(|a| set.contains(a.to_string_lossy().as_ref()))
}

/// Keeper paths plus all their ancestors, for containment checks.
#[derive(Debug, Default)]
pub(crate) struct KeeperIndex {
    keepers: AHashSet<String>,
    ancestors: AHashSet<String>,
}

impl KeeperIndex {
    pub(crate) fn new<'a>(paths: impl Iterator<Item = &'a str>) -> Self {
        let mut index = KeeperIndex::default();
        for path in paths {
            index.insert(path);
        }
        index
    }

    pub(crate) fn insert(&mut self, path: &str) {
        for ancestor in Path::new(path).ancestors().skip(1) {
            self.ancestors
                .insert(ancestor.to_string_lossy().into_owned());
        }
        self.keepers.insert(path.to_string());
    }

    /// True when removing `path` would also remove a keeper, or when `path`
    /// lives inside a keeper.
    pub(crate) fn conflicts(&self, path: &str) -> bool {
        self.ancestors.contains(path) || has_ancestor_in(path, &self.keepers)
    }
}
