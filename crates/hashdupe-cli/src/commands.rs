use clap::{Parser, ValueEnum};
use hashdupe_core::executor::QuarantineLayout;
use hashdupe_core::grouping::{NestedPolicy, Scope, SignatureMode};
use hashdupe_core::keeper::KeepPolicy;
use hashdupe_core::plan::PlanLevel;
use hashdupe_core::record::Layout;
use hashdupe_core::AppConfig;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Group the inventory and write a plan plus report
    Plan,
    /// Run a plan (dry run unless --force)
    Apply,
    /// Choose keepers group by group, appending to a plan
    Review,
    /// Move quarantined entries back using an execution log
    Restore,
}

#[derive(Debug, Parser)]
#[command(name = "hashdupe")]
#[command(
    about = "Find duplicate files and directory trees in a hash inventory and remove them safely",
    long_about = None
)]
pub struct Cli {
    /// Inventory CSV: path,size,[mtime,]algo,hash
    #[arg(long)]
    pub input: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Mode::Plan)]
    pub mode: Mode,

    /// file or dir
    #[arg(long)]
    pub level: Option<PlanLevel>,

    #[arg(long)]
    pub min_group_size: Option<usize>,

    /// shortest-path, longest-path, newest, oldest, largest, smallest, first-seen, last
    #[arg(long)]
    pub keep: Option<KeepPolicy>,

    /// recursive or shallow
    #[arg(long)]
    pub scope: Option<Scope>,

    /// name+content or content-only
    #[arg(long)]
    pub signature: Option<SignatureMode>,

    /// suppress or report nested directory groups
    #[arg(long)]
    pub nested: Option<NestedPolicy>,

    /// Move extras under this directory
    #[arg(long, conflicts_with = "delete")]
    pub quarantine: Option<PathBuf>,

    /// Quarantine by basename instead of the full original path
    #[arg(long, requires = "quarantine")]
    pub flat: bool,

    /// Delete extras instead of quarantining them
    #[arg(long)]
    pub delete: bool,

    /// Plan to apply (default: newest in --plan-dir). In review mode, a new
    /// file to write decisions to, or an interrupted review to resume
    /// (default: a fresh plan in --plan-dir)
    #[arg(long)]
    pub plan: Option<PathBuf>,

    #[arg(long)]
    pub plan_dir: Option<PathBuf>,

    /// Execution log (apply: default <plan>.applied.log; restore: required)
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Route groups whose members are all smaller than this to a side list
    #[arg(long)]
    pub low_value_below: Option<u64>,

    /// Drop inventory paths matching this glob (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Do not consider directories above this one
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// auto, with-mtime or without-mtime
    #[arg(long)]
    pub layout: Option<Layout>,

    /// Also export group members as CSV
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Review: groups to skip before the first prompt
    #[arg(long, default_value_t = 0)]
    pub skip: usize,

    /// Review: groups to show at most
    #[arg(long)]
    pub take: Option<usize>,

    #[arg(long)]
    pub parallel: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Actually move, delete or restore
    #[arg(long)]
    pub force: bool,
}

impl Cli {
    /// Flags override file and environment settings.
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(input) = &self.input {
            config.input = Some(input.clone());
        }
        if let Some(level) = self.level {
            config.level = level;
        }
        if let Some(n) = self.min_group_size {
            config.min_group_size = n;
        }
        if let Some(keep) = self.keep {
            config.keep = keep;
        }
        if let Some(scope) = self.scope {
            config.scope = scope;
        }
        if let Some(signature) = self.signature {
            config.signature = signature;
        }
        if let Some(nested) = self.nested {
            config.nested = nested;
        }
        if let Some(quarantine) = &self.quarantine {
            config.quarantine = Some(quarantine.clone());
            config.delete = false;
        }
        if self.flat {
            config.quarantine_layout = QuarantineLayout::Flat;
        }
        if self.delete {
            config.delete = true;
            config.quarantine = None;
        }
        if let Some(dir) = &self.plan_dir {
            config.plan_dir = dir.clone();
        }
        if let Some(bytes) = self.low_value_below {
            config.low_value_below = Some(bytes);
        }
        if !self.exclude.is_empty() {
            config.exclude_patterns.extend(self.exclude.iter().cloned());
        }
        if let Some(root) = &self.root {
            config.root = Some(root.clone());
        }
        if let Some(layout) = self.layout {
            config.layout = layout;
        }
        if self.parallel {
            config.parallel = true;
        }
    }
}
