use crate::error::Error;
use crate::executor::QuarantineLayout;
use crate::grouping::{NestedPolicy, Scope, SignatureMode};
use crate::keeper::KeepPolicy;
use crate::plan::PlanLevel;
use crate::record::Layout;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

/// Run settings. Built once from `Hashdupe.toml`, `HASHDUPE_*` variables and
/// command-line flags, then treated as read-only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub input: Option<PathBuf>,
    pub plan_dir: PathBuf,
    pub level: PlanLevel,
    pub min_group_size: usize,
    pub keep: KeepPolicy,
    pub scope: Scope,
    pub signature: SignatureMode,
    pub nested: NestedPolicy,
    pub quarantine: Option<PathBuf>,
    pub quarantine_layout: QuarantineLayout,
    /// Apply by deleting instead of quarantining.
    pub delete: bool,
    pub low_value_below: Option<u64>,
    pub exclude_patterns: Vec<String>,
    pub root: Option<PathBuf>,
    pub layout: Layout,
    pub parallel: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input: None,
            plan_dir: PathBuf::from("./plans"),
            level: PlanLevel::File,
            min_group_size: 2,
            keep: KeepPolicy::FirstSeen,
            scope: Scope::Recursive,
            signature: SignatureMode::NameAndContent,
            nested: NestedPolicy::Suppress,
            quarantine: None,
            quarantine_layout: QuarantineLayout::Preserve,
            delete: false,
            low_value_below: None,
            exclude_patterns: Vec::new(),
            root: None,
            layout: Layout::Auto,
            parallel: false,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.min_group_size < 2 {
            return Err(Error::Other(format!(
                "min_group_size must be at least 2, got {}",
                self.min_group_size
            )));
        }
        if self.delete && self.quarantine.is_some() {
            return Err(Error::Other(
                "delete and quarantine are mutually exclusive".to_string(),
            ));
        }
        if self.level == PlanLevel::File && !self.keep.meaningful_for_files() {
            warn!(
                "keep policy '{}' compares sizes, which are equal within a file group; ties fall back to the first member",
                self.keep
            );
        }
        Ok(())
    }
}

pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Hashdupe").required(false))
        .add_source(
            Environment::with_prefix("HASHDUPE")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("exclude_patterns"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
