use crate::config::AppConfig;
use crate::error::Error;
use crate::executor::{
    self, EntryKind, ExecuteOptions, ExecutionLog, ExecutionMode, ExecutionReport, Executor,
    RestoreSummary,
};
use crate::grouping::{build_signatures, group_files, SignatureOptions};
use crate::inventory::{self, InventorySource, LoadStats};
use crate::plan::{
    self, build_directory_plan, build_file_plan, Plan, PlanArtifacts, PlanLevel, PlanOptions,
    ReviewOptions, ReviewSummary,
};
use crate::progress::ProgressReporter;
use chrono::Local;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct DedupeEngine {
    config: AppConfig,
    cancel: Arc<AtomicBool>,
}

/// Everything one planning pass produced.
#[derive(Debug)]
pub struct PlanRun {
    pub plan: Plan,
    pub load_stats: LoadStats,
    pub records: usize,
    /// Directory plans only.
    pub directories_seen: usize,
    pub nested_suppressed: usize,
    pub load_duration: Duration,
    pub group_duration: Duration,
    /// Set once the plan has been written to disk.
    pub artifacts: Option<PlanArtifacts>,
}

/// `plan.txt` → `plan.applied.log`
pub fn default_log_path(plan: &Path) -> PathBuf {
    plan.with_extension("applied.log")
}

impl DedupeEngine {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Setting the token stops an apply between two entries.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn source(&self) -> Result<InventorySource, Error> {
        let input = self
            .config
            .input
            .as_ref()
            .ok_or_else(|| Error::Other("no inventory given (--input)".to_string()))?;
        InventorySource::new(input)
            .with_layout(self.config.layout)
            .with_exclude_patterns(&self.config.exclude_patterns)
    }

    /// Load the inventory, group it at the configured level and decide
    /// keepers. Nothing is written.
    pub fn build_plan(&self, reporter: &dyn ProgressReporter) -> Result<PlanRun, Error> {
        let source = self.source()?;

        let load_start = Instant::now();
        let inventory = inventory::load(&source, reporter)?;
        let load_duration = load_start.elapsed();

        info!("Grouping {} records at {} level...", inventory.records.len(), self.config.level);
        let group_start = Instant::now();
        let options = PlanOptions {
            policy: self.config.keep,
            low_value_below: self.config.low_value_below,
        };

        let (plan, directories_seen, nested_suppressed) = match self.config.level {
            PlanLevel::File => {
                let groups = group_files(&inventory.records, self.config.min_group_size);
                reporter.on_group_complete(groups.len(), group_start.elapsed().as_secs_f64());
                (build_file_plan(&groups, &options), 0, 0)
            }
            PlanLevel::Dir => {
                let signatures = build_signatures(
                    &inventory.records,
                    &SignatureOptions {
                        scope: self.config.scope,
                        mode: self.config.signature,
                        min_group_size: self.config.min_group_size,
                        nested: self.config.nested,
                        root: self.config.root.clone(),
                    },
                );
                reporter.on_group_complete(
                    signatures.groups.len(),
                    group_start.elapsed().as_secs_f64(),
                );
                (
                    build_directory_plan(&signatures.groups, &options),
                    signatures.directories_seen,
                    signatures.nested_suppressed,
                )
            }
        };
        let group_duration = group_start.elapsed();
        debug!(
            "Grouping and keeper selection completed in {:.2}s",
            group_duration.as_secs_f64()
        );

        Ok(PlanRun {
            plan,
            records: inventory.records.len(),
            load_stats: inventory.stats,
            directories_seen,
            nested_suppressed,
            load_duration,
            group_duration,
            artifacts: None,
        })
    }

    /// Build the plan and write it with its report under `plan_dir`, plus an
    /// optional CSV export.
    pub fn plan(&self, reporter: &dyn ProgressReporter, csv: Option<&Path>) -> Result<PlanRun, Error> {
        let mut run = self.build_plan(reporter)?;
        let stem = plan::plan_stem(Local::now());
        let artifacts = plan::write_plan(&run.plan, &self.config.plan_dir, &stem)?;
        if let Some(csv) = csv {
            plan::write_csv_export(&run.plan, csv)?;
        }
        run.artifacts = Some(artifacts);
        Ok(run)
    }

    /// The given plan, or the newest one in `plan_dir`.
    pub fn resolve_plan(&self, plan_path: Option<&Path>) -> Result<PathBuf, Error> {
        if let Some(path) = plan_path {
            return Ok(path.to_path_buf());
        }
        plan::latest_plan(&self.config.plan_dir)?.ok_or_else(|| {
            Error::Plan(format!(
                "no plan given and none found in {}",
                self.config.plan_dir.display()
            ))
        })
    }

    fn execution_mode(&self) -> Result<ExecutionMode, Error> {
        match (&self.config.quarantine, self.config.delete) {
            (Some(root), false) => Ok(ExecutionMode::Quarantine {
                root: root.clone(),
                layout: self.config.quarantine_layout,
            }),
            (None, true) => Ok(ExecutionMode::Delete),
            (Some(_), true) => Err(Error::Other(
                "delete and quarantine are mutually exclusive".to_string(),
            )),
            (None, false) => Err(Error::Other(
                "apply needs a quarantine directory (--quarantine) or --delete".to_string(),
            )),
        }
    }

    /// Run a plan file. Without `force` every entry is checked and reported
    /// but nothing on disk changes.
    pub fn apply(
        &self,
        plan_path: &Path,
        force: bool,
        log_path: Option<PathBuf>,
        reporter: &dyn ProgressReporter,
    ) -> Result<ExecutionReport, Error> {
        let mode = self.execution_mode()?;
        let plan_file = plan::read_plan(plan_path)?;
        let level = plan_file.level.unwrap_or(self.config.level);
        if plan_file.level.is_some_and(|l| l != self.config.level) {
            info!("Plan {} is a {} plan; acting on {} entries", plan_path.display(), level, level);
        }

        let log_path = log_path.unwrap_or_else(|| default_log_path(plan_path));
        let executor = Executor::new(ExecuteOptions {
            mode,
            expect: EntryKind::from(level),
            force,
            parallel: self.config.parallel,
            log_path: Some(log_path),
        })
        .with_cancel_token(self.cancel_token());

        executor.execute(&plan_file.entries, reporter)
    }

    /// Interactively decide the keeper of each group, appending to
    /// `plan_path` (or a fresh plan under `plan_dir`).
    pub fn review<R: BufRead, W: Write>(
        &self,
        plan_path: Option<&Path>,
        options: &ReviewOptions,
        input: R,
        output: W,
        reporter: &dyn ProgressReporter,
    ) -> Result<(PathBuf, ReviewSummary), Error> {
        let run = self.build_plan(reporter)?;
        let plan_path = match plan_path {
            Some(path) => path.to_path_buf(),
            None => {
                std::fs::create_dir_all(&self.config.plan_dir)?;
                self.config
                    .plan_dir
                    .join(format!("{}.txt", plan::plan_stem(Local::now())))
            }
        };
        let summary = plan::review(&run.plan, &plan_path, options, input, output)?;
        Ok((plan_path, summary))
    }

    /// Undo quarantine moves recorded in `log`.
    pub fn restore(&self, log: &Path, force: bool) -> Result<RestoreSummary, Error> {
        let entries = executor::read_execution_log(log)?;
        info!("Restoring from {} ({} log lines)", log.display(), entries.len());
        let writer = if force { Some(ExecutionLog::open(log)?) } else { None };
        Ok(executor::restore(&entries, force, writer.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentReporter;
    use std::fs;
    use tempfile::tempdir;

    const H: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_apply_requires_action() {
        let engine = DedupeEngine::new(AppConfig::default());
        let dir = tempdir().unwrap();
        let plan = dir.path().join("plan.txt");
        fs::write(&plan, "/nope\n").unwrap();
        assert!(engine.apply(&plan, false, None, &SilentReporter).is_err());
    }

    #[test]
    fn test_build_plan_requires_input() {
        let engine = DedupeEngine::new(AppConfig::default());
        assert!(engine.build_plan(&SilentReporter).is_err());
    }

    #[test]
    fn test_plan_writes_artifacts() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("inv.csv");
        fs::write(&input, format!("/a/1,3,md5,{}\n/a/2,3,md5,{}\n", H, H)).unwrap();
        let engine = DedupeEngine::new(AppConfig {
            input: Some(input),
            plan_dir: dir.path().join("plans"),
            ..Default::default()
        });
        let run = engine.plan(&SilentReporter, None).unwrap();
        let artifacts = run.artifacts.unwrap();
        let text = fs::read_to_string(&artifacts.plan).unwrap();
        assert!(text.ends_with("/a/2\n"));
        assert_eq!(
            engine.resolve_plan(None).unwrap(),
            artifacts.plan,
            "latest plan should be the one just written"
        );
    }
}
