use crate::error::Error;
use crate::plan::PlanLevel;
use crate::progress::ProgressReporter;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

const DELETED: &str = "DELETED";
const MISSING: &str = "MISSING";
const NOT_REGULAR: &str = "NOT_REGULAR";
const RESTORED: &str = "RESTORED";
const FAILED_PREFIX: &str = "FAILED: ";

/// How quarantined paths are laid out under the quarantine root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuarantineLayout {
    /// `root + original absolute path`
    #[default]
    Preserve,
    /// `root/basename`
    Flat,
}

impl FromStr for QuarantineLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preserve" => Ok(QuarantineLayout::Preserve),
            "flat" => Ok(QuarantineLayout::Flat),
            other => Err(format!("unknown quarantine layout '{}' (expected preserve or flat)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    Quarantine { root: PathBuf, layout: QuarantineLayout },
    Delete,
}

/// The kind of filesystem entry a plan is expected to name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl From<PlanLevel> for EntryKind {
    fn from(level: PlanLevel) -> Self {
        match level {
            PlanLevel::File => EntryKind::File,
            PlanLevel::Dir => EntryKind::Directory,
        }
    }
}

/// Terminal state of one plan entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Moved(PathBuf),
    Deleted,
    /// Gone since planning. Expected on re-runs.
    Missing,
    /// Present but no longer the expected kind (or a symlink).
    NotRegular,
    Failed(String),
    /// Dry run: would be moved here.
    WouldMove(PathBuf),
    /// Dry run: would be deleted.
    WouldDelete,
}

impl Outcome {
    fn log_status(&self) -> Option<String> {
        match self {
            Outcome::Moved(dest) => Some(dest.to_string_lossy().into_owned()),
            Outcome::Deleted => Some(DELETED.to_string()),
            Outcome::Missing => Some(MISSING.to_string()),
            Outcome::NotRegular => Some(NOT_REGULAR.to_string()),
            Outcome::Failed(msg) => Some(format!("{}{}", FAILED_PREFIX, single_line(msg))),
            Outcome::WouldMove(_) | Outcome::WouldDelete => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub moved: usize,
    pub deleted: usize,
    pub missing: usize,
    pub not_regular: usize,
    pub failed: usize,
    /// Entries a dry run would have acted on.
    pub pending: usize,
    pub dry_run: bool,
    pub cancelled: bool,
}

impl ExecutionSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Moved(_) => self.moved += 1,
            Outcome::Deleted => self.deleted += 1,
            Outcome::Missing => self.missing += 1,
            Outcome::NotRegular => self.not_regular += 1,
            Outcome::Failed(_) => self.failed += 1,
            Outcome::WouldMove(_) | Outcome::WouldDelete => self.pending += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.moved + self.deleted + self.missing + self.not_regular + self.failed + self.pending
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub summary: ExecutionSummary,
    /// Per-entry outcomes in plan order. Entries skipped by cancellation are absent.
    pub outcomes: Vec<(String, Outcome)>,
}

#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub mode: ExecutionMode,
    pub expect: EntryKind,
    /// Without it nothing is moved or deleted.
    pub force: bool,
    pub parallel: bool,
    /// Append-only action log; only written when `force` is set.
    pub log_path: Option<PathBuf>,
}

/// Append-only `source \t destination-or-status` log. One writer lock keeps
/// lines whole and totally ordered.
pub struct ExecutionLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl ExecutionLog {
    pub fn open(path: &Path) -> Result<Self, Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::Plan(format!("cannot open log {}: {}", path.display(), e)))?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, source: &str, status: &str) -> io::Result<()> {
        let line = format!("{}\t{}\n", source, status);
        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

pub struct Executor {
    options: ExecuteOptions,
    cancel: Arc<AtomicBool>,
}

impl Executor {
    pub fn new(options: ExecuteOptions) -> Self {
        Self {
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_cancel_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Apply every entry independently. A failing entry is logged and counted
    /// and never stops the rest; cancellation takes effect between entries.
    pub fn execute(&self, entries: &[String], reporter: &dyn ProgressReporter) -> Result<ExecutionReport, Error> {
        let start = Instant::now();
        let total = entries.len();
        let log = match (&self.options.log_path, self.options.force) {
            (Some(path), true) => Some(ExecutionLog::open(path)?),
            _ => None,
        };

        if self.options.force {
            info!("Executing {} plan entries ({:?})", total, self.options.mode);
        } else {
            info!("Dry run over {} plan entries; nothing will be changed", total);
        }
        reporter.on_execute_start(total);

        let dest_lock = Mutex::new(());
        let done = AtomicUsize::new(0);
        let run_entry = |source: &String| -> Option<(String, Outcome)> {
            if self.cancel.load(Ordering::Relaxed) {
                return None;
            }
            let outcome = self.execute_entry(source, &dest_lock);
            if let (Some(log), Some(status)) = (&log, outcome.log_status()) {
                if let Err(e) = log.append(source, &status) {
                    error!("Failed to write execution log {}: {}", log.path().display(), e);
                }
            }
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            reporter.on_execute_progress(finished, total);
            Some((source.clone(), outcome))
        };

        let outcomes: Vec<(String, Outcome)> = if self.options.parallel {
            entries.par_iter().filter_map(run_entry).collect()
        } else {
            let mut outcomes = Vec::with_capacity(total);
            for source in entries {
                match run_entry(source) {
                    Some(result) => outcomes.push(result),
                    None => break,
                }
            }
            outcomes
        };

        let mut summary = ExecutionSummary {
            dry_run: !self.options.force,
            ..Default::default()
        };
        for (_, outcome) in &outcomes {
            summary.record(outcome);
        }
        summary.cancelled = outcomes.len() < total;
        if summary.cancelled {
            warn!("Execution cancelled after {} of {} entries", outcomes.len(), total);
        }

        let duration = start.elapsed().as_secs_f64();
        info!(
            "moved: {}, deleted: {}, missing: {}, not regular: {}, failed: {}, pending (dry run): {}",
            summary.moved,
            summary.deleted,
            summary.missing,
            summary.not_regular,
            summary.failed,
            summary.pending,
        );
        reporter.on_execute_complete(&summary, duration);

        Ok(ExecutionReport { summary, outcomes })
    }

    /// Re-verify one entry and act on it.
    pub fn execute_entry(&self, source: &str, dest_lock: &Mutex<()>) -> Outcome {
        let path = Path::new(source);
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Missing: {}", source);
                return Outcome::Missing;
            }
            Err(e) => {
                error!("Cannot stat {}: {}", source, e);
                return Outcome::Failed(e.to_string());
            }
        };

        let file_type = metadata.file_type();
        let expected = match self.options.expect {
            EntryKind::File => file_type.is_file(),
            EntryKind::Directory => file_type.is_dir(),
        };
        if !expected {
            warn!("Not a {:?} any more, skipping: {}", self.options.expect, source);
            return Outcome::NotRegular;
        }

        match &self.options.mode {
            ExecutionMode::Quarantine { root, layout } => {
                if !self.options.force {
                    return Outcome::WouldMove(free_destination(&quarantine_target(root, *layout, path)));
                }
                let _reserved = dest_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let dest = free_destination(&quarantine_target(root, *layout, path));
                if let Some(parent) = dest.parent() {
                    // Another entry may have created it first; that is fine.
                    if let Err(e) = fs::create_dir_all(parent) {
                        error!("Cannot create {}: {}", parent.display(), e);
                        return Outcome::Failed(e.to_string());
                    }
                }
                match fs::rename(path, &dest) {
                    Ok(()) => {
                        debug!("Moved {} -> {}", source, dest.display());
                        Outcome::Moved(dest)
                    }
                    Err(e) => {
                        error!("Failed to move {} to {}: {}", source, dest.display(), e);
                        Outcome::Failed(e.to_string())
                    }
                }
            }
            ExecutionMode::Delete => {
                if !self.options.force {
                    return Outcome::WouldDelete;
                }
                let result = match self.options.expect {
                    EntryKind::File => fs::remove_file(path),
                    EntryKind::Directory => fs::remove_dir_all(path),
                };
                match result {
                    Ok(()) => {
                        debug!("Deleted {}", source);
                        Outcome::Deleted
                    }
                    Err(e) => {
                        error!("Failed to delete {}: {}", source, e);
                        Outcome::Failed(e.to_string())
                    }
                }
            }
        }
    }
}

/// Where `source` lands inside the quarantine root, before collision handling.
pub fn quarantine_target(root: &Path, layout: QuarantineLayout, source: &Path) -> PathBuf {
    match layout {
        QuarantineLayout::Preserve => root.join(path_without_root(source)),
        QuarantineLayout::Flat => match source.file_name() {
            Some(name) => root.join(name),
            None => root.join(path_without_root(source)),
        },
    }
}

/// Drop prefix, root and `..` components so the result stays under whatever
/// it is joined onto.
fn path_without_root(path: &Path) -> PathBuf {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// `target` if free, otherwise the first free `target.dupeN`.
pub fn free_destination(target: &Path) -> PathBuf {
    if !occupied(target) {
        return target.to_path_buf();
    }
    let name: OsString = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    let mut n = 1u64;
    loop {
        let mut candidate_name = name.clone();
        candidate_name.push(format!(".dupe{}", n));
        let candidate = target.with_file_name(candidate_name);
        if !occupied(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn single_line(msg: &str) -> String {
    msg.replace(['\t', '\n', '\r'], " ")
}

/// A parsed execution log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogStatus {
    Moved(PathBuf),
    Deleted,
    Missing,
    NotRegular,
    Failed(String),
    Restored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub source: String,
    pub status: LogStatus,
}

pub fn read_execution_log(path: &Path) -> Result<Vec<LogEntry>, Error> {
    let file = File::open(path)
        .map_err(|e| Error::Plan(format!("cannot open log {}: {}", path.display(), e)))?;
    let mut entries = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let Some((source, status)) = line.split_once('\t') else {
            if !line.trim().is_empty() {
                warn!("Ignoring log line {} without a tab", number + 1);
            }
            continue;
        };
        let status = match status {
            DELETED => LogStatus::Deleted,
            MISSING => LogStatus::Missing,
            NOT_REGULAR => LogStatus::NotRegular,
            RESTORED => LogStatus::Restored,
            other => match other.strip_prefix(FAILED_PREFIX) {
                Some(msg) => LogStatus::Failed(msg.to_string()),
                None => LogStatus::Moved(PathBuf::from(other)),
            },
        };
        entries.push(LogEntry {
            source: source.to_string(),
            status,
        });
    }
    Ok(entries)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub restored: usize,
    /// Quarantined copy no longer exists.
    pub missing: usize,
    /// Something already lives at the original path; left alone.
    pub occupied: usize,
    pub failed: usize,
    pub pending: usize,
    pub dry_run: bool,
}

/// Move quarantined entries back to where they came from, newest first.
/// Never overwrites an existing path. Successful restores are appended to
/// `log` as `RESTORED`.
pub fn restore(entries: &[LogEntry], force: bool, log: Option<&ExecutionLog>) -> RestoreSummary {
    let mut summary = RestoreSummary {
        dry_run: !force,
        ..Default::default()
    };

    for entry in entries.iter().rev() {
        let LogStatus::Moved(dest) = &entry.status else {
            continue;
        };
        let source = Path::new(&entry.source);
        if !occupied(dest) {
            summary.missing += 1;
            continue;
        }
        if occupied(source) {
            warn!("Not restoring {}: the original path is in use", entry.source);
            summary.occupied += 1;
            continue;
        }
        if !force {
            summary.pending += 1;
            continue;
        }

        let result = source
            .parent()
            .map(fs::create_dir_all)
            .unwrap_or(Ok(()))
            .and_then(|_| fs::rename(dest, source));
        match result {
            Ok(()) => {
                debug!("Restored {} -> {}", dest.display(), entry.source);
                summary.restored += 1;
                if let Some(log) = log {
                    if let Err(e) = log.append(&entry.source, RESTORED) {
                        error!("Failed to write execution log {}: {}", log.path().display(), e);
                    }
                }
            }
            Err(e) => {
                error!("Failed to restore {}: {}", entry.source, e);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Restore: {} restored, {} missing, {} occupied, {} failed, {} pending (dry run)",
        summary.restored, summary.missing, summary.occupied, summary.failed, summary.pending
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_preserve_target_strips_root() {
        let target = quarantine_target(
            Path::new("/q"),
            QuarantineLayout::Preserve,
            Path::new("/vol/a/b.txt"),
        );
        assert_eq!(target, PathBuf::from("/q/vol/a/b.txt"));
    }

    #[test]
    fn test_preserve_target_drops_parent_components() {
        let target = quarantine_target(
            Path::new("/q"),
            QuarantineLayout::Preserve,
            Path::new("/vol/../etc/passwd"),
        );
        assert_eq!(target, PathBuf::from("/q/vol/etc/passwd"));
    }

    #[test]
    fn test_flat_target_uses_basename() {
        let target = quarantine_target(
            Path::new("/q"),
            QuarantineLayout::Flat,
            Path::new("/vol/a/b.txt"),
        );
        assert_eq!(target, PathBuf::from("/q/b.txt"));
    }

    #[test]
    fn test_free_destination_appends_suffix() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("foo");
        assert_eq!(free_destination(&target), target);
        fs::write(&target, "x").unwrap();
        assert_eq!(free_destination(&target), dir.path().join("foo.dupe1"));
        fs::write(dir.path().join("foo.dupe1"), "y").unwrap();
        assert_eq!(free_destination(&target), dir.path().join("foo.dupe2"));
    }

    #[test]
    fn test_log_status_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.log");
        let log = ExecutionLog::open(&path).unwrap();
        log.append("/a", "/q/a").unwrap();
        log.append("/b", DELETED).unwrap();
        log.append("/c", &Outcome::Failed("boom\tbad".into()).log_status().unwrap())
            .unwrap();
        log.append("/d", MISSING).unwrap();

        let entries = read_execution_log(&path).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].status, LogStatus::Moved(PathBuf::from("/q/a")));
        assert_eq!(entries[1].status, LogStatus::Deleted);
        assert_eq!(entries[2].status, LogStatus::Failed("boom bad".into()));
        assert_eq!(entries[3].status, LogStatus::Missing);
    }
}
