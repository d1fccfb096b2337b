use super::builder::{Plan, PlanLevel, PlannedGroup};
use crate::error::Error;
use ahash::AHashSet;
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PLAN_PREFIX: &str = "hashdupe-plan-";
const ARTIFACT_SUFFIXES: [&str; 3] = ["-report.txt", "-lowvalue.txt", "-integrity.txt"];

/// Files written for one planning run.
#[derive(Debug, Clone)]
pub struct PlanArtifacts {
    pub plan: PathBuf,
    pub report: PathBuf,
    pub low_value: Option<PathBuf>,
    pub integrity: Option<PathBuf>,
}

/// A plan read back from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanFile {
    pub level: Option<PlanLevel>,
    pub entries: Vec<String>,
}

/// `hashdupe-plan-YYYYMMDD-HHMMSS-<run id>`; sorts chronologically.
pub fn plan_stem(now: DateTime<Local>) -> String {
    format!(
        "{}{}-{:x}{:03}",
        PLAN_PREFIX,
        now.format("%Y%m%d-%H%M%S"),
        std::process::id(),
        now.timestamp_subsec_millis()
    )
}

/// Write the plan, report, and optional low-value and integrity lists into
/// `dir`. Each file is written under a temporary name and renamed into place.
pub fn write_plan(plan: &Plan, dir: &Path, stem: &str) -> Result<PlanArtifacts, Error> {
    fs::create_dir_all(dir).map_err(|e| {
        Error::Plan(format!("cannot create plan directory {}: {}", dir.display(), e))
    })?;

    let plan_path = dir.join(format!("{}.txt", stem));
    let report_path = dir.join(format!("{}-report.txt", stem));
    write_atomic(&plan_path, &plan.plan_text())?;
    write_atomic(&report_path, &plan.report())?;

    let low_value = if plan.low_value_groups.is_empty() {
        None
    } else {
        let path = dir.join(format!("{}-lowvalue.txt", stem));
        let mut text = plan.low_value_text();
        text.push_str("\n# groups\n");
        for line in plan.low_value_report().lines() {
            text.push_str("# ");
            text.push_str(line);
            text.push('\n');
        }
        write_atomic(&path, &text)?;
        Some(path)
    };

    let integrity = if plan.integrity.is_empty() {
        None
    } else {
        let path = dir.join(format!("{}-integrity.txt", stem));
        write_atomic(&path, &plan.integrity_report())?;
        Some(path)
    };

    info!("Plan written to {}", plan_path.display());
    Ok(PlanArtifacts {
        plan: plan_path,
        report: report_path,
        low_value,
        integrity,
    })
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), Error> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    debug!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}

/// Read a plan file. Blank lines and `#` comments are skipped; a
/// `# level: <file|dir>` comment sets [`PlanFile::level`].
pub fn read_plan(path: &Path) -> Result<PlanFile, Error> {
    let file = File::open(path)
        .map_err(|e| Error::Plan(format!("cannot open plan {}: {}", path.display(), e)))?;
    let mut plan = PlanFile::default();
    let mut seen: AHashSet<String> = AHashSet::new();
    let mut repeated = 0;

    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if let Some(comment) = line.strip_prefix('#') {
            if let Some(level) = comment.trim().strip_prefix("level:") {
                plan.level = level.trim().parse().ok();
            }
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        if !seen.insert(line.to_string()) {
            repeated += 1;
            continue;
        }
        plan.entries.push(line.to_string());
    }
    if repeated > 0 {
        debug!("Ignored {} repeated entries in {}", repeated, path.display());
    }

    debug!("Read {} entries from {}", plan.entries.len(), path.display());
    Ok(plan)
}

/// Newest plan in `dir` by file name, ignoring reports and side lists.
pub fn latest_plan(dir: &Path) -> Result<Option<PathBuf>, Error> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut plans: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|name| {
                    name.starts_with(PLAN_PREFIX)
                        && name.ends_with(".txt")
                        && !ARTIFACT_SUFFIXES.iter().any(|s| name.ends_with(s))
                })
                .unwrap_or(false)
        })
        .collect();
    plans.sort();
    Ok(plans.pop())
}

/// One CSV row per group member: `group,level,key,size,path,role`.
pub fn write_csv_export(plan: &Plan, path: &Path) -> Result<usize, Error> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["group", "level", "key", "size", "path", "role"])?;

    let mut rows = 0;
    let groups: Vec<&PlannedGroup> = plan
        .groups
        .iter()
        .chain(plan.low_value_groups.iter())
        .collect();
    for (index, group) in groups.iter().enumerate() {
        for member in &group.members {
            writer.write_record([
                (index + 1).to_string().as_str(),
                plan.level.as_str(),
                group.key.as_str(),
                member.size.to_string().as_str(),
                member.path.as_str(),
                member.role.as_str(),
            ])?;
            rows += 1;
        }
    }
    writer.flush()?;
    info!("Exported {} group members to {}", rows, path.display());
    Ok(rows)
}
