use super::builder::{plan_header, KeeperIndex, Plan, PlanLevel, PlannedGroup};
use super::files::{read_plan, write_atomic};
use crate::error::Error;
use crate::keeper::KeepPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Position of an interrupted review: the next group to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewCursor {
    pub plan: PathBuf,
    pub next_group: usize,
    pub total_groups: usize,
    pub level: PlanLevel,
    pub policy: KeepPolicy,
}

impl ReviewCursor {
    /// `plan.txt` → `plan.cursor.json`
    pub fn path_for(plan: &Path) -> PathBuf {
        plan.with_extension("cursor.json")
    }

    pub fn load(path: &Path) -> Result<Option<Self>, Error> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        write_atomic(path, &serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReviewOptions {
    pub skip: usize,
    pub take: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewOutcome {
    Completed,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewSummary {
    pub outcome: ReviewOutcome,
    pub reviewed: usize,
    pub accepted: usize,
    pub skipped: usize,
    pub extras_written: usize,
    pub next_group: usize,
}

enum Choice {
    Keep(usize),
    Skip,
    Quit,
}

/// Walk the plan's groups one at a time, asking which member to keep.
///
/// Every decision is appended to `plan_path` and the cursor is saved before
/// the next prompt, so quitting (or losing the input) leaves a valid partial
/// plan that a later call resumes. A plan file that already has entries is
/// only accepted when its cursor exists.
pub fn review<R: BufRead, W: Write>(
    plan: &Plan,
    plan_path: &Path,
    options: &ReviewOptions,
    mut input: R,
    mut output: W,
) -> Result<ReviewSummary, Error> {
    let total = plan.groups.len();
    let cursor_path = ReviewCursor::path_for(plan_path);
    let mut cursor = match ReviewCursor::load(&cursor_path)? {
        Some(saved) => {
            if saved.total_groups != total || saved.level != plan.level || saved.policy != plan.policy {
                return Err(Error::Plan(format!(
                    "cursor {} was saved for {} {} groups with policy {}, current plan has {} {} groups with policy {}",
                    cursor_path.display(),
                    saved.total_groups,
                    saved.level,
                    saved.policy,
                    total,
                    plan.level,
                    plan.policy,
                )));
            }
            info!("Resuming review at group {}", saved.next_group + 1);
            saved
        }
        None if plan_path.exists() && !read_plan(plan_path)?.entries.is_empty() => {
            return Err(Error::Plan(format!(
                "{} already lists entries and has no review cursor; review into a new plan file",
                plan_path.display()
            )));
        }
        None => ReviewCursor {
            plan: plan_path.to_path_buf(),
            next_group: 0,
            total_groups: total,
            level: plan.level,
            policy: plan.policy,
        },
    };

    let mut file = OpenOptions::new().create(true).append(true).open(plan_path)?;
    if file.metadata()?.len() == 0 {
        file.write_all(plan_header(plan.level, plan.policy).as_bytes())?;
        file.flush()?;
    }

    let keepers = plan.keeper_index();
    let start = options.skip.max(cursor.next_group).min(total);
    let end = options
        .take
        .map(|take| start.saturating_add(take).min(total))
        .unwrap_or(total);

    let mut summary = ReviewSummary {
        outcome: ReviewOutcome::Completed,
        reviewed: 0,
        accepted: 0,
        skipped: 0,
        extras_written: 0,
        next_group: start,
    };

    for index in start..end {
        let group = &plan.groups[index];
        show_group(&mut output, group, index, total)?;

        match prompt(&mut input, &mut output, group)? {
            Choice::Quit => {
                cursor.next_group = index;
                cursor.save(&cursor_path)?;
                summary.outcome = ReviewOutcome::Quit;
                summary.next_group = index;
                info!("Review stopped at group {} of {}", index + 1, total);
                return Ok(summary);
            }
            Choice::Skip => {
                summary.skipped += 1;
                debug!("Skipped group {}", group.key);
            }
            Choice::Keep(keeper) => {
                let extras = review_extras(group, keeper, plan.level, &keepers);
                let mut block = String::new();
                for extra in &extras {
                    block.push_str(extra);
                    block.push('\n');
                }
                file.write_all(block.as_bytes())?;
                file.flush()?;
                summary.accepted += 1;
                summary.extras_written += extras.len();
            }
        }

        summary.reviewed += 1;
        cursor.next_group = index + 1;
        cursor.save(&cursor_path)?;
        summary.next_group = index + 1;
    }

    info!(
        "Review finished: {} groups reviewed, {} extras appended to {}",
        summary.reviewed,
        summary.extras_written,
        plan_path.display()
    );
    Ok(summary)
}

/// Members to remove when `keeper` survives. Directory members that contain
/// or sit inside any keeper are never returned.
fn review_extras<'a>(
    group: &'a PlannedGroup,
    keeper: usize,
    level: PlanLevel,
    keepers: &KeeperIndex,
) -> Vec<&'a str> {
    let chosen = KeeperIndex::new(std::iter::once(group.members[keeper].path.as_str()));
    group
        .members
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != keeper)
        .map(|(_, m)| m.path.as_str())
        .filter(|path| {
            level == PlanLevel::File || !(chosen.conflicts(path) || keepers.conflicts(path))
        })
        .collect()
}

fn show_group<W: Write>(output: &mut W, group: &PlannedGroup, index: usize, total: usize) -> Result<(), Error> {
    writeln!(output, "\n[{}/{}] {}", index + 1, total, group.header)?;
    for (i, member) in group.members.iter().enumerate() {
        let modified = DateTime::<Utc>::from_timestamp(member.mtime, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let marker = if i == group.suggested { "  (suggested)" } else { "" };
        writeln!(
            output,
            "  {}) {}  [{} bytes, {}]{}",
            i + 1,
            member.path,
            member.size,
            modified,
            marker
        )?;
    }
    Ok(())
}

fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, group: &PlannedGroup) -> Result<Choice, Error> {
    let count = group.members.len();
    let mut line = String::new();
    loop {
        write!(
            output,
            "keep which? [1-{}, Enter = {}, s = skip, q = quit]: ",
            count,
            group.suggested + 1
        )?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            return Ok(Choice::Quit);
        }

        match line.trim() {
            "" => return Ok(Choice::Keep(group.suggested)),
            "s" | "S" => return Ok(Choice::Skip),
            "q" | "Q" => return Ok(Choice::Quit),
            other => match other.parse::<usize>() {
                Ok(n) if (1..=count).contains(&n) => return Ok(Choice::Keep(n - 1)),
                _ => writeln!(output, "'{}' is not a choice", other)?,
            },
        }
    }
}
