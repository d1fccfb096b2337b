use hashdupe_core::{ExecutionSummary, ProgressReporter};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif.
///
/// - Load phase: spinner (line count unknown upfront)
/// - Execute phase: progress bar over plan entries
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.lock();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        if let Some(pb) = self.lock().take() {
            pb.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_load_start(&self, source: &str) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars(TICKS),
        );
        pb.set_message(format!("Reading {}...", source));
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_load_progress(&self, lines_read: usize) {
        if let Some(pb) = self.lock().as_ref() {
            pb.set_message(format!("Reading... {} lines", lines_read));
        }
    }

    fn on_load_complete(&self, records: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Inventory loaded: {} records in {:.2}s",
            records, duration_secs
        );
    }

    fn on_group_complete(&self, groups: usize, duration_secs: f64) {
        eprintln!(
            "  \x1b[32m✓\x1b[0m Grouping complete: {} duplicate groups in {:.2}s",
            groups, duration_secs
        );
    }

    fn on_execute_start(&self, total_entries: usize) {
        let pb = ProgressBar::new(total_entries as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "  {spinner:.cyan} Applying [{bar:30.cyan/dim}] {pos}/{len} entries ({eta} remaining)",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars(TICKS),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_execute_progress(&self, entries_done: usize, _total_entries: usize) {
        if let Some(pb) = self.lock().as_ref() {
            pb.set_position(entries_done as u64);
        }
    }

    fn on_execute_complete(&self, summary: &ExecutionSummary, duration_secs: f64) {
        self.finish_bar();
        let verb = if summary.dry_run { "Dry run" } else { "Apply" };
        eprintln!(
            "  \x1b[32m✓\x1b[0m {} complete: {} entries in {:.2}s",
            verb,
            summary.processed(),
            duration_secs
        );
    }
}
