use crate::executor::ExecutionSummary;

/// Trait for reporting pipeline progress.
///
/// CLI implements with indicatif. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_load_start(&self, _source: &str) {}
    fn on_load_progress(&self, _lines_read: usize) {}
    fn on_load_complete(&self, _records: usize, _duration_secs: f64) {}
    fn on_group_complete(&self, _groups: usize, _duration_secs: f64) {}
    fn on_execute_start(&self, _total_entries: usize) {}
    fn on_execute_progress(&self, _entries_done: usize, _total_entries: usize) {}
    fn on_execute_complete(&self, _summary: &ExecutionSummary, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
