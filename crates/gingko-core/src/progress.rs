use crate::worker::JobOutcome;

/// Trait for reporting ingest progress.
///
/// The CLI implements it with indicatif bars. All methods have default
/// no-op implementations.
pub trait IngestReporter: Send + Sync {
    fn on_walk_start(&self) {}
    fn on_walk_complete(&self, _files_found: usize, _duration_secs: f64) {}
    fn on_enqueue_progress(&self, _files_done: usize, _total_files: usize) {}
    fn on_enqueue_complete(&self, _queued: usize, _skipped: usize) {}
    fn on_job_complete(&self, _outcome: &JobOutcome) {}
    fn on_workers_complete(&self, _jobs: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl IngestReporter for SilentReporter {}
