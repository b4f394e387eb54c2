use gingko_core::{IngestReporter, JobOutcome};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Walk phase: spinner (unknown total files upfront)
/// - Enqueue phase: progress bar (total known from the walk)
/// - Work phase: spinner with running job counts, shared by all workers
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
    indexed: AtomicUsize,
    duplicates: AtomicUsize,
    failed: AtomicUsize,
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(TICK_CHARS),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
            indexed: AtomicUsize::new(0),
            duplicates: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }

    /// Start the work-phase spinner. Workers share it.
    pub fn start_work(&self) {
        self.set_bar(spinner("Waiting for jobs..."));
    }
}

impl IngestReporter for CliReporter {
    fn on_walk_start(&self) {
        self.set_bar(spinner("Walking directories..."));
    }

    fn on_walk_complete(&self, files_found: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Walk complete: {} files in {:.2}s",
            files_found, duration_secs
        );

        let pb = ProgressBar::new(files_found as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "  {spinner:.cyan} Queueing [{bar:30.cyan/dim}] {pos}/{len} files",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars(TICK_CHARS),
        );
        self.set_bar(pb);
    }

    fn on_enqueue_progress(&self, files_done: usize, _total_files: usize) {
        self.with_bar(|pb| pb.set_position(files_done as u64));
    }

    fn on_enqueue_complete(&self, queued: usize, skipped: usize) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Queued {} files ({} unchanged)",
            queued, skipped
        );
    }

    fn on_job_complete(&self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Indexed { .. } => self.indexed.fetch_add(1, Ordering::Relaxed),
            JobOutcome::Duplicate { .. } => self.duplicates.fetch_add(1, Ordering::Relaxed),
            JobOutcome::Extracted {
                indexed, duplicates, ..
            } => {
                self.duplicates.fetch_add(*duplicates, Ordering::Relaxed);
                self.indexed.fetch_add(*indexed, Ordering::Relaxed)
            }
            JobOutcome::Failed { .. } => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        let message = format!(
            "Ingesting... {} indexed, {} duplicates, {} failed",
            self.indexed.load(Ordering::Relaxed),
            self.duplicates.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        );
        self.with_bar(|pb| pb.set_message(message));
    }

    fn on_workers_complete(&self, jobs: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Workers complete: {} jobs in {:.2}s",
            jobs, duration_secs
        );
    }
}
