use crate::cluster::ClusterCache;
use crate::config::{self, AppConfig};
use crate::error::Error;
use crate::index::JobQueue;
use crate::progress::IngestReporter;
use crate::retry::with_backoff;
use crate::scanner;
use crate::storage::Database;
use crate::worker::IngestWorker;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub struct IngestEngine {
    config: AppConfig,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct EnqueueResult {
    pub walk_duration: Duration,
    pub files_found: usize,
    pub queued: usize,
    /// Files whose current stamp was already queued.
    pub skipped: usize,
}

#[derive(Debug)]
pub struct WorkResult {
    pub duration: Duration,
    pub workers: usize,
    pub jobs_handled: usize,
}

impl IngestEngine {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the token stops workers after their current job.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn open_db(&self) -> Result<Database, Error> {
        Ok(Database::open_with_timeout(
            &self.config.db_path,
            self.config.store.timeout(),
        )?)
    }

    /// Walk the configured roots and queue every file whose stamp is new.
    pub fn enqueue(&self, reporter: &dyn IngestReporter) -> Result<EnqueueResult, Error> {
        let roots = config::non_overlapping_directories(self.config.root_paths.clone());
        info!("Walking directories: {:?}", roots);

        let root_slices: Vec<&str> = roots.iter().map(|s| s.as_str()).collect();
        let ignore_slices: Vec<&str> = self
            .config
            .ignore_patterns
            .iter()
            .map(|s| s.as_str())
            .collect();

        reporter.on_walk_start();
        let walk_start = Instant::now();
        let stamp_map = scanner::build_stamp_map(&root_slices, &ignore_slices)?;
        let walk_duration = walk_start.elapsed();
        let files_found = stamp_map.len();
        reporter.on_walk_complete(files_found, walk_duration.as_secs_f64());
        debug!(
            "Walk completed in {:.2}s, {} files",
            walk_duration.as_secs_f64(),
            files_found
        );

        let mut entries: Vec<(PathBuf, String)> = stamp_map.into_iter().collect();
        entries.sort();

        let db = self.open_db()?;
        let mut queued = 0;
        let mut skipped = 0;
        for (i, (path, stamp)) in entries.iter().enumerate() {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            let canonical = match fs::canonicalize(path) {
                Ok(p) => p.to_string_lossy().into_owned(),
                Err(e) => {
                    error!("Error canonicalizing {}: {}", path.display(), e);
                    continue;
                }
            };
            if with_backoff(&self.config.retry, "enqueue", || db.enqueue(&canonical, stamp))? {
                queued += 1;
            } else {
                skipped += 1;
            }
            reporter.on_enqueue_progress(i + 1, files_found);
        }
        reporter.on_enqueue_complete(queued, skipped);
        info!("Queued {} files ({} unchanged)", queued, skipped);

        Ok(EnqueueResult {
            walk_duration,
            files_found,
            queued,
            skipped,
        })
    }

    /// Run the configured number of workers, each on its own connection.
    /// With `exit_when_idle`, return once the queue drains; otherwise run
    /// until cancelled.
    pub fn run_workers(
        &self,
        reporter: &dyn IngestReporter,
        exit_when_idle: bool,
    ) -> Result<WorkResult, Error> {
        let workers = self.config.worker.workers.max(1);
        // Open once up front so the schema exists before workers race to it.
        drop(self.open_db()?);

        info!("Starting {} ingest workers", workers);
        let start = Instant::now();

        let handled: Vec<Result<usize, Error>> = thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|n| {
                    s.spawn(move || -> Result<usize, Error> {
                        let db = self.open_db()?;
                        let worker = IngestWorker::new(&db, &db, &self.config);
                        let jobs = worker.run(&self.cancel, reporter, exit_when_idle);
                        debug!("Worker {} finished after {} jobs", n, jobs);
                        Ok(jobs)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(Error::Other("worker thread panicked".to_string())))
                })
                .collect()
        });

        let mut jobs_handled = 0;
        for result in handled {
            jobs_handled += result?;
        }

        let duration = start.elapsed();
        reporter.on_workers_complete(jobs_handled, duration.as_secs_f64());
        info!(
            "Workers handled {} jobs in {:.2}s",
            jobs_handled,
            duration.as_secs_f64()
        );

        Ok(WorkResult {
            duration,
            workers,
            jobs_handled,
        })
    }

    /// Recompute clusters from the current links and store each record's
    /// cluster id. Returns `(cluster_id, members)` per cluster.
    pub fn refresh_clusters(&self) -> Result<Vec<(String, Vec<String>)>, Error> {
        let db = self.open_db()?;
        let mut cache = ClusterCache::new(self.config.similarity.threshold);
        let view = cache.view(&db)?;
        let assigned = with_backoff(&self.config.retry, "assign_cluster_ids", || {
            db.assign_cluster_ids(&view.assignments())
        })?;
        let clusters = view.clusters();
        info!(
            "{} clusters covering {} records",
            clusters.len(),
            assigned
        );
        Ok(clusters)
    }
}
