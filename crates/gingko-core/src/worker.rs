use crate::config::{
    AppConfig, ExtractionSettings, RetrySettings, SimilaritySettings, WorkerSettings,
};
use crate::error::Error;
use crate::extraction::{self, member_path, ArchiveFormat, Extraction};
use crate::index::{merge_link, sort_links, JobQueue, SignatureIndex};
use crate::progress::IngestReporter;
use crate::retry::with_backoff;
use crate::signature::{compute_signature, content_id, score};
use crate::storage::models::{IngestJob, Link, Record};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Per-job progression. A job only moves forward; any step may jump to
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobState {
    Received,
    Hashed,
    Scored,
    Stored,
    Linked,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Record written (or resumed) and linked.
    Indexed { record_id: String, links: usize },
    /// Content was already fully ingested under this id.
    Duplicate { record_id: String },
    /// Archive unpacked; each member went through the record pipeline.
    Extracted {
        path: String,
        members: usize,
        indexed: usize,
        duplicates: usize,
    },
    Failed {
        job_id: i64,
        error: String,
        requeued: bool,
    },
}

/// Consumes ingest jobs and drives each through hashing, scoring, storage
/// and linking. Holds no state between jobs; redelivered work is made safe
/// by keying records on content and merging links idempotently.
pub struct IngestWorker<'a> {
    index: &'a dyn SignatureIndex,
    queue: &'a dyn JobQueue,
    similarity: SimilaritySettings,
    worker: WorkerSettings,
    retry: RetrySettings,
    extraction: ExtractionSettings,
}

impl<'a> IngestWorker<'a> {
    pub fn new(index: &'a dyn SignatureIndex, queue: &'a dyn JobQueue, config: &AppConfig) -> Self {
        Self {
            index,
            queue,
            similarity: config.similarity.clone(),
            worker: config.worker.clone(),
            retry: config.retry.clone(),
            extraction: config.extraction.clone(),
        }
    }

    /// Process jobs until `cancel` is set. With `exit_when_idle`, also stop
    /// the first time the queue is empty. Returns the number of jobs handled.
    pub fn run(
        &self,
        cancel: &AtomicBool,
        reporter: &dyn IngestReporter,
        exit_when_idle: bool,
    ) -> usize {
        let idle = Duration::from_millis(self.worker.idle_poll_ms);
        let mut handled = 0;

        while !cancel.load(Ordering::Relaxed) {
            match self.run_once() {
                Ok(Some(outcome)) => {
                    handled += 1;
                    reporter.on_job_complete(&outcome);
                }
                Ok(None) if exit_when_idle => break,
                Ok(None) => thread::sleep(idle),
                Err(e) => {
                    error!("Worker loop error: {}", e);
                    thread::sleep(idle);
                }
            }
        }
        handled
    }

    /// Lease and handle one job. `Ok(None)` means the queue had nothing
    /// available. Job-level failures are recorded on the queue and returned
    /// as `JobOutcome::Failed`; only queue failures are `Err`.
    pub fn run_once(&self) -> Result<Option<JobOutcome>, Error> {
        let lease = Duration::from_secs(self.worker.lease_secs);
        let Some(job) = with_backoff(&self.retry, "dequeue", || self.queue.dequeue(lease))? else {
            return Ok(None);
        };

        match self.process_job(&job) {
            Ok(outcome) => {
                settle(&job, with_backoff(&self.retry, "ack", || self.queue.ack(&job)))?;
                Ok(Some(outcome))
            }
            Err(e) => {
                let requeue = e.is_requeue_eligible() && job.attempt < self.worker.max_deliveries;
                if requeue {
                    warn!(
                        "Job {} ({}) failed on delivery {}, requeueing: {}",
                        job.job_id, job.path, job.attempt, e
                    );
                } else {
                    error!("Job {} ({}) failed: {}", job.job_id, job.path, e);
                }
                let message = e.to_string();
                settle(
                    &job,
                    with_backoff(&self.retry, "fail", || {
                        self.queue.fail(&job, &message, requeue)
                    }),
                )?;
                Ok(Some(JobOutcome::Failed {
                    job_id: job.job_id,
                    error: message,
                    requeued: requeue,
                }))
            }
        }
    }

    /// Drive one job to `Done`. Safe to call again for the same file: an
    /// already linked record short-circuits, an unlinked one resumes linking.
    pub fn process_job(&self, job: &IngestJob) -> Result<JobOutcome, Error> {
        if self.extraction.unpack_archives {
            if let Some(format) = ArchiveFormat::detect(&job.path) {
                return self.process_archive(job, format);
            }
        }

        let data = fs::read(&job.path)
            .map_err(|e| Error::Input(format!("cannot read {}: {}", job.path, e)))?;
        self.ingest_content(job, &job.path, &data)
    }

    /// Ingest every member of an archive, then track the extraction.
    /// Redelivery re-walks the archive; finished members come back as
    /// duplicates.
    fn process_archive(&self, job: &IngestJob, format: ArchiveFormat) -> Result<JobOutcome, Error> {
        let size_on_disk = fs::metadata(&job.path)
            .map_err(|e| Error::Input(format!("cannot read {}: {}", job.path, e)))?
            .len();

        let mut indexed = 0;
        let mut duplicates = 0;
        let summary = extraction::unpack(
            Path::new(&job.path),
            format,
            self.extraction.max_member_bytes,
            |member, data| {
                let path = member_path(&job.path, member);
                match self.ingest_content(job, &path, &data)? {
                    JobOutcome::Duplicate { .. } => duplicates += 1,
                    _ => indexed += 1,
                }
                Ok(())
            },
        )?;

        let extraction = Extraction {
            path: job.path.clone(),
            kind: format.kind(),
            size_on_disk,
            files: summary.files as u64,
            tracked_at: chrono::Utc::now().to_rfc3339(),
        };
        with_backoff(&self.retry, "track_extraction", || {
            self.index.track_extraction(&extraction)
        })?;
        info!(
            "Job {}: unpacked {} ({} members, {} new, {} already ingested)",
            job.job_id, job.path, summary.files, indexed, duplicates
        );

        Ok(JobOutcome::Extracted {
            path: job.path.clone(),
            members: summary.files,
            indexed,
            duplicates,
        })
    }

    /// Hash, score, store and link one piece of content found at `path`.
    fn ingest_content(&self, job: &IngestJob, path: &str, data: &[u8]) -> Result<JobOutcome, Error> {
        let mut state = JobState::Received;

        let record_id = content_id(data);
        self.advance(job, &mut state, JobState::Hashed);

        let existing = with_backoff(&self.retry, "get_record", || {
            self.index.get_record(&record_id)
        })?;
        let record = match existing {
            Some(record) if record.linked => {
                debug!("Job {}: {} already ingested", job.job_id, record_id);
                self.advance(job, &mut state, JobState::Done);
                return Ok(JobOutcome::Duplicate { record_id });
            }
            Some(record) => {
                info!("Job {}: resuming linking of {}", job.job_id, record_id);
                record
            }
            None => Record::new(record_id.clone(), path.to_string(), compute_signature(data)),
        };

        let matches = self.score_candidates(&record)?;
        self.advance(job, &mut state, JobState::Scored);

        let inserted = with_backoff(&self.retry, "index_record", || {
            self.index.index_record(&record)
        })?;
        if !inserted {
            debug!("Job {}: record {} already stored", job.job_id, record_id);
        }
        self.advance(job, &mut state, JobState::Stored);

        // Records stored while this job was scoring are only visible now.
        let mut links = matches;
        for late in self.score_candidates(&record)? {
            merge_link(&mut links, late, self.similarity.top_k);
        }
        links.retain(|l| l.score >= self.similarity.threshold);
        for link in &links {
            let back = Link {
                record_id: record_id.clone(),
                score: link.score,
            };
            self.link_into(&link.record_id, &[back])?;
        }
        self.link_into(&record_id, &links)?;
        with_backoff(&self.retry, "mark_linked", || {
            self.index.mark_linked(&record_id)
        })?;
        self.advance(job, &mut state, JobState::Linked);

        self.advance(job, &mut state, JobState::Done);
        Ok(JobOutcome::Indexed {
            record_id,
            links: links.len(),
        })
    }

    /// Score retrieved candidates against `record`, best first, bounded to top-K.
    fn score_candidates(&self, record: &Record) -> Result<Vec<Link>, Error> {
        let candidates = with_backoff(&self.retry, "find_candidates", || {
            self.index
                .find_candidates(&record.signature, self.similarity.max_candidates)
        })?;

        let mut scored: Vec<Link> = candidates
            .into_iter()
            .filter(|c| c.record_id != record.id)
            .map(|c| Link {
                score: score(&record.signature, &c.signature),
                record_id: c.record_id,
            })
            .filter(|l| l.score > 0)
            .collect();
        sort_links(&mut scored);
        scored.truncate(self.similarity.top_k);
        Ok(scored)
    }

    /// Merge `links` into `target`'s `similar_to` with compare-and-set,
    /// retrying on version conflicts up to the configured bound.
    fn link_into(&self, target: &str, links: &[Link]) -> Result<(), Error> {
        for attempt in 0..=self.retry.conflict_retries {
            let record = with_backoff(&self.retry, "get_record", || self.index.get_record(target))?
                .ok_or_else(|| Error::Other(format!("record {} missing while linking", target)))?;

            let mut similar_to = record.similar_to;
            let mut changed = false;
            for link in links {
                changed |= merge_link(&mut similar_to, link.clone(), self.similarity.top_k);
            }
            if !changed {
                return Ok(());
            }

            match with_backoff(&self.retry, "update_links", || {
                self.index.update_links(target, record.version, &similar_to)
            }) {
                Ok(()) => return Ok(()),
                Err(Error::Conflict { .. }) => {
                    debug!("Conflict linking into {} (attempt {})", target, attempt + 1);
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict {
            record_id: target.to_string(),
        })
    }

    fn advance(&self, job: &IngestJob, state: &mut JobState, next: JobState) {
        debug!("Job {}: {:?} -> {:?}", job.job_id, state, next);
        *state = next;
    }
}

/// A lost lease means a later delivery owns the job and settles it.
fn settle(job: &IngestJob, result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(Error::LeaseLost { .. }) => {
            warn!(
                "Job {} ({}) lease expired during delivery {}; leaving it to the current holder",
                job.job_id, job.path, job.attempt
            );
            Ok(())
        }
        other => other,
    }
}
