use super::models::{IngestJob, QueueStats};
use super::sqlite::Database;
use crate::error::Error;
use crate::index::JobQueue;
use rusqlite::{params, OptionalExtension};
use std::time::Duration;
use tracing::{debug, warn};

const STATUS_PENDING: &str = "pending";
const STATUS_LEASED: &str = "leased";
const STATUS_DONE: &str = "done";
const STATUS_FAILED: &str = "failed";

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Database {
    pub fn queue_stats(&self) -> Result<QueueStats, Error> {
        let mut stmt = self
            .connection()
            .prepare("SELECT status, COUNT(*) FROM ingest_job GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match status.as_str() {
                STATUS_PENDING => stats.pending = count,
                STATUS_LEASED => stats.leased = count,
                STATUS_DONE => stats.done = count,
                STATUS_FAILED => stats.failed = count,
                other => warn!("Unknown job status '{}' ({} jobs)", other, count),
            }
        }
        Ok(stats)
    }
}

impl JobQueue for Database {
    fn enqueue(&self, path: &str, stamp: &str) -> Result<bool, Error> {
        let inserted = self.connection().execute(
            "INSERT OR IGNORE INTO ingest_job (path, source_stamp, enqueued_at, status) \
             VALUES (?1, ?2, ?3, ?4)",
            params![path, stamp, chrono::Utc::now().to_rfc3339(), STATUS_PENDING],
        )?;
        if inserted == 0 {
            debug!("Already queued: {} ({})", path, stamp);
        }
        Ok(inserted > 0)
    }

    fn dequeue(&self, lease: Duration) -> Result<Option<IngestJob>, Error> {
        let now = now_millis();
        let expires = now + lease.as_millis() as i64;

        // Select-and-lease in one statement so two workers never take the same job.
        let job = self
            .connection()
            .query_row(
                "UPDATE ingest_job \
                 SET status = ?1, attempts = attempts + 1, lease_expires_at = ?2 \
                 WHERE id = ( \
                     SELECT id FROM ingest_job \
                     WHERE status = ?3 OR (status = ?1 AND lease_expires_at <= ?4) \
                     ORDER BY id LIMIT 1) \
                 RETURNING id, path, enqueued_at, attempts",
                params![STATUS_LEASED, expires, STATUS_PENDING, now],
                |row| {
                    let attempts: i64 = row.get(3)?;
                    Ok(IngestJob {
                        job_id: row.get(0)?,
                        path: row.get(1)?,
                        enqueued_at: row.get(2)?,
                        attempt: attempts as u32,
                    })
                },
            )
            .optional()?;

        if let Some(job) = &job {
            debug!(
                "Leased job {} ({}), delivery {}",
                job.job_id, job.path, job.attempt
            );
        }
        Ok(job)
    }

    fn ack(&self, job: &IngestJob) -> Result<(), Error> {
        let updated = self.connection().execute(
            "UPDATE ingest_job SET status = ?1, lease_expires_at = NULL, last_error = NULL \
             WHERE id = ?2 AND status = ?3 AND attempts = ?4",
            params![STATUS_DONE, job.job_id, STATUS_LEASED, job.attempt],
        )?;
        if updated == 0 {
            return Err(Error::LeaseLost { job_id: job.job_id });
        }
        Ok(())
    }

    fn fail(&self, job: &IngestJob, error: &str, requeue: bool) -> Result<(), Error> {
        let status = if requeue { STATUS_PENDING } else { STATUS_FAILED };
        let updated = self.connection().execute(
            "UPDATE ingest_job SET status = ?1, lease_expires_at = NULL, last_error = ?2 \
             WHERE id = ?3 AND status = ?4 AND attempts = ?5",
            params![status, error, job.job_id, STATUS_LEASED, job.attempt],
        )?;
        if updated == 0 {
            return Err(Error::LeaseLost { job_id: job.job_id });
        }
        debug!("Job {} marked {}: {}", job.job_id, status, error);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_dedups_on_stamp() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.enqueue("/a", "10:1").unwrap());
        assert!(!db.enqueue("/a", "10:1").unwrap());
        assert!(db.enqueue("/a", "11:2").unwrap());
        assert_eq!(db.queue_stats().unwrap().pending, 2);
    }

    #[test]
    fn test_dequeue_is_fifo_and_exclusive() {
        let db = Database::open_in_memory().unwrap();
        db.enqueue("/first", "s").unwrap();
        db.enqueue("/second", "s").unwrap();

        let lease = Duration::from_secs(60);
        let a = db.dequeue(lease).unwrap().unwrap();
        let b = db.dequeue(lease).unwrap().unwrap();
        assert_eq!(a.path, "/first");
        assert_eq!(b.path, "/second");
        assert_eq!(a.attempt, 1);
        assert!(db.dequeue(lease).unwrap().is_none());
    }

    #[test]
    fn test_expired_lease_is_redelivered() {
        let db = Database::open_in_memory().unwrap();
        db.enqueue("/a", "s").unwrap();

        let first = db.dequeue(Duration::ZERO).unwrap().unwrap();
        let second = db.dequeue(Duration::from_secs(60)).unwrap().unwrap();
        assert_eq!(first.job_id, second.job_id);
        assert_eq!(second.attempt, 2);
    }

    #[test]
    fn test_ack_and_fail() {
        let db = Database::open_in_memory().unwrap();
        db.enqueue("/a", "s").unwrap();
        db.enqueue("/b", "s").unwrap();
        db.enqueue("/c", "s").unwrap();
        let lease = Duration::from_secs(60);

        let a = db.dequeue(lease).unwrap().unwrap();
        let b = db.dequeue(lease).unwrap().unwrap();
        let c = db.dequeue(lease).unwrap().unwrap();
        db.ack(&a).unwrap();
        db.fail(&b, "unreadable", false).unwrap();
        db.fail(&c, "busy", true).unwrap();

        let stats = db.queue_stats().unwrap();
        assert_eq!(
            stats,
            QueueStats {
                pending: 1,
                leased: 0,
                done: 1,
                failed: 1
            }
        );

        let again = db.dequeue(lease).unwrap().unwrap();
        assert_eq!(again.path, "/c");
        assert_eq!(again.attempt, 2);
    }

    #[test]
    fn test_stale_delivery_cannot_settle_job() {
        let db = Database::open_in_memory().unwrap();
        db.enqueue("/a", "s").unwrap();

        let stale = db.dequeue(Duration::ZERO).unwrap().unwrap();
        let live = db.dequeue(Duration::from_secs(60)).unwrap().unwrap();
        assert_eq!(stale.job_id, live.job_id);

        assert!(matches!(
            db.fail(&stale, "busy", true),
            Err(Error::LeaseLost { .. })
        ));
        assert!(matches!(db.ack(&stale), Err(Error::LeaseLost { .. })));
        // The live holder keeps the job.
        assert!(db.dequeue(Duration::from_secs(60)).unwrap().is_none());
        assert_eq!(db.queue_stats().unwrap().leased, 1);

        db.ack(&live).unwrap();
        assert_eq!(db.queue_stats().unwrap().done, 1);
        assert!(matches!(db.ack(&live), Err(Error::LeaseLost { .. })));
    }
}
