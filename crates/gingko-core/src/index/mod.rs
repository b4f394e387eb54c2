//! Capability seams between the pipeline and its external collaborators.
//!
//! The worker and query service only talk to the store and queue through
//! these traits; `storage::Database` implements both on SQLite.

pub mod shingle;

use crate::error::Error;
use crate::extraction::Extraction;
use crate::signature::FileSignature;
use crate::storage::models::{Candidate, IngestJob, Link, Record};
use std::time::Duration;

pub use shingle::{signature_tokens, SHINGLE_LEN};

/// Document store holding records and their shingle tokens.
pub trait SignatureIndex {
    /// Write a record with its token set. Returns `false` if the id already
    /// existed, in which case nothing is changed.
    fn index_record(&self, record: &Record) -> Result<bool, Error>;

    fn get_record(&self, id: &str) -> Result<Option<Record>, Error>;

    /// Records sharing at least one token with `signature`, ranked by
    /// overlap count (then id), at most `max_candidates`.
    fn find_candidates(
        &self,
        signature: &FileSignature,
        max_candidates: usize,
    ) -> Result<Vec<Candidate>, Error>;

    /// Compare-and-set of a record's `similar_to`. Fails with
    /// `Error::Conflict` when `expected_version` is stale.
    fn update_links(&self, id: &str, expected_version: i64, links: &[Link]) -> Result<(), Error>;

    fn mark_linked(&self, id: &str) -> Result<(), Error>;

    /// Every `similar_to` edge with `score >= min_score`, as `(from, to, score)`.
    fn link_edges(&self, min_score: u32) -> Result<Vec<(String, String, u32)>, Error>;

    /// Monotonic counter bumped by every record insert and link update.
    fn link_generation(&self) -> Result<i64, Error>;

    /// Record (or refresh) an unpacked archive.
    fn track_extraction(&self, extraction: &Extraction) -> Result<(), Error>;
}

/// At-least-once ingest queue.
pub trait JobQueue {
    /// Returns `false` when the same `(path, stamp)` was already queued.
    fn enqueue(&self, path: &str, stamp: &str) -> Result<bool, Error>;

    /// Lease the oldest available job for `lease`. Jobs whose lease expired
    /// are delivered again.
    fn dequeue(&self, lease: Duration) -> Result<Option<IngestJob>, Error>;

    /// Mark the job done. Fails with `Error::LeaseLost` when `job` is not
    /// the delivery currently holding the lease.
    fn ack(&self, job: &IngestJob) -> Result<(), Error>;

    /// Record a failure; `requeue` makes the job available again. Same
    /// lease check as `ack`.
    fn fail(&self, job: &IngestJob, error: &str, requeue: bool) -> Result<(), Error>;
}

/// Insert `link` into a bounded, score-ordered link list.
///
/// An existing entry for the same record keeps the higher score. When the
/// list is full the lowest entry is evicted, unless the new link scores no
/// higher than it. Returns whether the list changed.
pub fn merge_link(links: &mut Vec<Link>, link: Link, top_k: usize) -> bool {
    if top_k == 0 {
        return false;
    }

    if let Some(existing) = links.iter_mut().find(|l| l.record_id == link.record_id) {
        if existing.score >= link.score {
            return false;
        }
        existing.score = link.score;
    } else {
        if links.len() >= top_k {
            let lowest = links.iter().map(|l| l.score).min().unwrap_or(0);
            if link.score <= lowest {
                return false;
            }
        }
        links.push(link);
    }

    sort_links(links);
    links.truncate(top_k);
    true
}

/// Score descending, record id ascending on ties.
pub fn sort_links(links: &mut [Link]) {
    links.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(id: &str, score: u32) -> Link {
        Link {
            record_id: id.to_string(),
            score,
        }
    }

    #[test]
    fn test_merge_keeps_order() {
        let mut links = Vec::new();
        assert!(merge_link(&mut links, link("b", 70), 3));
        assert!(merge_link(&mut links, link("a", 90), 3));
        assert!(merge_link(&mut links, link("c", 70), 3));
        assert_eq!(links, vec![link("a", 90), link("b", 70), link("c", 70)]);
    }

    #[test]
    fn test_merge_evicts_lowest_when_full() {
        let mut links = vec![link("a", 90), link("b", 70), link("c", 60)];
        assert!(merge_link(&mut links, link("d", 80), 3));
        assert_eq!(links, vec![link("a", 90), link("d", 80), link("b", 70)]);
    }

    #[test]
    fn test_merge_rejects_low_score_when_full() {
        let mut links = vec![link("a", 90), link("b", 70), link("c", 60)];
        assert!(!merge_link(&mut links, link("d", 60), 3));
        assert_eq!(links.len(), 3);
    }

    #[test]
    fn test_merge_existing_is_idempotent() {
        let mut links = vec![link("a", 90)];
        assert!(!merge_link(&mut links, link("a", 90), 3));
        assert!(!merge_link(&mut links, link("a", 50), 3));
        assert!(merge_link(&mut links, link("a", 95), 3));
        assert_eq!(links, vec![link("a", 95)]);
    }
}
