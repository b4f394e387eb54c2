use crate::cluster::ClusterCache;
use crate::config::SimilaritySettings;
use crate::error::Error;
use crate::index::SignatureIndex;
use crate::signature::{compute_signature, score, FileSignature};
use crate::storage::models::Record;
use serde::Serialize;
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryMatch {
    pub record_id: String,
    pub path: String,
    pub score: u32,
}

/// Read-only similarity lookups: candidate retrieval, then exact scoring.
pub struct QueryService<'a> {
    index: &'a dyn SignatureIndex,
    clusters: &'a Mutex<ClusterCache>,
    max_candidates: usize,
}

impl<'a> QueryService<'a> {
    pub fn new(
        index: &'a dyn SignatureIndex,
        clusters: &'a Mutex<ClusterCache>,
        settings: &SimilaritySettings,
    ) -> Self {
        Self {
            index,
            clusters,
            max_candidates: settings.max_candidates,
        }
    }

    pub fn query_bytes(&self, data: &[u8], limit: usize) -> Result<Vec<QueryMatch>, Error> {
        self.query_signature(&compute_signature(data), limit)
    }

    /// Parse the `block_size:digest_a:digest_b` form and query with it.
    pub fn query_text(&self, text: &str, limit: usize) -> Result<Vec<QueryMatch>, Error> {
        let signature: FileSignature = text.parse()?;
        self.query_signature(&signature, limit)
    }

    /// Matches with a positive score, best first (record id breaks ties),
    /// at most `limit`.
    pub fn query_signature(
        &self,
        signature: &FileSignature,
        limit: usize,
    ) -> Result<Vec<QueryMatch>, Error> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let candidates = self
            .index
            .find_candidates(signature, self.max_candidates.max(limit))?;
        let retrieved = candidates.len();

        let mut matches: Vec<QueryMatch> = candidates
            .into_iter()
            .map(|c| QueryMatch {
                score: score(signature, &c.signature),
                record_id: c.record_id,
                path: c.path,
            })
            .filter(|m| m.score > 0)
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        matches.truncate(limit);

        debug!(
            "Query {}: {} candidates, {} matches",
            signature,
            retrieved,
            matches.len()
        );
        Ok(matches)
    }

    /// Fetch a record with its current cluster id filled in.
    pub fn get_record(&self, id: &str) -> Result<Option<Record>, Error> {
        let Some(mut record) = self.index.get_record(id)? else {
            return Ok(None);
        };
        let view = self
            .clusters
            .lock()
            .map_err(|_| Error::Other("cluster cache lock poisoned".to_string()))?
            .view(self.index)?;
        record.cluster_id = view.cluster_id(id).map(str::to_string);
        Ok(Some(record))
    }
}
