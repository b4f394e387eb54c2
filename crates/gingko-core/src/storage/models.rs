use crate::signature::FileSignature;
use serde::{Deserialize, Serialize};

/// One ingested file, keyed by its content digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub path: String,
    pub ingest_time: String,
    pub signature: FileSignature,
    pub cluster_id: Option<String>,
    /// Highest score first, bounded to the configured top-K.
    pub similar_to: Vec<Link>,
    /// Bumped on every `similar_to` update; used for compare-and-set.
    pub version: i64,
    /// Set once both directions of linking have completed.
    pub linked: bool,
}

impl Record {
    pub fn new(id: String, path: String, signature: FileSignature) -> Self {
        Self {
            id,
            path,
            ingest_time: chrono::Utc::now().to_rfc3339(),
            signature,
            cluster_id: None,
            similar_to: Vec::new(),
            version: 0,
            linked: false,
        }
    }
}

/// A scored edge from one record to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub record_id: String,
    pub score: u32,
}

/// A record retrieved by token overlap, before exact scoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub record_id: String,
    pub path: String,
    pub signature: FileSignature,
    pub overlap: u32,
}

/// A leased queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestJob {
    pub job_id: i64,
    pub path: String,
    pub enqueued_at: String,
    /// Delivery count, including this one.
    pub attempt: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub leased: i64,
    pub done: i64,
    pub failed: i64,
}
