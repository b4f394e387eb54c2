use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Unreadable input file or malformed signature. Never retried.
    #[error("Input error: {0}")]
    Input(String),

    /// Store busy, locked or past its timeout. Retried with backoff.
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Optimistic update lost against a concurrent writer.
    #[error("Version conflict updating record {record_id}")]
    Conflict { record_id: String },

    /// The job's lease expired and another delivery now holds it.
    #[error("Lease on job {job_id} was lost to a later delivery")]
    LeaseLost { job_id: i64 },

    #[error("Store error: {0}")]
    Store(rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientStore(_))
    }

    /// Whether a job failing with this error may be delivered again.
    pub fn is_requeue_eligible(&self) -> bool {
        matches!(self, Error::TransientStore(_) | Error::Conflict { .. })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                Error::TransientStore(err.to_string())
            }
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::CannotOpen => {
                Error::TransientStore(err.to_string())
            }
            _ => Error::Store(err),
        }
    }
}
