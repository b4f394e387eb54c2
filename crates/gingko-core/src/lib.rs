pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod index;
pub mod progress;
pub mod query;
pub mod retry;
pub mod scanner;
pub mod signature;
pub mod storage;
pub mod worker;

pub use config::AppConfig;
pub use engine::{EnqueueResult, IngestEngine, WorkResult};
pub use error::Error;
pub use progress::{IngestReporter, SilentReporter};
pub use query::{QueryMatch, QueryService};
pub use signature::{compute_signature, score, FileSignature};
pub use worker::{IngestWorker, JobOutcome};
