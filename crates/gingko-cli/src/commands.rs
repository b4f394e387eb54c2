use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "gingko")]
#[command(about = "Fuzzy-hash similarity ingest and query service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Walk configured paths and queue new or changed files
    Enqueue,
    /// Run ingest workers against the queue
    Work {
        /// Exit once the queue is empty instead of polling
        #[arg(long)]
        drain: bool,
    },
    /// Enqueue configured paths, then work the queue until it drains
    Ingest,
    /// Serve the similarity query API
    Serve {
        /// Listen address, overriding the configured one
        #[arg(long)]
        bind: Option<String>,
    },
    /// Find records similar to a file or a signature
    Query {
        /// Signature text, `block_size:digest_a:digest_b`
        signature: Option<String>,
        /// File to hash and query with
        #[arg(long, conflicts_with = "signature")]
        file: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print the fuzzy signature of a file
    Hash { file: PathBuf },
    /// List stored records, newest first
    Records {
        /// Only records whose path starts with this; `<archive>!/` lists members
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// List unpacked archives
    Extractions {
        #[arg(long)]
        path: Option<String>,
        /// `tar` or `zip`
        #[arg(long = "type")]
        kind: Option<String>,
    },
    /// Recompute clusters from current links and list them
    Clusters,
    /// Show ingest queue counts
    QueueStats,
    /// Print configuration values
    PrintConfig,
    /// Truncate all database tables
    TruncateDb,
}
