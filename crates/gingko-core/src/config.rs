use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Monitored roots the producer walks for new files.
    pub root_paths: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub db_path: String,
    pub similarity: SimilaritySettings,
    pub worker: WorkerSettings,
    pub retry: RetrySettings,
    pub store: StoreSettings,
    pub server: ServerSettings,
    pub extraction: ExtractionSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimilaritySettings {
    /// Minimum score for two records to be linked.
    pub threshold: u32,
    /// Bound on each record's `similar_to` list.
    pub top_k: usize,
    pub max_candidates: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub workers: usize,
    /// Visibility timeout of a dequeued job before it is redelivered.
    pub lease_secs: u64,
    pub max_deliveries: u32,
    pub idle_poll_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub conflict_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Ingest the members of `.tar`, `.tar.gz`/`.tgz` and `.zip` files
    /// instead of the archive bytes.
    pub unpack_archives: bool,
    pub max_member_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root_paths: Vec::new(),
            ignore_patterns: Vec::new(),
            db_path: "gingko.db".to_string(),
            similarity: SimilaritySettings::default(),
            worker: WorkerSettings::default(),
            retry: RetrySettings::default(),
            store: StoreSettings::default(),
            server: ServerSettings::default(),
            extraction: ExtractionSettings::default(),
        }
    }
}

impl Default for SimilaritySettings {
    fn default() -> Self {
        Self {
            threshold: 50,
            top_k: 16,
            max_candidates: 64,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            lease_secs: 300,
            max_deliveries: 5,
            idle_poll_ms: 1000,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            conflict_retries: 8,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            unpack_archives: true,
            max_member_bytes: 256 * 1024 * 1024,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl StoreSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Load `Config.toml` (optional), then `GINGKO_*` environment overrides.
///
/// Nested keys use a double underscore: `GINGKO_SIMILARITY__THRESHOLD=70`.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("GINGKO")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("root_paths")
                .with_list_parse_key("ignore_patterns")
                .try_parsing(true),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);

        if result.iter().any(|kept| dir_path.starts_with(Path::new(kept))) {
            continue;
        }
        result.retain(|kept| !Path::new(kept).starts_with(dir_path));
        result.push(dir);
    }

    result
}
