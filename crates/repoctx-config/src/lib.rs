//! Centralized configuration management for repoctx
//!
//! Configuration follows a simple hierarchy:
//! 1. Safe defaults (defined as constants)
//! 2. Optional TOML/YAML file (see [`source`])
//! 3. Environment variable overrides
//! 4. Runtime validation
//!
//! Every section exposes `from_env()` (defaults + environment) and
//! `with_env_overrides()` (an existing value + environment), and implements
//! [`validation::Validate`].

pub mod error;
pub mod source;
pub mod validation;

pub use error::{ConfigError, ConfigResult};

use repoctx_common::Backoff;
use serde::{Deserialize, Serialize};
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// SAFE DEFAULTS - Work for any environment (dev, staging, prod, test)
// =============================================================================

// Worker pool
const DEFAULT_WORKER_CONCURRENCY: usize = 2;
const MAX_WORKER_CONCURRENCY: usize = 11;
const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 60;
const DEFAULT_FETCH_STAGE_TIMEOUT_SECONDS: u64 = 600;
const DEFAULT_EMBED_STAGE_TIMEOUT_SECONDS: u64 = 900;
const DEFAULT_STORE_STAGE_TIMEOUT_SECONDS: u64 = 120;
const DEFAULT_CALLBACK_TIMEOUT_SECONDS: u64 = 10;

// Queue
const DEFAULT_QUEUE_BATCH_SIZE: usize = 10;
const DEFAULT_QUEUE_POLLING_INTERVAL_SECONDS: u64 = 5;
const DEFAULT_JOB_TIMEOUT_MINUTES: u64 = 30;
const DEFAULT_CLAIM_BACKOFF_CAP_SECONDS: u64 = 60;

// Retry policy
const DEFAULT_MAX_JOB_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_BASE_SECONDS: u64 = 30;
const DEFAULT_RETRY_BACKOFF_CAP_SECONDS: u64 = 900;

// Chunking (character based splitter)
const DEFAULT_CHUNK_SIZE: usize = 700;
const DEFAULT_CHUNK_OVERLAP: usize = 200;

// Embedding provider
const DEFAULT_EMBEDDING_MODEL: &str = "togethercomputer/m2-bert-80M-32k-retrieval";
const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
const DEFAULT_EMBEDDING_API_URL: &str = "https://api.together.xyz/v1";
const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 32;
const DEFAULT_EMBEDDING_MAX_RETRIES: u32 = 3;
const DEFAULT_EMBEDDING_RETRY_BASE_MS: u64 = 500;
const DEFAULT_EMBEDDING_RETRY_CAP_MS: u64 = 8_000;
const DEFAULT_EMBEDDING_REQUEST_TIMEOUT_SECONDS: u64 = 60;

// Repository fetching
const DEFAULT_FETCH_WORK_DIR: &str = "repoctx-work";
const DEFAULT_FETCH_MAX_FILE_BYTES: u64 = 1024 * 1024;
const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_GITHUB_WEB_URL: &str = "https://github.com";
const DEFAULT_GITLAB_URL: &str = "https://gitlab.com";
const DEFAULT_SKIP_UNCHANGED_COMMITS: bool = true;
const DEFAULT_INCLUDE_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "ts", "tsx", "java", "kt", "go", "rs", "c", "h", "cpp", "hpp", "cc", "cs",
    "rb", "php", "swift", "scala", "sql", "sh", "toml", "md", "txt", "lock", "cfg", "yml", "yaml",
    "json", "conf", "ini", "gradle",
];

// Database Configuration (safe local defaults)
const DEFAULT_DB_HOST: &str = "localhost";
const DEFAULT_DB_PORT: u16 = 5432;
const DEFAULT_DB_NAME: &str = "repoctx";
const DEFAULT_DB_USER: &str = "repoctx";
const DEFAULT_DB_PASSWORD: &str = "localdev123";
const DEFAULT_DB_SSL_MODE: &str = "disable";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DB_MIN_CONNECTIONS: u32 = 2;
const DEFAULT_DB_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_DB_IDLE_TIMEOUT_SECONDS: u64 = 300;
const DEFAULT_AUTO_MIGRATE: bool = true;

// Telemetry
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_JSON: bool = true;

/// Read the first set variable among `keys` and parse it
fn env_parse<T: FromStr>(keys: &[&str]) -> Option<T> {
    keys.iter()
        .find_map(|key| std::env::var(key).ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Read the first set, non-empty variable among `keys`
fn env_string(keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| std::env::var(key).ok())
        .filter(|s| !s.trim().is_empty())
}

/// Top-level configuration for the repoctx worker process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub fetch: FetchConfig,
    pub database: DatabaseConfig,
    pub telemetry: TelemetryConfig,
}

impl ApplicationConfig {
    /// Build the full configuration from defaults and environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides on top of an existing configuration
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        Self {
            worker: self.worker.with_env_overrides(),
            queue: self.queue.with_env_overrides(),
            retry: self.retry.with_env_overrides(),
            chunking: self.chunking.with_env_overrides(),
            embedding: self.embedding.with_env_overrides(),
            fetch: self.fetch.with_env_overrides(),
            database: self.database.with_env_overrides(),
            telemetry: self.telemetry.with_env_overrides(),
        }
    }
}

impl validation::Validate for ApplicationConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.worker.validate()?;
        self.queue.validate()?;
        self.retry.validate()?;
        self.chunking.validate()?;
        self.embedding.validate()?;
        self.fetch.validate()?;
        self.database.validate()?;
        self.telemetry.validate()?;

        // A lease shorter than one polling cycle would expire before the heartbeat runs
        if self.queue.lease_duration() <= self.queue.polling_interval() {
            return Err(ConfigError::Inconsistent {
                message: format!(
                    "Job timeout ({} min) must exceed the polling interval ({} s)",
                    self.queue.job_timeout_minutes, self.queue.polling_interval_seconds
                ),
            });
        }

        Ok(())
    }
}

/// Worker pool sizing, shutdown and per-stage deadlines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of independent polling slots
    pub concurrency: usize,

    /// How long `stop()` waits for in-flight jobs before abandoning slots
    pub shutdown_timeout_seconds: u64,

    /// Deadline for the fetch stage (clone + enumerate)
    pub fetch_timeout_seconds: u64,

    /// Deadline for the whole embedding stage of one job
    pub embed_timeout_seconds: u64,

    /// Deadline for the context replace transaction
    pub store_timeout_seconds: u64,

    /// Request timeout for a job's completion callback
    pub callback_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_WORKER_CONCURRENCY,
            shutdown_timeout_seconds: DEFAULT_SHUTDOWN_TIMEOUT_SECONDS,
            fetch_timeout_seconds: DEFAULT_FETCH_STAGE_TIMEOUT_SECONDS,
            embed_timeout_seconds: DEFAULT_EMBED_STAGE_TIMEOUT_SECONDS,
            store_timeout_seconds: DEFAULT_STORE_STAGE_TIMEOUT_SECONDS,
            callback_timeout_seconds: DEFAULT_CALLBACK_TIMEOUT_SECONDS,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        Self {
            concurrency: env_parse(&["WORKER_CONCURRENCY"]).unwrap_or(self.concurrency),
            shutdown_timeout_seconds: env_parse(&["WORKER_SHUTDOWN_TIMEOUT_SECONDS"])
                .unwrap_or(self.shutdown_timeout_seconds),
            fetch_timeout_seconds: env_parse(&["FETCH_TIMEOUT_SECONDS", "WORKER_FETCH_TIMEOUT_SECONDS"])
                .unwrap_or(self.fetch_timeout_seconds),
            embed_timeout_seconds: env_parse(&["WORKER_EMBED_TIMEOUT_SECONDS"])
                .unwrap_or(self.embed_timeout_seconds),
            store_timeout_seconds: env_parse(&["WORKER_STORE_TIMEOUT_SECONDS"])
                .unwrap_or(self.store_timeout_seconds),
            callback_timeout_seconds: env_parse(&["WORKER_CALLBACK_TIMEOUT_SECONDS"])
                .unwrap_or(self.callback_timeout_seconds),
        }
    }

    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub const fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_seconds)
    }
}

impl validation::Validate for WorkerConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(
            self.concurrency as u64,
            1,
            MAX_WORKER_CONCURRENCY as u64,
            "worker.concurrency",
        )?;
        validation::validate_range(
            self.shutdown_timeout_seconds,
            1,
            3600,
            "worker.shutdown_timeout_seconds",
        )?;
        validation::validate_range(
            self.fetch_timeout_seconds,
            1,
            7200,
            "worker.fetch_timeout_seconds",
        )?;
        validation::validate_range(
            self.embed_timeout_seconds,
            1,
            7200,
            "worker.embed_timeout_seconds",
        )?;
        validation::validate_range(
            self.store_timeout_seconds,
            1,
            3600,
            "worker.store_timeout_seconds",
        )?;
        validation::validate_range(
            self.callback_timeout_seconds,
            1,
            300,
            "worker.callback_timeout_seconds",
        )?;
        Ok(())
    }
}

/// Which queue implementation the binary wires up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// `PostgreSQL` table with `FOR UPDATE SKIP LOCKED` leasing
    #[default]
    Postgres,
    /// Process-local queue (single worker process, no durability)
    Memory,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(format!("Unknown queue backend: {other}")),
        }
    }
}

/// Queue polling and lease configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,

    /// Maximum rows written per transaction when producers enqueue in bulk
    pub batch_size: usize,

    /// Idle sleep between claims for one slot
    pub polling_interval_seconds: u64,

    /// Lease duration granted to a claimed job
    pub job_timeout_minutes: u64,

    /// Upper bound of the backoff applied after consecutive claim failures
    pub claim_backoff_cap_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            batch_size: DEFAULT_QUEUE_BATCH_SIZE,
            polling_interval_seconds: DEFAULT_QUEUE_POLLING_INTERVAL_SECONDS,
            job_timeout_minutes: DEFAULT_JOB_TIMEOUT_MINUTES,
            claim_backoff_cap_seconds: DEFAULT_CLAIM_BACKOFF_CAP_SECONDS,
        }
    }
}

impl QueueConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        Self {
            backend: env_parse(&["QUEUE_BACKEND"]).unwrap_or(self.backend),
            batch_size: env_parse(&["QUEUE_BATCH_SIZE"]).unwrap_or(self.batch_size),
            polling_interval_seconds: env_parse(&["QUEUE_POLLING_INTERVAL_SECONDS"])
                .unwrap_or(self.polling_interval_seconds),
            job_timeout_minutes: env_parse(&["JOB_TIMEOUT_MINUTES"])
                .unwrap_or(self.job_timeout_minutes),
            claim_backoff_cap_seconds: env_parse(&["QUEUE_CLAIM_BACKOFF_CAP_SECONDS"])
                .unwrap_or(self.claim_backoff_cap_seconds),
        }
    }

    pub const fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_seconds)
    }

    pub const fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.job_timeout_minutes.saturating_mul(60))
    }

    /// Backoff applied between failed claim attempts
    pub fn claim_backoff(&self) -> Backoff {
        Backoff::new(
            self.polling_interval(),
            Duration::from_secs(self.claim_backoff_cap_seconds),
        )
    }
}

impl validation::Validate for QueueConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(self.batch_size as u64, 1, 1000, "queue.batch_size")?;
        validation::validate_range(
            self.polling_interval_seconds,
            1,
            3600,
            "queue.polling_interval_seconds",
        )?;
        validation::validate_range(
            self.job_timeout_minutes,
            1,
            24 * 60,
            "queue.job_timeout_minutes",
        )?;
        validation::validate_range(
            self.claim_backoff_cap_seconds,
            1,
            3600,
            "queue.claim_backoff_cap_seconds",
        )?;
        Ok(())
    }
}

/// Cross-attempt retry policy (redelivery through the queue)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Deliveries allowed before a retryable failure is dead-lettered
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_cap_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_JOB_ATTEMPTS,
            backoff_base_seconds: DEFAULT_RETRY_BACKOFF_BASE_SECONDS,
            backoff_cap_seconds: DEFAULT_RETRY_BACKOFF_CAP_SECONDS,
        }
    }
}

impl RetryConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        Self {
            max_attempts: env_parse(&["MAX_JOB_ATTEMPTS", "MAX_RETRIES"])
                .unwrap_or(self.max_attempts),
            backoff_base_seconds: env_parse(&["RETRY_BACKOFF_BASE_SECONDS"])
                .unwrap_or(self.backoff_base_seconds),
            backoff_cap_seconds: env_parse(&["RETRY_BACKOFF_CAP_SECONDS"])
                .unwrap_or(self.backoff_cap_seconds),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_secs(self.backoff_base_seconds),
            Duration::from_secs(self.backoff_cap_seconds),
        )
    }
}

impl validation::Validate for RetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(u64::from(self.max_attempts), 1, 100, "retry.max_attempts")?;
        validation::validate_range(
            self.backoff_base_seconds,
            1,
            86_400,
            "retry.backoff_base_seconds",
        )?;
        if self.backoff_cap_seconds < self.backoff_base_seconds {
            return Err(ConfigError::Inconsistent {
                message: format!(
                    "retry.backoff_cap_seconds ({}) must be >= retry.backoff_base_seconds ({})",
                    self.backoff_cap_seconds, self.backoff_base_seconds
                ),
            });
        }
        Ok(())
    }
}

/// Character-window chunking parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        Self {
            chunk_size: env_parse(&["CHUNK_SIZE"]).unwrap_or(self.chunk_size),
            chunk_overlap: env_parse(&["CHUNK_OVERLAP"]).unwrap_or(self.chunk_overlap),
        }
    }
}

impl validation::Validate for ChunkingConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(self.chunk_size as u64, 1, 100_000, "chunking.chunk_size")?;
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Inconsistent {
                message: format!(
                    "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                    self.chunk_overlap, self.chunk_size
                ),
            });
        }
        Ok(())
    }
}

/// Remote embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model identifier sent with every request
    pub model: String,

    /// Expected vector length; responses of any other length are rejected
    pub dimension: usize,

    /// Base URL of an OpenAI-compatible API (the `/embeddings` path is appended)
    pub api_url: String,

    /// Bearer token for the provider, never serialized back out
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Maximum texts per provider call
    pub batch_size: usize,

    /// Attempts per batch before the job fails with an embedding error
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub retry_cap_ms: u64,

    /// Per-request HTTP timeout
    pub request_timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            api_url: DEFAULT_EMBEDDING_API_URL.to_string(),
            api_key: None,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            max_retries: DEFAULT_EMBEDDING_MAX_RETRIES,
            retry_base_ms: DEFAULT_EMBEDDING_RETRY_BASE_MS,
            retry_cap_ms: DEFAULT_EMBEDDING_RETRY_CAP_MS,
            request_timeout_seconds: DEFAULT_EMBEDDING_REQUEST_TIMEOUT_SECONDS,
        }
    }
}

impl EmbeddingConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        Self {
            model: env_string(&["EMBEDDING_MODEL"]).unwrap_or(self.model),
            dimension: env_parse(&["EMBEDDING_DIMENSION", "VECTOR_DIMENSION"])
                .unwrap_or(self.dimension),
            api_url: env_string(&["EMBEDDING_API_URL"]).unwrap_or(self.api_url),
            api_key: env_string(&["EMBEDDING_API_KEY", "TOGETHER_API_KEY"]).or(self.api_key),
            batch_size: env_parse(&["EMBEDDING_BATCH_SIZE"]).unwrap_or(self.batch_size),
            max_retries: env_parse(&["EMBEDDING_MAX_RETRIES"]).unwrap_or(self.max_retries),
            retry_base_ms: env_parse(&["EMBEDDING_RETRY_BASE_MS"]).unwrap_or(self.retry_base_ms),
            retry_cap_ms: env_parse(&["EMBEDDING_RETRY_CAP_MS"]).unwrap_or(self.retry_cap_ms),
            request_timeout_seconds: env_parse(&["EMBEDDING_TIMEOUT_SECONDS"])
                .unwrap_or(self.request_timeout_seconds),
        }
    }

    pub fn retry_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.retry_base_ms),
            Duration::from_millis(self.retry_cap_ms),
        )
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl validation::Validate for EmbeddingConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_non_empty(&self.model, "embedding.model")?;
        validation::validate_url(&self.api_url, "embedding.api_url")?;
        validation::validate_range(self.dimension as u64, 1, 16_384, "embedding.dimension")?;
        validation::validate_range(self.batch_size as u64, 1, 2048, "embedding.batch_size")?;
        validation::validate_range(u64::from(self.max_retries), 1, 20, "embedding.max_retries")?;
        validation::validate_range(
            self.request_timeout_seconds,
            1,
            3600,
            "embedding.request_timeout_seconds",
        )?;
        Ok(())
    }
}

/// Git hosting endpoints and snapshot filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Root under which every job gets its own exclusive subdirectory
    pub work_dir: PathBuf,

    /// Files larger than this are skipped as oversized
    pub max_file_bytes: u64,

    /// Extensions (without the dot) that are chunked; empty means "all text files"
    pub include_extensions: Vec<String>,

    pub github_api_url: String,
    pub github_web_url: String,
    pub gitlab_url: String,

    /// Skip chunk/embed/store when the context is already complete at the fetched commit
    pub skip_unchanged_commits: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join(DEFAULT_FETCH_WORK_DIR),
            max_file_bytes: DEFAULT_FETCH_MAX_FILE_BYTES,
            include_extensions: DEFAULT_INCLUDE_EXTENSIONS
                .iter()
                .map(|ext| (*ext).to_string())
                .collect(),
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            github_web_url: DEFAULT_GITHUB_WEB_URL.to_string(),
            gitlab_url: DEFAULT_GITLAB_URL.to_string(),
            skip_unchanged_commits: DEFAULT_SKIP_UNCHANGED_COMMITS,
        }
    }
}

impl FetchConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        let include_extensions = env_string(&["FETCH_INCLUDE_EXTENSIONS"]).map_or(
            self.include_extensions,
            |raw| {
                raw.split(',')
                    .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                    .filter(|ext| !ext.is_empty())
                    .collect()
            },
        );

        Self {
            work_dir: env_string(&["FETCH_WORK_DIR", "BASE_DIR"]).map_or(self.work_dir, PathBuf::from),
            max_file_bytes: env_parse(&["FETCH_MAX_FILE_BYTES"]).unwrap_or(self.max_file_bytes),
            include_extensions,
            github_api_url: env_string(&["GITHUB_API_URL"]).unwrap_or(self.github_api_url),
            github_web_url: env_string(&["GITHUB_WEB_URL"]).unwrap_or(self.github_web_url),
            gitlab_url: env_string(&["GITLAB_API_URL", "GITLAB_URL"]).unwrap_or(self.gitlab_url),
            skip_unchanged_commits: env_parse(&["FETCH_SKIP_UNCHANGED_COMMITS"])
                .unwrap_or(self.skip_unchanged_commits),
        }
    }
}

impl validation::Validate for FetchConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_non_empty(&self.work_dir.to_string_lossy(), "fetch.work_dir")?;
        validation::validate_range(
            self.max_file_bytes,
            1,
            512 * 1024 * 1024,
            "fetch.max_file_bytes",
        )?;
        validation::validate_url(&self.github_api_url, "fetch.github_api_url")?;
        validation::validate_url(&self.github_web_url, "fetch.github_web_url")?;
        validation::validate_url(&self.gitlab_url, "fetch.gitlab_url")?;
        Ok(())
    }
}

/// Database configuration - comprehensive `PostgreSQL` configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection string; takes precedence over the component fields when set
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,

    /// Password for authentication (use environment variables for security)
    #[serde(skip_serializing)]
    pub password: String,

    /// SSL mode for connections ("disable", "prefer", "require")
    pub ssl_mode: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub timeout_seconds: u64,
    pub idle_timeout_seconds: u64,

    /// Enable migrations on startup
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            database: DEFAULT_DB_NAME.to_string(),
            username: DEFAULT_DB_USER.to_string(),
            password: DEFAULT_DB_PASSWORD.to_string(),
            ssl_mode: DEFAULT_DB_SSL_MODE.to_string(),
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            min_connections: DEFAULT_DB_MIN_CONNECTIONS,
            timeout_seconds: DEFAULT_DB_TIMEOUT_SECONDS,
            idle_timeout_seconds: DEFAULT_DB_IDLE_TIMEOUT_SECONDS,
            auto_migrate: DEFAULT_AUTO_MIGRATE,
        }
    }
}

impl DatabaseConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        let password = env_string(&["REPOCTX_DATABASE_PASSWORD", "DB_PASSWORD"]).unwrap_or_else(|| {
            if self.password == DEFAULT_DB_PASSWORD {
                tracing::warn!(
                    "Using default database password - set REPOCTX_DATABASE_PASSWORD or DB_PASSWORD. NEVER use the default password in production!"
                );
            }
            self.password
        });

        Self {
            url: env_string(&["DATABASE_URL", "REPOCTX_DATABASE_URL"]).or(self.url),
            host: env_string(&["REPOCTX_DATABASE_HOST", "DB_HOST"]).unwrap_or(self.host),
            port: env_parse(&["REPOCTX_DATABASE_PORT", "DB_PORT"]).unwrap_or(self.port),
            database: env_string(&["REPOCTX_DATABASE_NAME", "DB_NAME"]).unwrap_or(self.database),
            username: env_string(&["REPOCTX_DATABASE_USERNAME", "DB_USER"]).unwrap_or(self.username),
            password,
            ssl_mode: env_string(&["REPOCTX_DATABASE_SSL_MODE", "DB_SSLMODE"])
                .unwrap_or(self.ssl_mode),
            max_connections: env_parse(&["REPOCTX_DATABASE_MAX_CONNECTIONS", "DB_MAX_CONNECTIONS"])
                .unwrap_or(self.max_connections),
            min_connections: env_parse(&["REPOCTX_DATABASE_MIN_CONNECTIONS", "DB_MIN_CONNECTIONS"])
                .unwrap_or(self.min_connections),
            timeout_seconds: env_parse(&["REPOCTX_DATABASE_TIMEOUT_SECONDS"])
                .unwrap_or(self.timeout_seconds),
            idle_timeout_seconds: env_parse(&["REPOCTX_DATABASE_IDLE_TIMEOUT_SECONDS"])
                .unwrap_or(self.idle_timeout_seconds),
            auto_migrate: env_parse(&["REPOCTX_DATABASE_AUTO_MIGRATE"])
                .unwrap_or(self.auto_migrate),
        }
    }

    /// Convert string SSL mode to `PgSslMode`
    fn parse_ssl_mode(&self) -> PgSslMode {
        match self.ssl_mode.as_str() {
            "disable" => PgSslMode::Disable,
            "require" => PgSslMode::Require,
            _ => PgSslMode::Prefer,
        }
    }

    /// Build `PostgreSQL` connection options (no URL with password exposed!)
    ///
    /// # Errors
    /// Returns an error if an explicit `url` is set but cannot be parsed
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        if let Some(url) = &self.url {
            return url.parse::<PgConnectOptions>();
        }

        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .password(&self.password)
            .ssl_mode(self.parse_ssl_mode()))
    }

    /// Create a `PostgreSQL` connection pool with proper configuration
    ///
    /// # Errors
    /// Returns an error if connection to database fails
    pub async fn create_pool(&self) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.timeout_seconds))
            .idle_timeout(Duration::from_secs(self.idle_timeout_seconds))
            .connect_with(self.connect_options()?)
            .await
    }

    /// Get connection info for logging (NO PASSWORD!)
    pub fn safe_connection_string(&self) -> String {
        self.url.as_deref().map_or_else(
            || {
                format!(
                    "{}@{}:{}/{} (ssl: {})",
                    self.username, self.host, self.port, self.database, self.ssl_mode
                )
            },
            repoctx_common::redact_url_credentials,
        )
    }
}

impl validation::Validate for DatabaseConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.url.is_none() {
            validation::validate_non_empty(&self.host, "database.host")?;
            validation::validate_non_empty(&self.database, "database.database")?;
        }
        validation::validate_range(
            u64::from(self.max_connections),
            1,
            1000,
            "database.max_connections",
        )?;
        if self.min_connections > self.max_connections {
            return Err(ConfigError::Inconsistent {
                message: format!(
                    "database.min_connections ({}) exceeds database.max_connections ({})",
                    self.min_connections, self.max_connections
                ),
            });
        }
        validation::validate_range(self.timeout_seconds, 1, 3600, "database.timeout_seconds")?;
        Ok(())
    }
}

/// Logging configuration consumed by the binary's subscriber setup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// Directory for the rolling log file; `None` uses the OS data directory
    pub log_dir: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json: DEFAULT_LOG_JSON,
            log_dir: None,
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        Self {
            log_level: env_string(&["REPOCTX_LOG_LEVEL"]).unwrap_or(self.log_level),
            json: env_parse(&["REPOCTX_LOG_JSON"]).unwrap_or(self.json),
            log_dir: env_string(&["REPOCTX_LOG_DIR"])
                .map(PathBuf::from)
                .or(self.log_dir),
        }
    }
}

impl validation::Validate for TelemetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Inconsistent {
                message: format!(
                    "telemetry.log_level must be one of {valid_levels:?}, got '{}'",
                    self.log_level
                ),
            });
        }
        Ok(())
    }
}
