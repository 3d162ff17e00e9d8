use serde::{Deserialize, Serialize};

use super::source_config::EventSourceConfig;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GatewayConfig {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Retry / DLQ worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Scheduled-delivery engine configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Outbound security policy
    #[serde(default)]
    pub security: SecurityConfig,

    /// Outbound HTTP client configuration
    #[serde(default)]
    pub http_client: HttpClientConfig,

    /// Process resource limits
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Ingestion source behaviour
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Configured event sources
    #[serde(default)]
    pub event_sources: Vec<EventSourceConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            worker: WorkerConfig::default(),
            scheduler: SchedulerConfig::default(),
            security: SecurityConfig::default(),
            http_client: HttpClientConfig::default(),
            memory: MemoryConfig::default(),
            sources: SourcesConfig::default(),
            event_sources: vec![],
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".fluxgate/fluxgate.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional directory for daily-rotated file output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

/// Retry / DLQ worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Scan interval in milliseconds
    #[serde(default = "default_worker_interval_ms")]
    pub interval_ms: u64,

    /// Maximum eligible logs claimed per scan
    #[serde(default = "default_worker_batch_size")]
    pub batch_size: u32,

    /// Concurrent batches in flight
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: u32,

    /// Watchdog: logs stuck in RETRYING longer than this are reset to FAILED
    #[serde(default = "default_processing_timeout_ms")]
    pub processing_timeout_ms: u64,

    /// Cap for the exponential retry backoff, in ms
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

const fn default_worker_interval_ms() -> u64 {
    1_000
}

const fn default_worker_batch_size() -> u32 {
    50
}

const fn default_max_concurrent_batches() -> u32 {
    5
}

const fn default_processing_timeout_ms() -> u64 {
    300_000
}

const fn default_backoff_cap_ms() -> u64 {
    300_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_worker_interval_ms(),
            batch_size: default_worker_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            processing_timeout_ms: default_processing_timeout_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

/// Scheduled-delivery engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Tick interval in milliseconds
    #[serde(default = "default_scheduler_interval_ms")]
    pub interval_ms: u64,

    /// Maximum due rows claimed per tick
    #[serde(default = "default_scheduler_batch_size")]
    pub batch_size: u32,

    /// Grace window before a pending entry counts as overdue, in hours
    #[serde(default = "default_grace_hours")]
    pub grace_hours: u32,

    /// Watchdog: entries stuck in PROCESSING longer than this are reset, in ms
    #[serde(default = "default_processing_timeout_ms")]
    pub processing_timeout_ms: u64,
}

const fn default_scheduler_interval_ms() -> u64 {
    60_000
}

const fn default_scheduler_batch_size() -> u32 {
    50
}

const fn default_grace_hours() -> u32 {
    24
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_scheduler_interval_ms(),
            batch_size: default_scheduler_batch_size(),
            grace_hours: default_grace_hours(),
            processing_timeout_ms: default_processing_timeout_ms(),
        }
    }
}

/// Outbound security policy
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct SecurityConfig {
    /// Reject non-HTTPS target URLs
    #[serde(default)]
    pub enforce_https: bool,

    /// Block deliveries to private-network destinations
    #[serde(default)]
    pub block_private_networks: bool,
}

/// Outbound HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HttpClientConfig {
    /// Default request timeout in milliseconds
    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum redirects followed per request
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
}

const fn default_http_timeout_ms() -> u64 {
    30_000
}

const fn default_max_redirects() -> u32 {
    5
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_http_timeout_ms(),
            max_redirects: default_max_redirects(),
        }
    }
}

/// Process resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MemoryConfig {
    /// Heap threshold that triggers a warning, in MB
    #[serde(default = "default_heap_threshold_mb")]
    pub heap_threshold_mb: u64,

    /// Drain in-flight work on shutdown instead of aborting
    #[serde(default = "default_graceful_shutdown")]
    pub graceful_shutdown: bool,
}

const fn default_heap_threshold_mb() -> u64 {
    1_024
}

const fn default_graceful_shutdown() -> bool {
    true
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            heap_threshold_mb: default_heap_threshold_mb(),
            graceful_shutdown: default_graceful_shutdown(),
        }
    }
}

/// Ingestion source behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourcesConfig {
    /// Whether the relational adapter advances its checkpoint when the
    /// downstream executor fails. When false, a hard executor bug stalls
    /// the source instead of dropping the event.
    #[serde(default = "default_advance_on_executor_error")]
    pub advance_on_executor_error: bool,

    /// Heartbeat staleness threshold before the supervisor restarts a
    /// source, in ms
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Drain deadline for `stop()`, in ms
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Number of key buckets serialising per-partition-key processing
    #[serde(default = "default_key_buckets")]
    pub key_buckets: u32,
}

const fn default_advance_on_executor_error() -> bool {
    true
}

const fn default_heartbeat_timeout_ms() -> u64 {
    60_000
}

const fn default_drain_timeout_ms() -> u64 {
    30_000
}

const fn default_key_buckets() -> u32 {
    16
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            advance_on_executor_error: default_advance_on_executor_error(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            key_buckets: default_key_buckets(),
        }
    }
}
