//! Configuration loading and types for RelayStore.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, the transfer engine, metadata persistence, object
//! storage, and the remote site used by the replicator.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Streaming transfer engine settings.
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Metadata catalog settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Object storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Remote site settings for the replicator.
    #[serde(default)]
    pub replicator: ReplicatorConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Name of the site this node belongs to.
    #[serde(default = "default_site")]
    pub site: String,

    /// Module name reported in error headers.
    #[serde(default = "default_module")]
    pub module: String,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            site: default_site(),
            module: default_module(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Transfer engine tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// How long an upload waits for the backend to consume the body.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Upper bound for draining a request body after a failure.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    /// Chunk size used when pumping bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Compute a SHA-256 digest of uploads that carry no declared hash.
    #[serde(default = "default_true")]
    pub compute_sha256: bool,

    /// zstd level for outbound compression (0 = library default).
    #[serde(default)]
    pub compression_level: i32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            max_wait_ms: default_max_wait_ms(),
            buffer_size: default_buffer_size(),
            compute_sha256: true,
            compression_level: 0,
        }
    }
}

impl TransferConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

/// Metadata catalog configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Backend type: `sqlite` or `memory`.
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite-specific metadata configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `local` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    #[serde(default)]
    pub memory: MemoryStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
            memory: MemoryStorageConfig::default(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for stored objects.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// In-memory storage configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStorageConfig {
    /// Cap on total stored bytes.  0 means unlimited.
    #[serde(default)]
    pub max_size_bytes: u64,
}

/// Replicator settings: where remote reads are served from.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicatorConfig {
    /// Base URL of the peer site's accessor (e.g. `http://site-b:9012`).
    /// Remote reads are refused while this is empty.
    #[serde(default)]
    pub peer_url: String,

    /// Connect timeout for peer requests, in seconds.
    #[serde(default = "default_peer_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            peer_url: String::new(),
            connect_timeout: default_peer_connect_timeout(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9012
}

fn default_site() -> String {
    "site-a".to_string()
}

fn default_module() -> String {
    "accessor".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_response_timeout_ms() -> u64 {
    300_000
}

fn default_max_wait_ms() -> u64 {
    1_000
}

fn default_buffer_size() -> usize {
    128 * 1024
}

fn default_metadata_engine() -> String {
    "sqlite".to_string()
}

fn default_metadata_path() -> String {
    "./data/metadata.db".to_string()
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_storage_root() -> String {
    "./data/objects".to_string()
}

fn default_peer_connect_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
