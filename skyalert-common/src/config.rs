//! Bootstrap configuration loading and resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (applied by the binary)
//! 2. Environment variable (`SKYALERT_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is not an error: defaults are used and a warning logged.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "SKYALERT_CONFIG";

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change during runtime.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Path to SQLite database file (default: data dir / skyalert.db)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP surface configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Alert broker consumer configuration
    #[serde(default)]
    pub gcn: GcnConfig,

    /// Health probe gating the consumer
    #[serde(default)]
    pub health: HealthConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// HTTP server bind configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Alert broker consumer configuration
///
/// Alerts are read from a NATS JetStream relay that republishes the GCN
/// Kafka topics one-to-one as subjects. The relay authenticates clients with
/// the same GCN client credential pair: `client_id` is the NATS user and
/// `client_secret` its password.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GcnConfig {
    /// GCN client id, sent as the relay user (required)
    #[serde(default)]
    pub client_id: Option<String>,

    /// GCN client secret, sent as the relay password (required)
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Subscribed GCN topics, used as subject filters (required, non-empty)
    #[serde(default)]
    pub topics: Vec<String>,

    /// Relay server URL
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Stream holding the subscribed topics
    #[serde(default = "default_stream")]
    pub stream: String,

    /// Durable consumer name (offsets are tracked per name)
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// Seconds to sleep between supervisory poll cycles
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds a single consume call may block waiting for messages
    #[serde(default = "default_consume_timeout_secs")]
    pub consume_timeout_secs: u64,

    /// Maximum messages fetched per consume call
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Seconds allowed for downloading one skymap
    #[serde(default = "default_skymap_timeout_secs")]
    pub skymap_timeout_secs: u64,
}

impl Default for GcnConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            topics: Vec::new(),
            broker_url: default_broker_url(),
            stream: default_stream(),
            consumer_name: default_consumer_name(),
            poll_interval_secs: default_poll_interval_secs(),
            consume_timeout_secs: default_consume_timeout_secs(),
            max_messages: default_max_messages(),
            skymap_timeout_secs: default_skymap_timeout_secs(),
        }
    }
}

/// Validated consumer credentials and topic list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub topics: Vec<String>,
}

impl GcnConfig {
    /// Static configuration gate for the consumer
    ///
    /// Missing identity, missing secret or an empty topic list is a
    /// configuration error. Blank strings count as missing. A zero poll
    /// interval or batch size is rejected too.
    pub fn validate(&self) -> Result<ConsumerCredentials> {
        if self.poll_interval_secs == 0 {
            return Err(Error::Config("gcn.poll_interval_secs must be at least 1".to_string()));
        }
        if self.max_messages == 0 {
            return Err(Error::Config("gcn.max_messages must be at least 1".to_string()));
        }

        let client_id = non_blank(self.client_id.as_deref())
            .ok_or_else(|| Error::Config("gcn.client_id is not configured".to_string()))?;
        let client_secret = non_blank(self.client_secret.as_deref())
            .ok_or_else(|| Error::Config("gcn.client_secret is not configured".to_string()))?;

        let topics: Vec<String> = self
            .topics
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if topics.is_empty() {
            return Err(Error::Config("gcn.topics is empty".to_string()));
        }

        Ok(ConsumerCredentials {
            client_id,
            client_secret,
            topics,
        })
    }

    /// Overlay `SKYALERT_GCN_*` environment variables onto this config
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("SKYALERT_GCN_CLIENT_ID") {
            self.client_id = Some(value);
        }
        if let Ok(value) = std::env::var("SKYALERT_GCN_CLIENT_SECRET") {
            self.client_secret = Some(value);
        }
        if let Ok(value) = std::env::var("SKYALERT_GCN_TOPICS") {
            self.topics = value.split(',').map(|t| t.trim().to_string()).collect();
        }
        if let Ok(value) = std::env::var("SKYALERT_GCN_BROKER_URL") {
            self.broker_url = value;
        }
    }
}

/// Health probe configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// URL probed before every poll cycle; 200 means healthy
    #[serde(default = "default_health_url")]
    pub url: String,

    /// Probe timeout in seconds
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            url: default_health_url(),
            timeout_secs: default_health_timeout_secs(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5750
}

fn default_broker_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_stream() -> String {
    "gcn".to_string()
}

fn default_consumer_name() -> String {
    "skyalert-gcn".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_consume_timeout_secs() -> u64 {
    1
}

fn default_max_messages() -> usize {
    100
}

fn default_skymap_timeout_secs() -> u64 {
    120
}

fn default_health_url() -> String {
    format!("http://{}:{}/health", default_host(), default_port())
}

fn default_health_timeout_secs() -> u64 {
    5
}

/// Load configuration from a TOML file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Load configuration with graceful degradation
///
/// Uses `explicit` if given, then `SKYALERT_CONFIG`, then the platform config
/// locations. A missing file yields defaults; a malformed file is an error.
pub fn load_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => std::env::var(CONFIG_PATH_ENV)
            .ok()
            .map(PathBuf::from)
            .or_else(find_config_file),
    };

    match path {
        Some(path) if path.exists() => {
            info!("Loading configuration from {}", path.display());
            load_toml_config(&path)
        }
        Some(path) => {
            warn!("Config file not found: {} (using defaults)", path.display());
            Ok(TomlConfig::default())
        }
        None => {
            warn!("No config file found (using defaults)");
            Ok(TomlConfig::default())
        }
    }
}

/// Locate the platform config file, if any
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("skyalert").join("skyalert.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/skyalert/skyalert.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Resolve the database path
///
/// Priority: CLI argument → `SKYALERT_DATABASE` → TOML → OS default.
pub fn resolve_database_path(cli_arg: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var("SKYALERT_DATABASE") {
        return PathBuf::from(path);
    }

    if let Some(path) = &toml.database_path {
        return path.clone();
    }

    default_data_dir().join("skyalert.db")
}

/// Get OS-dependent default data folder
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("skyalert"))
        .unwrap_or_else(|| PathBuf::from("./skyalert_data"))
}
