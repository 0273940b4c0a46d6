use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level gateway configuration. Every section has working defaults so
/// the binary runs with no config file at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub broker: BrokerConfig,
    pub cache: CacheConfig,
    pub upstream: UpstreamConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL shared by the cache store and the broker stream.
    /// An empty URL disables the cache (every read is a miss) and is only
    /// useful for local development; the broker still requires a real URL.
    pub url: String,
    /// Optional namespace prepended to every cache key and to the broker
    /// stream name, for multi-environment isolation. Empty by default so
    /// keys match the scheme the collaborator services use.
    pub key_prefix: String,
    pub connect_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: String::new(),
            connect_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Stream the notification messages travel on.
    pub stream: String,
    /// Consumer group name; every gateway instance joins the same group so
    /// each message is handed to exactly one instance.
    pub group: String,
    /// Prefix for this instance's consumer name; a host- and random-suffix
    /// is appended at startup.
    pub consumer_prefix: String,
    /// Block timeout for one XREADGROUP poll. Also bounds how quickly the
    /// consume loop observes a cancellation signal.
    pub poll_interval_ms: u64,
    /// Messages read per poll.
    pub batch_size: usize,
    /// Bound on broker connection establishment; startup fails fatally past it.
    pub startup_timeout_seconds: u64,
    /// Approximate stream length cap applied on publish (XADD MAXLEN ~).
    pub max_stream_len: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            stream: "notifications:update".to_string(),
            group: "notification-group".to_string(),
            consumer_prefix: "gateway".to_string(),
            poll_interval_ms: 1000,
            batch_size: 32,
            startup_timeout_seconds: 15,
            max_stream_len: 10_000,
        }
    }
}

/// Per-family cache TTLs, in seconds.
///
/// TTLs are a backstop against invalidation gaps, not the consistency
/// mechanism. Membership lists change most often and cache shortest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub project_ttl_seconds: u64,
    pub project_users_ttl_seconds: u64,
    pub tasks_ttl_seconds: u64,
    pub sprints_ttl_seconds: u64,
    pub epics_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            project_ttl_seconds: 3600,
            project_users_ttl_seconds: 300,
            tasks_ttl_seconds: 3600,
            sprints_ttl_seconds: 1800,
            epics_ttl_seconds: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the project-management service used for membership
    /// lookups during notification assembly.
    pub membership_base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            membership_base_url: "http://localhost:8001".to_string(),
            request_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Plain level or an env-filter directive string.
    pub level: String,
    /// "pretty" for development, "json" for log collectors.
    pub format: String,
    /// Append log output to this file instead of stdout.
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Layered load: struct defaults, then the config file when one exists,
    /// then `TASKIO_*` environment variables on top.
    ///
    /// Env keys nest with a double underscore so field names keep their
    /// own underscores: `TASKIO_BROKER__POLL_INTERVAL_MS=250`.
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file.filter(|p| Path::new(p).exists()) {
            builder = builder.add_source(File::with_name(path));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("TASKIO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        settings.try_deserialize()
    }

    /// Environment-only load, used by container entrypoints.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.stream.is_empty() {
            return Err(ConfigError::Message(
                "broker.stream must not be empty".to_string(),
            ));
        }
        if self.broker.group.is_empty() {
            return Err(ConfigError::Message(
                "broker.group must not be empty".to_string(),
            ));
        }
        if self.broker.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "broker.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.broker.batch_size == 0 {
            return Err(ConfigError::Message(
                "broker.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.broker.startup_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "broker.startup_timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.upstream.membership_base_url.is_empty() {
            return Err(ConfigError::Message(
                "upstream.membership_base_url must not be empty".to_string(),
            ));
        }
        if self.upstream.request_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "upstream.request_timeout_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn redis_url(&self) -> &str {
        &self.redis.url
    }

    /// Bind address for the HTTP listener, `host:port`.
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}
