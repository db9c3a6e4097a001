//! Engine configuration
//!
//! [`EngineConfig`] carries every constructor-time knob of the engine with
//! its default. Values can be adjusted with the `with_*` builders or loaded
//! from a partial JSON document whose durations are given in seconds.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// User-Agent attached to every request unless the caller overrides it
pub const DEFAULT_USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config document is not valid
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How much of a URL identifies a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainScope {
    /// `host + path`; every path gets its own session until it authenticates
    #[default]
    HostAndPath,
    /// Bare host; one session per host
    Host,
}

/// Constructor-time configuration for an [`Engine`](crate::engine::Engine)
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Attempts per request for transport failures, including the first
    pub max_retries: u32,
    /// Requests admitted per `rate_window`
    pub rate_limit: u32,
    pub rate_window: Duration,
    /// How long a cached GET response is served
    pub cache_ttl: Duration,
    /// Maximum number of cached responses
    pub cache_capacity: usize,
    /// Per-attempt deadline
    pub timeout: Duration,
    /// First backoff delay; doubles on each retry
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Lifetime of a session from creation or authentication
    pub session_timeout: Duration,
    pub max_sessions: usize,
    pub domain_scope: DomainScope,
    /// Headers attached to every request; per-call headers win
    pub default_headers: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut default_headers = BTreeMap::new();
        default_headers.insert("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string());

        Self {
            max_retries: 3,
            rate_limit: 60,
            rate_window: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 100,
            timeout: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            session_timeout: Duration::from_secs(3600),
            max_sessions: 100,
            domain_scope: DomainScope::HostAndPath,
            default_headers,
        }
    }
}

impl EngineConfig {
    pub fn with_max_retries(mut self, attempts: u32) -> Self {
        self.max_retries = attempts;
        self
    }

    /// Admit `calls` requests per rolling `window`
    pub fn with_rate_limit(mut self, calls: u32, window: Duration) -> Self {
        self.rate_limit = calls;
        self.rate_window = window;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn with_domain_scope(mut self, scope: DomainScope) -> Self {
        self.domain_scope = scope;
        self
    }

    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Loads a JSON config file over the defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Parses a JSON config document over the defaults
    ///
    /// Every field is optional; unknown fields are rejected.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;
        Ok(file.apply(Self::default()))
    }
}

/// On-disk shape of the config, durations in whole seconds
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    max_retries: Option<u32>,
    rate_limit: Option<u32>,
    rate_window_secs: Option<u64>,
    cache_ttl_secs: Option<u64>,
    cache_capacity: Option<usize>,
    timeout_secs: Option<u64>,
    retry_base_delay_ms: Option<u64>,
    retry_max_delay_ms: Option<u64>,
    session_timeout_secs: Option<u64>,
    max_sessions: Option<usize>,
    domain_scope: Option<DomainScope>,
    default_headers: BTreeMap<String, String>,
}

impl ConfigFile {
    fn apply(self, mut config: EngineConfig) -> EngineConfig {
        if let Some(v) = self.max_retries {
            config.max_retries = v;
        }
        if let Some(v) = self.rate_limit {
            config.rate_limit = v;
        }
        if let Some(v) = self.rate_window_secs {
            config.rate_window = Duration::from_secs(v);
        }
        if let Some(v) = self.cache_ttl_secs {
            config.cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = self.cache_capacity {
            config.cache_capacity = v;
        }
        if let Some(v) = self.timeout_secs {
            config.timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.retry_base_delay_ms {
            config.retry_base_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.retry_max_delay_ms {
            config.retry_max_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.session_timeout_secs {
            config.session_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.max_sessions {
            config.max_sessions = v;
        }
        if let Some(v) = self.domain_scope {
            config.domain_scope = v;
        }
        config.default_headers.extend(self.default_headers);
        config
    }
}
