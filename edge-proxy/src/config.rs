use envconfig::Envconfig;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::ops::Deref;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Server-side keys carry this prefix, which is how privileged callers are told apart
/// from SDKs using the public client-side key.
pub const SERVER_API_KEY_PREFIX: &str = "ser.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {s}")),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentKeyPair {
    pub server_side_key: String,
    pub client_side_key: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid environment key pairs: {0}")]
    InvalidKeyPairs(String),
    #[error("Empty key in environment key pair #{0}")]
    EmptyKey(usize),
    #[error("Server-side key in pair #{0} must start with 'ser.'")]
    MissingServerKeyPrefix(usize),
    #[error("Duplicate client-side key: {0}")]
    DuplicateClientKey(String),
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

/// The set of environments this proxy mirrors, parsed from a JSON array such as
/// `[{"server_side_key": "ser.abc", "client_side_key": "abc"}]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentKeyPairs(pub Vec<EnvironmentKeyPair>);

impl EnvironmentKeyPairs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for (index, pair) in self.0.iter().enumerate() {
            if pair.server_side_key.is_empty() || pair.client_side_key.is_empty() {
                return Err(ConfigError::EmptyKey(index));
            }
            if !pair.server_side_key.starts_with(SERVER_API_KEY_PREFIX) {
                return Err(ConfigError::MissingServerKeyPrefix(index));
            }
            if !seen.insert(pair.client_side_key.as_str()) {
                return Err(ConfigError::DuplicateClientKey(pair.client_side_key.clone()));
            }
        }
        Ok(())
    }

    pub fn client_key_for_server_key(&self, server_key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|pair| pair.server_side_key == server_key)
            .map(|pair| pair.client_side_key.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EnvironmentKeyPair> {
        self.0.iter()
    }
}

impl FromStr for EnvironmentKeyPairs {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(EnvironmentKeyPairs::default());
        }
        let pairs: Vec<EnvironmentKeyPair> =
            serde_json::from_str(s).map_err(|e| ConfigError::InvalidKeyPairs(e.to_string()))?;
        let pairs = EnvironmentKeyPairs(pairs);
        pairs.validate()?;
        Ok(pairs)
    }
}

/// Readiness grace period per environment. `none` turns the staleness check off,
/// leaving only the "refreshed at least once" check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePeriod(pub Option<u64>);

impl GracePeriod {
    pub fn as_duration(&self) -> Option<Duration> {
        self.0.map(Duration::from_secs)
    }
}

impl FromStr for GracePeriod {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("none") {
            Ok(GracePeriod(None))
        } else {
            s.parse::<u64>().map(|secs| GracePeriod(Some(secs)))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowOrigins {
    Any,
    List(Vec<String>),
}

impl FromStr for AllowOrigins {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let origins: Vec<String> = s
            .split(',')
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
        if origins.is_empty() || origins.iter().any(|o| o == "*") {
            Ok(AllowOrigins::Any)
        } else {
            Ok(AllowOrigins::List(origins))
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:8000")]
    pub address: SocketAddr,

    #[envconfig(from = "ENVIRONMENT_KEY_PAIRS", default = "[]")]
    pub environment_key_pairs: EnvironmentKeyPairs,

    #[envconfig(from = "API_URL", default = "https://edge.api.flagsmith.com/api/v1")]
    pub api_url: String,

    #[envconfig(from = "API_POLL_FREQUENCY_SECONDS", default = "10")]
    pub api_poll_frequency_seconds: u64,

    #[envconfig(from = "API_POLL_TIMEOUT_SECONDS", default = "5")]
    pub api_poll_timeout_seconds: u64,

    #[envconfig(from = "ENVIRONMENT_UPDATE_GRACE_PERIOD_SECONDS", default = "30")]
    pub environment_update_grace_period_seconds: GracePeriod,

    #[envconfig(from = "FLAGS_CACHE_ENABLED", default = "false")]
    pub flags_cache_enabled: FlexBool,

    #[envconfig(from = "FLAGS_CACHE_MAX_SIZE", default = "128")]
    pub flags_cache_max_size: u64,

    #[envconfig(from = "IDENTITIES_CACHE_ENABLED", default = "false")]
    pub identities_cache_enabled: FlexBool,

    #[envconfig(from = "IDENTITIES_CACHE_MAX_SIZE", default = "128")]
    pub identities_cache_max_size: u64,

    #[envconfig(from = "MAX_TRAIT_VALUE_LENGTH", default = "2000")]
    pub max_trait_value_length: usize,

    #[envconfig(from = "SSE_AUTHENTICATION_TOKEN", default = "")]
    pub sse_authentication_token: String,

    #[envconfig(from = "STREAM_DELAY_MILLIS", default = "1000")]
    pub stream_delay_millis: u64,

    #[envconfig(from = "MAX_STREAM_AGE_SECONDS", default = "30")]
    pub max_stream_age_seconds: u64,

    #[envconfig(from = "STREAM_RETRY_TIMEOUT_MILLIS", default = "15000")]
    pub stream_retry_timeout_millis: u64,

    #[envconfig(from = "ALLOW_ORIGINS", default = "*")]
    pub allow_origins: AllowOrigins,

    #[envconfig(default = "1000")]
    pub max_concurrency: usize,

    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: FlexBool,

    #[envconfig(default = "false")]
    pub enable_metrics: bool,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "edge-proxy")]
    pub otel_service_name: String,

    #[envconfig(default = "info")]
    pub otel_log_level: tracing::Level,

    #[envconfig(default = "3")]
    pub otel_export_timeout_secs: u64,
}

impl Config {
    /// Checks the settings that parsing alone does not cover.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.environment_key_pairs.validate()?;
        if self.api_poll_frequency_seconds == 0 {
            return Err(ConfigError::InvalidSetting(
                "API_POLL_FREQUENCY_SECONDS must be greater than zero".to_string(),
            ));
        }
        if self.stream_delay_millis == 0 {
            return Err(ConfigError::InvalidSetting(
                "STREAM_DELAY_MILLIS must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_test_config() -> Self {
        Self {
            address: SocketAddr::from_str("127.0.0.1:0").unwrap(),
            environment_key_pairs: EnvironmentKeyPairs::default(),
            api_url: "http://localhost:8000/api/v1".to_string(),
            api_poll_frequency_seconds: 10,
            api_poll_timeout_seconds: 5,
            environment_update_grace_period_seconds: GracePeriod(Some(30)),
            flags_cache_enabled: FlexBool(false),
            flags_cache_max_size: 128,
            identities_cache_enabled: FlexBool(false),
            identities_cache_max_size: 128,
            max_trait_value_length: 2000,
            sse_authentication_token: "test-sse-token".to_string(),
            stream_delay_millis: 100,
            max_stream_age_seconds: 5,
            stream_retry_timeout_millis: 15000,
            allow_origins: AllowOrigins::Any,
            max_concurrency: 1000,
            debug: FlexBool(false),
            enable_metrics: false,
            otel_url: None,
            otel_sampling_rate: 1.0,
            otel_service_name: "edge-proxy".to_string(),
            otel_log_level: tracing::Level::INFO,
            otel_export_timeout_secs: 3,
        }
    }

    pub fn poll_frequency(&self) -> Duration {
        Duration::from_secs(self.api_poll_frequency_seconds)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.api_poll_timeout_seconds)
    }

    pub fn stream_delay(&self) -> Duration {
        Duration::from_millis(self.stream_delay_millis)
    }

    pub fn max_stream_age(&self) -> Duration {
        Duration::from_secs(self.max_stream_age_seconds)
    }

    pub fn stream_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_retry_timeout_millis)
    }

    /// Cache size for the environment flags memoizer, `None` when disabled.
    pub fn flags_cache_size(&self) -> Option<u64> {
        (*self.flags_cache_enabled && self.flags_cache_max_size > 0)
            .then_some(self.flags_cache_max_size)
    }

    /// Cache size for the identity flags memoizer, `None` when disabled.
    pub fn identities_cache_size(&self) -> Option<u64> {
        (*self.identities_cache_enabled && self.identities_cache_max_size > 0)
            .then_some(self.identities_cache_max_size)
    }
}

pub static DEFAULT_TEST_CONFIG: Lazy<Config> = Lazy::new(Config::default_test_config);
