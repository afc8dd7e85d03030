//! Process-level gateway configuration and configuration value indirection.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// How the out-of-process query engine is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// Engine listens on a local port; requests are HTTP POSTs.
    #[default]
    Http,
    /// Engine reads line-delimited JSON requests on stdin and answers on stdout.
    Stdio,
}

/// Which database fetch errors are retried before the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryMode {
    /// Only errors that indicate the engine is starting or unreachable.
    #[default]
    Transient,
    /// Any error except deadline expiry and a closed engine.
    Always,
    /// Never retry.
    Never,
}

impl std::str::FromStr for RetryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transient" => Ok(RetryMode::Transient),
            "always" => Ok(RetryMode::Always),
            "never" => Ok(RetryMode::Never),
            other => Err(format!("unknown retry mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Path to the query engine binary used by database data sources.
    pub engine_path: String,

    /// Transport used to talk to the engine process.
    pub engine_mode: EngineMode,

    /// Working directory the engine is started in (relative sqlite paths
    /// resolve against it).
    pub working_dir: String,

    /// Poll interval while waiting for a freshly started engine.
    pub engine_ready_poll_ms: u64,

    /// Grace period before a stopping engine process is killed.
    pub engine_exit_timeout_ms: u64,

    /// Retry policy for database fetches.
    pub retry_mode: RetryMode,
    pub retry_backoff_ms: u64,
    pub retry_max_attempts: Option<usize>,

    /// Deadline applied to one database fetch (including retries).
    pub fetch_deadline_ms: u64,

    /// Default timeout of the shared HTTP client.
    pub http_timeout_secs: u64,

    /// Default proxy for REST and GraphQL data sources.
    pub http_proxy_url: Option<String>,

    /// Base URL substituted for the server-URL placeholder in fetch URLs.
    pub server_url: String,

    /// Operation plans cached before the least recently used is evicted.
    pub plan_cache_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            engine_path: "query-engine".to_string(),
            engine_mode: EngineMode::Http,
            working_dir: ".".to_string(),
            engine_ready_poll_ms: 10,
            engine_exit_timeout_ms: 5_000,
            retry_mode: RetryMode::Transient,
            retry_backoff_ms: 500,
            retry_max_attempts: None,
            fetch_deadline_ms: 5_000,
            http_timeout_secs: 10,
            http_proxy_url: None,
            server_url: "http://localhost:9992".to_string(),
            plan_cache_capacity: 1024,
        }
    }
}

impl GatewayConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `FIELDGATE_ENGINE_PATH`: query engine binary
    /// - `FIELDGATE_ENGINE_MODE`: `http` or `stdio`
    /// - `FIELDGATE_WORKING_DIR`: engine working directory
    /// - `FIELDGATE_RETRY_MODE`: `transient`, `always` or `never`
    /// - `FIELDGATE_RETRY_BACKOFF_MS`: backoff between database retries
    /// - `FIELDGATE_RETRY_MAX_ATTEMPTS`: optional attempt cap
    /// - `FIELDGATE_FETCH_DEADLINE_MS`: deadline of one database fetch
    /// - `FIELDGATE_HTTP_TIMEOUT_SECS`: default HTTP client timeout
    /// - `FIELDGATE_HTTP_PROXY`: default HTTP proxy
    /// - `FIELDGATE_SERVER_URL`: server URL for placeholder fetch URLs
    /// - `FIELDGATE_PLAN_CACHE_CAPACITY`: cached operation plans
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("FIELDGATE_ENGINE_PATH") {
            cfg.engine_path = s;
        }

        if let Ok(s) = std::env::var("FIELDGATE_ENGINE_MODE") {
            match s.trim().to_ascii_lowercase().as_str() {
                "http" => cfg.engine_mode = EngineMode::Http,
                "stdio" => cfg.engine_mode = EngineMode::Stdio,
                _ => {}
            }
        }

        if let Ok(s) = std::env::var("FIELDGATE_WORKING_DIR") {
            cfg.working_dir = s;
        }

        if let Ok(s) = std::env::var("FIELDGATE_RETRY_MODE") {
            if let Ok(v) = s.parse::<RetryMode>() {
                cfg.retry_mode = v;
            }
        }

        if let Ok(s) = std::env::var("FIELDGATE_RETRY_BACKOFF_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.retry_backoff_ms = v;
            }
        }

        if let Ok(s) = std::env::var("FIELDGATE_RETRY_MAX_ATTEMPTS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.retry_max_attempts = Some(v);
            }
        }

        if let Ok(s) = std::env::var("FIELDGATE_FETCH_DEADLINE_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.fetch_deadline_ms = v;
            }
        }

        if let Ok(s) = std::env::var("FIELDGATE_HTTP_TIMEOUT_SECS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.http_timeout_secs = v;
            }
        }

        if let Ok(s) = std::env::var("FIELDGATE_HTTP_PROXY") {
            cfg.http_proxy_url = Some(s);
        }

        if let Ok(s) = std::env::var("FIELDGATE_SERVER_URL") {
            cfg.server_url = s;
        }

        if let Ok(s) = std::env::var("FIELDGATE_PLAN_CACHE_CAPACITY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.plan_cache_capacity = v;
            }
        }

        cfg
    }

    /// Reject settings the executor cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.engine_path.trim().is_empty() {
            return Err(Error::Config("engine_path is empty".into()));
        }
        if self.fetch_deadline_ms == 0 {
            return Err(Error::Config("fetch_deadline_ms must be positive".into()));
        }
        if self.engine_ready_poll_ms == 0 {
            return Err(Error::Config("engine_ready_poll_ms must be positive".into()));
        }
        if self.plan_cache_capacity == 0 {
            return Err(Error::Config("plan_cache_capacity must be positive".into()));
        }
        if self.retry_max_attempts == Some(0) {
            return Err(Error::Config("retry_max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// A configuration string that is either inline or read from the environment.
///
/// Deserializes from a bare string or from `{ env: NAME, default: VALUE }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Static(String),
    Env {
        env: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl Default for ConfigValue {
    fn default() -> Self {
        ConfigValue::Static(String::new())
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::Static(s.to_string())
    }
}

impl ConfigValue {
    /// The value, or `None` when it names an unset variable without default.
    pub fn lookup(&self) -> Option<String> {
        match self {
            ConfigValue::Static(s) => Some(s.clone()),
            ConfigValue::Env { env, default } => {
                std::env::var(env).ok().or_else(|| default.clone())
            }
        }
    }

    /// The value, empty when unresolvable.
    pub fn resolve(&self) -> String {
        self.lookup().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_value_static_and_env_forms() {
        let v: ConfigValue = serde_json::from_str(r#""https://api.example.com""#).unwrap();
        assert_eq!(v.resolve(), "https://api.example.com");

        let v: ConfigValue =
            serde_json::from_str(r#"{"env":"FIELDGATE_TEST_SURELY_UNSET_VAR","default":"x"}"#)
                .unwrap();
        assert_eq!(v.lookup().as_deref(), Some("x"));

        let v: ConfigValue =
            serde_json::from_str(r#"{"env":"FIELDGATE_TEST_SURELY_UNSET_VAR"}"#).unwrap();
        assert_eq!(v.lookup(), None);
        assert_eq!(v.resolve(), "");
    }

    #[test]
    fn validate_rejects_unusable_settings() {
        assert!(GatewayConfig::default().validate().is_ok());

        let cfg = GatewayConfig {
            fetch_deadline_ms: 0,
            ..GatewayConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let cfg = GatewayConfig {
            retry_max_attempts: Some(0),
            ..GatewayConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = GatewayConfig {
            plan_cache_capacity: 0,
            ..GatewayConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn retry_mode_parses() {
        assert_eq!("Always".parse::<RetryMode>(), Ok(RetryMode::Always));
        assert!("sometimes".parse::<RetryMode>().is_err());
    }
}
