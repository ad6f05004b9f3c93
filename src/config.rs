//! Environment-derived configuration, parsed once at startup.
//!
//! Mirrors the variables listed in spec §6. Parsing fails fast so the
//! process exits with code 1 before any background task or listener
//! starts, rather than limping along with defaults for required values.

use std::env;
use std::time::Duration;

/// Everything needed to construct the application's shared state.
#[derive(Debug, Clone)]
pub struct Config {
    pub ldap_server: String,
    pub ldap_base_dn: String,
    pub ldap_is_ad: bool,
    pub ldap_readonly_user: Option<String>,
    pub ldap_readonly_password: Option<String>,

    pub session_duration: Duration,
    pub persist_sessions: bool,
    pub session_path: String,
    pub cookie_secure: bool,

    pub pool: PoolConfig,

    pub refresh_interval: Duration,
    pub listen_addr: String,
    pub log_level: String,
}

/// Connection pool tunables (spec §6 `LDAP_POOL_*`).
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub min_connections: usize,
    pub max_idle_time: Duration,
    pub max_lifetime: Duration,
    pub health_check_interval: Duration,
    pub connection_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            max_idle_time: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(3600),
            health_check_interval: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(10),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Failure to build a [`Config`] from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let ldap_server = require("LDAP_SERVER")?;
        let ldap_base_dn = require("LDAP_BASE_DN")?;
        let ldap_is_ad = bool_var("LDAP_IS_AD", false)?;
        let ldap_readonly_user = optional("LDAP_READONLY_USER");
        let ldap_readonly_password = optional("LDAP_READONLY_PASSWORD");

        let session_duration = duration_secs_var("SESSION_DURATION", 8 * 3600)?;
        let persist_sessions = bool_var("PERSIST_SESSIONS", false)?;
        let session_path = env::var("SESSION_PATH").unwrap_or_else(|_| "sessions.db".to_string());
        let cookie_secure = bool_var("COOKIE_SECURE", true)?;

        let pool = PoolConfig {
            max_connections: usize_var("LDAP_POOL_MAX_CONNECTIONS", 10)?,
            min_connections: usize_var("LDAP_POOL_MIN_CONNECTIONS", 1)?,
            max_idle_time: duration_secs_var("LDAP_POOL_MAX_IDLE_TIME", 300)?,
            max_lifetime: duration_secs_var("LDAP_POOL_MAX_LIFETIME", 3600)?,
            health_check_interval: duration_secs_var("LDAP_POOL_HEALTH_CHECK_INTERVAL", 60)?,
            connection_timeout: duration_secs_var("LDAP_POOL_CONNECTION_TIMEOUT", 10)?,
            acquire_timeout: duration_secs_var("LDAP_POOL_ACQUIRE_TIMEOUT", 5)?,
        };

        let refresh_interval = duration_secs_var("CACHE_REFRESH_INTERVAL", 30)?;
        let listen_addr = env::var("LISTEN_ADDR").unwrap_or_else(|_| ":3000".to_string());
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            ldap_server,
            ldap_base_dn,
            ldap_is_ad,
            ldap_readonly_user,
            ldap_readonly_password,
            session_duration,
            persist_sessions,
            session_path,
            cookie_secure,
            pool,
            refresh_interval,
            listen_addr,
            log_level,
        })
    }

    /// Whether the cache manager should be started: both the read-only
    /// username and password must be configured (spec §4.2 "Disabled mode").
    pub fn cache_enabled(&self) -> bool {
        self.ldap_readonly_user.is_some() && self.ldap_readonly_password.is_some()
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.is_empty())
}

fn bool_var(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::Invalid {
                name,
                value: other.to_string(),
            }),
        },
    }
}

fn usize_var(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(v) => v.parse().map_err(|_| ConfigError::Invalid { name, value: v }),
    }
}

fn duration_secs_var(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(Duration::from_secs(default_secs)),
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Invalid { name, value: v }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_defaults_match_spec() {
        let pool = PoolConfig::default();
        assert_eq!(pool.max_connections, 10);
        assert_eq!(pool.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn cache_enabled_requires_both_credentials() {
        let mut cfg = base_config();
        cfg.ldap_readonly_user = Some("ro".into());
        cfg.ldap_readonly_password = None;
        assert!(!cfg.cache_enabled());

        cfg.ldap_readonly_password = Some("secret".into());
        assert!(cfg.cache_enabled());
    }

    fn base_config() -> Config {
        Config {
            ldap_server: "ldap://localhost".into(),
            ldap_base_dn: "dc=example,dc=org".into(),
            ldap_is_ad: false,
            ldap_readonly_user: None,
            ldap_readonly_password: None,
            session_duration: Duration::from_secs(3600),
            persist_sessions: false,
            session_path: "sessions.db".into(),
            cookie_secure: true,
            pool: PoolConfig::default(),
            refresh_interval: Duration::from_secs(30),
            listen_addr: ":3000".into(),
            log_level: "info".into(),
        }
    }
}
