//! Pool, retry and FTP service configuration

use crate::errors::{PoolError, PoolResult};
use secrecy::SecretString;
use std::collections::HashMap;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default environment variable holding the FTP password
pub const DEFAULT_FTP_PASSWORD_ENV_NAME: &str = "FTP_PASSWORD";

/// Configuration for connection pool behavior
///
/// # Examples
///
/// ```
/// use esox_ftppool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_max_total(4)
///     .with_min_idle(1)
///     .with_max_waiting_acquirers(10)
///     .with_eviction_interval(Duration::from_secs(30));
///
/// assert_eq!(config.max_total, 4);
/// assert_eq!(config.max_waiting_acquirers, Some(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfiguration {
    /// Number of idle connections the pool tries to keep open
    pub min_idle: usize,

    /// Maximum number of live connections (idle + checked out)
    pub max_total: usize,

    /// Maximum number of callers allowed to wait for a connection
    pub max_waiting_acquirers: Option<usize>,

    /// Interval of the background idle sweep
    pub eviction_interval: Option<Duration>,

    /// Idle connections older than this are evicted by the sweep
    pub idle_timeout: Option<Duration>,

    /// Connections older than this are evicted by the sweep, idle time aside
    pub time_to_live: Option<Duration>,

    /// Give up waiting for a connection after this long
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            min_idle: 0,
            max_total: 1,
            max_waiting_acquirers: None,
            eviction_interval: None,
            idle_timeout: None,
            time_to_live: None,
            acquire_timeout: None,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of live connections
    pub fn with_max_total(mut self, size: usize) -> Self {
        self.max_total = size;
        self
    }

    /// Set the idle floor
    pub fn with_min_idle(mut self, count: usize) -> Self {
        self.min_idle = count;
        self
    }

    /// Bound the waiter queue; further acquirers fail fast
    pub fn with_max_waiting_acquirers(mut self, count: usize) -> Self {
        self.max_waiting_acquirers = Some(count);
        self
    }

    /// Run the idle sweep on this interval
    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = Some(interval);
        self
    }

    /// Set idle timeout for connections
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set time-to-live for connections
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Set acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Check the configuration for contradictions
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_total == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_total must be greater than 0".to_string(),
            ));
        }
        if self.min_idle > self.max_total {
            return Err(PoolError::InvalidConfiguration(format!(
                "min_idle ({}) must not exceed max_total ({})",
                self.min_idle, self.max_total
            )));
        }
        if let Some(interval) = self.eviction_interval
            && interval.is_zero()
        {
            return Err(PoolError::InvalidConfiguration(
                "eviction_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry behavior for FTP work
///
/// `max_attempts` counts retries, so a failing operation runs at most
/// `max_attempts + 1` times.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: usize,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }
}

/// Target and credentials of the FTP endpoint
#[derive(Debug, Clone)]
pub struct AccessOptions {
    pub host: String,
    pub user: String,
    pub password: Option<SecretString>,
    pub port: Option<u16>,
}

impl AccessOptions {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: None,
            port: None,
        }
    }

    /// Set an inline password
    ///
    /// Prefer the password environment variable; inline passwords are flagged in logs.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into().into_boxed_str()));
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Per-operation settings of the FTP service
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FtpConfig {
    /// Prefix prepended to every path given to the service
    pub base: String,

    /// Absent means the first failure is final
    pub retry: Option<RetryPolicy>,
}

impl FtpConfig {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            retry: None,
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

/// Everything needed to stand up the FTP service
#[derive(Debug, Clone)]
pub struct FtpSettings {
    pub access: AccessOptions,
    pub config: FtpConfig,
    pub pool: PoolConfiguration,

    /// Connection timeout handed to the connector
    pub timeout: Option<Duration>,

    /// Environment variable that overrides the inline password when set
    pub password_env_name: String,
}

impl FtpSettings {
    pub fn new(access: AccessOptions, config: FtpConfig) -> Self {
        Self {
            access,
            config,
            pool: PoolConfiguration::default(),
            timeout: None,
            password_env_name: DEFAULT_FTP_PASSWORD_ENV_NAME.to_string(),
        }
    }

    pub fn with_pool(mut self, pool: PoolConfiguration) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_password_env_name(mut self, name: impl Into<String>) -> Self {
        self.password_env_name = name.into();
        self
    }
}

/// Snapshot of environment-style variables
///
/// # Examples
///
/// ```
/// use esox_ftppool::Environment;
///
/// let env = Environment::from_pairs([("FTP_PASSWORD", "s3cret")]);
/// assert_eq!(env.get("FTP_PASSWORD"), Some("s3cret"));
/// assert_eq!(env.get("HOME"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    /// Capture the current process environment
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Look up a variable; empty values count as unset
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration_is_valid() {
        assert!(PoolConfiguration::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_configurations() {
        let zero = PoolConfiguration::new().with_max_total(0);
        assert!(matches!(zero.validate(), Err(PoolError::InvalidConfiguration(_))));

        let inverted = PoolConfiguration::new().with_max_total(2).with_min_idle(3);
        assert!(matches!(inverted.validate(), Err(PoolError::InvalidConfiguration(_))));

        let no_interval = PoolConfiguration::new().with_eviction_interval(Duration::ZERO);
        assert!(no_interval.validate().is_err());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = FtpSettings::new(
            AccessOptions::new("localhost", "user"),
            FtpConfig::new("/base"),
        );
        assert_eq!(settings.password_env_name, DEFAULT_FTP_PASSWORD_ENV_NAME);
        assert!(settings.config.retry.is_none());
        assert_eq!(settings.pool.max_total, 1);
    }

    #[test]
    fn test_empty_env_value_is_unset() {
        let env = Environment::from_pairs([("FTP_PASSWORD", "")]);
        assert_eq!(env.get("FTP_PASSWORD"), None);
    }
}
