//! Eviction policies for idle connections

use crate::config::PoolConfiguration;
use std::time::{Duration, Instant};

/// Eviction policy applied by the idle sweep
///
/// # Examples
///
/// ```
/// use esox_ftppool::{EvictionPolicy, PoolConfiguration};
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_idle_timeout(Duration::from_secs(60));
///
/// assert!(matches!(
///     EvictionPolicy::from_config(&config),
///     EvictionPolicy::IdleTimeout(_)
/// ));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Only unusable connections are evicted
    #[default]
    None,

    /// Connections expire a fixed duration after they were opened
    TimeToLive(Duration),

    /// Connections expire after sitting idle
    IdleTimeout(Duration),

    /// Combined: TTL or idle timeout
    Combined {
        ttl: Duration,
        idle_timeout: Duration,
    },
}

impl EvictionPolicy {
    pub fn from_config(config: &PoolConfiguration) -> Self {
        match (config.time_to_live, config.idle_timeout) {
            (Some(ttl), Some(idle_timeout)) => EvictionPolicy::Combined { ttl, idle_timeout },
            (Some(ttl), None) => EvictionPolicy::TimeToLive(ttl),
            (None, Some(idle)) => EvictionPolicy::IdleTimeout(idle),
            (None, None) => EvictionPolicy::None,
        }
    }
}

/// Lifecycle timestamps of a pooled connection
#[derive(Debug, Clone, Copy)]
pub(crate) struct HandleMetadata {
    pub created_at: Instant,
    pub last_used: Instant,
}

impl HandleMetadata {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            last_used: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub fn is_expired(&self, policy: &EvictionPolicy) -> bool {
        match policy {
            EvictionPolicy::None => false,
            EvictionPolicy::TimeToLive(ttl) => self.created_at.elapsed() > *ttl,
            EvictionPolicy::IdleTimeout(timeout) => self.last_used.elapsed() > *timeout,
            EvictionPolicy::Combined { ttl, idle_timeout } => {
                self.created_at.elapsed() > *ttl || self.last_used.elapsed() > *idle_timeout
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_config() {
        let config = PoolConfiguration::new()
            .with_ttl(Duration::from_secs(10))
            .with_idle_timeout(Duration::from_secs(5));
        assert_eq!(
            EvictionPolicy::from_config(&config),
            EvictionPolicy::Combined {
                ttl: Duration::from_secs(10),
                idle_timeout: Duration::from_secs(5),
            }
        );
        assert_eq!(
            EvictionPolicy::from_config(&PoolConfiguration::default()),
            EvictionPolicy::None
        );
    }

    #[test]
    fn test_expiry() {
        let mut meta = HandleMetadata::new();
        meta.last_used -= Duration::from_secs(30);

        assert!(!meta.is_expired(&EvictionPolicy::None));
        assert!(meta.is_expired(&EvictionPolicy::IdleTimeout(Duration::from_secs(10))));
        assert!(!meta.is_expired(&EvictionPolicy::TimeToLive(Duration::from_secs(10))));

        meta.touch();
        assert!(!meta.is_expired(&EvictionPolicy::IdleTimeout(Duration::from_secs(10))));
    }
}
