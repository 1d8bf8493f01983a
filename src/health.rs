//! Health monitoring for connection pools

#[cfg(feature = "serde")]
use serde::Serialize;

/// Health status of a connection pool
///
/// # Examples
///
/// ```
/// use esox_ftppool::HealthStatus;
///
/// let health = HealthStatus::new(1, 1, 0, 4);
/// assert!(health.is_healthy());
/// assert_eq!(health.utilization, 0.25);
///
/// let saturated = HealthStatus::new(0, 4, 3, 4);
/// assert!(!saturated.is_healthy());
/// assert_eq!(saturated.warning_count, 2);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Share of `max_total` currently checked out (0.0 to 1.0)
    pub utilization: f64,

    /// Idle connections count
    pub idle_connections: usize,

    /// Checked-out connections count
    pub checked_out_connections: usize,

    /// Callers waiting for a connection
    pub waiting_acquirers: usize,

    /// Maximum live connections
    pub max_total: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Create a new health status
    pub fn new(idle: usize, checked_out: usize, waiting: usize, max_total: usize) -> Self {
        let utilization = if max_total > 0 {
            checked_out as f64 / max_total as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if waiting > 0 {
            warnings.push(format!("{} acquirer(s) waiting for a connection", waiting));
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_connections: idle,
            checked_out_connections: checked_out,
            waiting_acquirers: waiting,
            max_total,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
