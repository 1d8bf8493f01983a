//! Metrics collection and export for connection pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Metrics data for a pool
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolMetrics {
    /// Connections opened
    pub total_created: usize,

    /// Connections torn down
    pub total_destroyed: usize,

    /// Failed attempts to open a connection
    pub create_failures: usize,

    /// Teardowns that reported an error
    pub destroy_failures: usize,

    /// Connections handed out
    pub total_acquired: usize,

    /// Connections given back for reuse
    pub total_released: usize,

    /// Acquirers turned away because the waiter queue was full
    pub capacity_rejections: usize,

    /// Current idle connections
    pub idle_connections: usize,

    /// Current checked-out connections
    pub checked_out_connections: usize,

    /// Current waiters
    pub waiting_acquirers: usize,

    /// Pool utilization ratio (0.0 to 1.0)
    pub utilization: f64,

    /// Maximum live connections
    pub max_total: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("create_failures".to_string(), self.create_failures.to_string());
        metrics.insert("destroy_failures".to_string(), self.destroy_failures.to_string());
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("capacity_rejections".to_string(), self.capacity_rejections.to_string());
        metrics.insert("idle_connections".to_string(), self.idle_connections.to_string());
        metrics.insert("checked_out_connections".to_string(), self.checked_out_connections.to_string());
        metrics.insert("waiting_acquirers".to_string(), self.waiting_acquirers.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("max_total".to_string(), self.max_total.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_ftppool::{MetricsExporter, PoolMetrics};
    /// use std::collections::HashMap;
    ///
    /// let metrics = PoolMetrics {
    ///     total_created: 2,
    ///     total_destroyed: 1,
    ///     create_failures: 0,
    ///     destroy_failures: 0,
    ///     total_acquired: 5,
    ///     total_released: 4,
    ///     capacity_rejections: 0,
    ///     idle_connections: 1,
    ///     checked_out_connections: 0,
    ///     waiting_acquirers: 0,
    ///     utilization: 0.0,
    ///     max_total: 2,
    /// };
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "uploads".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&metrics, "ftp", Some(&tags)).unwrap();
    /// assert!(output.contains("ftppool_connections_idle"));
    /// assert!(output.contains("service=\"uploads\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());
        if let Some(tags) = tags {
            labels.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let opts = |name: &str, help: &str| Opts::new(name, help).const_labels(labels.clone());

        let registry = Registry::new();

        let gauges = [
            ("ftppool_connections_idle", "Current idle connections", metrics.idle_connections),
            ("ftppool_connections_checked_out", "Current checked-out connections", metrics.checked_out_connections),
            ("ftppool_acquirers_waiting", "Callers waiting for a connection", metrics.waiting_acquirers),
            ("ftppool_connections_max", "Maximum live connections", metrics.max_total),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(opts(name, help))?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge))?;
        }

        let utilization = Gauge::with_opts(opts("ftppool_utilization", "Pool utilization ratio"))?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization))?;

        let counters = [
            ("ftppool_connections_created_total", "Connections opened", metrics.total_created),
            ("ftppool_connections_destroyed_total", "Connections torn down", metrics.total_destroyed),
            ("ftppool_create_failures_total", "Failed connection attempts", metrics.create_failures),
            ("ftppool_destroy_failures_total", "Failed teardowns", metrics.destroy_failures),
            ("ftppool_acquired_total", "Connections handed out", metrics.total_acquired),
            ("ftppool_released_total", "Connections given back", metrics.total_released),
            ("ftppool_capacity_rejections_total", "Acquirers rejected by the waiter limit", metrics.capacity_rejections),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(opts(name, help))?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub total_created: AtomicUsize,
    pub total_destroyed: AtomicUsize,
    pub create_failures: AtomicUsize,
    pub destroy_failures: AtomicUsize,
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub capacity_rejections: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(
        &self,
        idle: usize,
        checked_out: usize,
        waiting: usize,
        max_total: usize,
    ) -> PoolMetrics {
        let utilization = if max_total > 0 {
            checked_out as f64 / max_total as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            create_failures: self.create_failures.load(Ordering::Relaxed),
            destroy_failures: self.destroy_failures.load(Ordering::Relaxed),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(Ordering::Relaxed),
            idle_connections: idle,
            checked_out_connections: checked_out,
            waiting_acquirers: waiting,
            utilization,
            max_total,
        }
    }
}
