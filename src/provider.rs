//! Owns the pool behind an [`FtpService`] and shuts it down

use crate::config::{Environment, FtpSettings};
use crate::connection::{Connector, FtpConnectionManager};
use crate::errors::PoolResult;
use crate::executor::{Delay, TokioDelay, WorkExecutor};
use crate::health::HealthStatus;
use crate::metrics::PoolMetrics;
use crate::pool::ResourcePool;
use crate::service::FtpService;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Builds the connection pool, retry engine and facade for one endpoint
pub struct FtpProvider<C: Connector> {
    pool: ResourcePool<FtpConnectionManager<C>>,
    service: FtpService<C>,
    shut_down: AtomicBool,
}

impl<C: Connector> FtpProvider<C> {
    /// Wire everything up from `settings`
    ///
    /// The password is resolved from `env` once, here. Fails if the pool
    /// configuration is invalid.
    pub fn init(
        settings: FtpSettings,
        connector: C,
        env: &Environment,
        delay: Arc<dyn Delay>,
    ) -> PoolResult<Self> {
        let manager = FtpConnectionManager::new(connector, &settings, env);
        let host = manager.host().to_string();
        let pool = ResourcePool::new(manager, settings.pool.clone())?;

        let executor = WorkExecutor::new(pool.clone(), host.clone(), settings.config.retry.clone(), delay);
        let service = FtpService::new(Arc::new(executor), settings.config.base.clone(), host.clone());

        info!(
            host = %host,
            base = %settings.config.base,
            max_total = settings.pool.max_total,
            "FTP provider ready"
        );

        Ok(Self {
            pool,
            service,
            shut_down: AtomicBool::new(false),
        })
    }

    /// [`init`](Self::init) with the process environment and the Tokio timer
    pub fn from_env(settings: FtpSettings, connector: C) -> PoolResult<Self> {
        Self::init(settings, connector, &Environment::from_process(), Arc::new(TokioDelay))
    }

    /// The file operations facade; clones share this provider's pool
    pub fn service(&self) -> FtpService<C> {
        self.service.clone()
    }

    /// Drain the pool and close every connection
    ///
    /// Waits for checked-out connections to come back first. Later calls do
    /// nothing.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(host = %self.service.host(), "Shutting down the FTP pool");
        self.pool.drain().await;
        self.pool.clear().await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Get health status
    pub fn health_status(&self) -> HealthStatus {
        self.pool.get_health_status()
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        self.pool.get_metrics()
    }

    /// Export pool metrics in Prometheus format, labelled with the host
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(&self) -> prometheus::Result<String> {
        self.pool.export_metrics_prometheus(self.service.host(), None)
    }
}
