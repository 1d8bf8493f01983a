//! # esox_ftppool
//!
//! Pooled, retrying FTP client layer for async Rust: a bounded connection pool,
//! a retry engine that never reuses a connection after failed work, and a small
//! file operations facade on top.
//!
//! ## Features
//!
//! - Bounded pool with a waiter limit, acquire timeout and idle floor
//! - Release on success, destroy on failure
//! - Fixed-delay retries with an injectable delay
//! - Errors tagged with operation, host and remote path
//! - Password resolution from the environment
//! - Idle eviction with TTL and idle timeout
//! - Health monitoring and metrics
//! - Prometheus metrics export
//! - In-memory endpoint for demos and tests (`memory` feature)
//!
//! ## Quick Start
//!
//! ```rust
//! use esox_ftppool::{AccessOptions, FtpConfig, FtpProvider, FtpSettings, MemoryServer, PoolConfiguration};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let server = MemoryServer::new();
//! let settings = FtpSettings::new(AccessOptions::new("memory", "demo"), FtpConfig::new("/data"))
//!     .with_pool(PoolConfiguration::new().with_max_total(2));
//!
//! let provider = FtpProvider::from_env(settings, server.connector()).unwrap();
//! let ftp = provider.service();
//!
//! ftp.put("/hello.txt", "hello").await.unwrap();
//! assert_eq!(ftp.get("/hello.txt").await.unwrap().as_ref(), b"hello");
//!
//! provider.shutdown().await;
//! # }
//! ```

mod config;
mod connection;
mod errors;
mod eviction;
mod executor;
mod health;
#[cfg(any(test, feature = "memory"))]
mod memory;
mod metrics;
mod pool;
mod provider;
mod service;

pub use config::{
    AccessOptions, DEFAULT_FTP_PASSWORD_ENV_NAME, Environment, FtpConfig, FtpSettings, PoolConfiguration,
    RetryPolicy,
};
pub use connection::{Connector, FileInfo, FtpConnectionManager, FtpSession};
pub use errors::{BoxError, ErrorKind, FtpError, FtpResult, PoolError, PoolResult, TransferError};
pub use eviction::EvictionPolicy;
pub use executor::{Delay, TokioDelay, UnitOfWork, WorkExecutor};
pub use health::HealthStatus;
#[cfg(feature = "memory")]
pub use memory::{MemoryConnector, MemoryServer, MemorySession, MemoryStats};
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use metrics::PoolMetrics;
pub use pool::{ConnectionManager, PooledConnection, ResourcePool};
pub use provider::FtpProvider;
pub use service::FtpService;
