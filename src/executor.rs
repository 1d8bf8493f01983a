//! Retry-wrapped execution of work against pooled connections

use crate::config::RetryPolicy;
use crate::errors::{FtpError, FtpResult, PoolError, TransferError};
use crate::pool::{ConnectionManager, ResourcePool};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// One remote operation, run against a checked-out connection
///
/// Implementations must be re-runnable: the executor may call `run` again on
/// a fresh connection after a failure.
#[async_trait]
pub trait UnitOfWork<C: Send>: Send + Sync {
    type Output: Send;

    async fn run(&self, conn: &mut C) -> Result<Self::Output, TransferError>;
}

/// Suspension used between retry attempts
#[async_trait]
pub trait Delay: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Delay`] backed by the Tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs units of work on pooled connections, retrying on failure
///
/// A connection is released after successful work and destroyed after failed
/// work, so a connection left in an unknown state is never reused. Every
/// attempt starts from a freshly acquired connection.
pub struct WorkExecutor<M: ConnectionManager> {
    pool: ResourcePool<M>,
    host: String,
    retry: Option<RetryPolicy>,
    delay: Arc<dyn Delay>,
}

impl<M: ConnectionManager> WorkExecutor<M> {
    pub fn new(
        pool: ResourcePool<M>,
        host: impl Into<String>,
        retry: Option<RetryPolicy>,
        delay: Arc<dyn Delay>,
    ) -> Self {
        Self {
            pool,
            host: host.into(),
            retry,
            delay,
        }
    }

    pub fn pool(&self) -> &ResourcePool<M> {
        &self.pool
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// Run `work` until it succeeds or the retry budget is spent
    ///
    /// The terminal error is [`FtpError::Exhausted`], wrapping the failure of
    /// the last attempt.
    pub async fn run<W>(&self, work: &W) -> FtpResult<W::Output>
    where
        W: UnitOfWork<M::Connection>,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;
            let err = match self.attempt(work).await {
                Ok(output) => return Ok(output),
                Err(e) => e,
            };

            match &self.retry {
                Some(policy) if attempts <= policy.max_attempts => {
                    info!(
                        host = %self.host,
                        attempt = attempts,
                        max_attempts = policy.max_attempts,
                        delay_ms = policy.delay.as_millis() as u64,
                        error = %err,
                        "Retrying FTP work"
                    );
                    self.delay.sleep(policy.delay).await;
                }
                _ => {
                    return Err(FtpError::Exhausted {
                        host: self.host.clone(),
                        attempts,
                        source: Box::new(err),
                    });
                }
            }
        }
    }

    /// A failed connect already carries its own tag; other pool failures get one
    fn acquire_error(&self, err: PoolError) -> FtpError {
        match err {
            PoolError::Create(source) => match source.downcast::<FtpError>() {
                Ok(err) => *err,
                Err(source) => FtpError::Connect {
                    host: self.host.clone(),
                    source,
                },
            },
            other => FtpError::Connect {
                host: self.host.clone(),
                source: Box::new(other),
            },
        }
    }

    async fn attempt<W>(&self, work: &W) -> FtpResult<W::Output>
    where
        W: UnitOfWork<M::Connection>,
    {
        let mut conn = self.pool.acquire().await.map_err(|e| self.acquire_error(e))?;

        match work.run(&mut *conn).await {
            Ok(output) => match self.pool.release(conn).await {
                Ok(()) => Ok(output),
                Err(e) => {
                    let err = FtpError::Release {
                        host: self.host.clone(),
                        source: e,
                    };
                    error!(host = %self.host, error = %err, "Could not release the FTP client");
                    Err(err)
                }
            },
            Err(e) => {
                // The earlier failure wins; a failed teardown is only logged.
                if let Err(destroy_err) = self.pool.destroy(conn).await {
                    error!(host = %self.host, error = %destroy_err, "Could not destroy the FTP client");
                }
                Err(FtpError::Transfer {
                    host: self.host.clone(),
                    source: e,
                })
            }
        }
    }
}
