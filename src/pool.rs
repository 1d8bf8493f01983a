//! Bounded asynchronous connection pool

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::eviction::{EvictionPolicy, HandleMetadata};
use crate::health::HealthStatus;
use crate::metrics::{MetricsTracker, PoolMetrics};

#[cfg(feature = "metrics")]
use crate::metrics::MetricsExporter;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, SemaphorePermit, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

/// Creates, checks and tears down the connections held by a [`ResourcePool`]
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new connection
    async fn create(&self) -> Result<Self::Connection, Self::Error>;

    /// Cheap local liveness check, no round trip
    fn is_usable(&self, conn: &Self::Connection) -> bool;

    /// Close a connection for good
    async fn destroy(&self, conn: Self::Connection) -> Result<(), Self::Error>;
}

/// A connection checked out of a [`ResourcePool`]
///
/// Hand it back with [`ResourcePool::release`] or [`ResourcePool::destroy`].
/// If it is dropped instead, the pool destroys it in the background so its
/// slot is not lost.
pub struct PooledConnection<T: Send + 'static> {
    // Only None once into_parts has consumed the handle.
    conn: Option<T>,
    id: usize,
    pool_id: usize,
    meta: HandleMetadata,
    abandon_fn: Arc<dyn Fn(T, usize) + Send + Sync>,
}

impl<T: Send + 'static> PooledConnection<T> {
    /// Pool-unique connection id
    pub fn id(&self) -> usize {
        self.id
    }

    /// Time since the underlying connection was opened
    pub fn age(&self) -> Duration {
        self.meta.created_at.elapsed()
    }

    fn into_parts(mut self) -> (T, usize, HandleMetadata) {
        let conn = self.conn.take().expect("Connection already taken");
        (conn, self.id, self.meta)
    }
}

impl<T: Send + 'static> Deref for PooledConnection<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("Connection already taken")
    }
}

impl<T: Send + 'static> DerefMut for PooledConnection<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("Connection already taken")
    }
}

impl<T: Send + 'static> Drop for PooledConnection<T> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            (self.abandon_fn)(conn, self.id);
        }
    }
}

struct IdleEntry<T> {
    conn: T,
    id: usize,
    meta: HandleMetadata,
}

/// Counts an acquirer as waiting for as long as it is alive
struct WaiterGuard<'a> {
    waiting: &'a AtomicUsize,
}

impl<'a> WaiterGuard<'a> {
    fn enter(waiting: &'a AtomicUsize, limit: Option<usize>) -> Option<Self> {
        waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match limit {
                Some(max) if n >= max => None,
                _ => Some(n + 1),
            })
            .ok()
            .map(|_| Self { waiting })
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Marks a connection as on its way to a caller, so `drain` waits for it
struct ClaimGuard<'a> {
    claiming: &'a AtomicUsize,
    returned: &'a Notify,
}

impl<'a> ClaimGuard<'a> {
    fn enter(claiming: &'a AtomicUsize, returned: &'a Notify) -> Self {
        claiming.fetch_add(1, Ordering::SeqCst);
        Self { claiming, returned }
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.claiming.fetch_sub(1, Ordering::SeqCst);
        self.returned.notify_waiters();
    }
}

/// Gives a live connection's slot back, even if its teardown is cancelled
struct SlotGuard<'a, M: ConnectionManager> {
    inner: &'a PoolInner<M>,
}

impl<M: ConnectionManager> Drop for SlotGuard<'_, M> {
    fn drop(&mut self) {
        MetricsTracker::incr(&self.inner.metrics.total_destroyed);
        self.inner.slots.add_permits(1);
        self.inner.available.notify_one();
    }
}

struct PoolInner<M: ConnectionManager> {
    id: usize,
    manager: M,
    config: PoolConfiguration,
    policy: EvictionPolicy,
    idle: Mutex<VecDeque<IdleEntry<M::Connection>>>,
    checked_out: DashMap<usize, HandleMetadata>,
    // One permit per live connection, held while it is being opened too.
    slots: Semaphore,
    waiting: AtomicUsize,
    // Acquirers and top-ups between the closed check and handing out.
    claiming: AtomicUsize,
    // Signalled when an idle connection or a free slot shows up.
    available: Notify,
    // Signalled when a checked-out connection comes back or a claim ends.
    returned: Notify,
    closed: AtomicBool,
    next_id: AtomicUsize,
    metrics: MetricsTracker,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl<M: ConnectionManager> PoolInner<M> {
    fn live_count(&self) -> usize {
        self.config.max_total - self.slots.available_permits()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn has_claims(&self) -> bool {
        self.claiming.load(Ordering::SeqCst) > 0
    }

    async fn open(&self, permit: SemaphorePermit<'_>) -> PoolResult<IdleEntry<M::Connection>> {
        match self.manager.create().await {
            Ok(conn) => {
                permit.forget();
                MetricsTracker::incr(&self.metrics.total_created);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                debug!(pool_id = self.id, connection_id = id, live = self.live_count(), "Opened pooled connection");
                Ok(IdleEntry {
                    conn,
                    id,
                    meta: HandleMetadata::new(),
                })
            }
            Err(e) => {
                drop(permit);
                MetricsTracker::incr(&self.metrics.create_failures);
                self.available.notify_one();
                Err(PoolError::Create(Box::new(e)))
            }
        }
    }

    /// Pops the next idle connection, discarding the ones that are no longer usable
    async fn take_idle(self: &Arc<Self>) -> Option<IdleEntry<M::Connection>> {
        loop {
            let entry = self.idle.lock().pop_front()?;
            if self.manager.is_usable(&entry.conn) {
                return Some(entry);
            }
            debug!(pool_id = self.id, connection_id = entry.id, "Discarding unusable idle connection");
            // The teardown outlives a cancelled acquire.
            let _ = self.spawn_teardown(entry).await;
        }
    }

    fn spawn_teardown(self: &Arc<Self>, entry: IdleEntry<M::Connection>) -> JoinHandle<PoolResult<()>> {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.teardown(entry.conn, entry.id).await })
    }

    /// Tears down every entry in its own task, returning the number of failures
    async fn teardown_all(self: &Arc<Self>, entries: Vec<IdleEntry<M::Connection>>) -> usize {
        let tasks: Vec<_> = entries.into_iter().map(|entry| self.spawn_teardown(entry)).collect();
        let mut failures = 0;
        for task in tasks {
            if !matches!(task.await, Ok(Ok(()))) {
                failures += 1;
            }
        }
        failures
    }

    /// Destroys a connection and frees its slot; failures are logged and returned
    async fn teardown(&self, conn: M::Connection, id: usize) -> PoolResult<()> {
        let slot = SlotGuard { inner: self };
        let result = self.manager.destroy(conn).await;
        drop(slot);

        match result {
            Ok(()) => {
                debug!(pool_id = self.id, connection_id = id, "Destroyed pooled connection");
                Ok(())
            }
            Err(e) => {
                MetricsTracker::incr(&self.metrics.destroy_failures);
                error!(pool_id = self.id, connection_id = id, error = %e, "Failed to destroy pooled connection");
                Err(PoolError::Destroy(Box::new(e)))
            }
        }
    }

    fn hand_back(&self, id: usize) {
        self.checked_out.remove(&id);
        self.returned.notify_waiters();
    }

    async fn ensure_min_idle(&self) {
        loop {
            let _claim = ClaimGuard::enter(&self.claiming, &self.returned);
            let idle = self.idle.lock().len();
            if self.is_closed() || idle >= self.config.min_idle {
                break;
            }
            let Ok(permit) = self.slots.try_acquire() else {
                break;
            };
            match self.open(permit).await {
                Ok(entry) if self.is_closed() => {
                    let _ = self.teardown(entry.conn, entry.id).await;
                    break;
                }
                Ok(entry) => {
                    self.idle.lock().push_back(entry);
                    self.available.notify_one();
                }
                Err(e) => {
                    warn!(pool_id = self.id, error = %e, "Could not top up idle connections");
                    break;
                }
            }
        }
    }

    /// Destroys unusable idle connections and expired ones above the idle floor
    async fn evict_idle(self: &Arc<Self>) -> usize {
        let doomed = {
            let mut idle = self.idle.lock();
            let mut doomed = Vec::new();
            let mut usable = Vec::with_capacity(idle.len());

            for entry in idle.drain(..) {
                if self.manager.is_usable(&entry.conn) {
                    usable.push(entry);
                } else {
                    doomed.push(entry);
                }
            }

            let mut remaining = usable.len();
            for entry in usable {
                if remaining > self.config.min_idle && entry.meta.is_expired(&self.policy) {
                    remaining -= 1;
                    doomed.push(entry);
                } else {
                    idle.push_back(entry);
                }
            }
            doomed
        };

        let evicted = doomed.len();
        // Spawned, so an aborted sweep still closes what it pulled out.
        self.teardown_all(doomed).await;
        if evicted > 0 {
            debug!(pool_id = self.id, evicted, "Evicted idle connections");
        }
        evicted
    }
}

/// Bounded pool of connections produced by a [`ConnectionManager`]
///
/// Clones share the same pool.
pub struct ResourcePool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for ResourcePool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ConnectionManager> ResourcePool<M> {
    /// Create a new pool
    ///
    /// Connections are opened lazily. When `min_idle` or an eviction interval is
    /// configured a maintenance task is spawned, which requires a Tokio runtime.
    pub fn new(manager: M, config: PoolConfiguration) -> PoolResult<Self> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            manager,
            policy: EvictionPolicy::from_config(&config),
            idle: Mutex::new(VecDeque::with_capacity(config.max_total)),
            checked_out: DashMap::new(),
            slots: Semaphore::new(config.max_total),
            waiting: AtomicUsize::new(0),
            claiming: AtomicUsize::new(0),
            available: Notify::new(),
            returned: Notify::new(),
            closed: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
            metrics: MetricsTracker::new(),
            maintenance: Mutex::new(None),
            config,
        });

        if inner.config.min_idle > 0 || inner.config.eviction_interval.is_some() {
            let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
                PoolError::InvalidConfiguration(
                    "min_idle and idle eviction require a Tokio runtime".to_string(),
                )
            })?;
            let task = Self::spawn_maintenance(&inner, &runtime);
            *inner.maintenance.lock() = Some(task);
        }

        debug!(
            pool_id = inner.id,
            min_idle = inner.config.min_idle,
            max_total = inner.config.max_total,
            "Created connection pool"
        );

        Ok(Self { inner })
    }

    fn spawn_maintenance(inner: &Arc<PoolInner<M>>, runtime: &tokio::runtime::Handle) -> JoinHandle<()> {
        let weak: Weak<PoolInner<M>> = Arc::downgrade(inner);
        let interval = inner.config.eviction_interval;

        runtime.spawn(async move {
            if let Some(inner) = weak.upgrade() {
                inner.ensure_min_idle().await;
            }
            let Some(period) = interval else {
                return;
            };

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.is_closed() {
                    break;
                }
                inner.evict_idle().await;
                inner.ensure_min_idle().await;
            }
        })
    }

    /// Acquire a connection, waiting for one to free up when the pool is at capacity
    ///
    /// Fails fast with [`PoolError::TooManyWaiters`] when the waiter queue is full.
    pub async fn acquire(&self) -> PoolResult<PooledConnection<M::Connection>> {
        match self.inner.config.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.acquire_inner())
                .await
                .map_err(|_| PoolError::Timeout(timeout))?,
            None => self.acquire_inner().await,
        }
    }

    async fn acquire_inner(&self) -> PoolResult<PooledConnection<M::Connection>> {
        let inner = &self.inner;
        let mut waiter: Option<WaiterGuard<'_>> = None;

        loop {
            let notified = inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                // Held until the connection is checked out or torn down.
                let _claim = ClaimGuard::enter(&inner.claiming, &inner.returned);
                if inner.is_closed() {
                    return Err(PoolError::Closed);
                }

                if let Some(entry) = inner.take_idle().await {
                    return self.hand_out(entry).await;
                }

                match inner.slots.try_acquire() {
                    Ok(permit) => {
                        let entry = inner.open(permit).await?;
                        return self.hand_out(entry).await;
                    }
                    Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
                    Err(TryAcquireError::NoPermits) => {}
                }
            }

            if waiter.is_none() {
                let limit = inner.config.max_waiting_acquirers;
                match WaiterGuard::enter(&inner.waiting, limit) {
                    Some(guard) => waiter = Some(guard),
                    None => {
                        MetricsTracker::incr(&inner.metrics.capacity_rejections);
                        let limit = limit.unwrap_or_default();
                        warn!(pool_id = inner.id, limit, "Rejected acquire, too many waiters");
                        return Err(PoolError::TooManyWaiters { limit });
                    }
                }
            }

            notified.await;
        }
    }

    /// Checks `entry` out, unless the pool started draining while it was being obtained
    async fn hand_out(&self, entry: IdleEntry<M::Connection>) -> PoolResult<PooledConnection<M::Connection>> {
        if self.inner.is_closed() {
            debug!(pool_id = self.inner.id, connection_id = entry.id, "Pool closed while acquiring, destroying connection");
            let _ = self.inner.teardown(entry.conn, entry.id).await;
            return Err(PoolError::Closed);
        }
        Ok(self.check_out(entry))
    }

    fn check_out(&self, mut entry: IdleEntry<M::Connection>) -> PooledConnection<M::Connection> {
        let inner = &self.inner;
        entry.meta.touch();
        inner.checked_out.insert(entry.id, entry.meta);
        MetricsTracker::incr(&inner.metrics.total_acquired);

        PooledConnection {
            conn: Some(entry.conn),
            id: entry.id,
            pool_id: inner.id,
            meta: entry.meta,
            abandon_fn: self.make_abandon_fn(),
        }
    }

    fn make_abandon_fn(&self) -> Arc<dyn Fn(M::Connection, usize) + Send + Sync> {
        let weak = Arc::downgrade(&self.inner);

        Arc::new(move |conn, id| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            warn!(pool_id = inner.id, connection_id = id, "Connection dropped without release, destroying it");
            inner.hand_back(id);

            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        let _ = inner.teardown(conn, id).await;
                    });
                }
                Err(_) => {
                    drop(conn);
                    MetricsTracker::incr(&inner.metrics.total_destroyed);
                    inner.slots.add_permits(1);
                    inner.available.notify_one();
                }
            }
        })
    }

    fn check_owner(&self, handle: PooledConnection<M::Connection>) -> PoolResult<PooledConnection<M::Connection>> {
        if handle.pool_id == self.inner.id {
            Ok(handle)
        } else {
            // Dropping hands it to the pool that issued it.
            let id = handle.id;
            drop(handle);
            Err(PoolError::ForeignHandle { id })
        }
    }

    /// Return a connection for reuse
    ///
    /// It is re-validated on the next acquire. Once the pool is draining the
    /// connection is torn down instead.
    pub async fn release(&self, handle: PooledConnection<M::Connection>) -> PoolResult<()> {
        let handle = self.check_owner(handle)?;
        let inner = &self.inner;
        let (conn, id, mut meta) = handle.into_parts();
        inner.hand_back(id);

        if inner.is_closed() {
            return inner.teardown(conn, id).await;
        }

        meta.touch();
        inner.idle.lock().push_back(IdleEntry { conn, id, meta });
        MetricsTracker::incr(&inner.metrics.total_released);
        inner.available.notify_one();
        debug!(pool_id = inner.id, connection_id = id, "Released pooled connection");
        Ok(())
    }

    /// Tear a connection down and free its slot
    pub async fn destroy(&self, handle: PooledConnection<M::Connection>) -> PoolResult<()> {
        let handle = self.check_owner(handle)?;
        let inner = &self.inner;
        let (conn, id, _) = handle.into_parts();
        inner.hand_back(id);

        let result = inner.teardown(conn, id).await;
        if !inner.is_closed() && inner.config.min_idle > 0 {
            let weak = Arc::downgrade(inner);
            tokio::spawn(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.ensure_min_idle().await;
                }
            });
        }
        result
    }

    /// Stop handing out connections and wait for checked-out ones to come back
    ///
    /// Pending acquirers fail with [`PoolError::Closed`]. Connections still being
    /// opened are waited for and torn down.
    pub async fn drain(&self) {
        let inner = &self.inner;
        if !inner.closed.swap(true, Ordering::SeqCst) {
            info!(pool_id = inner.id, checked_out = inner.checked_out.len(), "Draining connection pool");
        }
        inner.available.notify_waiters();
        if let Some(task) = inner.maintenance.lock().take() {
            task.abort();
        }

        loop {
            let returned = inner.returned.notified();
            tokio::pin!(returned);
            returned.as_mut().enable();
            if inner.checked_out.is_empty() && !inner.has_claims() {
                break;
            }
            returned.await;
        }
    }

    /// Tear down every idle connection
    ///
    /// Teardown failures are logged and do not stop the sweep.
    pub async fn clear(&self) {
        let inner = &self.inner;
        let entries: Vec<_> = inner.idle.lock().drain(..).collect();
        let failures = inner.teardown_all(entries).await;
        if failures > 0 {
            error!(pool_id = inner.id, failures, "Some connections could not be closed while clearing the pool");
        }
    }

    /// Run one idle sweep now, returning the number of evicted connections
    pub async fn evict_idle(&self) -> usize {
        self.inner.evict_idle().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Idle plus checked-out connections
    pub fn live_count(&self) -> usize {
        self.inner.live_count()
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    pub fn checked_out_count(&self) -> usize {
        self.inner.checked_out.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.inner.waiting.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.inner.config
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        HealthStatus::new(
            self.idle_count(),
            self.checked_out_count(),
            self.waiting_count(),
            self.inner.config.max_total,
        )
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        self.inner.metrics.get_metrics(
            self.idle_count(),
            self.checked_out_count(),
            self.waiting_count(),
            self.inner.config.max_total,
        )
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }
}
