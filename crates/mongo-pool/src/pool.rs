//! The pool store and the acquire/release protocol.
//!
//! Idle handles live in a fixed-capacity MPMC queue, so the capacity
//! invariant holds by construction. A single async lock guards only the
//! create-vs-reuse decision; draining the queue relies on its own atomic
//! take, so concurrent acquirers interleave freely but can never observe
//! the same handle.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::{CapacityMode, PoolConfig, ShutdownPolicy};
use crate::connector::{Connector, MongoConnector};
use crate::error::PoolError;
use crate::report::{self, ErrorReporter, ErrorStream};

/// A connection pool over the official MongoDB client.
pub type MongoPool = Pool<MongoConnector>;

/// A bounded pool of reusable connection handles.
///
/// Cloning the pool is cheap and yields another handle to the same store.
///
/// # Example
///
/// ```rust,ignore
/// use mongo_pool::{MongoPool, PoolConfig};
///
/// let config = PoolConfig::new()
///     .address("mongodb://localhost:27017")
///     .database("orders")
///     .max_pool_size(20);
///
/// let (pool, mut errors) = MongoPool::new(config)?;
///
/// let mut conn = pool.acquire().await?;
/// // Use the connection...
/// pool.release(&mut conn).await?;
///
/// pool.close_all().await?;
/// ```
pub struct Pool<C: Connector> {
    connector: Arc<C>,
    inner: Arc<PoolInner<C::Conn>>,
    config: PoolConfig,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            connector: Arc::clone(&self.connector),
            inner: Arc::clone(&self.inner),
            config: self.config.clone(),
        }
    }
}

struct PoolInner<T> {
    /// Deposit side of the idle store.
    deposits: flume::Sender<Slot<T>>,

    /// Take side of the idle store.
    idle: flume::Receiver<Slot<T>>,

    /// Accounted creations; monotonically increasing, never above capacity.
    created: AtomicU32,

    /// Counter for generating connection ids.
    next_id: AtomicU64,

    /// Whether the pool has been shut down.
    closed: AtomicBool,

    /// Guards only the create-vs-reuse decision; held across the factory
    /// call so concurrent acquirers cannot both decide to create the same
    /// capacity slot.
    decision: AsyncMutex<()>,

    /// When the pool was created.
    created_at: Instant,

    /// Sending half of the pool's error channel.
    reporter: ErrorReporter,

    /// Pool metrics.
    metrics: Mutex<MetricsInner>,
}

/// An idle or checked-out connection together with its pool bookkeeping.
struct Slot<T> {
    id: u64,
    accounted: bool,
    conn: T,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct MetricsInner {
    created_accounted: u64,
    created_fallback: u64,
    checkouts_ok: u64,
    checkouts_failed: u64,
    probes_performed: u64,
    probes_failed: u64,
    deposits_discarded: u64,
    guards_dropped: u64,
}

impl MongoPool {
    /// Create a pool for the configured MongoDB deployment.
    ///
    /// No connection is opened yet; handles are created lazily on first
    /// acquisition. The returned [`ErrorStream`] is the subscriber side of
    /// the pool's asynchronous error channel.
    pub fn new(config: PoolConfig) -> Result<(Self, ErrorStream), PoolError> {
        config.validate()?;
        let config = config.normalized();
        let connector = MongoConnector::new(config.clone());
        Self::with_connector(config, connector)
    }
}

impl<C: Connector> Pool<C> {
    /// Create a pool over a custom connector.
    pub fn with_connector(
        config: PoolConfig,
        connector: C,
    ) -> Result<(Self, ErrorStream), PoolError> {
        config.validate()?;
        let config = config.normalized();

        let (deposits, idle) = flume::bounded(config.max_pool_size as usize);
        let (reporter, errors) = report::channel(config.error_buffer);
        let inner = Arc::new(PoolInner {
            deposits,
            idle,
            created: AtomicU32::new(0),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            decision: AsyncMutex::new(()),
            created_at: Instant::now(),
            reporter,
            metrics: Mutex::new(MetricsInner::default()),
        });

        tracing::info!(max = config.max_pool_size, "connection pool created");

        let pool = Self {
            connector: Arc::new(connector),
            inner,
            config,
        };
        Ok((pool, errors))
    }

    /// Get a ready-to-use connection from the pool.
    ///
    /// Reuses an idle handle when one probes healthy, creates a new one
    /// while under capacity, and otherwise waits up to the configured
    /// acquisition budget for a release. What happens once that budget is
    /// spent depends on [`CapacityMode`].
    pub async fn acquire(&self) -> Result<PooledConn<C::Conn>, PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            self.inner.metrics.lock().checkouts_failed += 1;
            return Err(PoolError::PoolClosed);
        }

        tracing::trace!("acquiring connection from pool");

        {
            let _decision = self.inner.decision.lock().await;
            let created = self.inner.created.load(Ordering::Acquire);
            if self.inner.idle.is_empty() && created < self.config.max_pool_size {
                return match self.connector.connect().await {
                    Ok(conn) => {
                        self.inner.created.fetch_add(1, Ordering::AcqRel);
                        let slot = self.new_slot(conn, true);
                        let mut metrics = self.inner.metrics.lock();
                        metrics.created_accounted += 1;
                        metrics.checkouts_ok += 1;
                        drop(metrics);
                        tracing::debug!(id = slot.id, created = created + 1, "opened pooled connection");
                        Ok(self.guard(slot))
                    }
                    Err(error) => {
                        self.inner.metrics.lock().checkouts_failed += 1;
                        Err(error)
                    }
                };
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.acquire_timeout;
        loop {
            let slot = match tokio::time::timeout_at(deadline, self.inner.idle.recv_async()).await {
                Ok(Ok(slot)) => slot,
                // Wait budget spent, or the store is gone.
                Ok(Err(_)) | Err(_) => break,
            };
            self.inner.metrics.lock().probes_performed += 1;
            match self.connector.probe(&slot.conn).await {
                Ok(()) => {
                    self.inner.metrics.lock().checkouts_ok += 1;
                    tracing::trace!(id = slot.id, "reusing pooled connection");
                    return Ok(self.guard(slot));
                }
                Err(error) => {
                    self.inner.metrics.lock().probes_failed += 1;
                    tracing::debug!(id = slot.id, error = %error, "discarding unhealthy idle connection");
                }
            }
        }

        self.acquire_fallback().await
    }

    /// Take an idle connection if one is immediately available and healthy.
    pub async fn try_acquire(&self) -> Result<Option<PooledConn<C::Conn>>, PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }
        loop {
            let Ok(slot) = self.inner.idle.try_recv() else {
                return Ok(None);
            };
            self.inner.metrics.lock().probes_performed += 1;
            match self.connector.probe(&slot.conn).await {
                Ok(()) => {
                    self.inner.metrics.lock().checkouts_ok += 1;
                    return Ok(Some(self.guard(slot)));
                }
                Err(error) => {
                    self.inner.metrics.lock().probes_failed += 1;
                    tracing::debug!(id = slot.id, error = %error, "discarding unhealthy idle connection");
                }
            }
        }
    }

    /// Return a connection to the pool.
    ///
    /// The handle is probed first: a failed probe discards it and returns
    /// the probe's error. The deposit itself never blocks; if the store is
    /// already at capacity, the surplus handle is discarded and metered.
    pub async fn release(&self, conn: &mut PooledConn<C::Conn>) -> Result<(), PoolError> {
        let slot = conn.slot.take().ok_or(PoolError::InvalidHandle)?;

        if self.inner.closed.load(Ordering::Acquire) {
            tracing::debug!(id = slot.id, "pool closed, dropping released connection");
            return Err(PoolError::PoolClosed);
        }

        self.inner.metrics.lock().probes_performed += 1;
        if let Err(error) = self.connector.probe(&slot.conn).await {
            self.inner.metrics.lock().probes_failed += 1;
            tracing::debug!(id = slot.id, error = %error, "released connection failed probe, discarding");
            return Err(error);
        }

        match self.inner.deposits.try_send(slot) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Full(slot)) => {
                // Capacity is already satisfied; the surplus handle goes away.
                self.inner.metrics.lock().deposits_discarded += 1;
                tracing::warn!(id = slot.id, "pool store full, discarding overflow connection");
                Ok(())
            }
            Err(flume::TrySendError::Disconnected(slot)) => {
                tracing::debug!(id = slot.id, "pool store gone, dropping connection");
                Err(PoolError::PoolClosed)
            }
        }
    }

    /// Shut the pool down.
    ///
    /// Stops accepting acquisitions and deposits, then disconnects every
    /// idle handle. With [`ShutdownPolicy::DrainAll`] every handle is
    /// attempted and all failures are aggregated; with
    /// [`ShutdownPolicy::FailFast`] draining stops at the first failure
    /// and the remaining handles are left connected. Idempotent.
    pub async fn close_all(&self) -> Result<(), PoolError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::info!("closing connection pool");

        let mut drained = 0u32;
        let mut errors = Vec::new();
        while let Ok(slot) = self.inner.idle.try_recv() {
            let Slot { id, conn, .. } = slot;
            match self.connector.disconnect(conn).await {
                Ok(()) => drained += 1,
                Err(error) => {
                    tracing::warn!(id, error = %error, "failed to disconnect idle connection");
                    errors.push(error);
                    if self.config.shutdown == ShutdownPolicy::FailFast {
                        break;
                    }
                }
            }
        }

        tracing::info!(drained, failures = errors.len(), "connection pool closed");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PoolError::Disconnect { errors })
        }
    }

    /// Check whether the pool has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// The pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// A reporter handle for the pool's error channel.
    #[must_use]
    pub fn error_reporter(&self) -> ErrorReporter {
        self.inner.reporter.clone()
    }

    /// A snapshot of the current pool state.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            idle: self.inner.idle.len() as u32,
            created: self.inner.created.load(Ordering::Acquire),
            max: self.config.max_pool_size,
        }
    }

    /// A snapshot of the pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            created_accounted: inner.created_accounted,
            created_fallback: inner.created_fallback,
            checkouts_ok: inner.checkouts_ok,
            checkouts_failed: inner.checkouts_failed,
            probes_performed: inner.probes_performed,
            probes_failed: inner.probes_failed,
            deposits_discarded: inner.deposits_discarded,
            guards_dropped: inner.guards_dropped,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Exhausted-pool path: overflow or refuse, per the capacity mode.
    async fn acquire_fallback(&self) -> Result<PooledConn<C::Conn>, PoolError> {
        match self.config.capacity {
            CapacityMode::Hard => {
                self.inner.metrics.lock().checkouts_failed += 1;
                Err(PoolError::Acquisition(format!(
                    "no healthy idle connection within {:?} and capacity is exhausted",
                    self.config.acquire_timeout
                )))
            }
            CapacityMode::Soft => match self.connector.connect().await {
                Ok(conn) => {
                    let slot = self.new_slot(conn, false);
                    let mut metrics = self.inner.metrics.lock();
                    metrics.created_fallback += 1;
                    metrics.checkouts_ok += 1;
                    drop(metrics);
                    tracing::warn!(id = slot.id, "pool exhausted, opened unaccounted overflow connection");
                    Ok(self.guard(slot))
                }
                Err(error) => {
                    self.inner.metrics.lock().checkouts_failed += 1;
                    Err(error)
                }
            },
        }
    }

    fn new_slot(&self, conn: C::Conn, accounted: bool) -> Slot<C::Conn> {
        Slot {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            accounted,
            conn,
        }
    }

    fn guard(&self, slot: Slot<C::Conn>) -> PooledConn<C::Conn> {
        PooledConn {
            id: slot.id,
            slot: Some(slot),
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Number of idle handles currently in the store.
    pub idle: u32,
    /// Accounted handles created so far.
    pub created: u32,
    /// Maximum accounted handles.
    pub max: u32,
}

impl PoolStatus {
    /// Accounted handles currently checked out.
    #[must_use]
    pub fn in_use(&self) -> u32 {
        self.created.saturating_sub(self.idle)
    }

    /// Utilization of the accounted capacity, in percent.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.in_use()) / f64::from(self.max) * 100.0
    }

    /// Check whether every accounted capacity slot has been used.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.created >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Handles created within capacity.
    pub created_accounted: u64,
    /// Overflow handles created past capacity.
    pub created_fallback: u64,
    /// Successful acquisitions.
    pub checkouts_ok: u64,
    /// Failed acquisitions (closed pool, factory failure, exhaustion).
    pub checkouts_failed: u64,
    /// Liveness probes performed.
    pub probes_performed: u64,
    /// Liveness probes that failed.
    pub probes_failed: u64,
    /// Healthy handles discarded because the store was full on release.
    pub deposits_discarded: u64,
    /// Guards dropped without an explicit release.
    pub guards_dropped: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_ok + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_ok as f64 / total as f64
    }

    /// Probe success rate (0.0 to 1.0).
    #[must_use]
    pub fn probe_success_rate(&self) -> f64 {
        if self.probes_performed == 0 {
            return 1.0;
        }
        let successful = self.probes_performed - self.probes_failed;
        successful as f64 / self.probes_performed as f64
    }
}

/// A connection checked out from the pool.
///
/// Return it with [`Pool::release`]; a guard dropped without release
/// discards its connection and is counted in the pool metrics.
pub struct PooledConn<T> {
    id: u64,
    slot: Option<Slot<T>>,
    inner: Arc<PoolInner<T>>,
}

impl<T> PooledConn<T> {
    /// The pool-assigned id of this connection.
    ///
    /// Stable across release and re-acquisition of the same handle.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this handle was created within the accounted capacity.
    #[must_use]
    pub fn is_accounted(&self) -> bool {
        self.slot.as_ref().is_some_and(|slot| slot.accounted)
    }

    /// Remove the connection from pool management.
    ///
    /// The connection will never return to the store; its capacity
    /// accounting is unaffected.
    #[must_use]
    pub fn detach(mut self) -> Option<T> {
        self.slot.take().map(|slot| slot.conn)
    }
}

impl<T> Deref for PooledConn<T> {
    type Target = T;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &T {
        let slot = self.slot.as_ref().expect("pooled connection used after release");
        &slot.conn
    }
}

impl<T> Drop for PooledConn<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.inner.metrics.lock().guards_dropped += 1;
            tracing::warn!(id = slot.id, "pooled connection dropped without release");
        }
    }
}
