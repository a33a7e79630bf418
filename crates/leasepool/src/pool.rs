//! Connection pool implementation.
//!
//! The pool keeps a bounded set of connections for one resource. Idle
//! connections sit in a freelist ordered freshest first; leasing pops the
//! warmest one, releasing puts it back in idle order, and every
//! `clean_interval` releases an eviction pass closes connections idle past
//! the configured threshold without shrinking the pool below its floor.
//!
//! Capacity is never waited on. A lease at capacity fails immediately with
//! [`PoolError::Exhausted`].

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::lifecycle::{Connection, ConnectionMetadata};
use crate::lock::{Cooperative, LockStrategy, StateLock, Threaded};

type Factory<C> = Box<dyn Fn() -> C + Send + Sync>;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// A pool whose state is not synchronised, for single-threaded schedulers.
pub type LocalPool<C> = Pool<C, Cooperative>;

/// A bounded pool of reusable connections.
///
/// `Pool` is a cheap handle; clones share the same connections.
///
/// # Example
///
/// ```rust,ignore
/// use leasepool::{Pool, PoolConfig};
///
/// let pool = Pool::builder()
///     .name("main")
///     .min_connections(2)
///     .max_connections(10)
///     .build(|| MyConnection::new("db.internal:5432"))?;
///
/// let mut conn = pool.lease()?;
/// conn.execute("UPDATE ...")?;
/// // Returned to the pool when `conn` goes out of scope.
/// ```
pub struct Pool<C: Connection, S: LockStrategy = Threaded> {
    inner: Arc<PoolInner<C, S>>,
}

struct PoolInner<C: Connection, S: LockStrategy> {
    /// Process-unique, unlike `name`.
    id: u64,
    name: Arc<str>,
    config: PoolConfig,
    factory: Factory<C>,
    created_at: Instant,
    state: S::Lock<PoolState<C>>,
}

/// A connection plus the bookkeeping the pool keeps for it.
struct Pooled<C> {
    conn: C,
    meta: ConnectionMetadata,
}

struct PoolState<C> {
    /// Idle connections, least idle first.
    freelist: VecDeque<Pooled<C>>,
    /// Connections currently leased out.
    outstanding: u32,
    /// Releases since the last eviction pass.
    release_count: u32,
    next_connection_id: u64,
    closed: bool,
    metrics: PoolMetricsInner,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    leases_successful: u64,
    leases_exhausted: u64,
    pings_failed: u64,
    reconnects_failed: u64,
    resets_failed: u64,
    connections_evicted: u64,
    eviction_passes: u64,
}

impl<C: Connection> PoolState<C> {
    fn new() -> Self {
        Self {
            freelist: VecDeque::new(),
            outstanding: 0,
            release_count: 0,
            next_connection_id: 1,
            closed: false,
            metrics: PoolMetricsInner::default(),
        }
    }

    fn available(&self) -> u32 {
        self.freelist.len() as u32
    }

    fn total(&self) -> u32 {
        self.available() + self.outstanding
    }

    /// Insert keeping the freelist ordered by ascending idle time.
    fn enter(&mut self, pooled: Pooled<C>) {
        let idle = pooled.conn.idle();
        match self.freelist.iter().position(|p| p.conn.idle() > idle) {
            Some(index) => self.freelist.insert(index, pooled),
            None => self.freelist.push_back(pooled),
        }
    }

    /// Count one release; returns true when an eviction pass is due.
    fn tick(&mut self, clean_interval: u32) -> bool {
        self.release_count += 1;
        if self.release_count >= clean_interval {
            self.release_count = 0;
            true
        } else {
            false
        }
    }

    /// Unlink connections idle past the threshold, within the budget that
    /// keeps the pool at or above `min_connections`.
    fn take_idle(&mut self, config: &PoolConfig) -> Vec<Pooled<C>> {
        let total = self.total();
        let min = config.min_size();
        if total <= min || self.freelist.is_empty() {
            return Vec::new();
        }

        let budget = (total - min) as usize;
        let mut victims = Vec::new();
        let mut index = 0;
        while index < self.freelist.len() && victims.len() < budget {
            if self.freelist[index].conn.idle() > config.idle_timeout {
                victims.extend(self.freelist.remove(index));
            } else {
                index += 1;
            }
        }

        if !victims.is_empty() {
            self.metrics.eviction_passes += 1;
        }
        self.metrics.connections_evicted += victims.len() as u64;
        self.metrics.connections_closed += victims.len() as u64;
        victims
    }
}

/// What `lease` found under the lock.
enum Slot<C> {
    Idle(Pooled<C>),
    New(u64),
}

/// A slot counted in `outstanding` with no lease holding it yet.
///
/// Dropping an armed reservation frees the slot, so an error or a panic in
/// connection code between reserving and handing out a lease cannot leak
/// capacity.
struct Reservation<'a, C: Connection, S: LockStrategy> {
    pool: &'a Pool<C, S>,
    armed: bool,
}

impl<'a, C: Connection, S: LockStrategy> Reservation<'a, C, S> {
    fn new(pool: &'a Pool<C, S>) -> Self {
        Self { pool, armed: true }
    }

    /// The slot is now accounted for elsewhere.
    fn keep(mut self) {
        self.armed = false;
    }
}

impl<C: Connection, S: LockStrategy> Drop for Reservation<'_, C, S> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.inner.state.with(|state| state.outstanding -= 1);
        }
    }
}

impl<C: Connection, S: LockStrategy> Pool<C, S> {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder<C, S> {
        PoolBuilder::new()
    }

    /// Create a new pool with the given configuration.
    ///
    /// `factory` constructs a fresh, not yet connected, connection each time
    /// the pool needs to grow.
    pub fn new<F>(config: PoolConfig, factory: F) -> Result<Self>
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        Self::with_name("pool", config, factory)
    }

    /// Create a new pool identified by `name` in logs.
    pub fn with_name<F>(
        name: impl Into<Arc<str>>,
        config: PoolConfig,
        factory: F,
    ) -> Result<Self>
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        config.validate()?;
        let name = name.into();

        tracing::info!(
            pool = %name,
            min = config.min_size(),
            max = config.max_size(),
            idle_timeout = ?config.idle_timeout,
            "connection pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                name,
                config,
                factory: Box::new(factory),
                created_at: Instant::now(),
                state: <S::Lock<PoolState<C>> as StateLock<_>>::new(PoolState::new()),
            }),
        })
    }

    /// Lease a connection.
    ///
    /// Prefers the least idle connection in the freelist, pinging it first
    /// and reconnecting if the ping fails. With no idle connection and spare
    /// capacity, a new connection is created and connected. Otherwise fails
    /// with [`PoolError::Exhausted`] without waiting.
    ///
    /// If an idle connection fails to reconnect, its slot is freed before
    /// [`PoolError::Reconnect`] is returned, and the connection is closed
    /// instead of going back to the freelist.
    pub fn lease(&self) -> Result<Lease<C, S>> {
        let inner = &*self.inner;
        let max = inner.config.max_size();

        let (slot, available, total) = inner.state.with(|state| {
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            let slot = if let Some(pooled) = state.freelist.pop_front() {
                Slot::Idle(pooled)
            } else if state.total() < max {
                let id = state.next_connection_id;
                state.next_connection_id += 1;
                Slot::New(id)
            } else {
                state.metrics.leases_exhausted += 1;
                return Err(PoolError::Exhausted { max });
            };
            state.outstanding += 1;
            Ok((slot, state.available(), state.total()))
        })
        .inspect_err(|e| {
            if e.is_exhausted() {
                tracing::warn!(pool = %inner.name, max, "connection pool exhausted");
            }
        })?;

        let reservation = Reservation::new(self);
        let mut pooled = match slot {
            Slot::Idle(pooled) => self.revive(pooled)?,
            Slot::New(id) => self.open(id)?,
        };
        reservation.keep();

        pooled.meta.mark_checkout();
        inner.state.with(|state| state.metrics.leases_successful += 1);
        tracing::debug!(
            pool = %inner.name,
            connection_id = pooled.meta.id,
            available,
            total,
            "connection leased"
        );

        Ok(Lease {
            pooled: Some(pooled),
            pool: self.clone(),
        })
    }

    /// Ping an idle connection, reconnecting it if it is dead. On error the
    /// caller's reservation frees the slot.
    fn revive(&self, mut pooled: Pooled<C>) -> Result<Pooled<C>> {
        if pooled.conn.ping() {
            return Ok(pooled);
        }

        let inner = &*self.inner;
        inner.state.with(|state| state.metrics.pings_failed += 1);
        tracing::warn!(
            pool = %inner.name,
            connection_id = pooled.meta.id,
            "idle connection failed ping, reconnecting"
        );

        match pooled.conn.connect() {
            Ok(()) => Ok(pooled),
            Err(e) => {
                inner.state.with(|state| {
                    state.metrics.reconnects_failed += 1;
                    state.metrics.connections_closed += 1;
                });
                tracing::warn!(
                    pool = %inner.name,
                    connection_id = pooled.meta.id,
                    error = %e,
                    "reconnect failed, dropping connection"
                );
                self.shut(pooled);
                Err(PoolError::Reconnect(Box::new(e)))
            }
        }
    }

    /// Build and connect a connection for a slot already reserved. On error
    /// the caller's reservation frees the slot.
    fn open(&self, id: u64) -> Result<Pooled<C>> {
        let inner = &*self.inner;
        let mut conn = (inner.factory)();

        match conn.connect() {
            Ok(()) => {
                inner.state.with(|state| state.metrics.connections_created += 1);
                tracing::debug!(
                    pool = %inner.name,
                    connection_id = id,
                    "new connection opened"
                );
                Ok(Pooled {
                    conn,
                    meta: ConnectionMetadata::new(id),
                })
            }
            Err(e) => {
                tracing::warn!(pool = %inner.name, error = %e, "failed to open connection");
                Err(PoolError::ConnectionCreation(Box::new(e)))
            }
        }
    }

    /// Take a connection back from a lease. `None` means the borrower
    /// discarded it as broken.
    fn checkin(&self, pooled: Option<Pooled<C>>) {
        let inner = &*self.inner;
        let clean_interval = inner.config.clean_interval;

        let Some(mut pooled) = pooled else {
            let (due, available, total) = inner.state.with(|state| {
                state.outstanding -= 1;
                state.metrics.connections_closed += 1;
                (state.tick(clean_interval), state.available(), state.total())
            });
            tracing::debug!(
                pool = %inner.name,
                available,
                total,
                "broken connection discarded"
            );
            if due {
                self.evict_idle();
            }
            return;
        };

        let reservation = Reservation::new(self);
        let reset = pooled.conn.make_reusable();
        reservation.keep();

        if let Err(e) = reset {
            let err = PoolError::ResetFailed(Box::new(e));
            let (due, total) = inner.state.with(|state| {
                state.outstanding -= 1;
                state.metrics.resets_failed += 1;
                state.metrics.connections_closed += 1;
                (state.tick(clean_interval), state.total())
            });
            tracing::warn!(
                pool = %inner.name,
                connection_id = pooled.meta.id,
                error = %err,
                total,
                "dropping connection that could not be made reusable"
            );
            self.shut(pooled);
            if due {
                self.evict_idle();
            }
            return;
        }

        pooled.meta.mark_checkin();
        let id = pooled.meta.id;
        let outcome = inner.state.with(|state| {
            state.outstanding -= 1;
            if state.closed {
                state.metrics.connections_closed += 1;
                return Err(pooled);
            }
            state.enter(pooled);
            Ok((state.tick(clean_interval), state.available(), state.total()))
        });

        match outcome {
            Ok((due, available, total)) => {
                tracing::debug!(
                    pool = %inner.name,
                    connection_id = id,
                    available,
                    total,
                    "connection returned"
                );
                if due {
                    self.evict_idle();
                }
            }
            Err(pooled) => {
                tracing::debug!(
                    pool = %inner.name,
                    connection_id = id,
                    "pool closed, closing returned connection"
                );
                self.shut(pooled);
            }
        }
    }

    /// Run an eviction pass now, returning how many connections it closed.
    ///
    /// This happens automatically every `clean_interval` releases. The pass
    /// closes at most `total - min_connections` connections, picking those
    /// idle longer than `idle_timeout` in freelist order.
    pub fn evict_idle(&self) -> usize {
        let inner = &*self.inner;
        let (victims, available, total) = inner.state.with(|state| {
            let victims = state.take_idle(&inner.config);
            (victims, state.available(), state.total())
        });

        if victims.is_empty() {
            tracing::trace!(
                pool = %inner.name,
                available,
                total,
                "no idle connections to evict"
            );
            return 0;
        }

        let evicted = victims.len();
        for pooled in victims {
            self.shut(pooled);
        }
        tracing::debug!(
            pool = %inner.name,
            evicted,
            available,
            total,
            "evicted idle connections"
        );
        evicted
    }

    /// Close a connection the pool no longer tracks. Failures are logged.
    fn shut(&self, mut pooled: Pooled<C>) {
        if let Err(e) = pooled.conn.close() {
            tracing::warn!(
                pool = %self.inner.name,
                connection_id = pooled.meta.id,
                error = %e,
                "failed to close connection"
            );
        }
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let (available, in_use) = self
            .inner
            .state
            .with(|state| (state.available(), state.outstanding));
        PoolStatus {
            available,
            in_use,
            total: available + in_use,
            max: self.inner.config.max_size(),
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.state.with(|state| {
            let m = &state.metrics;
            PoolMetrics {
                connections_created: m.connections_created,
                connections_closed: m.connections_closed,
                leases_successful: m.leases_successful,
                leases_exhausted: m.leases_exhausted,
                pings_failed: m.pings_failed,
                reconnects_failed: m.reconnects_failed,
                resets_failed: m.resets_failed,
                connections_evicted: m.connections_evicted,
                eviction_passes: m.eviction_passes,
                uptime: self.inner.created_at.elapsed(),
            }
        })
    }

    /// Close the pool.
    ///
    /// Idle connections are closed now; leased ones are closed as they come
    /// back. Further leases fail with [`PoolError::PoolClosed`].
    pub fn close(&self) {
        let idle = self.inner.state.with(|state| {
            state.closed = true;
            state.metrics.connections_closed += state.freelist.len() as u64;
            std::mem::take(&mut state.freelist)
        });
        let closed = idle.len();
        for pooled in idle {
            self.shut(pooled);
        }
        tracing::info!(pool = %self.inner.name, closed, "connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.with(|state| state.closed)
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Name used for this pool in logs and in the registry.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Identity shared by all clones of this pool and by no other pool.
    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }
}

impl<C: Connection, S: LockStrategy> Clone for Pool<C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection, S: LockStrategy> fmt::Debug for Pool<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

impl<C: Connection, S: LockStrategy> Drop for PoolInner<C, S> {
    fn drop(&mut self) {
        let idle = self
            .state
            .with(|state| std::mem::take(&mut state.freelist));
        for mut pooled in idle {
            if let Err(e) = pooled.conn.close() {
                tracing::warn!(
                    pool = %self.name,
                    connection_id = pooled.meta.id,
                    error = %e,
                    "failed to close connection"
                );
            }
        }
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool: Pool<MyConnection> = Pool::builder()
///     .name("reports")
///     .max_connections(4)
///     .build(MyConnection::new)?;
/// ```
pub struct PoolBuilder<C, S = Threaded> {
    name: Arc<str>,
    pool_config: PoolConfig,
    _marker: PhantomData<fn() -> (C, S)>,
}

impl<C: Connection, S: LockStrategy> PoolBuilder<C, S> {
    /// Create a new pool builder with default settings.
    pub fn new() -> Self {
        Self {
            name: Arc::from("pool"),
            pool_config: PoolConfig::default(),
            _marker: PhantomData,
        }
    }

    /// Set the name used in logs.
    #[must_use]
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.pool_config.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.pool_config.max_connections = Some(count);
        self
    }

    /// Set the idle eviction threshold.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.idle_timeout = timeout;
        self
    }

    /// Set how many releases happen between eviction passes.
    #[must_use]
    pub fn clean_interval(mut self, releases: u32) -> Self {
        self.pool_config.clean_interval = releases;
        self
    }

    /// Build the pool.
    pub fn build<F>(self, factory: F) -> Result<Pool<C, S>>
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        Pool::with_name(self.name, self.pool_config, factory)
    }
}

impl<C: Connection, S: LockStrategy> fmt::Debug for PoolBuilder<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("name", &self.name)
            .field("pool_config", &self.pool_config)
            .finish()
    }
}

impl<C: Connection, S: LockStrategy> Default for PoolBuilder<C, S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently leased.
    pub in_use: u32,
    /// Total number of connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections closed or dropped since pool start.
    pub connections_closed: u64,
    /// Successful leases.
    pub leases_successful: u64,
    /// Leases refused because the pool was at capacity.
    pub leases_exhausted: u64,
    /// Idle connections that failed their ping.
    pub pings_failed: u64,
    /// Idle connections that then failed to reconnect.
    pub reconnects_failed: u64,
    /// Returned connections that could not be made reusable.
    pub resets_failed: u64,
    /// Connections closed by eviction passes.
    pub connections_evicted: u64,
    /// Eviction passes that closed at least one connection.
    pub eviction_passes: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate lease success rate (0.0 to 1.0).
    #[must_use]
    pub fn lease_success_rate(&self) -> f64 {
        let total = self.leases_successful + self.leases_exhausted;
        if total == 0 {
            return 1.0;
        }
        self.leases_successful as f64 / total as f64
    }
}

/// A connection leased from a pool.
///
/// Derefs to the connection. When the lease is dropped, or explicitly
/// [released](Lease::release), the connection goes back to the pool; this
/// happens exactly once, on every exit path including unwinding.
pub struct Lease<C: Connection, S: LockStrategy = Threaded> {
    pooled: Option<Pooled<C>>,
    pool: Pool<C, S>,
}

impl<C: Connection, S: LockStrategy> Lease<C, S> {
    /// Pool-assigned connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.pooled().meta.id
    }

    /// Get the connection metadata.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.pooled().meta
    }

    /// Whether the connection could go back to the pool right now.
    #[must_use]
    pub fn is_reusable(&self) -> bool {
        self.pooled().conn.is_reusable()
    }

    /// The pool this lease came from.
    #[must_use]
    pub fn pool(&self) -> &Pool<C, S> {
        &self.pool
    }

    /// Return the connection to the pool now.
    pub fn release(mut self) {
        self.release_inner();
    }

    /// Give up a connection known to be broken.
    ///
    /// The connection is closed and its slot freed; it never re-enters the
    /// freelist.
    pub fn discard(mut self) {
        if let Some(pooled) = self.pooled.take() {
            self.pool.shut(pooled);
            self.pool.checkin(None);
        }
    }

    fn release_inner(&mut self) {
        if let Some(pooled) = self.pooled.take() {
            self.pool.checkin(Some(pooled));
        }
    }

    #[allow(clippy::expect_used)]
    fn pooled(&self) -> &Pooled<C> {
        self.pooled.as_ref().expect("lease holds its connection until released")
    }

    #[allow(clippy::expect_used)]
    fn pooled_mut(&mut self) -> &mut Pooled<C> {
        self.pooled.as_mut().expect("lease holds its connection until released")
    }
}

impl<C: Connection, S: LockStrategy> Deref for Lease<C, S> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.pooled().conn
    }
}

impl<C: Connection, S: LockStrategy> DerefMut for Lease<C, S> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.pooled_mut().conn
    }
}

impl<C: Connection, S: LockStrategy> fmt::Debug for Lease<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("pool", &self.pool.inner.name)
            .field("connection_id", &self.pooled.as_ref().map(|p| p.meta.id))
            .finish()
    }
}

impl<C: Connection, S: LockStrategy> Drop for Lease<C, S> {
    fn drop(&mut self) {
        self.release_inner();
    }
}
