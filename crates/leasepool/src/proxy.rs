//! Lazy connection proxy and per-context connection pinning.
//!
//! Call sites hold a [`Proxy`] for a resource and a [`Context`] for the
//! logical unit of work they run in (a request, a job, a task). Each
//! [`Proxy::invoke`] borrows a connection only for the duration of one
//! operation, unless the connection reports it is not reusable, which is
//! what an open transaction looks like. In that case the lease stays pinned
//! in the context and the next invocation from the same context picks up
//! the very same connection, until the transaction ends.
//!
//! ```rust,ignore
//! let users = registry.proxy("users")?;
//! let mut ctx = Context::new();
//!
//! users.invoke(&mut ctx, |c| c.execute("BEGIN"))?;        // pinned
//! users.invoke(&mut ctx, |c| c.execute("UPDATE ..."))?;   // same connection
//! users.invoke(&mut ctx, |c| c.execute("COMMIT"))?;       // returned to pool
//! ```

use std::collections::HashMap;
use std::fmt;

use crate::error::PoolError;
use crate::lifecycle::Connection;
use crate::lock::{LockStrategy, Threaded};
use crate::pool::{Lease, Pool};

/// Call-site facade that leases connections on demand.
pub struct Proxy<C: Connection, S: LockStrategy = Threaded> {
    pool: Pool<C, S>,
}

impl<C: Connection, S: LockStrategy> Proxy<C, S> {
    /// Create a proxy for `pool`.
    ///
    /// Contexts pin connections per pool, not per name: proxies for two
    /// pools never share a pin even if the pools have the same name.
    pub fn new(pool: Pool<C, S>) -> Self {
        Self { pool }
    }

    /// Name of the pool behind this proxy.
    #[must_use]
    pub fn name(&self) -> &str {
        self.pool.name()
    }

    /// The pool behind this proxy.
    #[must_use]
    pub fn pool(&self) -> &Pool<C, S> {
        &self.pool
    }

    /// Run `op` against a connection for this resource.
    ///
    /// Uses the connection pinned in `ctx` if there is one, otherwise
    /// leases a new one; a pool failure, exhaustion included, is converted
    /// into `E` and returned without retrying. After `op` returns, whether
    /// it succeeded or not, the connection is released if it is reusable
    /// and pinned in `ctx` if it is not. `op`'s result is returned as is.
    pub fn invoke<T, E, F>(&self, ctx: &mut Context<C, S>, op: F) -> Result<T, E>
    where
        F: FnOnce(&mut C) -> Result<T, E>,
        E: From<PoolError>,
    {
        let key = self.pool.id();
        let mut lease = match ctx.pinned.remove(&key) {
            Some(lease) => lease,
            None => self.pool.lease()?,
        };

        let result = op(&mut *lease);

        if lease.is_reusable() {
            tracing::trace!(
                pool = %self.name(),
                connection_id = lease.id(),
                "releasing connection"
            );
            lease.release();
        } else {
            tracing::trace!(
                pool = %self.name(),
                connection_id = lease.id(),
                "pinning connection to context"
            );
            ctx.pinned.insert(key, lease);
        }

        result
    }
}

impl<C: Connection, S: LockStrategy> Clone for Proxy<C, S> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<C: Connection, S: LockStrategy> fmt::Debug for Proxy<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy").field("name", &self.name()).finish()
    }
}

/// Connections pinned to one logical execution context.
///
/// Holds at most one lease per pool. Each context is owned by the
/// unit of work using it and lent to [`Proxy::invoke`] by `&mut`, so no two
/// contexts ever see each other's connections. Dropping the context releases
/// whatever it still pins; for a transactional connection that goes through
/// [`Connection::make_reusable`] like any other release.
pub struct Context<C: Connection, S: LockStrategy = Threaded> {
    /// Keyed by pool identity.
    pinned: HashMap<u64, Lease<C, S>>,
}

impl<C: Connection, S: LockStrategy> Context<C, S> {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pinned: HashMap::new(),
        }
    }

    /// Whether a connection from `proxy`'s pool is pinned here.
    #[must_use]
    pub fn is_pinned(&self, proxy: &Proxy<C, S>) -> bool {
        self.pinned.contains_key(&proxy.pool.id())
    }

    /// The lease pinned for `proxy`'s pool, if any.
    #[must_use]
    pub fn pinned(&self, proxy: &Proxy<C, S>) -> Option<&Lease<C, S>> {
        self.pinned.get(&proxy.pool.id())
    }

    /// Number of pinned connections.
    #[must_use]
    pub fn pinned_count(&self) -> usize {
        self.pinned.len()
    }

    /// Release every pinned connection back to its pool.
    pub fn release_all(&mut self) {
        for (_, lease) in self.pinned.drain() {
            lease.release();
        }
    }
}

impl<C: Connection, S: LockStrategy> Default for Context<C, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection, S: LockStrategy> fmt::Debug for Context<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field(
                "pinned",
                &self.pinned.values().map(|l| l.pool().name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
