//! Named pool registry.
//!
//! Pools are registered during startup through `&mut PoolRegistry`. Once the
//! registry is shared, typically behind an `Arc` in application state, it can
//! only be read, so lookups need no locking.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::lifecycle::Connection;
use crate::lock::{LockStrategy, Threaded};
use crate::pool::{Lease, Pool};
use crate::proxy::Proxy;

/// Table of pools keyed by resource name.
pub struct PoolRegistry<C: Connection, S: LockStrategy = Threaded> {
    pools: HashMap<Arc<str>, Pool<C, S>>,
}

impl<C: Connection, S: LockStrategy> PoolRegistry<C, S> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: HashMap::new(),
        }
    }

    /// Build and register a pool under `name`.
    ///
    /// The pool is only inserted once fully constructed. Fails if the
    /// configuration is invalid or `name` is already taken.
    pub fn register<F>(&mut self, name: &str, config: PoolConfig, factory: F) -> Result<()>
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        if self.pools.contains_key(name) {
            return Err(PoolError::Configuration(format!(
                "a pool is already registered under `{name}`"
            )));
        }

        let pool = Pool::with_name(name, config, factory)?;
        tracing::info!(pool = name, "pool registered");
        self.pools.insert(Arc::from(name), pool);
        Ok(())
    }

    /// Look up the pool registered under `name`.
    pub fn get(&self, name: &str) -> Result<&Pool<C, S>> {
        self.pools
            .get(name)
            .ok_or_else(|| PoolError::Configuration(format!("no pool registered under `{name}`")))
    }

    /// Lease a connection from the pool registered under `name`.
    pub fn lease(&self, name: &str) -> Result<Lease<C, S>> {
        self.get(name)?.lease()
    }

    /// Create a lazy proxy for the pool registered under `name`.
    pub fn proxy(&self, name: &str) -> Result<Proxy<C, S>> {
        self.get(name).map(|pool| Proxy::new(pool.clone()))
    }

    /// Registered resource names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(|name| &**name)
    }

    /// Number of registered pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether no pool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Close every registered pool.
    pub fn close_all(&self) {
        for pool in self.pools.values() {
            pool.close();
        }
    }
}

impl<C: Connection, S: LockStrategy> Default for PoolRegistry<C, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection, S: LockStrategy> fmt::Debug for PoolRegistry<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.pools.iter()).finish()
    }
}
