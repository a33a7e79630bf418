//! # leasepool
//!
//! Bounded pool of reusable, stateful connections with transaction pinning.
//!
//! The pool is generic over any resource implementing [`Connection`]. It
//! caps the number of live connections, reuses the least idle one first,
//! evicts connections idle past a threshold, and never blocks: a lease at
//! capacity fails straight away with [`PoolError::Exhausted`].
//!
//! ## Features
//!
//! - RAII [`Lease`] handles that return their connection exactly once
//! - Ping on checkout with transparent reconnect
//! - Reset (`make_reusable`) on return
//! - Periodic idle eviction that never shrinks below `min_connections`
//! - [`Proxy`] + [`Context`] for per-context transaction pinning
//! - [`PoolRegistry`] for named pools
//! - [`Threaded`] or [`Cooperative`] locking, picked by type parameter
//! - Status and metrics for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use leasepool::{Context, PoolConfig, PoolRegistry};
//! use std::time::Duration;
//!
//! let mut registry = PoolRegistry::new();
//! registry.register(
//!     "main",
//!     PoolConfig::new()
//!         .min_connections(2)
//!         .max_connections(20)
//!         .idle_timeout(Duration::from_secs(300)),
//!     || PgSession::new("postgres://db.internal/app"),
//! )?;
//! let registry = Arc::new(registry);
//!
//! // Explicit lease: returned to the pool on drop.
//! let mut conn = registry.lease("main")?;
//! conn.query("SELECT 1")?;
//! drop(conn);
//!
//! // Lazy proxy: one context per request.
//! let main = registry.proxy("main")?;
//! let mut ctx = Context::new();
//! main.invoke(&mut ctx, |c| c.query("BEGIN"))?;
//! main.invoke(&mut ctx, |c| c.query("INSERT ..."))?;
//! main.invoke(&mut ctx, |c| c.query("COMMIT"))?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod pool;
pub mod proxy;
pub mod registry;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::{BoxError, PoolError, Result};

// Lifecycle management
pub use lifecycle::{Connection, ConnectionMetadata};

// Locking
pub use lock::{Cooperative, LockStrategy, StateLock, Threaded};

// Pool types
pub use pool::{Lease, LocalPool, Pool, PoolBuilder, PoolMetrics, PoolStatus};

// Proxy and registry
pub use proxy::{Context, Proxy};
pub use registry::PoolRegistry;
