//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Default idle threshold past which a pooled connection may be evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of releases between eviction passes.
pub const DEFAULT_CLEAN_INTERVAL: u32 = 100;

/// Configuration for one connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Floor the eviction pass never shrinks the pool below.
    pub min_connections: u32,

    /// Maximum number of live connections (idle plus leased).
    ///
    /// `None` means the pool is fixed at `min_connections`.
    pub max_connections: Option<u32>,

    /// Idle time after which a connection becomes an eviction candidate.
    pub idle_timeout: Duration,

    /// Number of releases between eviction passes.
    pub clean_interval: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            clean_interval: DEFAULT_CLEAN_INTERVAL,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = Some(count);
        self
    }

    /// Set the idle eviction threshold.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set how many releases happen between eviction passes.
    #[must_use]
    pub fn clean_interval(mut self, releases: u32) -> Self {
        self.clean_interval = releases;
        self
    }

    /// Effective minimum pool size.
    #[must_use]
    pub fn min_size(&self) -> u32 {
        self.min_connections
    }

    /// Effective maximum pool size.
    #[must_use]
    pub fn max_size(&self) -> u32 {
        self.max_connections.unwrap_or(self.min_connections)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size() == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_size() {
            return Err(PoolError::Configuration(
                "min_connections cannot be greater than max_connections".into(),
            ));
        }
        if self.clean_interval == 0 {
            return Err(PoolError::Configuration(
                "clean_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
