//! Test fixture utilities.

use std::sync::Once;

use leasepool::{Cooperative, LockStrategy, Pool, PoolConfig, PoolError, Threaded};

use crate::mock_connection::{MockConnection, MockController};

/// A pool of mock connections together with the controller driving them.
pub struct MockPool<S: LockStrategy = Threaded> {
    /// The pool under test.
    pub pool: Pool<MockConnection, S>,
    /// Switches and counters for the pool's connections.
    pub ctl: MockController,
}

impl MockPool {
    /// Build a mock-backed pool named `mock`.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        Self::named("mock", config)
    }

    /// Build a mock-backed pool with a specific name.
    pub fn named(name: &str, config: PoolConfig) -> Result<Self, PoolError> {
        Self::build(name, config)
    }
}

impl MockPool<Cooperative> {
    /// Build a mock-backed pool with unsynchronised state.
    pub fn local(config: PoolConfig) -> Result<Self, PoolError> {
        Self::build("mock", config)
    }
}

impl<S: LockStrategy> MockPool<S> {
    fn build(name: &str, config: PoolConfig) -> Result<Self, PoolError> {
        let ctl = MockController::new();
        let pool = Pool::with_name(name, config, ctl.factory())?;
        Ok(Self { pool, ctl })
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
/// Honours `RUST_LOG`, defaulting to `leasepool=debug`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("leasepool=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
