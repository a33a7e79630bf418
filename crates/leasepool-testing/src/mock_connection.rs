//! Mock connection for unit testing.
//!
//! [`MockConnection`] implements [`Connection`] without any I/O. Every
//! connection created by one [`MockController`] shares its failure switches
//! and operation counters, so a test can break the "server" halfway through
//! and then inspect what the pool did about it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use leasepool::{Pool, PoolConfig};
//! use leasepool_testing::MockController;
//!
//! let ctl = MockController::new();
//! let pool: Pool<_> = Pool::new(PoolConfig::new().max_connections(2), ctl.factory())?;
//!
//! drop(pool.lease()?);
//! ctl.fail_ping(true);
//! let conn = pool.lease()?; // pinged, reconnected
//! assert_eq!(ctl.connects(), 2);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use leasepool::Connection;
use parking_lot::Mutex;
use thiserror::Error;

/// Error type for mock connection operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MockError {
    /// The controller refused a connect.
    #[error("connection refused")]
    ConnectRefused,

    /// The controller refused a reset.
    #[error("reset failed")]
    ResetFailed,

    /// The controller refused a close.
    #[error("close failed")]
    CloseFailed,

    /// An operation ran on a connection that is not connected.
    #[error("not connected")]
    NotConnected,

    /// A statement failed.
    #[error("statement failed: {0}")]
    Statement(String),
}

#[derive(Debug, Default)]
struct Shared {
    fail_connect: AtomicBool,
    fail_ping: AtomicBool,
    fail_reset: AtomicBool,
    fail_close: AtomicBool,
    idle_override: Mutex<Option<Duration>>,
    next_id: AtomicU64,
    created: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    pings: AtomicUsize,
    resets: AtomicUsize,
}

/// Shared switches and counters for a family of mock connections.
#[derive(Debug, Clone, Default)]
pub struct MockController {
    shared: Arc<Shared>,
}

impl MockController {
    /// Create a controller with every switch off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory closure suitable for [`leasepool::Pool::new`].
    pub fn factory(&self) -> impl Fn() -> MockConnection + Send + Sync + 'static {
        let ctl = self.clone();
        move || ctl.connection()
    }

    /// Create a new, not yet connected, mock connection.
    #[must_use]
    pub fn connection(&self) -> MockConnection {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared.created.fetch_add(1, Ordering::Relaxed);
        MockConnection {
            id,
            shared: Arc::clone(&self.shared),
            connected: false,
            in_transaction: false,
            last_active: Instant::now(),
            idle_override: None,
            statements: Vec::new(),
        }
    }

    /// Make `connect` fail.
    pub fn fail_connect(&self, fail: bool) {
        self.shared.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make `ping` report a dead connection.
    pub fn fail_ping(&self, fail: bool) {
        self.shared.fail_ping.store(fail, Ordering::SeqCst);
    }

    /// Make `make_reusable` fail.
    pub fn fail_reset(&self, fail: bool) {
        self.shared.fail_reset.store(fail, Ordering::SeqCst);
    }

    /// Make `close` fail.
    pub fn fail_close(&self, fail: bool) {
        self.shared.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Report `idle` as this value for every connection without its own
    /// override. `None` goes back to wall-clock idle time.
    pub fn set_idle(&self, idle: Option<Duration>) {
        *self.shared.idle_override.lock() = idle;
    }

    /// Connections constructed so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    /// Successful `connect` calls so far, reconnects included.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// `close` calls so far, failed ones included.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// `ping` calls so far.
    #[must_use]
    pub fn pings(&self) -> usize {
        self.shared.pings.load(Ordering::SeqCst)
    }

    /// `make_reusable` calls so far.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.shared.resets.load(Ordering::SeqCst)
    }
}

/// In-memory connection with transaction tracking.
#[derive(Debug)]
pub struct MockConnection {
    id: u64,
    shared: Arc<Shared>,
    connected: bool,
    in_transaction: bool,
    last_active: Instant,
    idle_override: Option<Duration>,
    statements: Vec<String>,
}

impl MockConnection {
    /// Creation order within the controller, starting at 1.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the connection is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Statements executed on this connection, oldest first.
    #[must_use]
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Pin this connection's idle time, overriding the controller.
    pub fn set_idle(&mut self, idle: Duration) {
        self.idle_override = Some(idle);
    }

    /// Drop the session as if the server went away.
    pub fn kill(&mut self) {
        self.connected = false;
    }

    /// Run a statement.
    ///
    /// `BEGIN` opens a transaction, `COMMIT` and `ROLLBACK` end it, and any
    /// statement starting with `FAIL` errors without changing state.
    pub fn execute(&mut self, sql: &str) -> Result<(), MockError> {
        if !self.connected {
            return Err(MockError::NotConnected);
        }
        self.last_active = Instant::now();
        if sql.starts_with("FAIL") {
            return Err(MockError::Statement(sql.to_owned()));
        }
        match sql {
            "BEGIN" => self.in_transaction = true,
            "COMMIT" | "ROLLBACK" => self.in_transaction = false,
            _ => {}
        }
        self.statements.push(sql.to_owned());
        Ok(())
    }

    /// Open a transaction.
    pub fn begin(&mut self) -> Result<(), MockError> {
        self.execute("BEGIN")
    }

    /// Commit the open transaction.
    pub fn commit(&mut self) -> Result<(), MockError> {
        self.execute("COMMIT")
    }

    /// Roll back the open transaction.
    pub fn rollback(&mut self) -> Result<(), MockError> {
        self.execute("ROLLBACK")
    }
}

impl Connection for MockConnection {
    type Error = MockError;

    fn connect(&mut self) -> Result<(), MockError> {
        if self.shared.fail_connect.load(Ordering::SeqCst) {
            return Err(MockError::ConnectRefused);
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        self.connected = true;
        self.in_transaction = false;
        self.last_active = Instant::now();
        Ok(())
    }

    fn close(&mut self) -> Result<(), MockError> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
        if self.shared.fail_close.load(Ordering::SeqCst) {
            return Err(MockError::CloseFailed);
        }
        Ok(())
    }

    fn ping(&mut self) -> bool {
        self.shared.pings.fetch_add(1, Ordering::SeqCst);
        self.connected && !self.shared.fail_ping.load(Ordering::SeqCst)
    }

    fn idle(&self) -> Duration {
        self.idle_override
            .or(*self.shared.idle_override.lock())
            .unwrap_or_else(|| self.last_active.elapsed())
    }

    fn is_reusable(&self) -> bool {
        !self.in_transaction
    }

    fn make_reusable(&mut self) -> Result<(), MockError> {
        self.shared.resets.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_reset.load(Ordering::SeqCst) {
            return Err(MockError::ResetFailed);
        }
        self.in_transaction = false;
        Ok(())
    }
}
