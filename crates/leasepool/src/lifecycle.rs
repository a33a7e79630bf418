//! Connection lifecycle management.
//!
//! This module defines the capability every pooled resource implements and
//! the bookkeeping the pool keeps alongside each connection.

use std::time::{Duration, Instant};

/// Capability implemented by every pooled resource.
///
/// The pool drives a connection only through these methods; whatever state
/// the resource carries (socket, open transaction, session settings) stays
/// behind the trait.
///
/// Timeouts are the implementation's business. The pool never waits on its
/// own, so a `connect` or `ping` that hangs holds up only the caller that
/// triggered it.
///
/// # Panics
///
/// Implementations should report failure through `Err` or `false`, not by
/// panicking. A panic in `connect` or `ping` during a lease, or in
/// `make_reusable` during an explicit release, frees the slot and
/// propagates. A panic in `make_reusable` while a [`Lease`](crate::Lease) is
/// dropped during unwinding aborts the process.
pub trait Connection {
    /// Error raised by connection I/O.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish (or re-establish) the underlying session.
    fn connect(&mut self) -> Result<(), Self::Error>;

    /// Tear down the underlying session.
    fn close(&mut self) -> Result<(), Self::Error>;

    /// Check that the session is still alive.
    fn ping(&mut self) -> bool;

    /// Time elapsed since the connection last did any work.
    fn idle(&self) -> Duration;

    /// Whether the connection may go back to the idle list.
    ///
    /// A connection inside an open transaction must report `false`, or the
    /// lazy proxy will hand it to other callers mid-transaction.
    fn is_reusable(&self) -> bool {
        true
    }

    /// Bring the connection back to a reusable state before it is pooled.
    ///
    /// For transactional resources this usually rolls back whatever is
    /// still open. An error drops the connection instead of pooling it.
    ///
    /// Runs from `Lease`'s `Drop`, possibly while a panic is unwinding, so it
    /// must not panic.
    fn make_reusable(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Unique identifier for this connection within its pool.
    pub id: u64,
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection was last leased or returned.
    pub last_used_at: Instant,
    /// Number of times the connection has been leased.
    pub checkout_count: u64,
}

impl ConnectionMetadata {
    /// Create metadata for a new connection.
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
        }
    }

    /// Time since the connection was created.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Mark the connection as leased.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
    }

    /// Mark the connection as returned.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
    }
}
