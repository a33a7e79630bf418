//! Pool error types.

use thiserror::Error;

/// Boxed error from a [`Connection`](crate::Connection) implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for pool operations.
pub type Result<T, E = PoolError> = std::result::Result<T, E>;

/// Errors that can occur during pool operations.
///
/// Acquisition-time failures are returned to the caller. `ResetFailed` only
/// ever reaches the logs, since nobody waits on a release.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Every slot is leased and no idle connection exists.
    #[error("pool exhausted: all {max} connections are leased")]
    Exhausted {
        /// Maximum allowed connections.
        max: u32,
    },

    /// A new connection could not be established.
    #[error("failed to create connection: {0}")]
    ConnectionCreation(#[source] BoxError),

    /// An idle connection failed its ping and could not reconnect.
    #[error("failed to reconnect idle connection: {0}")]
    Reconnect(#[source] BoxError),

    /// A returned connection could not be made reusable.
    #[error("connection reset failed: {0}")]
    ResetFailed(#[source] BoxError),

    /// Invalid configuration or unknown pool name.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,
}

impl PoolError {
    /// Whether this error means the pool was at capacity.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
