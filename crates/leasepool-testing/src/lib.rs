//! # leasepool-testing
//!
//! Test infrastructure for leasepool development.
//!
//! ## Features
//!
//! - Mock connection with transaction tracking, no I/O required
//! - Shared failure switches (connect, ping, reset, close) per controller
//! - Operation counters for asserting what the pool did
//! - Pool fixture and `tracing` setup for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use leasepool::PoolConfig;
//! use leasepool_testing::{MockPool, init_tracing};
//!
//! #[test]
//! fn test_reconnect() {
//!     init_tracing();
//!     let config = PoolConfig::new().max_connections(1);
//!     let MockPool { pool, ctl } = MockPool::new(config).unwrap();
//!
//!     drop(pool.lease().unwrap());
//!     ctl.fail_ping(true);
//!     let _conn = pool.lease().unwrap();
//!     assert_eq!(ctl.connects(), 2);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_connection;

pub use fixtures::{MockPool, init_tracing};
pub use mock_connection::{MockConnection, MockController, MockError};
