//! Database connection pooling module
//!
//! This module provides the MySQL driver and the bb8-backed pool the
//! service runs on.

pub mod connection_manager;
pub mod pool;
pub mod target;

pub use connection_manager::{Driver, MySqlConnectionManager, MySqlDriver, TransactionManager};
pub use pool::{DatabasePool, PoolOptions, PoolStats, TrackedConnection};
pub use target::ConnectionTarget;

// Re-export common types for convenience
pub use bb8::{ManageConnection, PooledConnection};
