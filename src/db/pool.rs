//! Connection pool wrapper
//!
//! Thin layer over bb8 giving the service the handful of operations it
//! needs: open with an optional size limit, ping, checkout, transaction
//! bookkeeping, stats, close.

use async_trait::async_trait;
use bb8::{AddError, ErrorSink, ManageConnection, Pool, PooledConnection};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::ServiceConfiguration;
use crate::db::connection_manager::TransactionManager;
use crate::error::{DriverError, Result, ServiceError};

/// bb8's `max_size` when the builder is left alone.
pub const DEFAULT_MAX_SIZE: u32 = 10;

/// Connection pool statistics for monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Current number of connections in pool
    pub size: u32,
    /// Number of idle connections
    pub idle_connections: u32,
    /// Number of checked out connections
    pub active_connections: u32,
    /// Pool configuration max size
    pub max_size: u32,
}

/// Pool tuning derived from the service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolOptions {
    /// `None` keeps the pool default.
    pub max_size: Option<u32>,
    /// `None` keeps the pool default.
    pub connection_timeout: Option<Duration>,
}

impl From<&ServiceConfiguration> for PoolOptions {
    fn from(configuration: &ServiceConfiguration) -> Self {
        Self {
            max_size: (configuration.max_pool_size > 0).then_some(configuration.max_pool_size),
            connection_timeout: (configuration.connect_timeout_secs > 0)
                .then(|| Duration::from_secs(configuration.connect_timeout_secs)),
        }
    }
}

/// A driver connection as stored in the pool.
///
/// A connection whose transaction state is unknown (a transaction was begun
/// and neither commit nor rollback succeeded) is reported broken, so the
/// pool discards it instead of handing it to the next borrower.
pub struct TrackedConnection<C> {
    conn: Option<C>,
    transaction_open: bool,
}

impl<C> TrackedConnection<C> {
    fn new(conn: C) -> Self {
        Self {
            conn: Some(conn),
            transaction_open: false,
        }
    }

    /// The driver connection. Fails only for a connection already detached
    /// by [`DatabasePool::close`].
    pub fn connection_mut(&mut self) -> Result<&mut C> {
        self.conn.as_mut().ok_or(ServiceError::ServiceNotRunning)
    }

    pub fn transaction_open(&self) -> bool {
        self.transaction_open
    }

    fn detach(&mut self) -> Option<C> {
        self.conn.take()
    }
}

/// bb8 manager adding transaction tracking on top of a [`TransactionManager`].
#[derive(Debug, Clone)]
pub struct Tracked<M>(M);

#[async_trait]
impl<M: TransactionManager> ManageConnection for Tracked<M> {
    type Connection = TrackedConnection<M::Connection>;
    type Error = DriverError;

    async fn connect(&self) -> std::result::Result<Self::Connection, DriverError> {
        Ok(TrackedConnection::new(self.0.connect().await?))
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), DriverError> {
        match conn.conn.as_mut() {
            Some(inner) => self.0.is_valid(inner).await,
            None => Ok(()),
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        if conn.transaction_open {
            warn!("discarding connection left inside a transaction");
            return true;
        }
        match conn.conn.as_mut() {
            Some(inner) => self.0.has_broken(inner),
            None => true,
        }
    }
}

/// Logs connection errors raised by the pool's background tasks.
#[derive(Debug, Clone, Copy)]
struct LogErrorSink;

impl ErrorSink<DriverError> for LogErrorSink {
    fn sink(&self, error: DriverError) {
        warn!(error = %error, "pool failed to open a connection");
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<DriverError>> {
        Box::new(*self)
    }
}

/// Pool of connections produced by a [`TransactionManager`].
pub struct DatabasePool<M: TransactionManager> {
    pool: Pool<Tracked<M>>,
    manager: M,
    max_size: u32,
}

/// Connection checked out of a [`DatabasePool`].
pub type PooledTracked<'a, M> = PooledConnection<'a, Tracked<M>>;

impl<M: TransactionManager> DatabasePool<M> {
    /// Build the pool. Connections are opened lazily on first checkout.
    #[instrument(skip(manager))]
    pub async fn open(manager: M, options: &PoolOptions) -> Result<Self> {
        let mut builder = Pool::<Tracked<M>>::builder()
            // liveness is checked explicitly through `ping`
            .test_on_check_out(false)
            .error_sink(Box::new(LogErrorSink));

        if let Some(max_size) = options.max_size {
            builder = builder.max_size(max_size);
        }
        if let Some(timeout) = options.connection_timeout {
            builder = builder.connection_timeout(timeout);
        }

        let pool = builder.build(Tracked(manager.clone())).await?;
        let max_size = options.max_size.unwrap_or(DEFAULT_MAX_SIZE);

        info!(max_size, "connection pool opened");
        Ok(Self {
            pool,
            manager,
            max_size,
        })
    }

    /// Open one connection directly and run the manager's liveness check on
    /// it. Connect and ping errors come back as the driver reported them.
    /// The checked connection is handed to the pool on success.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.dedicated_connection().await?;
        let checked = match conn.conn.as_mut() {
            Some(inner) => self.manager.is_valid(inner).await,
            None => Ok(()),
        };

        if let Err(err) = checked {
            self.disconnect(conn).await;
            return Err(err.into());
        }
        debug!("liveness check passed");

        if let Err(AddError::Broken(conn) | AddError::NoCapacity(conn)) = self.pool.add(conn) {
            self.disconnect(conn).await;
        }
        Ok(())
    }

    /// Get a connection from the pool.
    ///
    /// The connection goes back to the pool when dropped.
    pub async fn get(&self) -> Result<PooledTracked<'_, M>> {
        debug!("acquiring connection from pool");

        match self.pool.get().await {
            Ok(conn) => Ok(conn),
            Err(bb8::RunError::TimedOut) => {
                warn!("connection pool timeout - consider increasing pool size or timeout");
                Err(ServiceError::Timeout)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Start a transaction. The connection counts as inside a transaction
    /// from here until a commit or rollback succeeds.
    pub async fn begin(&self, conn: &mut TrackedConnection<M::Connection>) -> std::result::Result<(), DriverError> {
        conn.transaction_open = true;
        let inner = conn.conn.as_mut().ok_or_else(|| DriverError::new(ServiceError::ServiceNotRunning))?;
        self.manager.begin(inner).await
    }

    pub async fn commit(&self, conn: &mut TrackedConnection<M::Connection>) -> std::result::Result<(), DriverError> {
        let inner = conn.conn.as_mut().ok_or_else(|| DriverError::new(ServiceError::ServiceNotRunning))?;
        self.manager.commit(inner).await?;
        conn.transaction_open = false;
        Ok(())
    }

    pub async fn rollback(&self, conn: &mut TrackedConnection<M::Connection>) -> std::result::Result<(), DriverError> {
        let inner = conn.conn.as_mut().ok_or_else(|| DriverError::new(ServiceError::ServiceNotRunning))?;
        self.manager.rollback(inner).await?;
        conn.transaction_open = false;
        Ok(())
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.pool.state();

        PoolStats {
            size: state.connections,
            idle_connections: state.idle_connections,
            active_connections: state.connections - state.idle_connections,
            max_size: self.max_size,
        }
    }

    /// Shut the manager down, then disconnect every idle connection. The
    /// caller drops the pool once this succeeds.
    ///
    /// A failing manager leaves the pool untouched. Disconnect failures are
    /// logged only, the connection is gone either way.
    pub async fn close(&self) -> Result<()> {
        self.manager.close().await?;

        let idle = self.pool.state().idle_connections;
        for _ in 0..idle {
            let mut pooled = self.get().await?;
            if let Some(conn) = pooled.detach() {
                if let Err(err) = self.manager.disconnect(conn).await {
                    warn!(error = %err, "disconnecting an idle connection failed");
                }
            }
        }

        info!(disconnected = idle, "connection pool closed");
        Ok(())
    }

    async fn disconnect(&self, mut conn: TrackedConnection<M::Connection>) {
        if let Some(inner) = conn.detach() {
            if let Err(err) = self.manager.disconnect(inner).await {
                warn!(error = %err, "disconnecting a connection failed");
            }
        }
    }
}

impl<M: TransactionManager> fmt::Debug for DatabasePool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabasePool")
            .field("state", &self.pool.state())
            .field("max_size", &self.max_size)
            .finish()
    }
}
