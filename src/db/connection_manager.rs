//! MySQL connection manager for the bb8 pool
//!
//! Defines the driver seam the service talks to ([`Driver`] and
//! [`TransactionManager`]) and its MySQL implementation on top of sqlx.

use async_trait::async_trait;
use bb8::ManageConnection;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection, Executor};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error};

use crate::db::target::ConnectionTarget;
use crate::error::DriverError;

/// A registered database driver: turns a target into a connection manager.
pub trait Driver: Send + Sync + 'static {
    type Manager: TransactionManager;

    /// Short driver name, used in logs.
    fn name(&self) -> &'static str;

    /// Validates the target and prepares a manager for it. No connection is
    /// opened here; the pool does that lazily.
    fn open(&self, target: &ConnectionTarget) -> Result<Self::Manager, DriverError>;
}

/// Connection manager that also controls transactions on its connections.
///
/// Liveness checks go through [`ManageConnection::is_valid`].
#[async_trait]
pub trait TransactionManager: ManageConnection<Error = DriverError> + Clone {
    async fn begin(&self, conn: &mut Self::Connection) -> Result<(), DriverError>;

    async fn commit(&self, conn: &mut Self::Connection) -> Result<(), DriverError>;

    async fn rollback(&self, conn: &mut Self::Connection) -> Result<(), DriverError>;

    /// Gracefully end one connection. Dropping it is the fallback.
    async fn disconnect(&self, conn: Self::Connection) -> Result<(), DriverError> {
        drop(conn);
        Ok(())
    }

    /// Called once when the owning pool is being shut down, before its idle
    /// connections are disconnected.
    async fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// The MySQL driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDriver;

impl Driver for MySqlDriver {
    type Manager = MySqlConnectionManager;

    fn name(&self) -> &'static str {
        "mysql"
    }

    fn open(&self, target: &ConnectionTarget) -> Result<MySqlConnectionManager, DriverError> {
        let options = MySqlConnectOptions::from_str(&target.url())?;
        Ok(MySqlConnectionManager::new(options, target.clone()))
    }
}

/// Connection manager for MySQL that implements bb8::ManageConnection
#[derive(Clone)]
pub struct MySqlConnectionManager {
    options: MySqlConnectOptions,
    target: ConnectionTarget,
}

impl MySqlConnectionManager {
    pub fn new(options: MySqlConnectOptions, target: ConnectionTarget) -> Self {
        debug!("Creating MySQL connection manager for {}", target);
        Self { options, target }
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    async fn run(&self, conn: &mut MySqlConnection, statement: &'static str) -> Result<(), DriverError> {
        debug!(statement, "running transaction statement");
        Executor::execute(&mut *conn, statement).await?;
        Ok(())
    }
}

#[async_trait]
impl ManageConnection for MySqlConnectionManager {
    type Connection = MySqlConnection;
    type Error = DriverError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        debug!("Creating new MySQL connection to {}", self.target);

        MySqlConnection::connect_with(&self.options)
            .await
            .map_err(|e| {
                error!("Failed to create MySQL connection: {}", e);
                DriverError::from(e)
            })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.ping().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        // sqlx reports broken sockets on the next use; the pool tracks
        // transaction state itself
        false
    }
}

#[async_trait]
impl TransactionManager for MySqlConnectionManager {
    async fn begin(&self, conn: &mut MySqlConnection) -> Result<(), DriverError> {
        self.run(conn, "BEGIN").await
    }

    async fn commit(&self, conn: &mut MySqlConnection) -> Result<(), DriverError> {
        self.run(conn, "COMMIT").await
    }

    async fn rollback(&self, conn: &mut MySqlConnection) -> Result<(), DriverError> {
        self.run(conn, "ROLLBACK").await
    }

    async fn disconnect(&self, conn: MySqlConnection) -> Result<(), DriverError> {
        debug!("Closing MySQL connection to {}", self.target);
        conn.close().await?;
        Ok(())
    }
}

impl fmt::Debug for MySqlConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlConnectionManager")
            .field("target", &self.target)
            .finish()
    }
}

impl fmt::Display for MySqlConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MySqlConnectionManager({})", self.target)
    }
}
