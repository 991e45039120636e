//! In-memory driver used by the integration tests.
//!
//! Rows live in a shared `Backend`; a connection inside a transaction stages
//! its writes until commit. Every driver call can be made to fail.

#![allow(dead_code)]

use async_trait::async_trait;
use bb8::ManageConnection;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use thiserror::Error;

use mysql_service::{
    ConnectionTarget, DatabaseService, Driver, DriverError, ServiceConfiguration, ServiceError,
    TransactionManager,
};

#[derive(Debug, Error)]
#[error("injected {0} failure")]
pub struct InjectedFault(pub &'static str);

#[derive(Debug, Default)]
pub struct Backend {
    pub rows: Mutex<Vec<String>>,
    pub last_target: Mutex<Option<ConnectionTarget>>,

    pub fail_open: AtomicBool,
    pub fail_connect: AtomicBool,
    pub fail_ping: AtomicBool,
    pub fail_begin: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fail_rollback: AtomicBool,
    pub fail_close: AtomicBool,

    pub opens: AtomicUsize,
    pub connects: AtomicUsize,
    pub pings: AtomicUsize,
    pub begins: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    pub closes: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl Backend {
    pub fn rows(&self) -> Vec<String> {
        self.rows.lock().clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn fail(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    fn check(&self, flag: &AtomicBool, counter: &AtomicUsize, what: &'static str) -> Result<(), DriverError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if flag.load(Ordering::SeqCst) {
            Err(DriverError::new(InjectedFault(what)))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    pub backend: Arc<Backend>,
}

impl Driver for MemoryDriver {
    type Manager = MemoryManager;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self, target: &ConnectionTarget) -> Result<MemoryManager, DriverError> {
        self.backend.check(&self.backend.fail_open, &self.backend.opens, "open")?;
        *self.backend.last_target.lock() = Some(target.clone());
        Ok(MemoryManager {
            backend: self.backend.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MemoryManager {
    backend: Arc<Backend>,
}

#[derive(Debug)]
pub struct MemoryConnection {
    backend: Arc<Backend>,
    staged: Option<Vec<String>>,
}

impl MemoryConnection {
    pub fn insert(&mut self, row: &str) {
        match &mut self.staged {
            Some(staged) => staged.push(row.to_string()),
            None => self.backend.rows.lock().push(row.to_string()),
        }
    }

    /// Committed rows plus this connection's own uncommitted writes.
    pub fn select(&self) -> Vec<String> {
        let mut rows = self.backend.rows();
        if let Some(staged) = &self.staged {
            rows.extend(staged.iter().cloned());
        }
        rows
    }

    pub fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }
}

#[async_trait]
impl ManageConnection for MemoryManager {
    type Connection = MemoryConnection;
    type Error = DriverError;

    async fn connect(&self) -> Result<MemoryConnection, DriverError> {
        self.backend.check(&self.backend.fail_connect, &self.backend.connects, "connect")?;
        Ok(MemoryConnection {
            backend: self.backend.clone(),
            staged: None,
        })
    }

    async fn is_valid(&self, _conn: &mut MemoryConnection) -> Result<(), DriverError> {
        self.backend.check(&self.backend.fail_ping, &self.backend.pings, "ping")
    }

    fn has_broken(&self, _conn: &mut MemoryConnection) -> bool {
        false
    }
}

#[async_trait]
impl TransactionManager for MemoryManager {
    async fn begin(&self, conn: &mut MemoryConnection) -> Result<(), DriverError> {
        self.backend.check(&self.backend.fail_begin, &self.backend.begins, "begin")?;
        conn.staged = Some(Vec::new());
        Ok(())
    }

    async fn commit(&self, conn: &mut MemoryConnection) -> Result<(), DriverError> {
        self.backend.check(&self.backend.fail_commit, &self.backend.commits, "commit")?;
        let staged = conn.staged.take().unwrap_or_default();
        self.backend.rows.lock().extend(staged);
        Ok(())
    }

    async fn rollback(&self, conn: &mut MemoryConnection) -> Result<(), DriverError> {
        self.backend.check(&self.backend.fail_rollback, &self.backend.rollbacks, "rollback")?;
        conn.staged = None;
        Ok(())
    }

    async fn disconnect(&self, conn: MemoryConnection) -> Result<(), DriverError> {
        self.backend.disconnects.fetch_add(1, Ordering::SeqCst);
        drop(conn);
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.backend.check(&self.backend.fail_close, &self.backend.closes, "close")
    }
}

/// Error type of test handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

pub fn configuration() -> ServiceConfiguration {
    ServiceConfiguration {
        host: "localhost".to_string(),
        user: "root".to_string(),
        port: 3306,
        database: "app".to_string(),
        password: String::new(),
        max_pool_size: 1,
        connect_timeout_secs: 2,
    }
}

pub fn service() -> (DatabaseService<MemoryDriver>, Arc<Backend>) {
    let driver = MemoryDriver::default();
    let backend = driver.backend.clone();
    let service = DatabaseService::new(driver).with_configuration(configuration());
    (service, backend)
}
