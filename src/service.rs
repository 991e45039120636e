//! Managed database service
//!
//! [`DatabaseService`] owns a connection pool for the time it is running
//! and runs caller handlers against a pooled connection or a transaction.

use async_trait::async_trait;
use bb8::ManageConnection;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ConfigurationProvider, ServiceConfiguration, Unconfigured};
use crate::db::{ConnectionTarget, DatabasePool, Driver, MySqlDriver, PoolOptions, PoolStats};
use crate::error::{Result, ServiceError};

/// Connection type handed to handlers for driver `D`.
pub type ConnectionOf<D> = <<D as Driver>::Manager as ManageConnection>::Connection;

type PoolOf<D> = DatabasePool<<D as Driver>::Manager>;

/// Lifecycle contract shared by the services of an application.
#[async_trait]
pub trait Service: Send + Sync {
    type Configuration;

    /// Produce a configuration from whatever source the application injected.
    fn load_configuration(&self) -> Result<Self::Configuration>;

    /// Type-check `candidate` and adopt it as the current configuration.
    fn apply_configuration(&self, candidate: &dyn Any) -> Result<()>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn restart(&self) -> Result<()>;
}

/// Snapshot of the service for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub pool: Option<PoolStats>,
}

/// Database service with a start/stop lifecycle.
///
/// The pool only exists while the service runs. Handlers hold a read lock
/// on it for their whole duration, so `stop` and `restart` wait for
/// in-flight handlers. A handler must therefore never stop or restart the
/// service it runs on.
pub struct DatabaseService<D: Driver = MySqlDriver> {
    driver: D,
    provider: Box<dyn ConfigurationProvider>,
    configuration: RwLock<ServiceConfiguration>,
    pool: tokio::sync::RwLock<Option<PoolOf<D>>>,
}

impl Default for DatabaseService<MySqlDriver> {
    fn default() -> Self {
        Self::new(MySqlDriver)
    }
}

impl<D: Driver> DatabaseService<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            provider: Box::new(Unconfigured),
            configuration: RwLock::new(ServiceConfiguration::default()),
            pool: tokio::sync::RwLock::new(None),
        }
    }

    /// Inject the source used by [`Service::load_configuration`].
    pub fn with_provider(mut self, provider: impl ConfigurationProvider + 'static) -> Self {
        self.provider = Box::new(provider);
        self
    }

    pub fn with_configuration(self, configuration: ServiceConfiguration) -> Self {
        self.configure(configuration);
        self
    }

    /// Replace the configuration. Takes effect on the next start.
    pub fn configure(&self, configuration: ServiceConfiguration) {
        *self.configuration.write() = configuration;
    }

    /// Copy of the current configuration.
    pub fn configuration(&self) -> ServiceConfiguration {
        self.configuration.read().clone()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub async fn is_running(&self) -> bool {
        self.pool.read().await.is_some()
    }

    pub async fn status(&self) -> ServiceStatus {
        let pool = self.pool.read().await;

        ServiceStatus {
            running: pool.is_some(),
            pool: pool.as_ref().map(DatabasePool::stats),
        }
    }

    /// Run `handler` with one connection borrowed from the pool.
    ///
    /// The connection goes back to the pool whatever the handler's outcome.
    /// Handler errors are returned untouched; service errors are converted
    /// into the handler's error type.
    ///
    /// ```rust,ignore
    /// service
    ///     .run_with_connection(|conn| Box::pin(async move {
    ///         conn.ping().await?;
    ///         Ok::<_, anyhow::Error>(())
    ///     }))
    ///     .await?;
    /// ```
    pub async fn run_with_connection<T, E, F>(&self, handler: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut ConnectionOf<D>) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<ServiceError>,
    {
        let guard = self.pool.read().await;
        let pool = guard.as_ref().ok_or(ServiceError::ServiceNotRunning)?;

        let mut conn = pool.get().await?;
        handler(conn.connection_mut()?).await
    }

    /// Run `handler` inside a transaction.
    ///
    /// * `Ok` from the handler commits; a commit failure is returned.
    /// * `Err` from the handler rolls back and returns the handler's error.
    ///   If the rollback fails too, [`ServiceError::RollbackFailed`] carries
    ///   both errors.
    /// * A panic in the handler rolls back, then resumes unwinding.
    ///
    /// A connection that does not end up committed or rolled back (failed
    /// commit or rollback, or this future dropped mid-handler) is discarded
    /// by the pool instead of being reused.
    pub async fn run_with_transaction<T, E, F>(&self, handler: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut ConnectionOf<D>) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<ServiceError> + fmt::Display,
    {
        let guard = self.pool.read().await;
        let pool = guard.as_ref().ok_or(ServiceError::ServiceNotRunning)?;

        let mut conn = pool.get().await?;
        pool.begin(&mut conn).await.map_err(ServiceError::from)?;
        debug!("transaction started");

        let outcome = AssertUnwindSafe(handler(conn.connection_mut()?)).catch_unwind().await;

        match outcome {
            Ok(Ok(value)) => {
                pool.commit(&mut conn).await.map_err(ServiceError::from)?;
                debug!("transaction committed");
                Ok(value)
            }
            Ok(Err(handler_error)) => match pool.rollback(&mut conn).await {
                Ok(()) => {
                    debug!("transaction rolled back after handler error");
                    Err(handler_error)
                }
                Err(source) => {
                    error!(error = %source, handler_error = %handler_error, "rollback failed");
                    Err(ServiceError::RollbackFailed {
                        source,
                        handler_error: handler_error.to_string(),
                    }
                    .into())
                }
            },
            Err(panic) => {
                match pool.rollback(&mut conn).await {
                    Ok(()) => warn!("transaction rolled back after handler panic"),
                    Err(err) => error!(error = %err, "rollback after handler panic failed"),
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn start_locked(&self, slot: &mut Option<PoolOf<D>>) -> Result<()> {
        if slot.is_some() {
            debug!("service already running");
            return Ok(());
        }

        let configuration = self.configuration();
        let target = ConnectionTarget::from(&configuration);
        let manager = self.driver.open(&target)?;
        let pool = DatabasePool::open(manager, &PoolOptions::from(&configuration)).await?;

        if let Err(err) = pool.ping().await {
            warn!(%target, error = %err, "liveness check failed, discarding pool");
            if let Err(close_err) = pool.close().await {
                warn!(error = %close_err, "closing the discarded pool failed");
            }
            return Err(err);
        }

        info!(%target, driver = self.driver.name(), max_size = pool.max_size(), "database service started");
        *slot = Some(pool);
        Ok(())
    }

    async fn stop_locked(&self, slot: &mut Option<PoolOf<D>>) -> Result<()> {
        let Some(pool) = slot.as_ref() else {
            debug!("service already stopped");
            return Ok(());
        };

        if let Err(err) = pool.close().await {
            error!(error = %err, "closing the pool failed, service keeps running");
            return Err(err);
        }

        *slot = None;
        info!("database service stopped");
        Ok(())
    }
}

#[async_trait]
impl<D: Driver> Service for DatabaseService<D> {
    type Configuration = ServiceConfiguration;

    fn load_configuration(&self) -> Result<ServiceConfiguration> {
        self.provider.load()
    }

    fn apply_configuration(&self, candidate: &dyn Any) -> Result<()> {
        let configuration = if let Some(c) = candidate.downcast_ref::<ServiceConfiguration>() {
            c.clone()
        } else if let Some(c) = candidate.downcast_ref::<&'static ServiceConfiguration>() {
            (*c).clone()
        } else if let Some(c) = candidate.downcast_ref::<Box<ServiceConfiguration>>() {
            c.as_ref().clone()
        } else if let Some(c) = candidate.downcast_ref::<Arc<ServiceConfiguration>>() {
            c.as_ref().clone()
        } else {
            return Err(ServiceError::WrongConfigurationKind);
        };

        self.configure(configuration);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn start(&self) -> Result<()> {
        let mut slot = self.pool.write().await;
        self.start_locked(&mut slot).await
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<()> {
        let mut slot = self.pool.write().await;
        self.stop_locked(&mut slot).await
    }

    #[instrument(skip(self))]
    async fn restart(&self) -> Result<()> {
        let mut slot = self.pool.write().await;

        if slot.is_some() {
            self.stop_locked(&mut slot).await?;
        }
        self.start_locked(&mut slot).await
    }
}

impl<D: Driver> fmt::Debug for DatabaseService<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseService")
            .field("driver", &self.driver.name())
            .field("configuration", &*self.configuration.read())
            .field("pool", &"DatabasePool<..>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample() -> ServiceConfiguration {
        ServiceConfiguration {
            host: "host".to_string(),
            user: "user".to_string(),
            port: 3306,
            database: "database".to_string(),
            password: "password".to_string(),
            max_pool_size: 1,
            connect_timeout_secs: 0,
        }
    }

    #[test]
    fn test_load_configuration_not_implemented() {
        let service = DatabaseService::default();

        let err = service.load_configuration().unwrap_err();
        assert!(err.to_string().contains("not implemented"));
    }

    #[test]
    fn test_load_configuration_from_provider() {
        let service = DatabaseService::default()
            .with_provider(crate::config::StaticProvider(sample()));

        assert_eq!(service.load_configuration().unwrap(), sample());
    }

    #[test]
    fn test_apply_configuration_by_value() {
        let service = DatabaseService::default();
        service.apply_configuration(&sample()).unwrap();

        let applied = service.configuration();
        assert_eq!(applied.host, "host");
        assert_eq!(applied.user, "user");
        assert_eq!(applied.password, "password");
        assert_eq!(applied.database, "database");
        assert_eq!(applied.port, 3306);
        assert_eq!(applied.max_pool_size, 1);
    }

    #[test]
    fn test_apply_configuration_by_reference() {
        let service = DatabaseService::default();

        let leaked: &'static ServiceConfiguration = Box::leak(Box::new(sample()));
        service.apply_configuration(&leaked).unwrap();
        assert_eq!(service.configuration(), sample());

        let service = DatabaseService::default();
        service.apply_configuration(&Arc::new(sample())).unwrap();
        assert_eq!(service.configuration(), sample());

        let service = DatabaseService::default();
        service.apply_configuration(&Box::new(sample())).unwrap();
        assert_eq!(service.configuration(), sample());
    }

    #[test]
    fn test_apply_wrong_configuration_kind() {
        let service = DatabaseService::default().with_configuration(sample());

        let mut candidate = HashMap::new();
        candidate.insert("address".to_string(), "localhost".to_string());

        let err = service.apply_configuration(&candidate).unwrap_err();
        assert!(matches!(err, ServiceError::WrongConfigurationKind));
        assert_eq!(service.configuration(), sample());
    }

    #[test]
    fn test_apply_replaces_without_merging() {
        let service = DatabaseService::default().with_configuration(sample());

        let replacement = ServiceConfiguration {
            host: "other".to_string(),
            ..Default::default()
        };
        service.apply_configuration(&replacement).unwrap();

        assert_eq!(service.configuration(), replacement);
        assert_eq!(service.configuration().user, "");
    }

    #[tokio::test]
    async fn test_run_with_connection_not_running() {
        let service = DatabaseService::default();

        let result = service
            .run_with_connection(|_conn| Box::pin(async { Ok::<_, ServiceError>(()) }))
            .await;
        assert!(matches!(result, Err(ServiceError::ServiceNotRunning)));
    }

    #[tokio::test]
    async fn test_run_with_transaction_not_running() {
        let service = DatabaseService::default();

        let result = service
            .run_with_transaction(|_conn| Box::pin(async { Ok::<_, ServiceError>(()) }))
            .await;
        assert!(matches!(result, Err(ServiceError::ServiceNotRunning)));
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let service = DatabaseService::default();

        service.stop().await.unwrap();
        assert!(!service.is_running().await);
        assert_eq!(
            service.status().await,
            ServiceStatus {
                running: false,
                pool: None
            }
        );
    }

    #[tokio::test]
    async fn test_start_with_invalid_target_stays_stopped() {
        // An empty host never makes it past URL parsing
        let service = DatabaseService::default();

        assert!(matches!(service.start().await, Err(ServiceError::Driver(_))));
        assert!(!service.is_running().await);
    }

    #[test]
    fn test_debug_hides_password() {
        let service = DatabaseService::default().with_configuration(sample());
        let rendered = format!("{service:?}");
        assert!(rendered.contains("mysql"));
        assert!(!rendered.contains("\"password\""));
    }
}
