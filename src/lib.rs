pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod service;

pub use config::{
    ConfigurationProvider, EnvironmentProvider, LoggingConfig, ServiceConfiguration, StaticProvider,
    Unconfigured, YamlFileProvider,
};
pub use db::{ConnectionTarget, Driver, MySqlConnectionManager, MySqlDriver, PoolStats, TransactionManager};
pub use error::{DriverError, Result, ServiceError};
pub use service::{ConnectionOf, DatabaseService, Service, ServiceStatus};
