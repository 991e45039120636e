use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Boxed error as produced by database drivers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum ServiceError {
    // Lifecycle and configuration errors owned by the service
    #[error("wrong configuration informed")]
    WrongConfigurationKind,

    #[error("service not running")]
    ServiceNotRunning,

    #[error("not implemented")]
    NotImplemented,

    // Driver failures are passed through with their own message
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("Timeout waiting for a pooled connection")]
    Timeout,

    #[error("rollback failed: {source} (handler error: {handler_error})")]
    RollbackFailed {
        source: DriverError,
        handler_error: String,
    },

    // Configuration provider errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<bb8::RunError<DriverError>> for ServiceError {
    fn from(err: bb8::RunError<DriverError>) -> Self {
        match err {
            bb8::RunError::User(e) => ServiceError::Driver(e),
            bb8::RunError::TimedOut => ServiceError::Timeout,
        }
    }
}

/// An error raised by the database driver (open, ping, begin, commit,
/// rollback, close).
///
/// The underlying error is kept intact and can be recovered with
/// [`DriverError::downcast_ref`].
pub struct DriverError(BoxError);

impl DriverError {
    pub fn new<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self(err.into())
    }

    pub fn downcast_ref<T: std::error::Error + 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn into_inner(self) -> BoxError {
        self.0
    }
}

impl fmt::Debug for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        Self(Box::new(err))
    }
}
