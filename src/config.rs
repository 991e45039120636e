use config::{Config as ConfigBuilder, Environment};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, ServiceError};

/// Connection parameters of the MySQL service.
///
/// Missing YAML keys deserialize to zero values; the service never
/// synthesizes defaults of its own.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfiguration {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub database: String,
    pub password: String,
    /// Upper bound of open connections; `0` keeps the pool default.
    pub max_pool_size: u32,
    /// Seconds to wait for a pooled connection; `0` keeps the pool default.
    pub connect_timeout_secs: u64,
}

impl ServiceConfiguration {
    /// Copy of this configuration safe for printing.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.password.is_empty() {
            copy.password = "***".to_string();
        }
        copy
    }
}

impl fmt::Debug for ServiceConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfiguration")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("password", &"***")
            .field("max_pool_size", &self.max_pool_size)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(), // pretty, json, compact
        }
    }
}

/// Source of a [`ServiceConfiguration`], injected into the service.
///
/// The service itself never reads files or the environment; hosting
/// applications pick one of the providers below or bring their own.
pub trait ConfigurationProvider: Send + Sync {
    fn load(&self) -> Result<ServiceConfiguration>;
}

/// Provider used when the hosting application did not inject one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

impl ConfigurationProvider for Unconfigured {
    fn load(&self) -> Result<ServiceConfiguration> {
        Err(ServiceError::NotImplemented)
    }
}

/// Always hands out the same configuration.
#[derive(Debug, Clone)]
pub struct StaticProvider(pub ServiceConfiguration);

impl ConfigurationProvider for StaticProvider {
    fn load(&self) -> Result<ServiceConfiguration> {
        Ok(self.0.clone())
    }
}

impl<F> ConfigurationProvider for F
where
    F: Fn() -> Result<ServiceConfiguration> + Send + Sync,
{
    fn load(&self) -> Result<ServiceConfiguration> {
        self()
    }
}

/// Reads the configuration from a YAML document, optionally nested under a
/// top-level section such as `mysql:`.
#[derive(Debug, Clone)]
pub struct YamlFileProvider {
    path: PathBuf,
    section: Option<String>,
}

impl YamlFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            section: None,
        }
    }

    pub fn section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, content: &str) -> Result<ServiceConfiguration> {
        let Some(section) = &self.section else {
            return Ok(serde_yaml::from_str(content)?);
        };

        let document: serde_yaml::Value = serde_yaml::from_str(content)?;
        let value = document.get(section.as_str()).cloned().ok_or_else(|| {
            ServiceError::Configuration(format!(
                "section '{}' not found in {}",
                section,
                self.path.display()
            ))
        })?;
        Ok(serde_yaml::from_value(value)?)
    }
}

impl ConfigurationProvider for YamlFileProvider {
    fn load(&self) -> Result<ServiceConfiguration> {
        debug!(path = %self.path.display(), "loading service configuration");
        let content = std::fs::read_to_string(&self.path)?;
        self.parse(&content)
    }
}

/// Reads the configuration from prefixed environment variables
/// (`MYSQL_HOST`, `MYSQL_PORT`, `MYSQL_MAX_POOL_SIZE`, ...).
#[derive(Debug, Clone)]
pub struct EnvironmentProvider {
    prefix: String,
}

impl EnvironmentProvider {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for EnvironmentProvider {
    fn default() -> Self {
        Self::with_prefix("MYSQL")
    }
}

impl ConfigurationProvider for EnvironmentProvider {
    fn load(&self) -> Result<ServiceConfiguration> {
        let settings = ConfigBuilder::builder()
            .add_source(
                Environment::with_prefix(&self.prefix)
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize::<ServiceConfiguration>()?)
    }
}
