//! Connection target built from a [`ServiceConfiguration`].

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::fmt;

use crate::config::ServiceConfiguration;

/// Collation requested on every connection.
pub const COLLATION: &str = "utf8mb4_unicode_ci";

/// Character set matching [`COLLATION`].
pub const CHARSET: &str = "utf8mb4";

// RFC 3986 unreserved characters stay as-is in the userinfo part
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Where the pool connects to.
///
/// `Display` redacts the password so a target can be logged freely.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl ConnectionTarget {
    /// Classic DSN form: `user:password@host:port/database?options`.
    pub fn dsn(&self) -> String {
        format!(
            "{}:{}@{}:{}/{}?parseTime=true&collation={}",
            self.user, self.password, self.host, self.port, self.database, COLLATION
        )
    }

    /// URL form consumed by the MySQL driver, with user and password
    /// percent-encoded.
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}?charset={}&collation={}",
            utf8_percent_encode(&self.user, USERINFO),
            utf8_percent_encode(&self.password, USERINFO),
            self.host,
            self.port,
            self.database,
            CHARSET,
            COLLATION
        )
    }
}

impl From<&ServiceConfiguration> for ConnectionTarget {
    fn from(configuration: &ServiceConfiguration) -> Self {
        Self {
            user: configuration.user.clone(),
            password: configuration.password.clone(),
            host: configuration.host.clone(),
            port: configuration.port,
            database: configuration.database.clone(),
        }
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mysql://{}:***@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionTarget({self})")
    }
}
