use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DbPoolError;
use crate::retry::RetryPolicy;
use crate::types::DatabaseType;

const DEFAULT_POOL_SIZE: u32 = 8;
const DEFAULT_POSTGRES_PORT: u16 = 5432;

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

/// Identity of a database endpoint plus the credentials used to reach it.
///
/// Deserializes from the legacy key names too (`sql_host`, `sql_port`, `sql_user`, `sql_pass`):
/// ```rust
/// use dbpool_middleware::prelude::*;
///
/// let target: ConnectionTarget = serde_json::from_str(
///     r#"{"backend": "postgres", "sql_host": "db.internal", "sql_port": 5432,
///         "sql_user": "bot", "sql_pass": "secret", "database": "resource"}"#,
/// ).unwrap();
/// assert!(target.validate().is_ok());
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub backend: DatabaseType,
    #[serde(default, alias = "sql_host")]
    pub host: Option<String>,
    #[serde(default, alias = "sql_port")]
    pub port: Option<u16>,
    #[serde(default, alias = "sql_user")]
    pub user: Option<String>,
    #[serde(default, alias = "sql_pass")]
    pub password: Option<String>,
    /// Schema/database name; for `SQLite` the file path (or `:memory:` on single-connection cores).
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Rewrite `%s` placeholders into the backend's positional style before execution.
    #[serde(default)]
    pub translate_placeholders: bool,
}

impl ConnectionTarget {
    /// `SQLite` target for a database file path.
    #[must_use]
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            backend: DatabaseType::Sqlite,
            host: None,
            port: None,
            user: None,
            password: None,
            database: path.into(),
            pool_size: DEFAULT_POOL_SIZE,
            translate_placeholders: false,
        }
    }

    /// Postgres target; credentials are set with [`with_credentials`](Self::with_credentials).
    #[must_use]
    pub fn postgres(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            backend: DatabaseType::Postgres,
            host: Some(host.into()),
            port: Some(DEFAULT_POSTGRES_PORT),
            user: None,
            password: None,
            database: database.into(),
            pool_size: DEFAULT_POOL_SIZE,
            translate_placeholders: false,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    #[must_use]
    pub fn with_translation(mut self, translate_placeholders: bool) -> Self {
        self.translate_placeholders = translate_placeholders;
        self
    }

    /// Check that the target names everything its backend needs.
    ///
    /// # Errors
    /// Returns [`DbPoolError::ConfigurationError`] naming the first missing or invalid field.
    pub fn validate(&self) -> Result<(), DbPoolError> {
        if self.database.trim().is_empty() {
            return Err(DbPoolError::configuration("database name/path is empty"));
        }
        if self.pool_size == 0 {
            return Err(DbPoolError::configuration("pool_size must be at least 1"));
        }
        if self.backend.is_networked() {
            if blank(self.host.as_deref()) {
                return Err(DbPoolError::configuration(format!(
                    "{:?} target requires a host",
                    self.backend
                )));
            }
            if blank(self.user.as_deref()) {
                return Err(DbPoolError::configuration(format!(
                    "{:?} target requires a user",
                    self.backend
                )));
            }
            if self.password.is_none() {
                return Err(DbPoolError::configuration(format!(
                    "{:?} target requires a password (use an empty string for trust auth)",
                    self.backend
                )));
            }
            if self.port == Some(0) {
                return Err(DbPoolError::configuration("port must be non-zero"));
            }
        }
        Ok(())
    }

    /// Check that the target can back a pool.
    ///
    /// # Errors
    /// Everything [`validate`](Self::validate) rejects, plus in-memory `SQLite` databases: each
    /// pooled connection would open its own empty database.
    pub fn validate_pooled(&self) -> Result<(), DbPoolError> {
        self.validate()?;
        if self.is_in_memory() {
            return Err(DbPoolError::configuration(
                "in-memory SQLite databases cannot be pooled; use a file path or a single-connection core",
            ));
        }
        Ok(())
    }

    /// True for a `SQLite` database that lives inside one connection.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        let db = self.database.trim();
        self.backend == DatabaseType::Sqlite
            && (db == ":memory:" || db.starts_with("file::memory:") || db.contains("mode=memory"))
    }

    /// Port with the backend default applied.
    #[must_use]
    pub fn effective_port(&self) -> Option<u16> {
        match self.backend {
            DatabaseType::Postgres => Some(self.port.unwrap_or(DEFAULT_POSTGRES_PORT)),
            DatabaseType::Sqlite => None,
        }
    }

    /// Normalized identity used to deduplicate pools.
    #[must_use]
    pub fn key(&self) -> TargetKey {
        TargetKey {
            backend: self.backend,
            host: self
                .host
                .as_deref()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty()),
            port: self.effective_port(),
            user: self.user.as_deref().map(|u| u.trim().to_owned()),
            password: self.password.clone(),
            database: self.database.trim().to_owned(),
            pool_size: self.pool_size,
            translate_placeholders: self.translate_placeholders,
        }
    }

    /// User name for log fields; file backends report the database path instead.
    #[must_use]
    pub fn log_identity(&self) -> &str {
        self.user.as_deref().unwrap_or(&self.database)
    }
}

fn blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("pool_size", &self.pool_size)
            .field("translate_placeholders", &self.translate_placeholders)
            .finish()
    }
}

/// Normalized form of a [`ConnectionTarget`]: whitespace trimmed, host lowercased, default port
/// filled in. Two targets with equal keys share one pool.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    backend: DatabaseType,
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    database: String,
    pool_size: u32,
    translate_placeholders: bool,
}

impl fmt::Debug for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}://{}@{}:{}/{}",
            self.backend,
            self.user.as_deref().unwrap_or(""),
            self.host.as_deref().unwrap_or(""),
            self.port.map(|p| p.to_string()).unwrap_or_default(),
            self.database
        )
    }
}

/// Caller-side choices that are not part of the target identity.
#[derive(Debug, Clone, Copy)]
pub struct FactoryOptions {
    /// Pooled variant instead of one persistent connection.
    pub pooled: bool,
    /// Emit `tracing` events for statements, results and retries.
    pub log_enabled: bool,
    /// Statements served per physical pooled connection before it is replaced; 0 = unlimited.
    pub max_usage: u32,
    /// How long a pooled checkout may wait for a free connection.
    pub checkout_timeout: Duration,
    /// Retry applied to `fetch_all`/`fetch_one` outside transaction scopes.
    pub retry: RetryPolicy,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        Self {
            pooled: false,
            log_enabled: true,
            max_usage: 5,
            checkout_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

impl FactoryOptions {
    #[must_use]
    pub fn single() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pooled() -> Self {
        Self {
            pooled: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_logging(mut self, log_enabled: bool) -> Self {
        self.log_enabled = log_enabled;
        self
    }

    #[must_use]
    pub fn with_max_usage(mut self, max_usage: u32) -> Self {
        self.max_usage = max_usage;
        self
    }

    #[must_use]
    pub fn with_checkout_timeout(mut self, checkout_timeout: Duration) -> Self {
        self.checkout_timeout = checkout_timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg() -> ConnectionTarget {
        ConnectionTarget::postgres("DB.internal ", "resource").with_credentials("bot", "secret")
    }

    #[test]
    fn networked_target_needs_host_and_user() {
        assert!(pg().validate().is_ok());

        let mut no_host = pg();
        no_host.host = Some("  ".into());
        assert!(matches!(
            no_host.validate(),
            Err(DbPoolError::ConfigurationError(_))
        ));

        let mut no_user = pg();
        no_user.user = None;
        assert!(matches!(
            no_user.validate(),
            Err(DbPoolError::ConfigurationError(_))
        ));
    }

    #[test]
    fn sqlite_target_needs_only_a_path() {
        assert!(ConnectionTarget::sqlite("/tmp/x.db").validate().is_ok());
        assert!(ConnectionTarget::sqlite("").validate().is_err());
        assert!(
            ConnectionTarget::sqlite("/tmp/x.db")
                .with_pool_size(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn in_memory_sqlite_cannot_be_pooled() {
        let memory = ConnectionTarget::sqlite(":memory:");
        assert!(memory.validate().is_ok());
        assert!(matches!(
            memory.validate_pooled(),
            Err(DbPoolError::ConfigurationError(_))
        ));
        assert!(
            ConnectionTarget::sqlite("file::memory:?cache=shared")
                .validate_pooled()
                .is_err()
        );
        assert!(ConnectionTarget::sqlite("/tmp/x.db").validate_pooled().is_ok());
    }

    #[test]
    fn keys_normalize_host_and_default_port() {
        let mut explicit = pg();
        explicit.host = Some("db.internal".into());
        let mut implicit = pg();
        implicit.port = None;
        assert_eq!(explicit.key(), implicit.key());
        assert_ne!(pg().key(), pg().with_pool_size(2).key());
    }

    #[test]
    fn legacy_keys_deserialize() {
        let target: ConnectionTarget = serde_json::from_str(
            r#"{"backend":"postgres","sql_host":"h","sql_port":6543,"sql_user":"u","sql_pass":"p","database":"d"}"#,
        )
        .unwrap();
        assert_eq!(target.port, Some(6543));
        assert_eq!(target.pool_size, DEFAULT_POOL_SIZE);
        assert!(!format!("{target:?}").contains("\"p\""));
    }
}
