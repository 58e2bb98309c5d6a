use std::fmt;

use thiserror::Error;

/// MySQL client code for "server has gone away".
pub const SERVER_GONE_AWAY: u16 = 2006;
/// MySQL client code for "lost connection to server during query".
pub const LOST_CONNECTION_DURING_QUERY: u16 = 2013;

/// Why a connection-level failure happened.
///
/// Only [`ServerGoneAway`](Self::ServerGoneAway) and
/// [`LostDuringQuery`](Self::LostDuringQuery) are considered transient; read paths retry on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionErrorKind {
    /// The driver could not establish a connection.
    Connect,
    /// The session was already dead when the statement was sent.
    ServerGoneAway,
    /// The session died while the statement was in flight.
    LostDuringQuery,
    /// No pooled connection became available within the checkout wait cap.
    CheckoutTimeout,
}

impl ConnectionErrorKind {
    /// Canonical numeric code for the transient kinds.
    #[must_use]
    pub fn code(self) -> Option<u16> {
        match self {
            ConnectionErrorKind::ServerGoneAway => Some(SERVER_GONE_AWAY),
            ConnectionErrorKind::LostDuringQuery => Some(LOST_CONNECTION_DURING_QUERY),
            ConnectionErrorKind::Connect | ConnectionErrorKind::CheckoutTimeout => None,
        }
    }

    #[must_use]
    pub fn is_transient(self) -> bool {
        self.code().is_some()
    }
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionErrorKind::Connect => "connect",
            ConnectionErrorKind::ServerGoneAway => "server gone away",
            ConnectionErrorKind::LostDuringQuery => "lost connection during query",
            ConnectionErrorKind::CheckoutTimeout => "checkout timeout",
        };
        match self.code() {
            Some(code) => write!(f, "{code} {label}"),
            None => f.write_str(label),
        }
    }
}

#[derive(Debug, Error)]
pub enum DbPoolError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Connection error ({kind}): {message}")]
    ConnectionError {
        kind: ConnectionErrorKind,
        message: String,
    },

    #[error("Query error: {message}")]
    QueryError {
        /// Driver-specific error code (SQLite extended code, Postgres SQLSTATE), when known.
        code: Option<String>,
        message: String,
    },

    #[error("Usage error: {0}")]
    UsageError(String),
}

impl DbPoolError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError(message.into())
    }

    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Self::ConnectionError {
            kind,
            message: message.into(),
        }
    }

    pub fn query(code: Option<String>, message: impl Into<String>) -> Self {
        Self::QueryError {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::UsageError(message.into())
    }

    /// True for the two transient connection-loss kinds.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionError { kind, .. } if kind.is_transient())
    }

    /// Numeric code of a transient connection-loss error.
    #[must_use]
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::ConnectionError { kind, .. } => kind.code(),
            _ => None,
        }
    }
}

impl From<bb8::RunError<DbPoolError>> for DbPoolError {
    fn from(err: bb8::RunError<DbPoolError>) -> Self {
        match err {
            bb8::RunError::User(inner) => inner,
            bb8::RunError::TimedOut => DbPoolError::connection(
                ConnectionErrorKind::CheckoutTimeout,
                "timed out waiting for a pooled connection",
            ),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DbPoolError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(ffi_err, _) => {
                let code = Some(ffi_err.extended_code.to_string());
                match ffi_err.code {
                    rusqlite::ErrorCode::CannotOpen | rusqlite::ErrorCode::NotADatabase => {
                        DbPoolError::connection(ConnectionErrorKind::Connect, err.to_string())
                    }
                    _ => DbPoolError::query(code, err.to_string()),
                }
            }
            _ => DbPoolError::query(None, err.to_string()),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for DbPoolError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            return DbPoolError::connection(ConnectionErrorKind::LostDuringQuery, err.to_string());
        }
        let code = err.code().map(|state| state.code().to_string());
        DbPoolError::query(code, err.to_string())
    }
}
