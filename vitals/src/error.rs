//! Application-wide error types.

use std::borrow::Cow;
use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Storage backend busy: {0}")]
    TransientStorage(String),

    #[error("Storage operation '{op}' timed out after {elapsed:?}")]
    StorageTimeout { op: &'static str, elapsed: Duration },

    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to read metric '{metric}': {reason}")]
    Sampling {
        metric: &'static str,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn sampling(metric: &'static str, reason: impl Into<String>) -> Self {
        Self::Sampling {
            metric,
            reason: reason.into(),
        }
    }

    /// Whether retrying the failed operation unchanged can be expected to help.
    ///
    /// Transient: the backend is busy, rate limiting, or a bounded attempt
    /// timed out. Everything else (bad documents, schema violations, missing
    /// entities) is permanent and must surface immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientStorage(_) | Error::StorageTimeout { .. } => true,
            Error::DatabaseSqlx(err) => is_transient_sqlx_error(err),
            _ => false,
        }
    }
}

fn is_transient_sqlx_error(err: &sqlx::Error) -> bool {
    if matches!(err, sqlx::Error::PoolTimedOut) {
        return true;
    }

    let sqlx::Error::Database(db_err) = err else {
        let msg = err.to_string().to_ascii_lowercase();
        return msg.contains("database is locked") || msg.contains("database is busy");
    };

    // SQLITE_BUSY = 5, SQLITE_LOCKED = 6.
    let code = db_err.code().map(Cow::into_owned);
    if matches!(code.as_deref(), Some("5") | Some("6")) {
        return true;
    }

    let msg = db_err.message().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_storage_is_transient() {
        assert!(Error::TransientStorage("overloaded".into()).is_transient());
    }

    #[test]
    fn storage_timeout_is_transient() {
        let err = Error::StorageTimeout {
            op: "insert sample",
            elapsed: Duration::from_secs(5),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn pool_timeout_is_transient() {
        assert!(Error::DatabaseSqlx(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn not_found_is_permanent() {
        assert!(!Error::not_found("MetricsSample", "42").is_transient());
    }

    #[test]
    fn configuration_is_permanent() {
        assert!(!Error::config("interval must be positive").is_transient());
    }

    #[test]
    fn retry_exhausted_is_permanent() {
        let err = Error::RetryExhausted {
            attempts: 5,
            source: Box::new(Error::TransientStorage("busy".into())),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn retry_exhausted_preserves_source() {
        let err = Error::RetryExhausted {
            attempts: 3,
            source: Box::new(Error::TransientStorage("busy".into())),
        };
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.to_string().contains("busy"));
    }
}
