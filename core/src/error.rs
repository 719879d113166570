use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search API rejected request (status {status}): {details}")]
    Search { status: u16, details: String },

    #[error("rate limit exceeded, quota resets at epoch {reset_at}")]
    RateLimit { reset_at: i64 },

    #[error("cannot normalize item {item_id}: {details}")]
    Normalize { item_id: String, details: String },

    #[error("alert delivery failed: {0}")]
    Alert(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// SQLSTATE class 22: the value was rejected, the session is fine.
fn is_data_exception(code: &str) -> bool {
    code.starts_with("22")
}

impl Error {
    /// Infrastructure and upstream failures that may succeed on a later
    /// attempt. Data the store refuses is not retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Database(_) => !self.is_data_error(),
            Error::Http(_)
            | Error::Search { .. }
            | Error::RateLimit { .. }
            | Error::Serialization(_)
            | Error::Io(_) => true,
            _ => false,
        }
    }

    /// The store rejected this particular record (bad encoding, value out
    /// of range, invalid JSON text).
    pub fn is_data_error(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db)) => {
                db.code().is_some_and(|code| is_data_exception(&code))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_fetch_errors_are_retryable() {
        assert!(Error::RateLimit { reset_at: 1_700_000_000 }.is_retryable());
        assert!(Error::Search {
            status: 503,
            details: "over capacity".into()
        }
        .is_retryable());
        assert!(!Error::Config("missing query".into()).is_retryable());
    }

    #[test]
    fn lost_connections_are_retryable() {
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!Error::Database(sqlx::Error::PoolTimedOut).is_data_error());
        assert!(Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset)).is_retryable());
        assert!(!Error::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn sqlstate_class_22_is_a_data_exception() {
        // untranslatable_character, raised for \u0000 in jsonb
        assert!(is_data_exception("22P05"));
        assert!(is_data_exception("22001"));
        // unique_violation, admin_shutdown
        assert!(!is_data_exception("23505"));
        assert!(!is_data_exception("57P01"));
    }
}
