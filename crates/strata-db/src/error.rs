//! Error types for the data layer.
//!
//! Store operations return [`DbError`], which wraps the underlying
//! [`sqlx`] errors with context about which operation failed. Converting a
//! stored row back into a domain value returns [`RowError`]; callers that
//! bulk-load treat it as a per-row failure rather than a store failure.

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A value could not be serialized for storage.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A domain value does not fit its column.
    #[error("value {value} does not fit column `{column}`")]
    OutOfRange {
        /// The target column.
        column: &'static str,
        /// The rejected value.
        value: u64,
    },
}

/// A stored row that cannot be turned back into a domain value.
#[derive(Debug, thiserror::Error)]
pub enum RowError {
    /// A JSON column does not match the expected shape.
    #[error("column `{column}` holds malformed JSON: {source}")]
    Json {
        /// The offending column.
        column: &'static str,
        /// The underlying parse error.
        source: serde_json::Error,
    },

    /// An integer column holds a value outside the domain range.
    #[error("column `{column}` holds out-of-range value {value}")]
    OutOfRange {
        /// The offending column.
        column: &'static str,
        /// The stored value.
        value: i64,
    },
}
