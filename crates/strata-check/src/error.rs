//! Error types for the check binary.

/// Top-level error for `strata-check`.
///
/// Each variant wraps one subsystem so `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: strata_persist::ConfigError,
    },

    /// Connecting to or migrating the store failed.
    #[error("database error: {source}")]
    Database {
        /// The underlying store error.
        #[from]
        source: strata_db::DbError,
    },

    /// A region could not be read.
    #[error("region {region} failed to load: {source}")]
    Load {
        /// The region being loaded.
        region: strata_types::RegionId,
        /// The underlying load error.
        source: strata_persist::LoadError,
    },

    /// The logging subscriber could not be installed.
    #[error("logging setup failed: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },
}
