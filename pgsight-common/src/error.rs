use thiserror::Error;

/// Common error type for PgSight components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid target: {0}")]
    Target(String),
}

/// Result type alias using PgSight's Error.
pub type Result<T> = std::result::Result<T, Error>;
