//! Errors raised by the shared storage, configuration and time helpers

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure in code shared by the skyalert crates
#[derive(Error, Debug)]
pub enum Error {
    /// Schema setup or pool connection failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data directory could not be created
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable TOML or an unusable consumer configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A value that does not parse, such as a malformed observation time
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
