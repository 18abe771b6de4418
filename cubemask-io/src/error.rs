//! I/O error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// cfitsio failure.
    #[error("FITS error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    /// Invalid or unsupported file contents.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// A save could not be completed; the previous file is untouched.
    #[error("failed to save {}: {source}", path.display())]
    Persistence {
        /// Target file.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] cubemask_core::Error),
}
