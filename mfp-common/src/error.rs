//! Common error types for the facility pipelines

use thiserror::Error;

/// Common result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the pipeline binaries
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or lookup error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP transport error (wraps reqwest::Error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote API rejected the request
    #[error("API error {0}: {1}")]
    Api(u16, String),

    /// Image decoding or encoding error
    #[error("Image error: {0}")]
    Image(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input data or parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<tiff::TiffError> for Error {
    fn from(e: tiff::TiffError) -> Self {
        Error::Image(e.to_string())
    }
}
