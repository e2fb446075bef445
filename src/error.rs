//! Error handling for the Argos engine

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found (unknown source id, missing callback)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict (duplicate source id)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Connection error (stream open/reopen)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Stream error (frame read)
    #[error("Stream error: {0}")]
    Stream(String),

    /// Inference error
    #[error("Inference error: {0}")]
    Inference(String),

    /// Result sink error
    #[error("Sink error: {0}")]
    Sink(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Image codec error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
