//! Common Errors

use thiserror::Error;

/// Errors raised while handling shared protocol types.
#[derive(Debug, Error)]
pub enum Error {
    /// A frame could not be decoded into a protocol event.
    #[error("Invalid message: {0}")]
    Decode(#[from] serde_json::Error),

    /// A quality preset name was not recognised.
    #[error("Unknown quality preset: {0}")]
    UnknownQuality(String),
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
