//! Error types for duet-engine

use thiserror::Error;

/// Result type alias using duet-engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the chat backend layer
    #[error(transparent)]
    Ai(#[from] duet_ai::Error),

    /// The speech backend rejected a request
    #[error("Speech error: {0}")]
    Speech(String),

    /// The engine task has stopped
    #[error("engine is not running")]
    Closed,
}
