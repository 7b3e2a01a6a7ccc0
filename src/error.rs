//! Error types for the simplegen crate

use thiserror::Error;

/// Main error type for model construction, training and sampling
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid hyperparameters or option values, raised at construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation was called before the state it depends on exists
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Malformed, empty or mis-shaped training data
    #[error("Data error: {0}")]
    Data(String),

    /// Checkpoint topology does not match the network it is restored into
    #[error("Shape error: {0}")]
    Shape(String),

    /// Training was stopped through a stop flag
    #[error("Training interrupted after {steps} steps")]
    Interrupted {
        /// Steps completed before the stop was observed
        steps: u64,
    },

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding or decoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for simplegen operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a precondition error
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Create a data error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Create a shape error
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    /// Create a "not found" IO error for a missing file or directory
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::Io(std::io::Error::new(std::io::ErrorKind::NotFound, msg.into()))
    }

    /// Whether this error is an IO "not found" condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(err) if err.kind() == std::io::ErrorKind::NotFound)
    }
}
