//! Error types for transparent asset generation

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for dualmatte operations
pub type Result<T> = std::result::Result<T, MatteError>;

/// Comprehensive error types for generation, recovery and scheduling
#[derive(Error, Debug)]
pub enum MatteError {
    /// The generate/edit collaborator failed or returned an error payload
    #[error("Model error: {0}")]
    Model(String),

    /// The collaborator reported success but no decodable image came back
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Raster dimensions violate a precondition (zero size, mismatched pair)
    #[error("Dimension error: {0}")]
    Dimension(String),

    /// The slot or batch was cancelled before it could finish
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A generation or edit request failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Image decode/encode errors from the codec adapter
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classification carried by failed slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ModelError,
    MalformedResponseError,
    DimensionError,
    UserCancelled,
    InvalidInput,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ModelError => "model error",
            Self::MalformedResponseError => "malformed response",
            Self::DimensionError => "dimension error",
            Self::UserCancelled => "cancelled",
            Self::InvalidInput => "invalid input",
            Self::Internal => "internal error",
        };
        f.write_str(name)
    }
}

impl MatteError {
    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new malformed response error
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Create a new dimension error
    pub fn dimension<S: Into<String>>(msg: S) -> Self {
        Self::Dimension(msg.into())
    }

    /// Create a new cancellation error
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new invalid request error
    pub fn invalid_request<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {})",
            parameter, value, valid_range
        ))
    }

    /// Create a model error tagged with the operation that failed
    pub fn model_operation_error(backend: &str, operation: &str, details: &str) -> Self {
        Self::Model(format!("{} {} failed: {}", backend, operation, details))
    }

    /// Classify this error for slot bookkeeping
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Model(_) => ErrorKind::ModelError,
            // An image that can't be decoded is a response problem, not a local one
            Self::MalformedResponse(_) | Self::Image(_) => ErrorKind::MalformedResponseError,
            Self::Dimension(_) => ErrorKind::DimensionError,
            Self::Cancelled(_) => ErrorKind::UserCancelled,
            Self::InvalidConfig(_) | Self::InvalidRequest(_) => ErrorKind::InvalidInput,
            Self::Io(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error represents a cancellation rather than a failure
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
