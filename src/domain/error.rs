//! Error types for line recognition.

use thiserror::Error;

/// Typed failures of the model, loss and data layers.
///
/// The application and CLI layers wrap these in `anyhow::Error`
/// with extra context; library code returns them directly.
#[derive(Error, Debug)]
pub enum HtrError {
    /// A tensor or input size does not have the expected shape.
    #[error("Shape error: {0}")]
    Shape(String),

    /// A label sequence cannot be scored (bad class index, etc.).
    #[error("Invalid label: {0}")]
    InvalidLabel(String),

    /// The loss of a batch was infinite or NaN.
    #[error("Non-finite loss {value} on batch {batch}")]
    NonFiniteLoss { batch: usize, value: f64 },

    /// Configuration errors.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for recognition operations.
pub type HtrResult<T> = Result<T, HtrError>;

impl HtrError {
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub fn invalid_label(msg: impl Into<String>) -> Self {
        Self::InvalidLabel(msg.into())
    }
}
