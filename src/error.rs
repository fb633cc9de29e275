//! Error taxonomy for the detection pipeline.

use thiserror::Error;

/// Failures surfaced by the core pipeline.
///
/// "Category not detected" is never an error; it is carried as data in the
/// `ComplianceRecord`.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Camera or model artifact missing or busy at startup. The stream never starts.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// A single frame read failed. Treated as end of stream, never retried.
    #[error("frame read failed: {0}")]
    TransientReadFailure(String),

    /// The model failed on a frame. Fatal to the stream.
    #[error("inference failed: {0}")]
    InferenceFailure(String),

    /// Rejected at construction time, never reaches the loop.
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("encoding failed: {0}")]
    Encoding(String),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigurationInvalid(msg.into())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        Self::Encoding(err.to_string())
    }
}
