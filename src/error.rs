use thiserror::Error;

/// Errors produced while scoring frames or driving a capture session.
///
/// Every variant is recoverable: callers skip the frame, fail the one-shot
/// call or tally the capture slot, and carry on.
#[derive(Debug, Error)]
pub enum QualityError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("failed to decode image: {0}")]
    DecodeFailure(String),

    #[error("capture failed for slot {slot}: {reason}")]
    CaptureFailure { slot: usize, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for QualityError {
    fn from(err: image::ImageError) -> Self {
        QualityError::DecodeFailure(err.to_string())
    }
}

impl From<base64::DecodeError> for QualityError {
    fn from(err: base64::DecodeError) -> Self {
        QualityError::DecodeFailure(err.to_string())
    }
}

pub type QualityResult<T> = Result<T, QualityError>;
