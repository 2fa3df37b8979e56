//! Fault taxonomy for the frame-processing path.
//!
//! None of these terminate the process. Callers in the pipeline log them and
//! degrade (empty inference result, placeholder frame, skipped iteration).

use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DetectError {
    /// The model failed to load at startup; inference degrades to empty results.
    #[error("model unavailable")]
    ModelUnavailable,

    /// The capture device is missing or busy.
    #[error("camera {index} unavailable: {reason}")]
    CameraUnavailable { index: u32, reason: String },

    /// Inbound image payload could not be decoded.
    #[error("invalid image data: {0}")]
    Decode(String),

    /// A single dropped frame or failed write.
    #[error("transient i/o failure: {0}")]
    TransientIo(String),
}

impl DetectError {
    pub fn camera(index: u32, reason: impl std::fmt::Display) -> Self {
        Self::CameraUnavailable {
            index,
            reason: reason.to_string(),
        }
    }
}
