//! Error types for the transcode pipeline

use thiserror::Error;

use super::Stage;

#[derive(Error, Debug, Clone)]
pub enum TranscodeError {
    #[error("upstream body failed mid-stream: {message}")]
    SourceStream { message: String },

    #[error("failed to probe image dimensions: {message}")]
    ProbeFailed { message: String },

    #[error("failed to decode image: {message}")]
    DecodeFailed { message: String },

    #[error("resize failed: {message}")]
    ResizeFailed { message: String },

    #[error("failed to encode to {format}: {message}")]
    EncodeFailed {
        format: &'static str,
        message: String,
    },

    #[error("invalid quality {quality}: encoder accepts 1-100")]
    InvalidQuality { quality: i32 },
}

impl TranscodeError {
    /// The pipeline stage this error aborted
    pub fn stage(&self) -> Stage {
        match self {
            TranscodeError::SourceStream { .. } => Stage::Fetching,
            TranscodeError::ProbeFailed { .. } => Stage::Probing,
            TranscodeError::DecodeFailed { .. } => Stage::Probing,
            TranscodeError::ResizeFailed { .. } => Stage::Resizing,
            TranscodeError::EncodeFailed { .. } | TranscodeError::InvalidQuality { .. } => {
                Stage::Encoding
            }
        }
    }

    pub fn probe_failed(message: impl Into<String>) -> Self {
        TranscodeError::ProbeFailed {
            message: message.into(),
        }
    }

    pub fn decode_failed(message: impl Into<String>) -> Self {
        TranscodeError::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn resize_failed(message: impl Into<String>) -> Self {
        TranscodeError::ResizeFailed {
            message: message.into(),
        }
    }

    pub fn encode_failed(format: &'static str, message: impl Into<String>) -> Self {
        TranscodeError::EncodeFailed {
            format,
            message: message.into(),
        }
    }
}
