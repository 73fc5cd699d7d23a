use std::path::PathBuf;

use image::error::ImageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to process image: {0}")]
    Image(#[from] ImageError),

    #[error("I/O operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read job configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid argument provided: {0}")]
    InvalidArgument(String),

    #[error("Upscaler is not registered: {0}")]
    UnknownUpscaler(String),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Input frame directory not found: {}", .0.display())]
    InputFramesNotFound(PathBuf),

    #[error("No frames eligible for upscaling in {}", .0.display())]
    NoEligibleFrames(PathBuf),

    #[error("Upscaling operation failed: {0}")]
    UpscaleError(String),

    #[error("Upscaling frame {position} ({}) failed: {source}", .frame.display())]
    FrameFailed {
        position: usize,
        frame: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("Upscaling was cancelled")]
    Cancelled,

    #[error("FFmpeg is not available on this system")]
    FFmpegNotAvailable,

    #[error("FFmpeg command execution failed (status {status:?}): {stderr}")]
    FfmpegFailed { status: Option<i32>, stderr: String },
}

impl Error {
    pub fn upscale(message: impl Into<String>) -> Self {
        Error::UpscaleError(message.into())
    }

    pub(crate) fn frame_failed(position: usize, frame: impl Into<PathBuf>, source: Error) -> Self {
        Error::FrameFailed {
            position,
            frame: frame.into(),
            source: Box::new(source),
        }
    }

    /// Source frames were missing or none survived filtering.
    pub fn is_normalization(&self) -> bool {
        matches!(self, Error::InputFramesNotFound(_) | Error::NoEligibleFrames(_))
    }

    /// The per-frame upscale loop aborted.
    pub fn is_execution(&self) -> bool {
        matches!(self, Error::FrameFailed { .. } | Error::Cancelled)
    }
}
