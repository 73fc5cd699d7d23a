//! Batch upscaling of video frames.
//!
//! A job takes frames from a video or from a previous generation run,
//! upscales them through a chain of at most two upscalers and stitches the
//! result back into an mp4 with ffmpeg.

pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod model;
pub mod paths;
pub mod pipeline;
pub mod video;

pub use config::{EncoderSettings, ExecutionMode, ResizeMode, UpscaleJobConfig, UpscalerChain, UpscalerSpec};
pub use device::{Device, HostDevice, ReclaimGuard};
pub use error::{Error, Result};
pub use model::{Upscaler, UpscalerRegistry};
pub use pipeline::{JobLabel, JobOutcome, Pipeline, StitchOutcome};
