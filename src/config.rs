//! Job configuration for a single upscaling run.
//!
//! A [`UpscaleJobConfig`] is immutable once a job starts. It is usually
//! loaded from JSON with [`UpscaleJobConfig::from_file`] and then adjusted by
//! the command line before [`UpscaleJobConfig::validate`] is called.

use crate::error::{Error, Result};

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_OUTPUT_ROOT: &str = "outputs/frame-upscaling";

/// How the upscaled frame size is derived from the source frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResizeMode {
    /// Multiply both source dimensions by `factor`.
    ScaleBy { factor: f64 },
    /// Fixed output dimensions.
    ScaleTo { width: u32, height: u32 },
}

impl ResizeMode {
    /// Dimensions of the upscaled frame before any cropping.
    ///
    /// For `ScaleTo` the source aspect ratio is kept and the larger of the
    /// two per-axis factors is used, so the result covers the target box.
    pub fn scaled_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let factor = match *self {
            ResizeMode::ScaleBy { factor } => factor,
            ResizeMode::ScaleTo { width: w, height: h } => {
                (w as f64 / width.max(1) as f64).max(h as f64 / height.max(1) as f64)
            }
        };
        (
            ((width as f64 * factor).round() as u32).max(1),
            ((height as f64 * factor).round() as u32).max(1),
        )
    }

    /// Crop box for `ScaleTo` with cropping enabled.
    pub fn crop_dimensions(&self, crop: bool) -> Option<(u32, u32)> {
        match *self {
            ResizeMode::ScaleTo { width, height } if crop => Some((width, height)),
            _ => None,
        }
    }
}

impl Default for ResizeMode {
    fn default() -> Self {
        ResizeMode::ScaleBy { factor: 2.0 }
    }
}

impl fmt::Display for ResizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResizeMode::ScaleBy { factor } => write!(f, "x{}", factor),
            ResizeMode::ScaleTo { width, height } => write!(f, "{}x{}", width, height),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpscalerSpec {
    pub name: String,
    /// 0 disables the stage; anything above blends it in.
    #[serde(default = "UpscalerSpec::full_visibility")]
    pub visibility: f32,
}

impl UpscalerSpec {
    pub fn new(name: impl Into<String>, visibility: f32) -> Self {
        Self {
            name: name.into(),
            visibility,
        }
    }

    fn full_visibility() -> f32 {
        1.0
    }

    pub fn is_enabled(&self) -> bool {
        self.visibility > 0.0
    }
}

/// One mandatory stage, optionally followed by a blended second stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpscalerChain {
    pub primary: UpscalerSpec,
    #[serde(default)]
    pub secondary: Option<UpscalerSpec>,
}

impl UpscalerChain {
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            primary: UpscalerSpec::new(name, 1.0),
            secondary: None,
        }
    }

    pub fn then(mut self, name: impl Into<String>, visibility: f32) -> Self {
        self.secondary = Some(UpscalerSpec::new(name, visibility));
        self
    }

    /// The second stage, only when it will actually run.
    pub fn active_secondary(&self) -> Option<&UpscalerSpec> {
        self.secondary.as_ref().filter(|spec| spec.is_enabled())
    }

    pub fn secondary_visibility(&self) -> f32 {
        self.secondary.as_ref().map_or(0.0, |spec| spec.visibility)
    }

    /// Name of the second stage as it appears in output file names.
    pub fn secondary_name(&self) -> &str {
        self.secondary.as_ref().map_or("None", |spec| spec.name.as_str())
    }
}

impl Default for UpscalerChain {
    fn default() -> Self {
        Self::single("Lanczos")
    }
}

impl fmt::Display for UpscalerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary.name)?;
        if let Some(secondary) = self.active_secondary() {
            write!(f, " -> {} ({:.2})", secondary.name, secondary.visibility)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Overrides the probed frame rate. Required for existing batches.
    pub frame_rate: Option<f64>,
    pub crf: u8,
    pub preset: String,
    pub codec: String,
    pub ffmpeg_location: PathBuf,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            frame_rate: None,
            crf: 17,
            preset: String::from("slow"),
            codec: String::from("libx264"),
            ffmpeg_location: PathBuf::from("ffmpeg"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One frame at a time.
    Sequential,
    /// Bounded worker pool sized from the device memory budget.
    Pool {
        max_workers: usize,
        frame_memory_bytes: u64,
    },
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Sequential
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleJobConfig {
    pub resize: ResizeMode,
    pub crop: bool,
    pub chain: UpscalerChain,
    pub encoder: EncoderSettings,
    pub audio: Option<PathBuf>,
    pub keep_frames: bool,
    pub job_name: Option<String>,
    pub output_root: PathBuf,
    pub execution: ExecutionMode,
    pub progress: bool,
}

impl Default for UpscaleJobConfig {
    fn default() -> Self {
        Self {
            resize: ResizeMode::default(),
            crop: true,
            chain: UpscalerChain::default(),
            encoder: EncoderSettings::default(),
            audio: None,
            keep_frames: false,
            job_name: None,
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            execution: ExecutionMode::default(),
            progress: true,
        }
    }
}

impl UpscaleJobConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self.resize {
            ResizeMode::ScaleBy { factor } if !(factor.is_finite() && factor > 0.0) => {
                return Err(Error::InvalidArgument(format!("scale factor must be positive, got {}", factor)));
            }
            ResizeMode::ScaleTo { width, height } if width == 0 || height == 0 => {
                return Err(Error::InvalidArgument(format!(
                    "target dimensions must be non-zero, got {}x{}",
                    width, height
                )));
            }
            _ => {}
        }

        if self.chain.primary.name.trim().is_empty() {
            return Err(Error::InvalidArgument("first upscaler name cannot be empty".to_string()));
        }
        for spec in std::iter::once(&self.chain.primary).chain(self.chain.secondary.iter()) {
            if !(0.0..=1.0).contains(&spec.visibility) {
                return Err(Error::InvalidArgument(format!(
                    "visibility of {} must be between 0 and 1, got {}",
                    spec.name, spec.visibility
                )));
            }
        }
        if let Some(secondary) = self.chain.active_secondary() {
            if secondary.name.trim().is_empty() {
                return Err(Error::InvalidArgument("second upscaler name cannot be empty".to_string()));
            }
        }

        if self.encoder.crf > 51 {
            return Err(Error::InvalidArgument(format!("crf must be between 0 and 51, got {}", self.encoder.crf)));
        }
        if self.encoder.preset.is_empty() {
            return Err(Error::InvalidArgument("preset cannot be empty".to_string()));
        }
        if self.encoder.codec.is_empty() {
            return Err(Error::InvalidArgument("codec cannot be empty".to_string()));
        }
        if let Some(frame_rate) = self.encoder.frame_rate {
            if !(frame_rate.is_finite() && frame_rate > 0.0) {
                return Err(Error::InvalidArgument(format!("frame rate must be positive, got {}", frame_rate)));
            }
        }

        if let ExecutionMode::Pool { max_workers, frame_memory_bytes } = self.execution {
            if max_workers == 0 || frame_memory_bytes == 0 {
                return Err(Error::InvalidArgument(
                    "worker pool needs at least one worker and a non-zero frame memory estimate".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_by_multiplies_both_axes() {
        let resize = ResizeMode::ScaleBy { factor: 2.5 };
        assert_eq!(resize.scaled_dimensions(100, 40), (250, 100));
        assert_eq!(resize.crop_dimensions(true), None);
    }

    #[test]
    fn scale_to_covers_target_box() {
        let resize = ResizeMode::ScaleTo { width: 1920, height: 1080 };
        // 4:3 source has to grow past 1080 in height to cover 1920 wide
        assert_eq!(resize.scaled_dimensions(640, 480), (1920, 1440));
        assert_eq!(resize.crop_dimensions(true), Some((1920, 1080)));
        assert_eq!(resize.crop_dimensions(false), None);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let json = r#"{
            "resize": { "mode": "scale_to", "width": 1280, "height": 720 },
            "chain": { "primary": { "name": "Nearest" }, "secondary": { "name": "Lanczos", "visibility": 0.5 } },
            "encoder": { "crf": 20 }
        }"#;
        let config: UpscaleJobConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.resize, ResizeMode::ScaleTo { width: 1280, height: 720 });
        assert_eq!(config.chain.primary.visibility, 1.0);
        assert_eq!(config.chain.secondary_visibility(), 0.5);
        assert_eq!(config.encoder.crf, 20);
        assert_eq!(config.encoder.preset, "slow");
        assert_eq!(config.output_root, PathBuf::from(DEFAULT_OUTPUT_ROOT));
        assert_eq!(config.execution, ExecutionMode::Sequential);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = UpscaleJobConfig::default();
        config.resize = ResizeMode::ScaleBy { factor: 0.0 };
        assert!(config.validate().is_err());

        let mut config = UpscaleJobConfig::default();
        config.chain = UpscalerChain::single("Lanczos").then("Nearest", 1.5);
        assert!(config.validate().is_err());

        let mut config = UpscaleJobConfig::default();
        config.encoder.crf = 60;
        assert!(config.validate().is_err());

        let mut config = UpscaleJobConfig::default();
        config.execution = ExecutionMode::Pool { max_workers: 0, frame_memory_bytes: 1 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn disabled_second_stage_may_be_unnamed() {
        let mut config = UpscaleJobConfig::default();
        config.chain = UpscalerChain::single("ESRGAN").then("", 0.0);
        config.validate().unwrap();
        assert!(config.chain.active_secondary().is_none());
        assert_eq!(config.chain.secondary_name(), "");
    }
}
