mod encode;
mod extract;
mod normalize;
mod progress;
mod stitch;
mod upscale;

pub use encode::{EncodeRequest, Encoder, FfmpegEncoder, Soundtrack};
pub use extract::{FfmpegExtractor, FrameExtractor, FrameRange};
pub use normalize::{NormalizeMode, Normalizer, AUXILIARY_MARKERS};
pub use stitch::{output_file_name, JobLabel, Stitch, StitchJob, StitchOutcome};
pub use upscale::{CancelFlag, Upscale};

use crate::config::UpscaleJobConfig;
use crate::device::{Device, HostDevice, ReclaimGuard};
use crate::error::Error;
use crate::model::UpscalerRegistry;
use crate::paths::{clean_folder_name, WorkingPaths};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

/// What a finished job produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOutcome {
    pub label: JobLabel,
    pub frame_count: usize,
    pub stitch: StitchOutcome,
}

impl JobOutcome {
    /// Path of the output video, whether or not it was written.
    pub fn video_path(&self) -> &Path {
        self.stitch.video_path()
    }

    pub fn is_stitched(&self) -> bool {
        self.stitch.is_stitched()
    }
}

/// Frames on disk waiting to be upscaled, plus what the stitcher needs to
/// turn them into a video.
struct PreparedJob {
    label: JobLabel,
    paths: WorkingPaths,
    mode: NormalizeMode,
    frame_rate: f64,
    audio: Option<PathBuf>,
}

pub struct Pipeline {
    config: UpscaleJobConfig,
    registry: UpscalerRegistry,
    extractor: Box<dyn FrameExtractor>,
    encoder: Box<dyn Encoder>,
    device: Arc<dyn Device>,
    cancel: Option<CancelFlag>,
}

impl Pipeline {
    /// Pipeline backed by ffmpeg, the host device and the built-in upscalers.
    pub fn new(config: UpscaleJobConfig) -> Result<Self, Error> {
        config.validate()?;
        let ffmpeg = config.encoder.ffmpeg_location.clone();
        Ok(Self {
            registry: UpscalerRegistry::with_builtin()?,
            extractor: Box::new(FfmpegExtractor::new(ffmpeg.clone())),
            encoder: Box::new(FfmpegEncoder::new(ffmpeg)),
            device: Arc::new(HostDevice),
            cancel: None,
            config,
        })
    }

    pub fn registry(mut self, registry: UpscalerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn extractor(mut self, extractor: Box<dyn FrameExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn encoder(mut self, encoder: Box<dyn Encoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn device(mut self, device: Arc<dyn Device>) -> Self {
        self.device = device;
        self
    }

    pub fn cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Extracts every frame of `video_file`, upscales them and stitches the
    /// result with the video's own audio.
    pub fn upscale_video(&self, video_file: &Path) -> Result<JobOutcome, Error> {
        if !video_file.is_file() {
            return Err(Error::InvalidVideo(format!("{} is not a file", video_file.display())));
        }
        let name = match &self.config.job_name {
            Some(name) => name.clone(),
            None => video_file
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .ok_or_else(|| Error::InvalidVideo(format!("{} has no file name", video_file.display())))?,
        };
        let name = clean_folder_name(&name);

        let frame_rate = match self.config.encoder.frame_rate {
            Some(frame_rate) => frame_rate,
            None => self.extractor.probe(video_file)?.frame_rate,
        };

        let paths = WorkingPaths::allocate(&self.config.output_root, &name)?;
        info!("Upscaling {} into {}", video_file.display(), paths.root.display());

        let extracted = match self.extractor.extract(video_file, &paths.raw_frames, FrameRange::all()) {
            Ok(extracted) => extracted,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&paths.root) {
                    warn!("Failed to remove {}: {}", paths.root.display(), cleanup);
                }
                return Err(e);
            }
        };
        info!("Extracted {} frames at {:.3} fps", extracted, frame_rate);

        let audio = self.config.audio.clone().unwrap_or_else(|| video_file.to_path_buf());
        self.run(PreparedJob {
            label: JobLabel::Name(name),
            paths,
            mode: NormalizeMode::Copy,
            frame_rate,
            audio: Some(audio),
        })
    }

    /// Upscales the frames of a previous generation run found in `raw_dir`.
    /// The frame rate has to be set in the encoder settings.
    pub fn upscale_existing_batch(&self, batch_id: &str, raw_dir: &Path) -> Result<JobOutcome, Error> {
        if batch_id.is_empty() {
            return Err(Error::InvalidArgument("batch id cannot be empty".to_string()));
        }
        let frame_rate = self.config.encoder.frame_rate.ok_or_else(|| {
            Error::InvalidArgument("a frame rate is required to stitch existing frames".to_string())
        })?;
        if !raw_dir.is_dir() {
            return Err(Error::InputFramesNotFound(raw_dir.to_path_buf()));
        }

        info!("Upscaling batch {} from {}", batch_id, raw_dir.display());
        self.run(PreparedJob {
            label: JobLabel::Batch(batch_id.to_string()),
            paths: WorkingPaths::for_existing(raw_dir, batch_id),
            mode: NormalizeMode::Reencode,
            frame_rate,
            audio: self.config.audio.clone(),
        })
    }

    fn run(&self, job: PreparedJob) -> Result<JobOutcome, Error> {
        let chain = self.registry.resolve(&self.config.chain)?;

        let mut normalizer = Normalizer::new(&job.paths.raw_frames, job.mode);
        if let JobLabel::Batch(batch_id) = &job.label {
            normalizer = normalizer.batch(batch_id);
        }
        let sequence = normalizer.execute(&job.paths.normalized)?;

        let _reclaim = ReclaimGuard::checkpoint(self.device.as_ref());

        let mut upscale = Upscale::new(&chain, self.config.resize, self.config.crop).show_progress(self.config.progress);
        if let Some(cancel) = &self.cancel {
            upscale = upscale.cancel_flag(Arc::clone(cancel));
        }
        let frame_count = upscale.execute(
            &sequence,
            &job.paths.upscaled,
            self.config.execution,
            self.device.as_ref(),
        )?;

        if let Err(e) = fs::remove_dir_all(&job.paths.normalized) {
            warn!("Failed to remove {}: {}", job.paths.normalized.display(), e);
        }

        let stitch = Stitch::new(self.encoder.as_ref()).execute(&StitchJob {
            label: &job.label,
            paths: &job.paths,
            frame_count,
            frame_rate: job.frame_rate,
            resize: self.config.resize,
            chain: &self.config.chain,
            encoder: &self.config.encoder,
            audio: job.audio.as_deref(),
            keep_frames: self.config.keep_frames,
        });

        Ok(JobOutcome {
            label: job.label,
            frame_count,
            stitch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResizeMode, UpscalerChain};
    use crate::device::MockDevice;
    use crate::video::VideoInfo;
    use encode::MockEncoder;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    struct StaticExtractor;

    impl FrameExtractor for StaticExtractor {
        fn probe(&self, _video: &Path) -> Result<VideoInfo, Error> {
            Ok(VideoInfo {
                width: 4,
                height: 4,
                frame_rate: 12.0,
                frame_count: 3,
            })
        }

        fn extract(&self, _video: &Path, output_dir: &Path, _range: FrameRange) -> Result<usize, Error> {
            for index in 0..3 {
                RgbImage::from_pixel(4, 4, Rgb([index * 40, 0, 0]))
                    .save(output_dir.join(format!("{:09}.png", index)))
                    .unwrap();
            }
            Ok(3)
        }
    }

    fn config(output_root: &Path) -> UpscaleJobConfig {
        UpscaleJobConfig {
            resize: ResizeMode::ScaleBy { factor: 2.0 },
            chain: UpscalerChain::single("Nearest"),
            output_root: output_root.to_path_buf(),
            progress: false,
            ..UpscaleJobConfig::default()
        }
    }

    fn pipeline(output_root: &Path, encoder: MockEncoder, device: MockDevice) -> Pipeline {
        Pipeline::new(config(output_root))
            .unwrap()
            .extractor(Box::new(StaticExtractor))
            .encoder(Box::new(encoder))
            .device(Arc::new(device))
    }

    #[test]
    fn reclaims_twice_when_stitching_fails() {
        let output = tempdir().unwrap();
        let video = output.path().join("clip.mp4");
        fs::write(&video, b"video").unwrap();

        let mut encoder = MockEncoder::new();
        encoder
            .expect_encode()
            .withf(|request| request.frame_rate == 12.0 && request.frames == (0..3))
            .times(1)
            .returning(|_| Err(Error::FFmpegNotAvailable));
        let mut device = MockDevice::new();
        device.expect_reclaim().times(2).return_const(());
        device.expect_available_memory().return_const(None);

        let outcome = pipeline(&output.path().join("out"), encoder, device)
            .upscale_video(&video)
            .unwrap();

        assert!(!outcome.is_stitched());
        assert_eq!(outcome.frame_count, 3);
        assert_eq!(
            outcome.video_path(),
            output.path().join("out/clip/clip_upscaled_by_2-0_with_Nearest.mp4")
        );
    }

    #[test]
    fn unknown_upscaler_fails_before_any_work() {
        let output = tempdir().unwrap();
        let raw = output.path().join("batch");
        fs::create_dir_all(&raw).unwrap();

        let mut config = config(output.path());
        config.chain = UpscalerChain::single("SwinIR 4x");
        config.encoder.frame_rate = Some(15.0);
        let mut encoder = MockEncoder::new();
        encoder.expect_encode().never();
        let mut device = MockDevice::new();
        device.expect_reclaim().never();

        let err = Pipeline::new(config)
            .unwrap()
            .encoder(Box::new(encoder))
            .device(Arc::new(device))
            .upscale_existing_batch("20240101", &raw)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownUpscaler(name) if name == "SwinIR 4x"));
    }

    #[test]
    fn batch_requires_frame_rate() {
        let output = tempdir().unwrap();
        let err = pipeline(output.path(), MockEncoder::new(), MockDevice::new())
            .upscale_existing_batch("20240101", output.path())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
