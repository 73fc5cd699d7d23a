use super::encode::{EncodeRequest, Encoder, Soundtrack};
use crate::config::{EncoderSettings, ResizeMode, UpscalerChain};
use crate::frame::OUTPUT_FRAME_PATTERN;
use crate::paths::{move_dir_into, unique_file, WorkingPaths};

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

/// Names a job's outputs: a user-facing job name for whole videos, the
/// generation batch id for frames of a previous run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobLabel {
    Name(String),
    Batch(String),
}

impl JobLabel {
    pub fn as_str(&self) -> &str {
        match self {
            JobLabel::Name(name) => name,
            JobLabel::Batch(batch_id) => batch_id,
        }
    }

    pub fn is_whole_video(&self) -> bool {
        matches!(self, JobLabel::Name(_))
    }
}

impl fmt::Display for JobLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shortest round-trip form of a float with a fractional part (`2.0`,
/// `1.5`), switching to `1e-05` / `1.5e+16` notation below `1e-4` and from
/// `1e16` on.
fn format_scale(factor: f64) -> String {
    if !factor.is_finite() || factor == 0.0 {
        return format!("{:?}", factor);
    }
    let scientific = format!("{:e}", factor);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };
    if (-4..16).contains(&exponent) {
        let plain = format!("{}", factor);
        if plain.contains('.') {
            plain
        } else {
            format!("{}.0", plain)
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

/// `{label}_upscaled_{by_X-Y|to_W_H}_with_{first}[_then_{second}].mp4`
///
/// Whole-video jobs only name the second upscaler when it is visible;
/// batch jobs always name it.
pub fn output_file_name(label: &JobLabel, resize: ResizeMode, chain: &UpscalerChain) -> String {
    let size = match resize {
        ResizeMode::ScaleBy { factor } => format!("by_{}", format_scale(factor).replace('.', "-")),
        ResizeMode::ScaleTo { width, height } => format!("to_{}_{}", width, height),
    };
    let mut name = format!("{}_upscaled_{}_with_{}", label, size, chain.primary.name);
    let name_second = match label {
        JobLabel::Name(_) => chain.secondary_visibility() > 0.0,
        JobLabel::Batch(_) => true,
    };
    if name_second {
        name.push_str("_then_");
        name.push_str(chain.secondary_name());
    }
    name.push_str(".mp4");
    name
}

/// Result of the stitch stage. Both variants carry the computed video path.
/// When a file of that name already exists, `video` carries a `_N` suffix
/// before the extension so the earlier video is left untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StitchOutcome {
    Stitched {
        video: PathBuf,
        /// Upscaled frames, when they were kept.
        frames: Option<PathBuf>,
    },
    Failed {
        video: PathBuf,
        reason: String,
        /// Where the upscaled frames were preserved.
        frames: PathBuf,
    },
}

impl StitchOutcome {
    pub fn video_path(&self) -> &Path {
        match self {
            StitchOutcome::Stitched { video, .. } | StitchOutcome::Failed { video, .. } => video,
        }
    }

    pub fn frames_path(&self) -> Option<&Path> {
        match self {
            StitchOutcome::Stitched { frames, .. } => frames.as_deref(),
            StitchOutcome::Failed { frames, .. } => Some(frames),
        }
    }

    pub fn is_stitched(&self) -> bool {
        matches!(self, StitchOutcome::Stitched { .. })
    }
}

pub struct StitchJob<'a> {
    pub label: &'a JobLabel,
    pub paths: &'a WorkingPaths,
    pub frame_count: usize,
    pub frame_rate: f64,
    pub resize: ResizeMode,
    pub chain: &'a UpscalerChain,
    pub encoder: &'a EncoderSettings,
    pub audio: Option<&'a Path>,
    pub keep_frames: bool,
}

impl StitchJob<'_> {
    /// Directory the video is written to.
    fn video_dir(&self) -> &Path {
        if self.label.is_whole_video() {
            &self.paths.root
        } else {
            &self.paths.raw_frames
        }
    }

    pub fn video_path(&self) -> PathBuf {
        self.video_dir()
            .join(output_file_name(self.label, self.resize, self.chain))
    }

    fn request(&self, output: PathBuf) -> EncodeRequest {
        EncodeRequest {
            frame_rate: self.frame_rate,
            input_pattern: self.paths.upscaled.join(OUTPUT_FRAME_PATTERN),
            output,
            frames: 0..self.frame_count,
            soundtrack: Soundtrack::from_path(self.audio),
            crf: self.encoder.crf,
            preset: self.encoder.preset.clone(),
            codec: self.encoder.codec.clone(),
        }
    }
}

pub struct Stitch<'a> {
    encoder: &'a dyn Encoder,
}

impl<'a> Stitch<'a> {
    pub fn new(encoder: &'a dyn Encoder) -> Self {
        Self { encoder }
    }

    /// Encodes the upscaled frames and applies the cleanup policy. Encoder
    /// failures are reported through [`StitchOutcome::Failed`], never as an
    /// error.
    pub fn execute(&self, job: &StitchJob<'_>) -> StitchOutcome {
        let video = unique_file(&job.video_path());
        let request = job.request(video.clone());
        info!(
            "Stitching {} frames at {:.3} fps into {} (audio: {})",
            job.frame_count,
            job.frame_rate,
            video.display(),
            request.soundtrack.mode()
        );

        let outcome = match self.encoder.encode(&request) {
            Ok(()) => {
                let frames = Self::after_success(job);
                info!("Stitched {}", video.display());
                StitchOutcome::Stitched { video, frames }
            }
            Err(e) => {
                let frames = Self::preserve_frames(job);
                warn!(
                    "Video stitching failed, upscaled frames were kept in {}: {}",
                    frames.display(),
                    e
                );
                StitchOutcome::Failed {
                    video,
                    reason: e.to_string(),
                    frames,
                }
            }
        };

        if outcome.is_stitched() && job.label.is_whole_video() {
            remove_dir_logged(&job.paths.raw_frames);
        }
        outcome
    }

    fn after_success(job: &StitchJob<'_>) -> Option<PathBuf> {
        if !job.keep_frames {
            remove_dir_logged(&job.paths.upscaled);
            return None;
        }
        Some(Self::preserve_frames(job))
    }

    /// Moves the frames of a whole-video job out of the raw frame directory
    /// so they survive its removal. Batch frames stay where they are.
    fn preserve_frames(job: &StitchJob<'_>) -> PathBuf {
        if !job.label.is_whole_video() {
            return job.paths.upscaled.clone();
        }
        match move_dir_into(&job.paths.upscaled, &job.paths.root) {
            Ok(moved) => moved,
            Err(e) => {
                warn!("Failed to move {} into {}: {}", job.paths.upscaled.display(), job.paths.root.display(), e);
                job.paths.upscaled.clone()
            }
        }
    }
}

fn remove_dir_logged(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!("Failed to remove {}: {}", dir.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pipeline::encode::MockEncoder;
    use std::path::Path;
    use tempfile::tempdir;

    fn name(label: JobLabel, resize: ResizeMode, chain: UpscalerChain) -> String {
        output_file_name(&label, resize, &chain)
    }

    #[test]
    fn scale_factor_file_name() {
        assert_eq!(
            name(
                JobLabel::Name("clip".into()),
                ResizeMode::ScaleBy { factor: 2.0 },
                UpscalerChain::single("ESRGAN").then("", 0.0)
            ),
            "clip_upscaled_by_2-0_with_ESRGAN.mp4"
        );
        assert_eq!(
            name(
                JobLabel::Name("clip".into()),
                ResizeMode::ScaleBy { factor: 1.5 },
                UpscalerChain::single("ESRGAN")
            ),
            "clip_upscaled_by_1-5_with_ESRGAN.mp4"
        );
    }

    #[test]
    fn extreme_scale_factors_use_exponent_notation() {
        assert_eq!(format_scale(0.0001), "0.0001");
        assert_eq!(format_scale(0.00001), "1e-05");
        assert_eq!(format_scale(1e16), "1e+16");
        assert_eq!(format_scale(1.5e16), "1.5e+16");
        assert_eq!(format_scale(1e15), "1000000000000000.0");
        assert_eq!(
            name(
                JobLabel::Name("clip".into()),
                ResizeMode::ScaleBy { factor: 0.00001 },
                UpscalerChain::single("ESRGAN")
            ),
            "clip_upscaled_by_1e-05_with_ESRGAN.mp4"
        );
    }

    #[test]
    fn target_dimension_file_name() {
        assert_eq!(
            name(
                JobLabel::Name("clip".into()),
                ResizeMode::ScaleTo { width: 1920, height: 1080 },
                UpscalerChain::single("ESRGAN").then("Lanczos", 0.5)
            ),
            "clip_upscaled_to_1920_1080_with_ESRGAN_then_Lanczos.mp4"
        );
    }

    #[test]
    fn batch_file_name_always_names_second_stage() {
        let resize = ResizeMode::ScaleBy { factor: 4.0 };
        assert_eq!(
            name(JobLabel::Batch("20240101".into()), resize, UpscalerChain::single("ESRGAN").then("SwinIR", 0.0)),
            "20240101_upscaled_by_4-0_with_ESRGAN_then_SwinIR.mp4"
        );
        assert_eq!(
            name(JobLabel::Batch("20240101".into()), resize, UpscalerChain::single("ESRGAN")),
            "20240101_upscaled_by_4-0_with_ESRGAN_then_None.mp4"
        );
    }

    fn whole_video_paths(root: &Path) -> WorkingPaths {
        let paths = WorkingPaths::allocate(root, "clip").unwrap();
        fs::create_dir_all(&paths.upscaled).unwrap();
        fs::write(paths.upscaled.join("0000000.png"), b"frame").unwrap();
        fs::write(paths.raw_frames.join("000000000.png"), b"raw").unwrap();
        paths
    }

    fn job<'a>(
        label: &'a JobLabel,
        paths: &'a WorkingPaths,
        chain: &'a UpscalerChain,
        encoder: &'a EncoderSettings,
        keep_frames: bool,
    ) -> StitchJob<'a> {
        StitchJob {
            label,
            paths,
            frame_count: 1,
            frame_rate: 30.0,
            resize: ResizeMode::ScaleBy { factor: 2.0 },
            chain,
            encoder,
            audio: Some(Path::new("source.mp4")),
            keep_frames,
        }
    }

    #[test]
    fn success_removes_intermediate_directories() {
        let output = tempdir().unwrap();
        let paths = whole_video_paths(output.path());
        let label = JobLabel::Name("clip".into());
        let chain = UpscalerChain::single("Lanczos");
        let settings = EncoderSettings::default();

        let mut encoder = MockEncoder::new();
        let expected_pattern = paths.upscaled.join("%07d.png");
        encoder
            .expect_encode()
            .withf(move |request| {
                request.input_pattern == expected_pattern
                    && request.frames == (0..1)
                    && request.soundtrack == Soundtrack::File("source.mp4".into())
            })
            .times(1)
            .returning(|_| Ok(()));

        let outcome = Stitch::new(&encoder).execute(&job(&label, &paths, &chain, &settings, false));

        assert_eq!(
            outcome,
            StitchOutcome::Stitched {
                video: paths.root.join("clip_upscaled_by_2-0_with_Lanczos.mp4"),
                frames: None,
            }
        );
        assert!(!paths.upscaled.exists());
        assert!(!paths.raw_frames.exists());
    }

    #[test]
    fn kept_frames_of_whole_video_move_to_job_root() {
        let output = tempdir().unwrap();
        let paths = whole_video_paths(output.path());
        let label = JobLabel::Name("clip".into());
        let chain = UpscalerChain::single("Lanczos");
        let settings = EncoderSettings::default();

        let mut encoder = MockEncoder::new();
        encoder.expect_encode().times(1).returning(|_| Ok(()));

        let outcome = Stitch::new(&encoder).execute(&job(&label, &paths, &chain, &settings, true));

        let kept = paths.root.join("upscaled_frames_clip");
        assert_eq!(outcome.frames_path(), Some(kept.as_path()));
        assert!(kept.join("0000000.png").is_file());
        assert!(!paths.raw_frames.exists());
    }

    #[test]
    fn encoder_failure_preserves_frames_outside_raw_directory() {
        let output = tempdir().unwrap();
        let paths = whole_video_paths(output.path());
        let label = JobLabel::Name("clip".into());
        let chain = UpscalerChain::single("Lanczos");
        let settings = EncoderSettings::default();

        let mut encoder = MockEncoder::new();
        encoder.expect_encode().times(1).returning(|_| {
            Err(Error::FfmpegFailed {
                status: Some(1),
                stderr: "Unknown encoder 'libx264'".into(),
            })
        });

        let outcome = Stitch::new(&encoder).execute(&job(&label, &paths, &chain, &settings, false));

        match &outcome {
            StitchOutcome::Failed { video, reason, frames } => {
                assert_eq!(video, &paths.root.join("clip_upscaled_by_2-0_with_Lanczos.mp4"));
                assert!(reason.contains("Unknown encoder"));
                assert_eq!(frames, &paths.root.join("upscaled_frames_clip"));
                assert!(!frames.starts_with(&paths.raw_frames));
                assert!(frames.join("0000000.png").is_file());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn existing_video_is_never_overwritten() {
        let output = tempdir().unwrap();
        let raw = output.path().join("batch");
        let paths = WorkingPaths::for_existing(&raw, "20240101");
        fs::create_dir_all(&paths.upscaled).unwrap();
        let previous = raw.join("20240101_upscaled_by_2-0_with_Lanczos_then_None.mp4");
        fs::write(&previous, b"previous").unwrap();
        let label = JobLabel::Batch("20240101".into());
        let chain = UpscalerChain::single("Lanczos");
        let settings = EncoderSettings::default();

        let mut encoder = MockEncoder::new();
        encoder.expect_encode().times(1).returning(|_| Ok(()));

        let outcome = Stitch::new(&encoder).execute(&job(&label, &paths, &chain, &settings, false));

        assert_eq!(outcome.video_path(), raw.join("20240101_upscaled_by_2-0_with_Lanczos_then_None_1.mp4"));
        assert_eq!(fs::read(&previous).unwrap(), b"previous");
    }

    #[test]
    fn batch_failure_leaves_frames_in_place() {
        let output = tempdir().unwrap();
        let raw = output.path().join("batch");
        let paths = WorkingPaths::for_existing(&raw, "20240101");
        fs::create_dir_all(&paths.upscaled).unwrap();
        let label = JobLabel::Batch("20240101".into());
        let chain = UpscalerChain::single("Lanczos");
        let settings = EncoderSettings::default();

        let mut encoder = MockEncoder::new();
        encoder.expect_encode().times(1).returning(|_| Err(Error::FFmpegNotAvailable));

        let outcome = Stitch::new(&encoder).execute(&job(&label, &paths, &chain, &settings, false));

        assert_eq!(outcome.video_path(), raw.join("20240101_upscaled_by_2-0_with_Lanczos_then_None.mp4"));
        assert_eq!(outcome.frames_path(), Some(paths.upscaled.as_path()));
        assert!(paths.upscaled.is_dir());
        assert!(raw.is_dir());
    }
}
