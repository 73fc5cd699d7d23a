use frame_upscaler::{Error, ExecutionMode, ResizeMode, UpscaleJobConfig, UpscalerSpec};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Upscale the frames of a video and stitch them back together
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// JSON job configuration. Flags below override its values
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract, upscale and re-encode a whole video
    Video {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Upscale the frames a previous generation run left in a directory
    Batch {
        /// Prefix of the frames to pick up
        #[arg(short = 'b', long = "batch-id", value_name = "ID")]
        batch_id: String,

        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
pub struct Overrides {
    /// Scale factor
    #[arg(short = 's', long = "scale", value_name = "FACTOR", global = true, conflicts_with_all = ["width", "height"])]
    pub scale: Option<f64>,

    /// Target width, requires --height
    #[arg(long = "width", value_name = "WIDTH", global = true, requires = "height")]
    pub width: Option<u32>,

    /// Target height, requires --width
    #[arg(long = "height", value_name = "HEIGHT", global = true, requires = "width")]
    pub height: Option<u32>,

    /// Center crop to the target dimensions (0|1)
    #[arg(long = "crop", value_name = "0|1", global = true)]
    pub crop: Option<u8>,

    /// First upscaler
    #[arg(short = 'u', long = "upscaler", value_name = "NAME", global = true)]
    pub upscaler: Option<String>,

    /// Second upscaler, blended over the first one
    #[arg(long = "second-upscaler", value_name = "NAME", global = true)]
    pub second_upscaler: Option<String>,

    /// Visibility of the second upscaler in [0, 1]
    #[arg(long = "visibility", value_name = "V", global = true, default_value_t = 1.0)]
    pub visibility: f32,

    /// Keep the upscaled frames after stitching
    #[arg(short = 'k', long = "keep-frames", global = true)]
    pub keep_frames: bool,

    #[arg(long = "crf", value_name = "CRF", global = true)]
    pub crf: Option<u8>,

    #[arg(long = "preset", value_name = "PRESET", global = true)]
    pub preset: Option<String>,

    #[arg(long = "codec", value_name = "CODEC", global = true)]
    pub codec: Option<String>,

    /// Output frame rate, required for batches
    #[arg(long = "fps", value_name = "FPS", global = true)]
    pub fps: Option<f64>,

    /// Audio track to mux into the video
    #[arg(short = 'a', long = "audio", value_name = "FILE", global = true)]
    pub audio: Option<PathBuf>,

    #[arg(long = "ffmpeg", value_name = "PATH", global = true)]
    pub ffmpeg: Option<PathBuf>,

    /// Job folder name, defaults to the video file name
    #[arg(short = 'n', long = "name", value_name = "NAME", global = true)]
    pub name: Option<String>,

    #[arg(short = 'o', long = "output-root", value_name = "DIR", global = true)]
    pub output_root: Option<PathBuf>,

    /// Upscale frames on a worker pool of at most N threads
    #[arg(long = "workers", value_name = "N", global = true)]
    pub workers: Option<usize>,

    /// Memory one frame needs on the device, used to size the pool
    #[arg(long = "frame-memory", value_name = "BYTES", global = true, default_value_t = 512 * 1024 * 1024)]
    pub frame_memory: u64,

    #[arg(long = "no-progress", global = true)]
    pub no_progress: bool,
}

impl Args {
    /// Loads the configuration file, if any, and applies the flag overrides.
    pub fn job_config(&self) -> Result<UpscaleJobConfig, Error> {
        let mut config = match &self.config {
            Some(path) => UpscaleJobConfig::from_file(path)?,
            None => UpscaleJobConfig::default(),
        };
        self.overrides.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

impl Overrides {
    fn apply(&self, config: &mut UpscaleJobConfig) {
        if let Some(factor) = self.scale {
            config.resize = ResizeMode::ScaleBy { factor };
        }
        if let (Some(width), Some(height)) = (self.width, self.height) {
            config.resize = ResizeMode::ScaleTo { width, height };
        }
        if let Some(crop) = self.crop {
            config.crop = crop != 0;
        }
        if let Some(name) = &self.upscaler {
            config.chain.primary.name = name.clone();
        }
        if let Some(name) = &self.second_upscaler {
            config.chain.secondary = Some(UpscalerSpec::new(name.clone(), self.visibility));
        }
        if self.keep_frames {
            config.keep_frames = true;
        }
        if let Some(crf) = self.crf {
            config.encoder.crf = crf;
        }
        if let Some(preset) = &self.preset {
            config.encoder.preset = preset.clone();
        }
        if let Some(codec) = &self.codec {
            config.encoder.codec = codec.clone();
        }
        if let Some(fps) = self.fps {
            config.encoder.frame_rate = Some(fps);
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            config.encoder.ffmpeg_location = ffmpeg.clone();
        }
        if let Some(audio) = &self.audio {
            config.audio = Some(audio.clone());
        }
        if let Some(name) = &self.name {
            config.job_name = Some(name.clone());
        }
        if let Some(output_root) = &self.output_root {
            config.output_root = output_root.clone();
        }
        if let Some(max_workers) = self.workers {
            config.execution = ExecutionMode::Pool {
                max_workers,
                frame_memory_bytes: self.frame_memory,
            };
        }
        if self.no_progress {
            config.progress = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_flags_override_defaults() {
        let args = Args::parse_from([
            "frame_upscaler", "video", "clip.mp4",
            "--width", "1920", "--height", "1080",
            "-u", "Nearest", "--second-upscaler", "Lanczos", "--visibility", "0.5",
            "--crf", "20", "-k", "--no-progress",
        ]);
        assert!(matches!(&args.command, Command::Video { file } if file == &PathBuf::from("clip.mp4")));

        let config = args.job_config().unwrap();
        assert_eq!(config.resize, ResizeMode::ScaleTo { width: 1920, height: 1080 });
        assert_eq!(config.chain.primary.name, "Nearest");
        assert_eq!(config.chain.secondary_visibility(), 0.5);
        assert_eq!(config.encoder.crf, 20);
        assert!(config.keep_frames);
        assert!(!config.progress);
    }

    #[test]
    fn batch_subcommand_takes_id_and_dir() {
        let args = Args::parse_from(["frame_upscaler", "batch", "--batch-id", "20240101", "frames", "--fps", "15"]);
        match &args.command {
            Command::Batch { batch_id, dir } => {
                assert_eq!(batch_id, "20240101");
                assert_eq!(dir, &PathBuf::from("frames"));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(args.job_config().unwrap().encoder.frame_rate, Some(15.0));
    }

    #[test]
    fn invalid_override_is_rejected() {
        let args = Args::parse_from(["frame_upscaler", "video", "clip.mp4", "--scale", "0"]);
        assert!(matches!(args.job_config(), Err(Error::InvalidArgument(_))));
    }
}
