use crate::error::Error;

use std::ffi::OsString;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::debug;

/// Audio to mux into the stitched video.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Soundtrack {
    None,
    File(PathBuf),
}

impl Soundtrack {
    pub fn from_path(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Soundtrack::File(path.to_path_buf()),
            None => Soundtrack::None,
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Soundtrack::None => "None",
            Soundtrack::File(_) => "File",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EncodeRequest {
    pub frame_rate: f64,
    /// printf-style frame path, e.g. `frames/%07d.png`.
    pub input_pattern: PathBuf,
    pub output: PathBuf,
    pub frames: Range<usize>,
    pub soundtrack: Soundtrack,
    pub crf: u8,
    pub preset: String,
    pub codec: String,
}

#[cfg_attr(test, mockall::automock)]
pub trait Encoder {
    fn encode(&self, request: &EncodeRequest) -> Result<(), Error>;
}

pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self { ffmpeg: ffmpeg.into() }
    }

    fn video_args(request: &EncodeRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-hide_banner", "-v", "error", "-y",
            "-r", request.frame_rate.to_string().as_str(),
            "-f", "image2",
            "-start_number", request.frames.start.to_string().as_str(),
            "-i",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(request.input_pattern.clone().into_os_string());
        args.extend(
            [
                "-frames:v", request.frames.len().to_string().as_str(),
                "-c:v", request.codec.as_str(),
                "-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2",
                "-pix_fmt", "yuv420p",
                "-crf", request.crf.to_string().as_str(),
                "-preset", request.preset.as_str(),
            ]
            .iter()
            .map(OsString::from),
        );
        args.push(request.output.clone().into_os_string());
        args
    }

    fn audio_args(video: &Path, audio: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-v", "error", "-y", "-i"].iter().map(OsString::from).collect();
        args.push(video.as_os_str().to_owned());
        args.push("-i".into());
        args.push(audio.as_os_str().to_owned());
        args.extend(
            ["-map", "0:v", "-map", "1:a?", "-c:v", "copy", "-shortest"]
                .iter()
                .map(OsString::from),
        );
        args.push(output.as_os_str().to_owned());
        args
    }

    fn run(&self, args: &[OsString]) -> Result<(), Error> {
        debug!("Running {} {:?}", self.ffmpeg.display(), args);
        let output = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::FFmpegNotAvailable,
                _ => Error::Io(e),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::FfmpegFailed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn mux_audio(&self, video: &Path, audio: &Path) -> Result<(), Error> {
        let mut muxed_name = video.file_stem().map(OsString::from).unwrap_or_default();
        muxed_name.push(".audio.mp4");
        let muxed = video.with_file_name(muxed_name);

        let result = self
            .run(&Self::audio_args(video, audio, &muxed))
            .and_then(|_| fs::rename(&muxed, video).map_err(Error::Io));
        if result.is_err() {
            let _ = fs::remove_file(&muxed);
        }
        result
    }
}

impl Encoder for FfmpegEncoder {
    fn encode(&self, request: &EncodeRequest) -> Result<(), Error> {
        if request.frames.is_empty() {
            return Err(Error::InvalidArgument("no frames to encode".to_string()));
        }
        self.run(&Self::video_args(request))?;
        match &request.soundtrack {
            Soundtrack::File(audio) => self.mux_audio(&request.output, audio),
            Soundtrack::None => Ok(()),
        }
    }
}
