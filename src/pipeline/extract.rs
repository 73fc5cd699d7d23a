use crate::error::Error;
use crate::frame::frame_index;
use crate::video::VideoInfo;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info};

/// Frames to extract. `end` is exclusive; `None` means up to the last frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameRange {
    pub start: usize,
    pub end: Option<usize>,
}

impl FrameRange {
    pub fn all() -> Self {
        Self::default()
    }

    fn select_filter(&self) -> Option<String> {
        match (self.start, self.end) {
            (0, None) => None,
            (start, None) => Some(format!("select=gte(n\\,{})", start)),
            (start, Some(end)) => Some(format!("select=between(n\\,{}\\,{})", start, end.saturating_sub(1))),
        }
    }
}

/// Turns a video into numbered image files.
pub trait FrameExtractor {
    fn probe(&self, video: &Path) -> Result<VideoInfo, Error>;

    /// Writes frames as `%09d.png` starting at 0 and returns how many were written.
    fn extract(&self, video: &Path, output_dir: &Path, range: FrameRange) -> Result<usize, Error>;
}

pub struct FfmpegExtractor {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegExtractor {
    const FRAME_PATTERN: &'static str = "%09d.png";

    /// Looks for `ffprobe` next to the given `ffmpeg` binary.
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        let ffmpeg = ffmpeg.into();
        let ffprobe = ffmpeg.with_file_name(match ffmpeg.extension() {
            Some(extension) => format!("ffprobe.{}", extension.to_string_lossy()),
            None => String::from("ffprobe"),
        });
        Self { ffmpeg, ffprobe }
    }

    fn count_frames(output_dir: &Path) -> Result<usize, Error> {
        let count = fs::read_dir(output_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_str().and_then(frame_index).is_some())
            .count();
        Ok(count)
    }
}

impl FrameExtractor for FfmpegExtractor {
    fn probe(&self, video: &Path) -> Result<VideoInfo, Error> {
        VideoInfo::probe(&self.ffprobe, video)
    }

    fn extract(&self, video: &Path, output_dir: &Path, range: FrameRange) -> Result<usize, Error> {
        fs::create_dir_all(output_dir)?;

        let mut command = Command::new(&self.ffmpeg);
        command.args(["-hide_banner", "-v", "error", "-y", "-i"]).arg(video);
        if let Some(filter) = range.select_filter() {
            command.args(["-vf", filter.as_str(), "-vsync", "vfr"]);
        }
        command
            .args(["-start_number", "0", "-vcodec", "png"])
            .arg(output_dir.join(Self::FRAME_PATTERN))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!("Running {:?}", command);
        let output = command.output().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FFmpegNotAvailable,
            _ => Error::Io(e),
        })?;

        if !output.status.success() {
            return Err(Error::FfmpegFailed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let written = Self::count_frames(output_dir)?;
        info!("Extracted {} frames from {}", written, video.display());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_video_needs_no_select_filter() {
        assert_eq!(FrameRange::all().select_filter(), None);
        assert_eq!(
            FrameRange { start: 10, end: None }.select_filter().as_deref(),
            Some("select=gte(n\\,10)")
        );
        assert_eq!(
            FrameRange { start: 0, end: Some(50) }.select_filter().as_deref(),
            Some("select=between(n\\,0\\,49)")
        );
    }

    #[test]
    fn ffprobe_is_looked_up_next_to_ffmpeg() {
        let extractor = FfmpegExtractor::new("/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(extractor.ffprobe, PathBuf::from("/opt/ffmpeg/bin/ffprobe"));

        let extractor = FfmpegExtractor::new("C:/tools/ffmpeg.exe");
        assert_eq!(extractor.ffprobe, PathBuf::from("C:/tools/ffprobe.exe"));
    }
}
