use crate::error::Error;

use std::path::Path;
use std::process::Command;

use log::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VideoInfo {
    pub width: usize,
    pub height: usize,
    pub frame_rate: f64,
    pub frame_count: usize,
}

impl VideoInfo {
    pub fn probe(ffprobe: &Path, input: &Path) -> Result<Self, Error> {
        if !input.is_file() {
            return Err(Error::InvalidVideo(format!("{} is not a file", input.display())));
        }

        let output = Command::new(ffprobe)
            .args([
                "-hide_banner", "-v", "error",
                "-select_streams", "v:0",
                "-count_frames",
                "-show_entries", "stream=nb_read_frames,r_frame_rate,width,height",
                "-of", "default=noprint_wrappers=1",
            ])
            .arg(input)
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::FFmpegNotAvailable,
                _ => Error::Io(e),
            })?;

        if !output.status.success() {
            return Err(Error::InvalidVideo(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }

        let data = String::from_utf8_lossy(&output.stdout);
        debug!("ffprobe {}: {}", input.display(), data.trim());
        Self::parse(&data)
    }

    fn parse(data: &str) -> Result<Self, Error> {
        let mut info = Self::default();
        for line in data.lines() {
            if let Some((key, value)) = line.split_once('=') {
                match key {
                    // "N/A" for streams ffprobe cannot count
                    "nb_read_frames" => info.frame_count = value.parse().unwrap_or(0),
                    "r_frame_rate" => info.frame_rate = Self::parse_frame_rate(value)?,
                    "width" => info.width = value.parse()
                        .map_err(|_| Error::InvalidVideo(format!("Failed to parse width: {}", value)))?,
                    "height" => info.height = value.parse()
                        .map_err(|_| Error::InvalidVideo(format!("Failed to parse height: {}", value)))?,
                    _ => {}
                }
            }
        }

        if info.frame_rate <= 0.0 {
            return Err(Error::InvalidVideo("No video stream with a frame rate found".to_string()));
        }
        Ok(info)
    }

    fn parse_frame_rate(value: &str) -> Result<f64, Error> {
        let invalid = || Error::InvalidVideo(format!("Invalid frame rate format: {}", value));
        match value.split_once('/') {
            Some((num, den)) => {
                let num = num.parse::<f64>().map_err(|_| invalid())?;
                let den = den.parse::<f64>().map_err(|_| invalid())?;
                if den == 0.0 {
                    return Err(invalid());
                }
                Ok(num / den)
            }
            None => value.parse::<f64>().map_err(|_| invalid()),
        }
    }
}
