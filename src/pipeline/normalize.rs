use crate::error::Error;
use crate::frame::{frame_index, save_png, FrameRef, FrameSequence};

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

/// Name fragments of side products that share a directory with the frames.
pub const AUXILIARY_MARKERS: &[&str] = &["_depth_", "-"];

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NormalizeMode {
    /// Frames straight out of the extractor, copied byte for byte.
    Copy,
    /// Frames from a generation run, decoded and rewritten as PNG.
    Reencode,
}

/// Builds the working copy of a frame directory that the upscaler reads from.
pub struct Normalizer<'a> {
    source: &'a Path,
    batch_id: Option<&'a str>,
    mode: NormalizeMode,
}

impl<'a> Normalizer<'a> {
    pub fn new(source: &'a Path, mode: NormalizeMode) -> Self {
        Self {
            source,
            batch_id: None,
            mode,
        }
    }

    /// Only accept frames whose name starts with `batch_id`. A directory in
    /// which no file carries the prefix, such as the kept output of an
    /// earlier job, is read as plain numbered frames.
    pub fn batch(mut self, batch_id: &'a str) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    /// Numeric key of an eligible file name, `None` when the file is skipped.
    fn frame_key<'n>(&self, file_name: &'n str, prefix: Option<&str>) -> Option<&'n str> {
        let extension = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
        if !FRAME_EXTENSIONS.contains(&extension.as_str()) {
            return None;
        }
        if AUXILIARY_MARKERS.iter().any(|marker| file_name.contains(marker)) {
            return None;
        }
        let key = match prefix {
            Some(batch_id) => {
                let rest = file_name.strip_prefix(batch_id)?;
                rest.strip_prefix('_').unwrap_or(rest)
            }
            None => file_name,
        };
        frame_index(key).map(|_| key)
    }

    fn target_name(&self, key: &str) -> String {
        match self.mode {
            NormalizeMode::Copy => key.to_string(),
            NormalizeMode::Reencode => {
                let digits = key.split('.').next().unwrap_or(key);
                format!("{}.png", digits)
            }
        }
    }

    fn write_frame(&self, source: &Path, target: &Path) -> Result<(), Error> {
        match self.mode {
            NormalizeMode::Copy => {
                fs::copy(source, target)?;
            }
            NormalizeMode::Reencode => {
                let image = image::open(source)?;
                save_png(&image, target)?;
            }
        }
        Ok(())
    }

    /// Fills `temp_dir` with the eligible frames and returns them in
    /// ascending numeric order.
    pub fn execute(&self, temp_dir: &Path) -> Result<FrameSequence, Error> {
        if !self.source.is_dir() {
            return Err(Error::InputFramesNotFound(self.source.to_path_buf()));
        }

        if temp_dir.exists() {
            debug!("Removing stale working copy {}", temp_dir.display());
            fs::remove_dir_all(temp_dir)?;
        }
        fs::create_dir_all(temp_dir)?;

        let mut entries = Vec::new();
        for entry in fs::read_dir(self.source)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(file_name) => entries.push((file_name, entry.path())),
                Err(file_name) => debug!("Skipping non UTF-8 file name {:?}", file_name),
            }
        }

        let prefix = self.batch_id.filter(|batch_id| {
            let prefixed = entries.iter().any(|(file_name, _)| file_name.starts_with(batch_id));
            if !prefixed {
                info!("No frame in {} starts with {}, reading numbered frames", self.source.display(), batch_id);
            }
            prefixed
        });

        let mut frames = Vec::new();
        for (file_name, path) in &entries {
            let Some(key) = self.frame_key(file_name, prefix) else {
                debug!("Skipping {}", file_name);
                continue;
            };

            let target: PathBuf = temp_dir.join(self.target_name(key));
            if target.exists() {
                debug!("Skipping {}, frame {} already taken", file_name, key);
                continue;
            }
            self.write_frame(path, &target)?;
            if let Some(frame) = FrameRef::from_path(target) {
                frames.push(frame);
            }
        }

        if frames.is_empty() {
            return Err(Error::NoEligibleFrames(self.source.to_path_buf()));
        }

        let sequence = FrameSequence::new(frames);
        info!("Normalized {} frames from {}", sequence.len(), self.source.display());
        Ok(sequence)
    }
}
