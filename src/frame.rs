use crate::error::Error;

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};

/// A frame on disk, keyed by the integer prefix of its file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRef {
    pub index: u64,
    pub path: PathBuf,
}

impl FrameRef {
    pub fn new(index: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            path: path.into(),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let index = path.file_name().and_then(|name| name.to_str()).and_then(frame_index)?;
        Some(Self::new(index, path))
    }

    /// Loads the frame as 8-bit RGB whatever the stored color type.
    pub fn load_rgb(&self) -> Result<DynamicImage, Error> {
        let image = image::open(&self.path)?;
        Ok(DynamicImage::ImageRgb8(image.into_rgb8()))
    }
}

/// Integer value of the part of `file_name` before the first `.`.
pub fn frame_index(file_name: &str) -> Option<u64> {
    let stem = file_name.split('.').next()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Output name of the frame at loop position `position`.
pub fn output_frame_name(position: usize) -> String {
    format!("{:07}.png", position)
}

pub const OUTPUT_FRAME_PATTERN: &str = "%07d.png";

pub fn save_png(image: &DynamicImage, path: &Path) -> Result<(), Error> {
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Frames in ascending numeric order of their file name prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameSequence {
    frames: Vec<FrameRef>,
}

impl FrameSequence {
    pub fn new(mut frames: Vec<FrameRef>) -> Self {
        frames.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.path.cmp(&b.path)));
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&FrameRef> {
        self.frames.get(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FrameRef> {
        self.frames.iter()
    }
}

impl<'a> IntoIterator for &'a FrameSequence {
    type Item = &'a FrameRef;
    type IntoIter = std::slice::Iter<'a, FrameRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn parses_integer_prefix() {
        assert_eq!(frame_index("000000012.png"), Some(12));
        assert_eq!(frame_index("7.tmp.png"), Some(7));
        assert_eq!(frame_index("0.jpg"), Some(0));
        assert_eq!(frame_index("frame_01.png"), None);
        assert_eq!(frame_index(".png"), None);
        assert_eq!(frame_index("-3.png"), None);
    }

    #[test]
    fn sequence_orders_numerically_not_lexically() {
        let frames = ["10.png", "9.png", "100.png", "1.png"]
            .iter()
            .filter_map(|name| FrameRef::from_path(PathBuf::from("frames").join(name)))
            .collect();
        let sequence = FrameSequence::new(frames);
        let order: Vec<u64> = sequence.iter().map(|frame| frame.index).collect();
        assert_eq!(order, vec![1, 9, 10, 100]);
    }

    #[test]
    fn output_names_are_seven_digits() {
        assert_eq!(output_frame_name(0), "0000000.png");
        assert_eq!(output_frame_name(1234), "0001234.png");
    }

    #[test]
    fn load_rgb_drops_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("3.png");
        RgbaImage::from_pixel(4, 2, Rgba([10, 20, 30, 128])).save(&path).unwrap();

        let image = FrameRef::new(3, &path).load_rgb().unwrap();
        assert_eq!(image.color(), image::ColorType::Rgb8);
        assert_eq!((image.width(), image.height()), (4, 2));
    }
}
