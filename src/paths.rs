//! Output path allocation and the on-disk layout of a job.
//!
//! Uniqueness is only checked against what exists when the call is made.
//! Two processes allocating the same base name at the same moment may
//! still collide.

use crate::error::Result;

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const RAW_FRAMES_DIR: &str = "tmp_input_frames";
pub const NORMALIZED_FRAMES_DIR: &str = "tmp_upscale_folder";
pub const UPSCALED_FRAMES_PREFIX: &str = "upscaled_frames";

/// Characters that cannot appear in a job folder name.
const ILLEGAL_FOLDER_CHARS: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*', '.', ',', ' '];

/// Returns `base` if it is free, otherwise the first free `base_1`, `base_2`, ...
pub fn unique_path(base: &Path) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }
    let name = base.file_name().map(OsString::from).unwrap_or_default();
    (1u64..)
        .map(|n| {
            let mut candidate = name.clone();
            candidate.push(format!("_{}", n));
            base.with_file_name(candidate)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| base.to_path_buf())
}

/// Allocates and creates a fresh directory named after `base`.
pub fn allocate_dir(base: &Path) -> io::Result<PathBuf> {
    let path = unique_path(base);
    fs::create_dir_all(&path)?;
    Ok(path)
}

/// Like [`unique_path`] but inserts the counter before the extension.
pub fn unique_file(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path.file_stem().map(OsString::from).unwrap_or_default();
    let extension = path.extension().map(OsString::from);
    (1u64..)
        .map(|n| {
            let mut name = stem.clone();
            name.push(format!("_{}", n));
            if let Some(extension) = &extension {
                name.push(".");
                name.push(extension);
            }
            path.with_file_name(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

pub fn clean_folder_name(name: &str) -> String {
    name.chars()
        .map(|c| if ILLEGAL_FOLDER_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Moves `dir` into `destination`, keeping its name when free.
pub fn move_dir_into(dir: &Path, destination: &Path) -> io::Result<PathBuf> {
    let name = dir
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "directory has no name"))?;
    let target = unique_path(&destination.join(name));
    fs::rename(dir, &target)?;
    Ok(target)
}

/// Directories used by one job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkingPaths {
    /// Job root. For batch jobs this is the parent of the raw frames.
    pub root: PathBuf,
    pub raw_frames: PathBuf,
    pub normalized: PathBuf,
    pub upscaled: PathBuf,
}

impl WorkingPaths {
    /// Allocates `{output_root}/{job_name}[_N]` for a whole-video job.
    pub fn allocate(output_root: &Path, job_name: &str) -> Result<Self> {
        let root = allocate_dir(&output_root.join(job_name))?;
        let raw_frames = root.join(RAW_FRAMES_DIR);
        fs::create_dir_all(&raw_frames)?;
        Ok(Self::for_raw_frames(root, raw_frames, job_name))
    }

    /// Layout for frames that already exist on disk.
    pub fn for_existing(raw_frames: &Path, label: &str) -> Self {
        let root = raw_frames
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| raw_frames.to_path_buf());
        Self::for_raw_frames(root, raw_frames.to_path_buf(), label)
    }

    fn for_raw_frames(root: PathBuf, raw_frames: PathBuf, label: &str) -> Self {
        let normalized = raw_frames.join(NORMALIZED_FRAMES_DIR);
        let upscaled = unique_path(&raw_frames.join(format!("{}_{}", UPSCALED_FRAMES_PREFIX, label)));
        Self {
            root,
            raw_frames,
            normalized,
            upscaled,
        }
    }
}
