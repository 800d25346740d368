//! Numbered backup rotation for managed files.
//!
//! A rotation series for `name` lives beside it as `name.1`, `name.2`, …
//! with `name.1` the most recent backup and higher indices older. Rotating
//! copies the current contents into a fresh `name.1` after shifting the
//! existing series up by one, trimming anything beyond the configured
//! depth. The source file itself is never modified or removed.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use thiserror::Error;
use tracing::{debug, info};

use crate::files_identical;

const DEFAULT_SUFFIX: &str = ".";

#[derive(Debug, Error)]
pub enum RotateError {
    #[error("invalid rotation argument: {0}")]
    InvalidArgument(String),
    #[error("rotation failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How many backups a rotation series retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateDepth {
    /// Keep every backup ever made.
    Unlimited,
    /// Keep at most this many backups (must be at least 1).
    Keep(u32),
}

impl RotateDepth {
    /// Parse the conventional integer encoding: -1 keeps everything,
    /// positive values bound the series, anything else is rejected.
    pub fn from_raw(raw: i64) -> Result<Self, RotateError> {
        match raw {
            -1 => Ok(RotateDepth::Unlimited),
            n if n >= 1 => Ok(RotateDepth::Keep(n as u32)),
            other => Err(RotateError::InvalidArgument(format!(
                "rotation depth must be -1 or a positive integer (got {other})"
            ))),
        }
    }
}

impl Default for RotateDepth {
    fn default() -> Self {
        RotateDepth::Keep(5)
    }
}

/// Rotate `path` into its backup series with the default `.` suffix.
///
/// Returns the path of the new index-1 backup, or `None` when the current
/// index-1 backup is already byte-identical to `path` and there is nothing
/// to do. The source must be an existing regular file.
pub fn rotate_file(path: &Path, depth: RotateDepth) -> Result<Option<PathBuf>, RotateError> {
    rotate_file_with_suffix(path, depth, DEFAULT_SUFFIX)
}

/// As [`rotate_file`], with a caller-chosen suffix between the file name
/// and the rotation index.
pub fn rotate_file_with_suffix(
    path: &Path,
    depth: RotateDepth,
    suffix: &str,
) -> Result<Option<PathBuf>, RotateError> {
    if suffix.is_empty() {
        return Err(RotateError::InvalidArgument(
            "rotation suffix cannot be empty".to_string(),
        ));
    }
    if !path.is_file() {
        return Err(RotateError::InvalidArgument(format!(
            "{} does not lead to a regular file",
            path.display()
        )));
    }

    let slot1 = indexed(path, suffix, 1);

    // Is there anything to do? (existence, then size, then checksum)
    if slot1.is_file() && files_identical(path, &slot1).map_err(io_on(path))? {
        debug!(
            "{} is identical to its most recent rotation, nothing to do",
            path.display()
        );
        return Ok(None);
    }

    // Find the last index in the series.
    let mut last = 0u32;
    while indexed(path, suffix, last + 1).exists() {
        last += 1;
    }

    // Percolate renames from the oldest down so nothing is clobbered.
    for i in (1..=last).rev() {
        let from = indexed(path, suffix, i);
        let to = indexed(path, suffix, i + 1);
        debug!("moving rotation {} -> {}", from.display(), to.display());
        fs::rename(&from, &to).map_err(io_on(&from))?;
    }

    // Trim rotations beyond the configured depth.
    if let RotateDepth::Keep(depth) = depth {
        for i in depth + 1..=last + 1 {
            let excess = indexed(path, suffix, i);
            match fs::remove_file(&excess) {
                Ok(()) => info!("rotated out {}", excess.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_on(&excess)(e)),
            }
        }
    }

    // The actual rotation: contents, permissions, and mtime.
    let metadata = fs::metadata(path).map_err(io_on(path))?;
    fs::copy(path, &slot1).map_err(io_on(&slot1))?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    filetime::set_file_mtime(&slot1, mtime).map_err(io_on(&slot1))?;

    info!("backed up {} -> {}", path.display(), slot1.display());
    Ok(Some(slot1))
}

fn indexed(path: &Path, suffix: &str, index: u32) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    name.push(index.to_string());
    PathBuf::from(name)
}

fn io_on(path: &Path) -> impl FnOnce(io::Error) -> RotateError + '_ {
    move |source| RotateError::Io {
        path: path.to_path_buf(),
        source,
    }
}
