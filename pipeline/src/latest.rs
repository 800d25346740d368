//! The `latest.txt` marker each artifact scope maintains.
//!
//! The file lists the artifact file names most recently produced in its
//! directory, one per line. Writes are plain writes, not atomic; readers
//! must verify the referenced files actually exist.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::Error;

pub const LATEST_NAME: &str = "latest.txt";

/// Rewrite a scope's `latest.txt` with the given entries.
pub fn write_latest(dir: &Path, entries: &[String], mode: u32) -> Result<PathBuf, Error> {
    let path = dir.join(LATEST_NAME);
    let mut text = String::new();
    for entry in entries {
        text.push_str(entry);
        text.push('\n');
    }
    fs::write(&path, text).map_err(Error::io_at(&path))?;
    utilities::set_mode(&path, mode).map_err(Error::io_at(&path))?;
    Ok(path)
}

/// Read a scope's `latest.txt`; `None` when the scope has none yet.
pub fn read_latest(dir: &Path) -> Result<Option<Vec<String>>, Error> {
    let path = dir.join(LATEST_NAME);
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path).map_err(Error::io_at(&path))?;
    Ok(Some(
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
    ))
}
