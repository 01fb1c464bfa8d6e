//! Filesystem helpers shared by the asset tasks.
//!
//! All functions here are synchronous; task bodies call them through
//! [`crate::util::blocking`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::util::human_size;
use crate::{clog_trace, Error, Result};

/// File count and byte total for a size report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeReport {
    pub files: usize,
    pub bytes: u64,
}

impl SizeReport {
    pub fn add(&mut self, bytes: u64) {
        self.files += 1;
        self.bytes += bytes;
    }
}

impl std::fmt::Display for SizeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} files, {}", self.files, human_size(self.bytes))
    }
}

/// Relative paths of all files under `root`, dotfiles included, sorted.
///
/// Entries under any of `exclude` (relative to `root`) are skipped.
pub fn walk_files(root: &Path, exclude: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let excluded: Vec<PathBuf> = exclude.iter().map(|p| root.join(p)).collect();
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| !excluded.iter().any(|ex| entry.path() == ex));

    for entry in walker {
        let entry = entry.map_err(|e| Error::Io(io::Error::other(e.to_string())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Copy every file under `src` (minus `exclude`) into `dest`, keeping the
/// relative layout.
pub fn copy_tree(src: &Path, dest: &Path, exclude: &[PathBuf]) -> Result<SizeReport> {
    let mut report = SizeReport::default();
    for relative in walk_files(src, exclude)? {
        let from = src.join(&relative);
        let to = dest.join(&relative);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = fs::copy(&from, &to)?;
        clog_trace!("copied {} ({} bytes)", relative.display(), bytes);
        report.add(bytes);
    }
    Ok(report)
}

/// Remove every entry of `dir` except the names in `preserve`.
///
/// A missing directory counts as already clean. Returns how many entries
/// were removed.
pub fn clean_dir_contents(dir: &Path, preserve: &[String]) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if preserve.iter().any(|p| *p == name) {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}

/// Remove a directory tree if it exists.
pub fn remove_dir_if_exists(dir: &Path) -> Result<bool> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Remove a file if it exists.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Copy `from` to `to` through a temporary sibling so readers never see a
/// half-written file.
pub fn replace_file(from: &Path, to: &Path) -> Result<u64> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = with_suffix(to, ".partial");
    let bytes = fs::copy(from, &partial)?;
    fs::rename(&partial, to)?;
    Ok(bytes)
}

/// `path` with `suffix` appended to its file name.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}
