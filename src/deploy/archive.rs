//! Deployment tarball creation.

use std::fs;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::pipeline::fs::{walk_files, with_suffix, SizeReport};
use crate::{clog_trace, Error, Result};

/// Create a gzip-compressed tar of every file under `src_root`, with entry
/// names relative to it, skipping the `exclude` subtrees.
///
/// The archive is written next to `dst_file` and renamed into place once
/// complete.
pub fn create_tarball(src_root: &Path, dst_file: &Path, exclude: &[PathBuf]) -> Result<SizeReport> {
    if !src_root.is_dir() {
        return Err(Error::Archive(format!(
            "nothing to archive: {} does not exist",
            src_root.display()
        )));
    }
    if let Some(parent) = dst_file.parent() {
        fs::create_dir_all(parent)?;
    }

    let partial = with_suffix(dst_file, ".partial");
    let report = match write_archive(src_root, &partial, exclude) {
        Ok(report) => report,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
    };
    fs::rename(&partial, dst_file)?;
    Ok(report)
}

fn write_archive(src_root: &Path, partial: &Path, exclude: &[PathBuf]) -> Result<SizeReport> {
    let file = fs::File::create(partial)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    let mut report = SizeReport::default();
    for relative in walk_files(src_root, exclude)? {
        let full = src_root.join(&relative);
        builder
            .append_path_with_name(&full, &relative)
            .map_err(|e| Error::Archive(format!("tar append {} failed: {}", relative.display(), e)))?;
        clog_trace!("archived {}", relative.display());
        report.add(fs::metadata(&full)?.len());
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::Archive(format!("tar finalize failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Archive(format!("gzip finish failed: {}", e)))?;
    Ok(report)
}
