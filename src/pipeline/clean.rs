//! `clean`: reset the staging directory and the output root.

use std::sync::Arc;

use crate::config::BuildConfig;
use crate::pipeline::fs::{clean_dir_contents, remove_dir_if_exists};
use crate::util::blocking;
use crate::{clog_debug, Result};

/// Remove the staging directory and every output root entry except the
/// preserved names. Running it twice is the same as running it once.
pub async fn clean(config: Arc<BuildConfig>) -> Result<()> {
    blocking(move || {
        let staging = config.staging_dir();
        if remove_dir_if_exists(&staging)? {
            clog_debug!("removed {}", staging.display());
        }
        let output = config.output_dir();
        let removed = clean_dir_contents(&output, &config.paths.preserve)?;
        clog_debug!("removed {} entries from {}", removed, output.display());
        Ok(())
    })
    .await
}
