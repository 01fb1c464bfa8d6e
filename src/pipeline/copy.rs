//! `copy`: static passthrough of the source root into the output root.

use std::sync::Arc;

use crate::config::BuildConfig;
use crate::pipeline::fs::{copy_tree, SizeReport};
use crate::util::blocking;
use crate::{clog, Result};

/// Copy every file of the source root, dotfiles included, except the image
/// subtree (owned by the `images` task).
pub async fn copy(config: Arc<BuildConfig>) -> Result<SizeReport> {
    let report = blocking(move || {
        copy_tree(
            &config.source_dir(),
            &config.output_dir(),
            &[config.paths.images.clone()],
        )
    })
    .await?;
    clog!("copy: {}", report);
    Ok(report)
}
