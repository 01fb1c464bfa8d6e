//! `styles`: compile the SCSS entry, vendor-prefix it, and publish the
//! stylesheet to the staging directory and back into the source tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::BuildConfig;
use crate::pipeline::fs::replace_file;
use crate::pipeline::tool::{Invocation, ToolRunner};
use crate::util::blocking;
use crate::{clog, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleOutput {
    /// Compiled stylesheet in the staging directory.
    pub staged: PathBuf,
    /// Copy next to the entry in the source tree.
    pub published: PathBuf,
    pub bytes: u64,
}

pub struct StyleCompiler {
    config: Arc<BuildConfig>,
    runner: Arc<dyn ToolRunner>,
}

impl StyleCompiler {
    pub fn new(config: Arc<BuildConfig>, runner: Arc<dyn ToolRunner>) -> Self {
        Self { config, runner }
    }

    pub fn entry(&self) -> PathBuf {
        self.config.resolve(&self.config.styles.entry)
    }

    /// `<staging>/styles/<entry stem>.css`
    pub fn staged_path(&self) -> PathBuf {
        let stem = self
            .config
            .styles
            .entry
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "main".to_string());
        self.config
            .staging_dir()
            .join("styles")
            .join(format!("{}.css", stem))
    }

    pub fn published_path(&self) -> PathBuf {
        self.entry().with_extension("css")
    }

    pub fn compile_invocation(&self, staged: &Path) -> Invocation {
        let styles = &self.config.styles;
        let map_flag = if styles.source_map {
            "--embed-source-map"
        } else {
            "--no-source-map"
        };
        Invocation::new(&styles.compiler)
            .arg(format!("--style={}", styles.style))
            .arg(map_flag)
            .arg(self.entry().display().to_string())
            .arg(staged.display().to_string())
            .cwd(&self.config.root)
    }

    pub fn prefix_invocation(&self, staged: &Path) -> Invocation {
        let styles = &self.config.styles;
        Invocation::new(&styles.prefixer)
            .arg(staged.display().to_string())
            .args(["--use", "autoprefixer", "--replace"])
            .arg(if styles.source_map { "--map" } else { "--no-map" })
            .env("BROWSERSLIST", styles.browsers.join(", "))
            .cwd(&self.config.root)
    }

    pub async fn compile(&self) -> Result<StyleOutput> {
        let entry = self.entry();
        if !tokio::fs::try_exists(&entry).await? {
            return Err(Error::Validation(format!(
                "style entry not found: {}",
                entry.display()
            )));
        }

        let staged = self.staged_path();
        if let Some(parent) = staged.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.runner.run(&self.compile_invocation(&staged)).await?;
        self.runner.run(&self.prefix_invocation(&staged)).await?;

        let published = self.published_path();
        let (from, to) = (staged.clone(), published.clone());
        let bytes = blocking(move || replace_file(&from, &to)).await?;
        clog!("styles: {} ({} bytes)", published.display(), bytes);

        Ok(StyleOutput {
            staged,
            published,
            bytes,
        })
    }
}
