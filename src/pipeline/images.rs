//! `images`: copy the image subtree into the output root and run every file
//! through the optimizer chain.
//!
//! Stages run in a fixed order and each stage only touches files with its
//! extensions. A file moves through the chain on its own, so different files
//! can sit in different stages at the same time; each stage's [`StagePool`]
//! caps how many invocations of that optimizer are in flight.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;

use crate::config::{BuildConfig, ImagesConfig};
use crate::orchestration::StagePool;
use crate::pipeline::fs::{walk_files, with_suffix};
use crate::pipeline::tool::{Invocation, ToolRunner};
use crate::util::{blocking, human_size};
use crate::{clog, clog_debug, Error, Result};

const TMP_SUFFIX: &str = ".conduit-tmp";

/// One optimizer in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizerStage {
    pub name: String,
    pub program: String,
    /// Lowercase extensions without the dot.
    pub extensions: Vec<String>,
    /// Argument template; `{input}` and `{output}` are substituted.
    pub args: Vec<String>,
    /// Exit codes meaning "nothing to improve, keep the file".
    pub passthrough_codes: Vec<i32>,
}

impl OptimizerStage {
    pub fn new(name: &str, program: &str, extensions: &[&str], args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            args: args.iter().map(|a| a.to_string()).collect(),
            passthrough_codes: Vec::new(),
        }
    }

    pub fn passthrough(mut self, codes: &[i32]) -> Self {
        self.passthrough_codes = codes.to_vec();
        self
    }

    pub fn applies_to(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.extensions.contains(&ext))
    }
}

/// The default chain: palette quantization, PNG optimization, JPEG
/// re-encoding, SVG minification, GIF interlacing.
pub fn default_stages(config: &ImagesConfig) -> Vec<OptimizerStage> {
    let quality = format!("--quality={}", config.pngquant_quality);
    let speed = config.pngquant_speed.to_string();
    let level = format!("-o{}", config.optipng_level);
    let jpeg_quality = config.mozjpeg_quality.to_string();

    let mut gif_args = Vec::new();
    if config.gifsicle_interlaced {
        gif_args.push("--interlace");
    }
    gif_args.extend(["-o", "{output}", "{input}"]);

    vec![
        OptimizerStage::new(
            "pngquant",
            "pngquant",
            &["png"],
            &[
                quality.as_str(), "--speed", speed.as_str(), "--force", "--output", "{output}", "{input}",
            ],
        )
        // 98: result larger than input, 99: quality target not reachable
        .passthrough(&[98, 99]),
        OptimizerStage::new(
            "optipng",
            "optipng",
            &["png"],
            &[level.as_str(), "-quiet", "-out", "{output}", "{input}"],
        ),
        OptimizerStage::new(
            "mozjpeg",
            "cjpeg",
            &["jpg", "jpeg"],
            &["-quality", jpeg_quality.as_str(), "-outfile", "{output}", "{input}"],
        ),
        OptimizerStage::new("svgo", "svgo", &["svg"], &["{input}", "-o", "{output}"]),
        OptimizerStage::new("gifsicle", "gifsicle", &["gif"], &gif_args),
    ]
}

/// Totals for the `images` size report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageReport {
    pub files: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl std::fmt::Display for ImageReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let saved = self.bytes_before.saturating_sub(self.bytes_after);
        write!(
            f,
            "{} files, {} -> {} (saved {})",
            self.files,
            human_size(self.bytes_before),
            human_size(self.bytes_after),
            human_size(saved)
        )
    }
}

pub struct ImagePipeline {
    source: PathBuf,
    dest: PathBuf,
    extensions: Vec<String>,
    stages: Vec<(OptimizerStage, StagePool)>,
    runner: Arc<dyn ToolRunner>,
}

impl ImagePipeline {
    pub fn new(config: &BuildConfig, runner: Arc<dyn ToolRunner>) -> Self {
        let pipeline = Self {
            source: config.image_source_dir(),
            dest: config.image_output_dir(),
            extensions: config
                .images
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            stages: Vec::new(),
            runner,
        };
        pipeline.with_stages(default_stages(&config.images), config.images.concurrency)
    }

    /// Replace the optimizer chain, each stage bounded to `concurrency`.
    pub fn with_stages(mut self, stages: Vec<OptimizerStage>, concurrency: usize) -> Self {
        self.stages = stages
            .into_iter()
            .map(|stage| {
                let pool = StagePool::new(&stage.name, concurrency);
                (stage, pool)
            })
            .collect();
        self
    }

    pub fn pools(&self) -> impl Iterator<Item = &StagePool> {
        self.stages.iter().map(|(_, pool)| pool)
    }

    pub fn matches(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.extensions.contains(&ext))
    }

    /// Optimize every matching image. All files are attempted; the first
    /// error (in file order) is returned after the rest have finished.
    pub async fn run(&self) -> Result<ImageReport> {
        let source = self.source.clone();
        let files: Vec<PathBuf> = blocking(move || walk_files(&source, &[]))
            .await?
            .into_iter()
            .filter(|f| self.matches(f))
            .collect();
        clog_debug!(
            "images: {} candidates under {}",
            files.len(),
            self.source.display()
        );

        let results = join_all(files.iter().map(|f| self.process(f))).await;

        let mut report = ImageReport::default();
        let mut first_error = None;
        for result in results {
            match result {
                Ok((before, after)) => {
                    report.files += 1;
                    report.bytes_before += before;
                    report.bytes_after += after;
                }
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(_) => {}
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        clog!("images: {}", report);
        Ok(report)
    }

    async fn process(&self, relative: &Path) -> Result<(u64, u64)> {
        let from = self.source.join(relative);
        let to = self.dest.join(relative);
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let before = tokio::fs::copy(&from, &to).await?;

        for (stage, pool) in &self.stages {
            if stage.applies_to(&to) {
                pool.run(self.apply(stage, &to)).await?;
            }
        }

        let after = tokio::fs::metadata(&to).await?.len();
        Ok((before, after))
    }

    async fn apply(&self, stage: &OptimizerStage, file: &Path) -> Result<()> {
        let tmp = with_suffix(file, TMP_SUFFIX);
        let invocation = Invocation::templated(&stage.program, &stage.args, file, &tmp);

        match self.runner.run(&invocation).await {
            Ok(_) => {}
            Err(Error::Tool { status, .. }) if stage.passthrough_codes.contains(&status) => {
                clog_debug!("{}: {} left unchanged (exit {})", stage.name, file.display(), status);
                discard(&tmp).await;
                return Ok(());
            }
            Err(e) => {
                discard(&tmp).await;
                return Err(e);
            }
        }

        if tokio::fs::try_exists(&tmp).await? {
            tokio::fs::rename(&tmp, file).await?;
        }
        Ok(())
    }
}

async fn discard(path: &Path) {
    let _ = tokio::fs::remove_file(path).await;
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}
