//! One-shot script bundling.
//!
//! The bundler writes into `<staging>/bundle/`; the bundle and its source map
//! are promoted to the configured output path only after a successful build,
//! so a failing build never clobbers the previous bundle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::BuildConfig;
use crate::pipeline::fs::{remove_file_if_exists, replace_file, with_suffix};
use crate::pipeline::tool::{Invocation, ToolRunner};
use crate::util::{blocking, human_duration, human_size};
use crate::{clog, clog_debug, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleOutput {
    pub bundle: PathBuf,
    pub source_map: Option<PathBuf>,
    pub bytes: u64,
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct Bundler {
    config: Arc<BuildConfig>,
    runner: Arc<dyn ToolRunner>,
}

impl Bundler {
    pub fn new(config: Arc<BuildConfig>, runner: Arc<dyn ToolRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn entry(&self) -> PathBuf {
        self.config.resolve(&self.config.bundle.entry)
    }

    pub fn output(&self) -> PathBuf {
        self.config.resolve(&self.config.bundle.output)
    }

    pub fn output_map(&self) -> PathBuf {
        with_suffix(&self.output(), ".map")
    }

    fn staged_output(&self) -> PathBuf {
        let name = self
            .config
            .bundle
            .output
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "bundle.js".into());
        self.config.staging_dir().join("bundle").join(name)
    }

    pub fn invocation(&self) -> Invocation {
        let bundle = &self.config.bundle;
        let extensions = bundle.extensions.join(",");
        let mut invocation = Invocation::new(&bundle.bundler)
            .arg(self.entry().display().to_string())
            .arg("--bundle")
            .arg(format!("--outfile={}", self.staged_output().display()))
            .arg(format!("--resolve-extensions={}", extensions));
        if bundle.source_map {
            invocation = invocation.arg("--sourcemap");
        }
        // JSX is allowed in plain .js files
        if bundle.extensions.iter().any(|e| e == ".jsx") {
            invocation = invocation.arg("--loader:.js=jsx");
        }
        invocation.cwd(&self.config.root)
    }

    /// Build the bundle once and promote it to the output path.
    pub async fn build(&self) -> Result<BundleOutput> {
        let started = Instant::now();
        let staged = self.staged_output();
        if let Some(parent) = staged.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staged_map = with_suffix(&staged, ".map");
        {
            let (a, b) = (staged.clone(), staged_map.clone());
            blocking(move || {
                remove_file_if_exists(&a)?;
                remove_file_if_exists(&b)
            })
            .await?;
        }

        let invocation = self.invocation();
        clog_debug!("Bundler::build {}", invocation);
        self.runner.run(&invocation).await?;

        if !tokio::fs::try_exists(&staged).await? {
            return Err(Error::TaskFailed {
                task: "bundle".to_string(),
                reason: format!("{} produced no output", self.config.bundle.bundler),
            });
        }

        let output = self.output();
        let output_map = self.output_map();
        let promote_map = self.config.bundle.source_map && tokio::fs::try_exists(&staged_map).await?;
        let bytes = {
            let (from, to) = (staged.clone(), output.clone());
            let (map_from, map_to) = (staged_map, output_map.clone());
            blocking(move || {
                let bytes = replace_file(&from, &to)?;
                if promote_map {
                    replace_file(&map_from, &map_to)?;
                }
                Ok(bytes)
            })
            .await?
        };

        let elapsed = started.elapsed();
        clog!(
            "bundle: {} ({}) in {}",
            output.display(),
            human_size(bytes),
            human_duration(elapsed)
        );
        Ok(BundleOutput {
            bundle: output,
            source_map: promote_map.then_some(output_map),
            bytes,
            elapsed,
        })
    }
}
