//! Build configuration.
//!
//! `BuildConfig` is loaded once from `conduit.toml` (every field defaulted)
//! and then shared read-only behind an `Arc` by every task body.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::core::task::FailurePolicy;
use crate::{clog_debug, Error, Result};

pub const CONFIG_FILE: &str = "conduit.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BuildConfig {
    /// Project root every relative path resolves against. Set at load time.
    #[serde(skip)]
    pub root: PathBuf,
    pub paths: PathsConfig,
    pub images: ImagesConfig,
    pub styles: StylesConfig,
    pub bundle: BundleConfig,
    pub server: ServerConfig,
    pub remote: RemoteConfig,
    pub policy: BTreeMap<String, FailurePolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub source: PathBuf,
    pub output: PathBuf,
    pub staging: PathBuf,
    pub logs: PathBuf,
    pub tarball: PathBuf,
    pub remote_dir: String,
    /// Image subtree of the source root, excluded from `copy`.
    pub images: PathBuf,
    /// Output root entries that `clean` leaves in place.
    pub preserve: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("app"),
            output: PathBuf::from("dist"),
            staging: PathBuf::from(".tmp"),
            logs: PathBuf::from("logs"),
            tarball: PathBuf::from("dist.tar.gz"),
            remote_dir: "./public_html/staging".to_string(),
            images: PathBuf::from("images"),
            preserve: vec![".git".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub extensions: Vec<String>,
    /// Simultaneous optimizer invocations per stage.
    pub concurrency: usize,
    pub pngquant_quality: String,
    pub pngquant_speed: u8,
    pub optipng_level: u8,
    pub mozjpeg_quality: u8,
    pub gifsicle_interlaced: bool,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            extensions: ["png", "jpg", "jpeg", "gif", "svg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            concurrency: num_cpus::get(),
            pngquant_quality: "75-85".to_string(),
            pngquant_speed: 1,
            optipng_level: 7,
            mozjpeg_quality: 60,
            gifsicle_interlaced: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StylesConfig {
    pub entry: PathBuf,
    pub compiler: String,
    pub prefixer: String,
    pub style: String,
    pub source_map: bool,
    pub browsers: Vec<String>,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            entry: PathBuf::from("app/styles/main.scss"),
            compiler: "sass".to_string(),
            prefixer: "postcss".to_string(),
            style: "expanded".to_string(),
            source_map: true,
            browsers: [
                "Android >= 4.3",
                "Chrome >= 46",
                "ChromeAndroid >= 46",
                "Firefox >= 42",
                "FirefoxAndroid >= 42",
                "Explorer >= 10",
                "ExplorerMobile >= 11",
                "Edge >= 12",
                "iOS >= 8",
                "Safari >= 8",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    pub entry: PathBuf,
    pub extensions: Vec<String>,
    pub bundler: String,
    pub output: PathBuf,
    pub source_map: bool,
    pub debounce_ms: u64,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            entry: PathBuf::from("app/scripts/scripts.js"),
            extensions: vec![".js".to_string(), ".jsx".to_string()],
            bundler: "esbuild".to_string(),
            output: PathBuf::from("app/scripts/bundle.js"),
            source_map: true,
            debounce_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub roots: Vec<PathBuf>,
    /// Log every reload notification at INFO instead of DEBUG.
    pub notify: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            roots: vec![PathBuf::from(".tmp"), PathBuf::from("app")],
            notify: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: Option<String>,
    pub user: Option<String>,
    pub port: u16,
    pub identity_file: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: None,
            user: None,
            port: 22,
            identity_file: None,
        }
    }
}

impl BuildConfig {
    /// Defaults rooted at `root`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load `conduit.toml` (or `explicit`) for the project at `root`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => root.join(p),
            None => root.join(CONFIG_FILE),
        };
        clog_debug!("BuildConfig::load path={}", path.display());

        let mut config = if path.exists() {
            let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
            clog_debug!("Config loaded from {}", path.display());
            config
        } else if explicit.is_some() {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        } else {
            clog_debug!("Config file not found, using defaults");
            Self::default()
        };
        config.root = root.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.images.concurrency == 0 {
            return Err(Error::Config(
                "images.concurrency must be at least 1".to_string(),
            ));
        }
        if self.images.extensions.is_empty() {
            return Err(Error::Config(
                "images.extensions must not be empty".to_string(),
            ));
        }
        if self.server.roots.is_empty() {
            return Err(Error::Config("server.roots must not be empty".to_string()));
        }
        self.validate_paths()?;
        checked_remote_dir(&self.paths.remote_dir)?;
        Ok(())
    }

    /// `clean` wipes the output root and the staging directory, so neither
    /// may be the project root, leave it, or overlap another managed
    /// directory.
    fn validate_paths(&self) -> Result<()> {
        let named = [
            ("paths.output", &self.paths.output),
            ("paths.staging", &self.paths.staging),
            ("paths.source", &self.paths.source),
            ("paths.logs", &self.paths.logs),
        ];
        let mut resolved = Vec::with_capacity(named.len());
        for (key, path) in named {
            match relative_to_root(&self.root, path) {
                Some(rel) if !rel.as_os_str().is_empty() => resolved.push((key, rel)),
                _ => {
                    return Err(Error::Config(format!(
                        "{} must name a directory inside the project root, got '{}'",
                        key,
                        path.display()
                    )))
                }
            }
        }

        // output and staging come first in `resolved`
        for (i, (wiped, wiped_path)) in resolved.iter().take(2).enumerate() {
            for (j, (other, other_path)) in resolved.iter().enumerate() {
                if i != j && (wiped_path.starts_with(other_path) || other_path.starts_with(wiped_path)) {
                    return Err(Error::Config(format!("{} must not overlap {}", wiped, other)));
                }
            }
        }

        let tarball = relative_to_root(&self.root, &self.paths.tarball).ok_or_else(|| {
            Error::Config(format!(
                "paths.tarball must be inside the project root, got '{}'",
                self.paths.tarball.display()
            ))
        })?;
        if !tarball.to_string_lossy().ends_with(".tar.gz") {
            return Err(Error::Config(format!(
                "paths.tarball must end in .tar.gz, got '{}'",
                self.paths.tarball.display()
            )));
        }
        if tarball.starts_with(&resolved[0].1) {
            return Err(Error::Config(
                "paths.tarball must not be inside paths.output".to_string(),
            ));
        }
        Ok(())
    }

    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    pub fn source_dir(&self) -> PathBuf {
        self.resolve(&self.paths.source)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.paths.output)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.resolve(&self.paths.staging)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.resolve(&self.paths.logs)
    }

    pub fn tarball_path(&self) -> PathBuf {
        self.resolve(&self.paths.tarball)
    }

    pub fn image_source_dir(&self) -> PathBuf {
        self.source_dir().join(&self.paths.images)
    }

    pub fn image_output_dir(&self) -> PathBuf {
        self.output_dir().join(&self.paths.images)
    }

    /// Failure policy for a task, falling back to the built-in defaults.
    pub fn policy_for(&self, task: &str) -> FailurePolicy {
        if let Some(policy) = self.policy.get(task) {
            return *policy;
        }
        match task {
            "styles" | "bundle" => FailurePolicy::Continue,
            _ => FailurePolicy::Abort,
        }
    }
}

/// Resolve `.` and `..` in `path` lexically, relative to `root`. `None` when
/// the path is absolute outside `root` or climbs above it.
fn relative_to_root(root: &Path, path: &Path) -> Option<PathBuf> {
    let path = if path.is_absolute() {
        path.strip_prefix(root).ok()?
    } else {
        path
    };
    let mut parts: Vec<&OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.iter().collect())
}

/// The remote directory with trailing slashes removed.
///
/// Deploy purges the directory with `rm -rf ./*` after `cd`, so it must name
/// a directory below the login directory or filesystem root: empty, `/`,
/// `.`, `~` and anything containing `..` are rejected.
pub fn checked_remote_dir(dir: &str) -> Result<&str> {
    let trimmed = dir.trim().trim_end_matches('/');
    let path = Path::new(trimmed);
    let named = path
        .components()
        .filter(|c| matches!(c, Component::Normal(part) if part.to_str() != Some("~")))
        .count();
    let climbs = path.components().any(|c| c == Component::ParentDir);
    if named == 0 || climbs {
        return Err(Error::Config(format!(
            "paths.remote_dir must name a directory below the login directory, got '{}'",
            dir
        )));
    }
    Ok(trimmed)
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
