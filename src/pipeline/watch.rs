//! Watch-mode bundling.
//!
//! `BundleWatcher` re-runs the [`Bundler`] whenever a script under the source
//! root changes. Every rebuild, successful or not, is reported to the
//! handlers registered with [`BundleWatcher::on_rebuild`]. A failed rebuild is
//! logged and the watcher keeps going so the next edit can retry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::pipeline::bundle::{BundleOutput, Bundler};
use crate::{clog, clog_debug, clog_error, Result};

const CHANGE_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub enum RebuildEvent {
    Rebuilt {
        output: BundleOutput,
        changed: Vec<PathBuf>,
    },
    Failed {
        error: String,
        changed: Vec<PathBuf>,
    },
}

impl RebuildEvent {
    pub fn is_success(&self) -> bool {
        matches!(self, RebuildEvent::Rebuilt { .. })
    }

    pub fn changed(&self) -> &[PathBuf] {
        match self {
            RebuildEvent::Rebuilt { changed, .. } | RebuildEvent::Failed { changed, .. } => {
                changed
            }
        }
    }
}

pub type RebuildHandler = Arc<dyn Fn(&RebuildEvent) + Send + Sync>;

/// Decides which filesystem events are bundle inputs.
#[derive(Debug, Clone)]
struct ChangeFilter {
    extensions: Vec<String>,
    ignored: Vec<PathBuf>,
}

impl ChangeFilter {
    fn is_relevant(&self, path: &Path) -> bool {
        if self.ignored.iter().any(|ignored| path == ignored) {
            return false;
        }
        let Some(ext) = path.extension() else {
            return false;
        };
        let ext = format!(".{}", ext.to_string_lossy());
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
    }
}

pub struct BundleWatcher {
    bundler: Bundler,
    watch_root: PathBuf,
    filter: ChangeFilter,
    debounce: Duration,
    handlers: Vec<RebuildHandler>,
    change_tx: mpsc::Sender<PathBuf>,
    change_rx: mpsc::Receiver<PathBuf>,
}

impl BundleWatcher {
    pub fn new(bundler: Bundler) -> Self {
        let config = bundler.config();
        let watch_root = config.source_dir();
        let debounce = Duration::from_millis(config.bundle.debounce_ms);
        let filter = ChangeFilter {
            extensions: config.bundle.extensions.clone(),
            ignored: vec![bundler.output(), bundler.output_map()],
        };
        let (change_tx, change_rx) = mpsc::channel(CHANGE_CHANNEL_SIZE);
        Self {
            bundler,
            watch_root,
            filter,
            debounce,
            handlers: Vec::new(),
            change_tx,
            change_rx,
        }
    }

    /// Register a handler called after every rebuild.
    pub fn on_rebuild<F>(&mut self, handler: F)
    where
        F: Fn(&RebuildEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    /// Sender that feeds changed paths into the rebuild loop directly.
    pub fn change_sender(&self) -> mpsc::Sender<PathBuf> {
        self.change_tx.clone()
    }

    pub fn is_relevant(&self, path: &Path) -> bool {
        self.filter.is_relevant(path)
    }

    /// Start the filesystem watcher over the source root.
    ///
    /// The returned handle must be kept alive for events to keep flowing.
    pub fn start_watching(&self) -> Result<RecommendedWatcher> {
        let change_tx = self.change_tx.clone();
        let filter = self.filter.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let Ok(event) = res else {
                    return;
                };
                match event.kind {
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => {}
                    _ => return,
                }
                for path in event.paths {
                    if filter.is_relevant(&path) {
                        let _ = change_tx.blocking_send(path);
                    }
                }
            },
            Config::default(),
        )?;

        if self.watch_root.exists() {
            watcher.watch(&self.watch_root, RecursiveMode::Recursive)?;
        }
        clog_debug!("BundleWatcher watching {}", self.watch_root.display());
        Ok(watcher)
    }

    /// Rebuild once and notify every handler.
    pub async fn rebuild(&self, changed: Vec<PathBuf>) -> RebuildEvent {
        let event = match self.bundler.build().await {
            Ok(output) => {
                clog!("bundle rebuilt after {} change(s)", changed.len());
                RebuildEvent::Rebuilt { output, changed }
            }
            Err(e) => {
                clog_error!("bundle rebuild failed: {}", e);
                RebuildEvent::Failed {
                    error: e.to_string(),
                    changed,
                }
            }
        };
        for handler in &self.handlers {
            handler(&event);
        }
        event
    }

    /// Rebuild on every burst of changes until `shutdown` fires.
    ///
    /// Changes arriving within the debounce window of each other are folded
    /// into a single rebuild.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let _watcher = self.start_watching()?;

        loop {
            let first = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.change_rx.recv() => match next {
                    Some(path) => path,
                    None => break,
                },
            };

            let mut changed = vec![first];
            while let Ok(Some(path)) =
                tokio::time::timeout(self.debounce, self.change_rx.recv()).await
            {
                changed.push(path);
            }
            changed.sort();
            changed.dedup();

            self.rebuild(changed).await;
        }
        clog_debug!("BundleWatcher stopped");
        Ok(())
    }
}
