//! Development server.
//!
//! Serves one or more static roots (first root that has the file wins),
//! watches the source tree, and pushes reload notifications to browsers over
//! a server-sent event stream at [`RELOAD_PATH`]. HTML pages served with
//! watchers enabled get a script tag for [`CLIENT_PATH`], which subscribes to
//! that stream and reloads the page.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::Stream;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::config::BuildConfig;
use crate::pipeline::StyleCompiler;
use crate::{clog, clog_debug, clog_error, Error, Result};

pub const RELOAD_PATH: &str = "/__conduit/reload";
pub const CLIENT_PATH: &str = "/__conduit/client.js";

const CLIENT_SCRIPT: &str = r#"(function () {
  var source = new EventSource("/__conduit/reload");
  source.addEventListener("reload", function () {
    window.location.reload();
  });
})();
"#;

/// Pages larger than this are served without the reload client.
const MAX_INJECTED_PAGE: usize = 16 * 1024 * 1024;

const RELOAD_CHANNEL_SIZE: usize = 16;
const CHANGE_BATCH_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    /// Tell browsers to reload.
    Reload,
    /// Recompile the stylesheet, then reload.
    Restyle,
}

#[derive(Debug, Clone)]
pub struct WatchRule {
    pattern: glob::Pattern,
    action: WatchAction,
}

impl WatchRule {
    pub fn new(pattern: &str, action: WatchAction) -> Result<Self> {
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| Error::Config(format!("invalid watch pattern '{}': {}", pattern, e)))?;
        Ok(Self { pattern, action })
    }

    pub fn action(&self) -> WatchAction {
        self.action
    }

    pub fn matches(&self, relative: &Path) -> bool {
        self.pattern.matches_path(relative)
    }
}

/// Rules relative to the source root used by `serve`.
pub fn default_rules() -> Result<Vec<WatchRule>> {
    [
        ("index.html", WatchAction::Reload),
        ("images/**/*", WatchAction::Reload),
        ("assets/**/*", WatchAction::Reload),
        ("styles/**/*.scss", WatchAction::Restyle),
    ]
    .into_iter()
    .map(|(pattern, action)| WatchRule::new(pattern, action))
    .collect()
}

#[derive(Debug, Clone)]
struct WatchRules {
    root: PathBuf,
    rules: Vec<WatchRule>,
}

impl WatchRules {
    fn action_for(&self, path: &Path) -> Option<WatchAction> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        self.rules
            .iter()
            .find(|rule| rule.matches(relative))
            .map(WatchRule::action)
    }
}

/// Publishes reload notifications to every connected browser.
#[derive(Debug, Clone)]
pub struct Reloader {
    tx: broadcast::Sender<String>,
    verbose: bool,
}

impl Reloader {
    pub fn new(verbose: bool) -> Self {
        let (tx, _) = broadcast::channel(RELOAD_CHANNEL_SIZE);
        Self { tx, verbose }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Broadcast a reload. Returns how many subscribers received it.
    pub fn reload(&self, reason: &str) -> usize {
        if self.verbose {
            clog!("Reloading browsers ({})", reason);
        } else {
            clog_debug!("Reloading browsers ({})", reason);
        }
        self.tx.send(reason.to_string()).unwrap_or(0)
    }
}

#[derive(Clone)]
struct ServerState {
    roots: Arc<Vec<PathBuf>>,
    reloader: Reloader,
    live_reload: bool,
}

pub struct DevServer {
    addr: String,
    roots: Vec<PathBuf>,
    watch: Option<WatchRules>,
    styles: Option<Arc<StyleCompiler>>,
    reloader: Reloader,
}

impl DevServer {
    /// Serve the working tree (`[server].roots`) with the source watch rules.
    pub fn for_source(config: &BuildConfig, styles: Arc<StyleCompiler>) -> Result<Self> {
        Ok(Self {
            addr: format!("{}:{}", config.server.host, config.server.port),
            roots: config.server.roots.iter().map(|r| config.resolve(r)).collect(),
            watch: Some(WatchRules {
                root: config.source_dir(),
                rules: default_rules()?,
            }),
            styles: Some(styles),
            reloader: Reloader::new(config.server.notify),
        })
    }

    /// Serve the output root only, without watchers.
    pub fn for_dist(config: &BuildConfig) -> Self {
        Self {
            addr: format!("{}:{}", config.server.host, config.server.port),
            roots: vec![config.output_dir()],
            watch: None,
            styles: None,
            reloader: Reloader::new(config.server.notify),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn reloader(&self) -> Reloader {
        self.reloader.clone()
    }

    pub fn action_for(&self, path: &Path) -> Option<WatchAction> {
        self.watch.as_ref().and_then(|w| w.action_for(path))
    }

    pub async fn handle_change(&self, path: &Path) -> Option<WatchAction> {
        self.handle_changes(&[path.to_path_buf()]).await
    }

    /// React to a batch of changed paths with at most one restyle and one
    /// reload.
    pub async fn handle_changes(&self, paths: &[PathBuf]) -> Option<WatchAction> {
        let actions: Vec<WatchAction> = paths.iter().filter_map(|p| self.action_for(p)).collect();
        if actions.contains(&WatchAction::Restyle) {
            if let Some(styles) = &self.styles {
                if let Err(e) = styles.compile().await {
                    clog_error!("styles: {}", e);
                    return Some(WatchAction::Restyle);
                }
            }
            self.reloader.reload("styles");
            Some(WatchAction::Restyle)
        } else if actions.contains(&WatchAction::Reload) {
            self.reloader.reload("files changed");
            Some(WatchAction::Reload)
        } else {
            None
        }
    }

    pub fn router(&self) -> Router {
        let state = ServerState {
            roots: Arc::new(self.roots.clone()),
            reloader: self.reloader.clone(),
            live_reload: self.watch.is_some(),
        };
        Router::new()
            .route(RELOAD_PATH, get(reload_stream))
            .route(CLIENT_PATH, get(reload_client))
            .fallback(serve_roots)
            .with_state(state)
    }

    fn start_watching(&self, change_tx: mpsc::Sender<PathBuf>) -> Result<Option<RecommendedWatcher>> {
        let Some(watch) = self.watch.clone() else {
            return Ok(None);
        };
        let root = watch.root.clone();

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
                    if watch.action_for(&path).is_some() {
                        let _ = change_tx.blocking_send(path);
                    }
                }
            },
            Config::default(),
        )?;
        if root.exists() {
            watcher.watch(&root, RecursiveMode::Recursive)?;
        }
        Ok(Some(watcher))
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.addr)
            .await
            .map_err(|e| Error::Server(format!("cannot bind {}: {}", self.addr, e)))
    }

    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` fires.
    pub async fn serve_on(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local = listener.local_addr()?;
        let roots: Vec<String> = self.roots.iter().map(|r| r.display().to_string()).collect();
        clog!("Serving {} at http://{}", roots.join(", "), local);

        let app = self.router();
        let (change_tx, mut change_rx) = mpsc::channel(256);
        let _watcher = self.start_watching(change_tx)?;

        let server_shutdown = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
        });

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(first) = change_rx.recv() => {
                    let mut changed = vec![first];
                    while let Ok(Some(path)) =
                        tokio::time::timeout(CHANGE_BATCH_WINDOW, change_rx.recv()).await
                    {
                        changed.push(path);
                    }
                    self.handle_changes(&changed).await;
                }
            }
        }

        server
            .await
            .map_err(|e| Error::TaskJoin(e.to_string()))?
            .map_err(|e| Error::Server(e.to_string()))?;
        clog_debug!("DevServer stopped");
        Ok(())
    }
}

async fn serve_roots(State(state): State<ServerState>, req: Request<Body>) -> Response {
    let (parts, _) = req.into_parts();
    let inject = state.live_reload && parts.method == Method::GET;
    for root in state.roots.iter() {
        let mut attempt = Request::new(Body::empty());
        *attempt.method_mut() = parts.method.clone();
        *attempt.uri_mut() = parts.uri.clone();
        *attempt.headers_mut() = parts.headers.clone();

        let response = match ServeDir::new(root).oneshot(attempt).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        if response.status() != StatusCode::NOT_FOUND {
            let response = response.map(Body::new);
            if inject && is_html_page(&response) {
                return with_reload_client(response).await;
            }
            return response.into_response();
        }
    }
    StatusCode::NOT_FOUND.into_response()
}

fn is_html_page(response: &Response) -> bool {
    response.status() == StatusCode::OK
        && response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/html"))
}

/// Insert the reload client tag before the last `</body>`, or append it.
pub fn inject_client(html: &str) -> String {
    let tag = format!(r#"<script src="{}"></script>"#, CLIENT_PATH);
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => format!("{}{}{}", &html[..at], tag, &html[at..]),
        None => format!("{}{}", html, tag),
    }
}

async fn with_reload_client(response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_INJECTED_PAGE).await {
        Ok(bytes) => bytes,
        Err(e) => {
            clog_error!("cannot read page for reload client: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let html = inject_client(&String::from_utf8_lossy(&bytes));
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(html))
}

async fn reload_client() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        CLIENT_SCRIPT,
    )
}

async fn reload_stream(
    State(state): State<ServerState>,
) -> Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let rx = state.reloader.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(reason) => {
                    return Some((Ok(SseEvent::default().event("reload").data(reason)), rx));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
