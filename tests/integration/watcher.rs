//! Watch mode: bundle rebuilds, dev server lifecycle and reload triggers.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use conduit::orchestration::RunEvent;
use conduit::pipeline::{BundleWatcher, Bundler, StyleCompiler};
use conduit::server::{DevServer, WatchAction};
use conduit::{standard_tasks, Collaborators};

use crate::fixtures::{orchestrator_with_events, FakeTools, RecordingRemote, TestProject};

const WAIT: Duration = Duration::from_secs(5);

/// Receive rebuild outcomes until one equals `success`.
async fn wait_for(rx: &mut mpsc::UnboundedReceiver<bool>, success: bool) {
    tokio::time::timeout(WAIT, async {
        while let Some(outcome) = rx.recv().await {
            if outcome == success {
                return;
            }
        }
        panic!("rebuild channel closed");
    })
    .await
    .expect("timed out waiting for rebuild");
}

/// Let in-flight filesystem events settle, then discard their outcomes.
async fn settle(rx: &mut mpsc::UnboundedReceiver<bool>) {
    tokio::time::sleep(Duration::from_millis(200)).await;
    while rx.try_recv().is_ok() {}
}

/// Test: Watch mode survives a failed rebuild
/// Given a running bundle watcher
/// When a good change, a broken change, then a fixed change arrive
/// Then the broken rebuild is reported, the previous bundle stays in place,
/// and the watcher keeps rebuilding afterwards
#[tokio::test]
async fn test_bundle_watcher_recovers_from_failure() {
    let project = TestProject::new();
    let tools = Arc::new(FakeTools::new());
    let bundler = Bundler::new(Arc::new(project.config()), tools.clone());
    let entry = project.root.join("app/scripts/scripts.js");

    let mut watcher = BundleWatcher::new(bundler);
    let (tx, mut rx) = mpsc::unbounded_channel();
    watcher.on_rebuild(move |event| {
        let _ = tx.send(event.is_success());
    });
    let changes = watcher.change_sender();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(watcher.run(shutdown.clone()));

    project.write("app/scripts/scripts.js", "let v = 1;");
    changes.send(entry.clone()).await.unwrap();
    wait_for(&mut rx, true).await;
    settle(&mut rx).await;
    assert!(project.read("app/scripts/bundle.js").contains("let v = 1;"));

    tools.fail("esbuild");
    project.write("app/scripts/scripts.js", "let v = ;");
    changes.send(entry.clone()).await.unwrap();
    wait_for(&mut rx, false).await;
    settle(&mut rx).await;
    assert!(project.read("app/scripts/bundle.js").contains("let v = 1;"));

    tools.recover("esbuild");
    project.write("app/scripts/scripts.js", "let v = 3;");
    changes.send(entry).await.unwrap();
    wait_for(&mut rx, true).await;
    assert!(project.read("app/scripts/bundle.js").contains("let v = 3;"));

    shutdown.cancel();
    tokio::time::timeout(WAIT, running)
        .await
        .expect("watcher did not stop")
        .unwrap()
        .unwrap();
}

/// Test: The first root that has a file wins
/// Given compiled styles in both staging and the source tree
/// When the dev server is asked for the stylesheet
/// Then the staging copy is served; source-only files still resolve
#[tokio::test]
async fn test_dev_server_root_precedence() {
    let project = TestProject::new();
    let config = Arc::new(project.config());
    let styles = Arc::new(StyleCompiler::new(
        Arc::clone(&config),
        Arc::new(FakeTools::new()),
    ));
    styles.compile().await.unwrap();
    project.write("app/styles/main.css", "stale");
    let server = DevServer::for_source(&config, styles).unwrap();

    let response = server
        .router()
        .oneshot(Request::get("/styles/main.css").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body, project.read(".tmp/styles/main.css").as_bytes());

    let response = server
        .router()
        .oneshot(Request::get("/index.html").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Test: Stylesheet edits restyle, markup edits reload
/// Given a dev server over the working tree with a subscribed browser
/// When a stylesheet and then the index page change
/// Then the first recompiles styles before notifying, the second just notifies
#[tokio::test]
async fn test_dev_server_change_actions() {
    let project = TestProject::new();
    let config = Arc::new(project.config());
    let tools = Arc::new(FakeTools::new());
    let styles = Arc::new(StyleCompiler::new(Arc::clone(&config), tools.clone()));
    let server = DevServer::for_source(&config, styles).unwrap();
    let mut browser = server.reloader().subscribe();

    let scss = project.root.join("app/styles/main.scss");
    assert_eq!(server.handle_change(&scss).await, Some(WatchAction::Restyle));
    assert_eq!(browser.try_recv().unwrap(), "styles");
    assert_eq!(tools.count("sass"), 1);
    assert!(project.exists(".tmp/styles/main.css"));

    let index = project.root.join("app/index.html");
    assert_eq!(server.handle_change(&index).await, Some(WatchAction::Reload));
    assert_eq!(browser.try_recv().unwrap(), "files changed");
    assert_eq!(tools.count("sass"), 1);

    let script = project.root.join("app/scripts/view.jsx");
    assert_eq!(server.handle_change(&script).await, None);
    assert!(browser.try_recv().is_err());
}

/// Test: A broken stylesheet does not reload browsers
/// Given sass failing
/// When a stylesheet changes
/// Then no reload is published
#[tokio::test]
async fn test_dev_server_restyle_failure_skips_reload() {
    let project = TestProject::new();
    let config = Arc::new(project.config());
    let tools = Arc::new(FakeTools::new());
    tools.fail("sass");
    let styles = Arc::new(StyleCompiler::new(Arc::clone(&config), tools));
    let server = DevServer::for_source(&config, styles).unwrap();
    let mut browser = server.reloader().subscribe();

    let scss = project.root.join("app/styles/main.scss");
    assert_eq!(server.handle_change(&scss).await, Some(WatchAction::Restyle));
    assert!(browser.try_recv().is_err());
}

/// Test: `serve` runs its prerequisites and stops on shutdown
/// Given the standard tasks wired to a shutdown token and port 0
/// When `serve` starts and the token is cancelled
/// Then bundle and styles ran first and the task finishes cleanly
#[tokio::test]
async fn test_serve_task_lifecycle() {
    let project = TestProject::new();
    let token = CancellationToken::new();
    let collab = Collaborators::with_tools(Arc::new(FakeTools::new()))
        .remote(Arc::new(RecordingRemote::new()))
        .shutdown(token.clone());
    let graph = standard_tasks(Arc::new(project.config()), &collab).unwrap();
    let (orchestrator, mut rx) = orchestrator_with_events(graph);

    let serving = tokio::spawn(async move { orchestrator.run("serve").await });

    tokio::time::timeout(WAIT, async {
        while let Some(event) = rx.recv().await {
            if matches!(&event, RunEvent::TaskStarted { task } if task == "serve") {
                return;
            }
        }
    })
    .await
    .expect("serve never started");
    assert!(project.exists("app/scripts/bundle.js"));
    assert!(project.exists(".tmp/styles/main.css"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();
    tokio::time::timeout(WAIT, serving)
        .await
        .expect("serve did not stop")
        .unwrap()
        .unwrap();
}
