//! The standard task set.
//!
//! Every task body captures the shared [`BuildConfig`] and the collaborators
//! it talks to when the graph is built; nothing is looked up globally while a
//! task runs.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::BuildConfig;
use crate::core::{Sequence, Task, TaskGraph};
use crate::deploy::{DeploySequencer, RemoteShell, DEPLOY_STEPS};
use crate::pipeline::{
    clean, copy, BundleWatcher, Bundler, ImagePipeline, ProcessRunner, StyleCompiler, ToolRunner,
};
use crate::server::DevServer;
use crate::{clog_debug, Error, Result};

/// External programs and hosts the task bodies act on.
#[derive(Clone)]
pub struct Collaborators {
    pub tools: Arc<dyn ToolRunner>,
    /// `None` connects over SSH from `[remote]` when a deploy step runs.
    pub remote: Option<Arc<dyn RemoteShell>>,
    /// Stops long-running tasks (`serve`, `serve:dist`).
    pub shutdown: CancellationToken,
}

impl Collaborators {
    /// Real child processes and SSH.
    pub fn system() -> Self {
        Self::with_tools(Arc::new(ProcessRunner::new()))
    }

    pub fn with_tools(tools: Arc<dyn ToolRunner>) -> Self {
        Self {
            tools,
            remote: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteShell>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }
}

/// A task whose body is re-created from `make` on every run.
fn body_task<F, Fut>(config: &BuildConfig, name: &str, description: &str, make: F) -> Task
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Task::new(name)
        .describe(description)
        .policy(config.policy_for(name))
        .body(make)
}

/// Build the graph of all named tasks.
pub fn standard_tasks(config: Arc<BuildConfig>, collab: &Collaborators) -> Result<TaskGraph> {
    let tools = Arc::clone(&collab.tools);
    let bundler = Bundler::new(Arc::clone(&config), Arc::clone(&tools));
    let styles = Arc::new(StyleCompiler::new(Arc::clone(&config), Arc::clone(&tools)));
    let images = Arc::new(ImagePipeline::new(&config, Arc::clone(&tools)));
    let deployer = match &collab.remote {
        Some(remote) => DeploySequencer::with_remote(Arc::clone(&config), Arc::clone(remote)),
        None => DeploySequencer::new(Arc::clone(&config)),
    };

    let mut graph = TaskGraph::new();

    graph.register(
        Task::new("default")
            .describe("Clean, then copy, then bundle, images and styles concurrently")
            .depends_on(["clean"])
            .policy(config.policy_for("default"))
            .sequence(
                Sequence::new()
                    .then("copy")
                    .then_group(["bundle", "images", "styles"]),
            ),
    )?;

    let c = Arc::clone(&config);
    graph.register(body_task(
        &config,
        "clean",
        "Remove the staging directory and the output root contents",
        move || clean(Arc::clone(&c)),
    ))?;

    let c = Arc::clone(&config);
    graph.register(body_task(
        &config,
        "copy",
        "Copy static files (not images) into the output root",
        move || {
            let c = Arc::clone(&c);
            async move { copy(c).await.map(|_| ()) }
        },
    ))?;

    let p = Arc::clone(&images);
    graph.register(body_task(
        &config,
        "images",
        "Optimize images into the output root",
        move || {
            let p = Arc::clone(&p);
            async move { p.run().await.map(|_| ()) }
        },
    ))?;

    let s = Arc::clone(&styles);
    graph.register(body_task(
        &config,
        "styles",
        "Compile and prefix the stylesheet",
        move || {
            let s = Arc::clone(&s);
            async move { s.compile().await.map(|_| ()) }
        },
    ))?;

    let b = bundler.clone();
    graph.register(body_task(
        &config,
        "bundle",
        "Bundle the scripts once",
        move || {
            let b = b.clone();
            async move { b.build().await.map(|_| ()) }
        },
    ))?;

    let (c, s, b, token) = (
        Arc::clone(&config),
        Arc::clone(&styles),
        bundler.clone(),
        collab.shutdown.clone(),
    );
    graph.register(
        body_task(
            &config,
            "serve",
            "Serve the working tree, rebuilding and reloading on change",
            move || serve_source(Arc::clone(&c), Arc::clone(&s), b.clone(), token.child_token()),
        )
        .depends_on(["bundle", "styles"]),
    )?;

    let (c, token) = (Arc::clone(&config), collab.shutdown.clone());
    graph.register(body_task(
        &config,
        "serve:dist",
        "Serve the output root",
        move || {
            let server = DevServer::for_dist(&c);
            server.serve(token.child_token())
        },
    ))?;

    graph.register(
        Task::new("deploy")
            .describe("Build, then publish the output root to the remote host")
            .depends_on(["default"])
            .policy(config.policy_for("deploy"))
            .sequence(Sequence::linear(DEPLOY_STEPS))
            .on_complete("Deploy finished"),
    )?;

    let d = deployer.clone();
    graph.register(body_task(
        &config,
        "deploy:clean",
        "Delete the local tarball",
        move || {
            let d = d.clone();
            async move { d.clean_local().await }
        },
    ))?;

    let d = deployer.clone();
    graph.register(body_task(
        &config,
        "deploy:compress",
        "Archive the output root into the tarball",
        move || {
            let d = d.clone();
            async move { d.compress().await }
        },
    ))?;

    let d = deployer.clone();
    graph.register(body_task(
        &config,
        "deploy:clean-remote",
        "Purge the remote directory",
        move || {
            let d = d.clone();
            async move { d.clean_remote().await }
        },
    ))?;

    let d = deployer.clone();
    graph.register(body_task(
        &config,
        "deploy:upload",
        "Upload the tarball to the remote directory",
        move || {
            let d = d.clone();
            async move { d.upload().await }
        },
    ))?;

    let d = deployer;
    graph.register(body_task(
        &config,
        "deploy:extract",
        "Unpack the tarball remotely and delete it",
        move || {
            let d = d.clone();
            async move { d.extract().await }
        },
    ))?;

    clog_debug!("registered {} tasks", graph.len());
    Ok(graph)
}

/// Bundle watcher plus dev server until `shutdown` fires.
async fn serve_source(
    config: Arc<BuildConfig>,
    styles: Arc<StyleCompiler>,
    bundler: Bundler,
    shutdown: CancellationToken,
) -> Result<()> {
    let server = DevServer::for_source(&config, styles)?;
    let reloader = server.reloader();

    let mut watcher = BundleWatcher::new(bundler);
    watcher.on_rebuild(move |event| {
        if event.is_success() {
            reloader.reload("bundle");
        }
    });
    let watching = tokio::spawn(watcher.run(shutdown.clone()));

    let served = server.serve(shutdown.clone()).await;
    shutdown.cancel();
    watching
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))??;
    served
}
