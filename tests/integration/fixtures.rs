//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Creating a temporary project tree
//! - Fake tools that emulate sass, postcss, esbuild and the image optimizers
//! - A recording remote shell
//! - Snapshotting directory contents

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use conduit::core::TaskGraph;
use conduit::deploy::{CommandOutput, RemoteShell};
use conduit::orchestration::{Orchestrator, RunEvent};
use conduit::pipeline::fs::walk_files;
use conduit::pipeline::{Invocation, ToolOutput, ToolRunner};
use conduit::{standard_tasks, BuildConfig, Collaborators, Error, Result};

/// A project tree in a temporary directory.
pub struct TestProject {
    /// Keeps the directory alive for the test's duration.
    pub temp_dir: TempDir,
    pub root: PathBuf,
}

impl TestProject {
    /// Source tree with markup, a dotfile, a stylesheet, scripts and images.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().to_path_buf();
        let project = Self { temp_dir, root };

        project.write("app/index.html", "<!doctype html><h1>conduit</h1>");
        project.write("app/.htaccess", "Options -Indexes");
        project.write("app/styles/main.scss", "$c: red;\nbody { color: $c; }");
        project.write("app/scripts/scripts.js", "import './view.jsx';");
        project.write("app/scripts/view.jsx", "export default () => <p/>;");
        project.write("app/images/logo.png", "png-logo");
        project.write("app/images/photo.jpg", "jpeg-photo");
        project.write("app/images/icons/arrow.svg", "<svg/>");
        project.write("app/images/spinner.gif", "gif-spinner");
        project
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(path, contents).expect("Failed to write file");
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.root.join(relative)).expect("Failed to read file")
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.root.join(relative).exists()
    }

    /// Defaults rooted at the project, with a fixed image concurrency.
    pub fn config(&self) -> BuildConfig {
        let mut config = BuildConfig::for_root(&self.root);
        config.images.concurrency = 2;
        config.bundle.debounce_ms = 20;
        config.server.port = 0;
        config
    }

    /// Relative path to contents for every file under `relative`.
    pub fn snapshot(&self, relative: &str) -> BTreeMap<PathBuf, Vec<u8>> {
        let dir = self.root.join(relative);
        walk_files(&dir, &[])
            .expect("Failed to walk directory")
            .into_iter()
            .map(|file| {
                let contents = fs::read(dir.join(&file)).expect("Failed to read file");
                (file, contents)
            })
            .collect()
    }

    pub fn files(&self, relative: &str) -> Vec<String> {
        self.snapshot(relative)
            .keys()
            .map(|p| p.display().to_string())
            .collect()
    }
}

/// Emulates the external tools well enough for the pipeline to produce real
/// files, and records how they were called.
#[derive(Default)]
pub struct FakeTools {
    pub calls: Mutex<Vec<Invocation>>,
    failing: Mutex<HashSet<String>>,
    in_flight: Mutex<HashMap<String, usize>>,
    peaks: Mutex<HashMap<String, usize>>,
    delay: Duration,
}

impl FakeTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every invocation for `delay` so concurrent calls overlap.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Make `program` exit non-zero until [`FakeTools::recover`].
    pub fn fail(&self, program: &str) {
        self.failing.lock().unwrap().insert(program.to_string());
    }

    pub fn recover(&self, program: &str) {
        self.failing.lock().unwrap().remove(program);
    }

    pub fn count(&self, program: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.program == program)
            .count()
    }

    /// Most simultaneous invocations of `program` seen.
    pub fn peak(&self, program: &str) -> usize {
        self.peaks.lock().unwrap().get(program).copied().unwrap_or(0)
    }

    fn enter(&self, program: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let now = in_flight.entry(program.to_string()).or_insert(0);
        *now += 1;
        let mut peaks = self.peaks.lock().unwrap();
        let peak = peaks.entry(program.to_string()).or_insert(0);
        *peak = (*peak).max(*now);
    }

    fn leave(&self, program: &str) {
        if let Some(now) = self.in_flight.lock().unwrap().get_mut(program) {
            *now -= 1;
        }
    }

    fn emulate(&self, invocation: &Invocation) -> Result<()> {
        let args = &invocation.args;
        match invocation.program.as_str() {
            "sass" => {
                let entry = &args[args.len() - 2];
                let out = &args[args.len() - 1];
                let scss = fs::read_to_string(entry)?;
                fs::write(out, format!("/* compiled */\n{}", scss.replace("$c", "red")))?;
            }
            "postcss" => {
                let file = &args[0];
                let css = fs::read_to_string(file)?;
                fs::write(file, format!("{}\n/* prefixed */", css))?;
            }
            "esbuild" => {
                let entry = fs::read_to_string(&args[0])?;
                let out = invocation
                    .flag_value("--outfile")
                    .ok_or_else(|| Error::Validation("no --outfile".to_string()))?;
                fs::write(out, format!("// bundle\n{}", entry))?;
                fs::write(format!("{}.map", out), "{\"version\":3}")?;
            }
            _ => {
                let output = args
                    .iter()
                    .find(|a| a.ends_with(".conduit-tmp"))
                    .ok_or_else(|| Error::Validation("no output argument".to_string()))?;
                let input = output.trim_end_matches(".conduit-tmp");
                let bytes = fs::read(input)?;
                // "optimized": drop the trailing byte
                fs::write(output, &bytes[..bytes.len().saturating_sub(1)])?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ToolRunner for FakeTools {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        if self.failing.lock().unwrap().contains(&invocation.program) {
            return Err(Error::Tool {
                program: invocation.program.clone(),
                status: 1,
                stderr: "simulated failure".to_string(),
            });
        }

        self.enter(&invocation.program);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = self.emulate(invocation);
        self.leave(&invocation.program);

        result.map(|_| ToolOutput::default())
    }
}

/// One call made on a [`RecordingRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Shell(Vec<String>),
    Upload { local: PathBuf, remote: String },
}

/// Records remote calls; fails the call whose text contains `fail_on`.
#[derive(Default)]
pub struct RecordingRemote {
    pub calls: Mutex<Vec<RemoteCall>>,
    fail_on: Mutex<Option<String>>,
}

impl RecordingRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, needle: &str) {
        *self.fail_on.lock().unwrap() = Some(needle.to_string());
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    fn outcome(&self, text: &str) -> CommandOutput {
        let failed = self
            .fail_on
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|needle| text.contains(needle));
        CommandOutput {
            stdout: format!("ran: {}", text),
            stderr: if failed {
                "remote failure".to_string()
            } else {
                String::new()
            },
            success: !failed,
            exit_code: if failed { 2 } else { 0 },
        }
    }
}

#[async_trait]
impl RemoteShell for RecordingRemote {
    async fn shell(&self, commands: &[String]) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push(RemoteCall::Shell(commands.to_vec()));
        Ok(self.outcome(&commands.join(" && ")))
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(RemoteCall::Upload {
            local: local.to_path_buf(),
            remote: remote.to_string(),
        });
        Ok(self.outcome(&format!("upload {}", remote)))
    }
}

/// Standard task graph with fake collaborators.
pub fn graph_for(config: BuildConfig, tools: Arc<FakeTools>, remote: Arc<RecordingRemote>) -> TaskGraph {
    let collab = Collaborators::with_tools(tools).remote(remote);
    standard_tasks(Arc::new(config), &collab).expect("Failed to build task graph")
}

/// An orchestrator whose events can be drained after the run.
pub fn orchestrator_with_events(graph: TaskGraph) -> (Orchestrator, mpsc::Receiver<RunEvent>) {
    let (tx, rx) = mpsc::channel(1024);
    (Orchestrator::new(graph).with_events(tx), rx)
}

/// Every event received so far.
pub fn drain(rx: &mut mpsc::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Names of started tasks, in start order.
pub fn started(events: &[RunEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            RunEvent::TaskStarted { task } => Some(task.clone()),
            _ => None,
        })
        .collect()
}
