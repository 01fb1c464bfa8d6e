use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use conduit::orchestration::Orchestrator;
use conduit::{clog, clog_debug, clog_error, clog_warn, standard_tasks, BuildConfig, Collaborators, Result};

/// conduit - front-end build and deploy task runner
#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    CONDUIT_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Tasks to run, in order
    #[arg(default_value = "default")]
    pub tasks: Vec<String>,

    /// List the available tasks and exit
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Configuration file (default: <project>/conduit.toml)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Project root
    #[arg(short = 'C', long, default_value = ".")]
    pub project: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    conduit::log::init_with_debug(cli.debug);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            clog_error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let root = cli.project.canonicalize()?;
    let config = Arc::new(BuildConfig::load(&root, cli.config.as_deref())?);

    let collab = Collaborators::system();
    let graph = standard_tasks(Arc::clone(&config), &collab)?;

    if cli.list {
        print_tasks(&graph);
        return Ok(true);
    }

    conduit::log::attach_file(&config.logs_dir());

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let shutdown = collab.shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    clog!("Interrupted, stopping...");
                    shutdown.cancel();
                }
                Err(e) => clog_warn!("Cannot listen for Ctrl-C: {}", e),
            }
        });
        Orchestrator::new(graph).execute(&cli.tasks).await
    });

    match report.save(&config.logs_dir()) {
        Ok(path) => clog_debug!("Run report written to {}", path.display()),
        Err(e) => clog_warn!("Failed to write run report: {}", e),
    }

    Ok(report.success)
}

fn print_tasks(graph: &conduit::core::TaskGraph) {
    let width = graph.tasks().map(|t| t.name.len()).max().unwrap_or(0);
    for task in graph.tasks() {
        let mut line = format!("{:width$}  {}", task.name, task.description, width = width);
        if !task.prerequisites.is_empty() {
            line.push_str(&format!(" [after: {}]", task.prerequisites.join(", ")));
        }
        println!("{}", line);
    }
}
