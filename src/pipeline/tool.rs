//! External tool invocation.
//!
//! Every compiler, bundler and optimizer is a black box reached through
//! [`ToolRunner`]: an [`Invocation`] goes in, a [`ToolOutput`] comes back,
//! and a non-zero exit is an [`Error::Tool`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{clog_debug, clog_trace, clog_warn, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    /// Build an invocation from an argument template, replacing `{input}`
    /// and `{output}` with the given paths.
    pub fn templated(program: &str, template: &[String], input: &Path, output: &Path) -> Self {
        let input = input.display().to_string();
        let output = output.display().to_string();
        Self::new(program).args(
            template
                .iter()
                .map(|arg| arg.replace("{input}", &input).replace("{output}", &output)),
        )
    }

    /// Value following `--flag=` in the arguments, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        let prefix = format!("{}=", flag);
        self.args.iter().find_map(|a| a.strip_prefix(&prefix))
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command_line())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run the invocation to completion.
    ///
    /// # Errors
    /// `Error::Tool` on a non-zero exit, `Error::ToolNotFound` when the
    /// program cannot be located.
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput>;
}

/// Runs invocations as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        let program = which::which(&invocation.program)
            .map_err(|_| Error::ToolNotFound(invocation.program.clone()))?;
        clog_debug!("ProcessRunner::run {}", invocation);

        let mut cmd = Command::new(&program);
        cmd.args(&invocation.args);
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        let output = cmd.output().await?;
        let result = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        };
        clog_trace!("{} stdout: {}", invocation.program, result.stdout.trim_end());

        if !output.status.success() {
            clog_warn!(
                "{} exited with {}: {}",
                invocation.program,
                result.exit_code,
                result.stderr.trim()
            );
            return Err(Error::Tool {
                program: invocation.program.clone(),
                status: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }
}
