//! Remote shell access for the deploy sequence.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::{expand_tilde, RemoteConfig};
use crate::{clog_debug, Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Stdout and stderr as written to a deploy log.
    pub fn transcript(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// A remote host the deploy steps act on.
///
/// Transport failures (the shell cannot be reached at all) are errors;
/// a command that runs and exits non-zero is reported through
/// `CommandOutput::success`.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `commands` in one remote shell, chained with `&&`.
    async fn shell(&self, commands: &[String]) -> Result<CommandOutput>;

    /// Copy a local file to `remote_path`.
    async fn upload(&self, local: &Path, remote_path: &str) -> Result<CommandOutput>;
}

pub struct SshClient {
    pub host: String,
    pub user: Option<String>,
    pub port: u16,
    pub identity_file: Option<String>,
}

impl SshClient {
    pub fn from_config(remote: &RemoteConfig) -> Result<Self> {
        let host = match remote.host.as_deref() {
            Some(host) if !host.trim().is_empty() => host.trim().to_string(),
            _ => {
                return Err(Error::Config(
                    "remote.host is required for deploy tasks".to_string(),
                ))
            }
        };

        let identity_file = match &remote.identity_file {
            Some(path) if !path.is_empty() => {
                let expanded = expand_tilde(path);
                if !expanded.exists() {
                    return Err(Error::Config(format!(
                        "identity file not found: {}",
                        expanded.display()
                    )));
                }
                Some(expanded.display().to_string())
            }
            _ => None,
        };

        Ok(Self {
            host,
            user: remote.user.clone().filter(|u| !u.is_empty()),
            port: remote.port,
            identity_file,
        })
    }

    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    pub fn build_ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        // never prompt; fail fast on stalled connections
        for option in [
            "BatchMode=yes",
            "ConnectTimeout=10",
            "ServerAliveInterval=15",
            "ServerAliveCountMax=3",
        ] {
            args.push("-o".to_string());
            args.push(option.to_string());
        }

        args.push(self.destination());
        args.push(command.to_string());
        args
    }

    async fn execute(&self, command: &str, stdin_file: Option<&Path>) -> Result<CommandOutput> {
        let ssh = which::which("ssh").map_err(|_| Error::ToolNotFound("ssh".to_string()))?;
        clog_debug!("ssh {} {}", self.destination(), command);

        let mut cmd = Command::new(ssh);
        cmd.args(self.build_ssh_args(command));
        match stdin_file {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                cmd.stdin(Stdio::from(file));
            }
            None => {
                cmd.stdin(Stdio::null());
            }
        }

        let output = cmd.output().await?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[async_trait]
impl RemoteShell for SshClient {
    async fn shell(&self, commands: &[String]) -> Result<CommandOutput> {
        self.execute(&commands.join(" && "), None).await
    }

    async fn upload(&self, local: &Path, remote_path: &str) -> Result<CommandOutput> {
        let command = format!("cat > {}", quote_path(remote_path));
        self.execute(&command, Some(local)).await
    }
}

/// Single-quote a path for a POSIX shell.
pub fn quote_path(path: &str) -> String {
    format!("'{}'", path.replace('\'', "'\\''"))
}
