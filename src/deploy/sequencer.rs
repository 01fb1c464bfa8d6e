//! Bodies of the five deploy steps.
//!
//! Each step assumes the state left by the one before it, so they are only
//! ever run through the strictly linear `deploy` sequence (or one at a time
//! by name). Every step captures its output under the log directory.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{checked_remote_dir, BuildConfig};
use crate::deploy::archive::create_tarball;
use crate::deploy::ssh::{quote_path, CommandOutput, RemoteShell, SshClient};
use crate::pipeline::fs::remove_file_if_exists;
use crate::util::{blocking, human_size};
use crate::{clog, clog_debug, Error, Result};

pub const DEPLOY_STEPS: [&str; 5] = [
    "deploy:clean",
    "deploy:compress",
    "deploy:clean-remote",
    "deploy:upload",
    "deploy:extract",
];

pub const CLEAN_LOG: &str = "clean.log";
pub const CLEAN_REMOTE_LOG: &str = "clean-remote-commands.log";
pub const UPLOAD_LOG: &str = "upload.log";
pub const EXTRACT_LOG: &str = "extract-commands.log";

#[derive(Clone)]
pub struct DeploySequencer {
    config: Arc<BuildConfig>,
    remote: Option<Arc<dyn RemoteShell>>,
}

impl DeploySequencer {
    /// Remote steps connect over SSH using `[remote]`, checked only when one
    /// of them runs.
    pub fn new(config: Arc<BuildConfig>) -> Self {
        Self {
            config,
            remote: None,
        }
    }

    pub fn with_remote(config: Arc<BuildConfig>, remote: Arc<dyn RemoteShell>) -> Self {
        Self {
            config,
            remote: Some(remote),
        }
    }

    fn remote(&self) -> Result<Arc<dyn RemoteShell>> {
        match &self.remote {
            Some(remote) => Ok(Arc::clone(remote)),
            None => Ok(Arc::new(SshClient::from_config(&self.config.remote)?)),
        }
    }

    fn tarball_name(&self) -> String {
        self.config
            .paths
            .tarball
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "dist.tar.gz".to_string())
    }

    /// Checked before any remote command is built.
    fn remote_dir(&self) -> Result<&str> {
        checked_remote_dir(&self.config.paths.remote_dir)
    }

    /// Remote path the tarball is uploaded to.
    pub fn remote_tarball(&self) -> Result<String> {
        Ok(format!("{}/{}", self.remote_dir()?, self.tarball_name()))
    }

    pub fn clean_remote_commands(&self) -> Result<Vec<String>> {
        Ok(vec![
            format!("cd {}", quote_path(self.remote_dir()?)),
            "rm -rf ./*".to_string(),
        ])
    }

    pub fn extract_commands(&self) -> Result<Vec<String>> {
        let gz = self.tarball_name();
        let tar = gz.strip_suffix(".gz").ok_or_else(|| {
            Error::Config(format!("tarball '{}' is not a .tar.gz archive", gz))
        })?;
        Ok(vec![
            format!("cd {}", quote_path(self.remote_dir()?)),
            format!("gunzip {}", quote_path(&format!("./{}", gz))),
            format!("tar -xvf {} --overwrite", quote_path(&format!("./{}", tar))),
            format!("rm {}", quote_path(&format!("./{}", tar))),
        ])
    }

    /// `deploy:clean`: delete the local tarball if one exists.
    pub async fn clean_local(&self) -> Result<()> {
        let tarball = self.config.tarball_path();
        let path = tarball.clone();
        let removed = blocking(move || remove_file_if_exists(&path)).await?;
        let line = if removed {
            format!("removed {}\n", tarball.display())
        } else {
            format!("{} not present\n", tarball.display())
        };
        clog_debug!("deploy:clean {}", line.trim_end());
        self.write_log(CLEAN_LOG, &line).await
    }

    /// `deploy:compress`: archive the output root into the tarball.
    pub async fn compress(&self) -> Result<()> {
        let src = self.config.output_dir();
        let dst = self.config.tarball_path();
        let exclude: Vec<PathBuf> = self.config.paths.preserve.iter().map(PathBuf::from).collect();
        let target = dst.clone();
        let report = blocking(move || create_tarball(&src, &target, &exclude)).await?;

        let size = tokio::fs::metadata(&dst).await?.len();
        clog!(
            "deploy:compress: {} ({}, {} compressed)",
            dst.display(),
            report,
            human_size(size)
        );
        Ok(())
    }

    /// `deploy:clean-remote`: purge the remote directory.
    pub async fn clean_remote(&self) -> Result<()> {
        let commands = self.clean_remote_commands()?;
        let remote = self.remote()?;
        let output = remote.shell(&commands).await?;
        self.write_log(CLEAN_REMOTE_LOG, &output.transcript()).await?;
        check("deploy:clean-remote", output)
    }

    /// `deploy:upload`: transfer the tarball into the remote directory.
    pub async fn upload(&self) -> Result<()> {
        let tarball = self.config.tarball_path();
        if !tokio::fs::try_exists(&tarball).await? {
            return Err(Error::Archive(format!(
                "tarball not found: {}",
                tarball.display()
            )));
        }
        let destination = self.remote_tarball()?;
        let remote = self.remote()?;
        let output = remote.upload(&tarball, &destination).await?;

        let mut log = format!("{} -> {}\n", tarball.display(), destination);
        log.push_str(&output.transcript());
        self.write_log(UPLOAD_LOG, &log).await?;
        check("deploy:upload", output)
    }

    /// `deploy:extract`: unpack the tarball remotely and delete it.
    pub async fn extract(&self) -> Result<()> {
        let commands = self.extract_commands()?;
        let remote = self.remote()?;
        let output = remote.shell(&commands).await?;
        self.write_log(EXTRACT_LOG, &output.transcript()).await?;
        check("deploy:extract", output)
    }

    async fn write_log(&self, name: &str, contents: &str) -> Result<()> {
        let dir = self.config.logs_dir();
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(name), contents).await?;
        Ok(())
    }
}

fn check(step: &str, output: CommandOutput) -> Result<()> {
    if output.success {
        return Ok(());
    }
    Err(Error::Remote {
        step: step.to_string(),
        status: output.exit_code,
        stderr: output.stderr.trim().to_string(),
    })
}
