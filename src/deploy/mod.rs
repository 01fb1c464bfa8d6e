//! Remote publishing: the SSH shell, the tarball, and the five deploy steps.

pub mod archive;
pub mod sequencer;
pub mod ssh;

pub use archive::create_tarball;
pub use sequencer::{DeploySequencer, DEPLOY_STEPS};
pub use ssh::{CommandOutput, RemoteShell, SshClient};
