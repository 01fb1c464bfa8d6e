//! conduit: front-end build and deploy task runner.
//!
//! Named tasks (`clean`, `copy`, `images`, `styles`, `bundle`, `serve`,
//! `deploy`, ...) are registered in a [`core::TaskGraph`] and executed by an
//! [`orchestration::Orchestrator`]. The heavy lifting is done by external
//! tools reached through [`pipeline::ToolRunner`] and by a remote shell
//! reached through [`deploy::RemoteShell`].

pub mod config;
pub mod core;
pub mod deploy;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod pipeline;
pub mod server;
pub mod tasks;
pub mod util;

pub use config::BuildConfig;
pub use error::{Error, Result};
pub use tasks::{standard_tasks, Collaborators};
