use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task already registered: {0}")]
    DuplicateTask(String),

    #[error("Dependency cycle detected at task: {0}")]
    Cycle(String),

    #[error("Task '{task}' failed: {reason}")]
    TaskFailed { task: String, reason: String },

    #[error("{program} exited with {status}: {stderr}")]
    Tool {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("Tool not found on PATH: {0}")]
    ToolNotFound(String),

    #[error("Remote step '{step}' exited with {status}: {stderr}")]
    Remote {
        step: String,
        status: i32,
        stderr: String,
    },

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Server error: {0}")]
    Server(String),
}

pub type Result<T> = std::result::Result<T, Error>;
