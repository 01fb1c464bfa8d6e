//! Core domain models for conduit orchestration.
//!
//! Tasks, the ordered steps that compose them, and the task graph that
//! resolves names and prerequisites.

pub mod graph;
pub mod sequence;
pub mod task;

pub use graph::{EdgeKind, TaskGraph};
pub use sequence::{Sequence, Step};
pub use task::{FailurePolicy, Task, TaskAction, TaskBody, TaskStatus};
