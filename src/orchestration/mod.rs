//! Orchestration layer: running tasks in order and bounding concurrent
//! collaborator work.

mod pool;
mod runner;

pub use pool::StagePool;
pub use runner::{Orchestrator, RunEvent, RunReport, TaskRecord, REPORT_FILE};
