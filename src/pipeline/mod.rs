//! Asset pipeline: the task bodies behind `clean`, `copy`, `images`,
//! `styles` and `bundle`, plus the bundle watcher used by `serve`.

pub mod bundle;
pub mod clean;
pub mod copy;
pub mod fs;
pub mod images;
pub mod styles;
pub mod tool;
pub mod watch;

pub use bundle::{BundleOutput, Bundler};
pub use clean::clean;
pub use copy::copy;
pub use images::{ImagePipeline, ImageReport, OptimizerStage};
pub use styles::{StyleCompiler, StyleOutput};
pub use tool::{Invocation, ProcessRunner, ToolOutput, ToolRunner};
pub use watch::{BundleWatcher, RebuildEvent};
