//! Dependency discovery across batches of input binaries.

pub mod dependency_finder;
pub mod progress;

pub use dependency_finder::{
    CompletionStatus, DependencyFinder, DependencyInfo, FailedFile, FinderOutcome,
    ModuleContributions,
};
pub use progress::{LoggingProgress, NullProgress, ProgressSink, TaskHandle};
