//! Progress reporting seam consumed by the dependency finder.
//!
//! The finder calls these but does not own their presentation; callers plug
//! in whatever sink their front end needs. Cancellation travels through the
//! same seam and is polled between per-file parses.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

pub trait ProgressSink: Send + Sync {
    fn start_task(&self, name: &str, total_items: usize) -> Box<dyn TaskHandle>;

    fn report_issue(&self, message: &str);

    /// Polled between files; `true` asks the finder to stop and return
    /// partial results.
    fn is_cancelled(&self) -> bool {
        false
    }
}

pub trait TaskHandle: Send + Sync {
    fn tick(&self);

    fn abort(&self);
}

/// Sink that swallows everything; useful for embedding and tests.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn start_task(&self, _name: &str, _total_items: usize) -> Box<dyn TaskHandle> {
        Box::new(NullTask)
    }

    fn report_issue(&self, _message: &str) {}
}

struct NullTask;

impl TaskHandle for NullTask {
    fn tick(&self) {}

    fn abort(&self) {}
}

/// Sink that reports through `tracing` when no front end is attached.
#[derive(Debug, Default)]
pub struct LoggingProgress {
    cancelled: AtomicBool,
}

impl LoggingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; observed by the finder between files.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl ProgressSink for LoggingProgress {
    fn start_task(&self, name: &str, total_items: usize) -> Box<dyn TaskHandle> {
        info!("{} ({} items)", name, total_items);
        Box::new(LoggingTask {
            name: name.to_string(),
        })
    }

    fn report_issue(&self, message: &str) {
        warn!("{}", message);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

struct LoggingTask {
    name: String,
}

impl TaskHandle for LoggingTask {
    fn tick(&self) {}

    fn abort(&self) {
        warn!("{} aborted", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_progress_is_never_cancelled() {
        let sink = NullProgress;
        assert!(!sink.is_cancelled());
        let task = sink.start_task("noop", 3);
        task.tick();
        task.abort();
    }

    #[test]
    fn test_logging_progress_cancel_flag() {
        let sink = LoggingProgress::new();
        assert!(!sink.is_cancelled());
        sink.cancel();
        assert!(sink.is_cancelled());
    }
}
