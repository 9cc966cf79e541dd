//! Hierarchical progress reporting.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Tracing target for progress events.
const TRACING_TARGET: &str = "strata_runtime::progress";

/// A progress update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Labels from the run down to the reporting scope.
    pub path: Vec<String>,
    /// Free-form message.
    pub message: String,
    /// Units of work completed in the reporting scope.
    pub completed: usize,
    /// Units of work in the reporting scope.
    pub total: usize,
}

impl ProgressEvent {
    /// Returns the completed share in percent, or `None` if the total is unknown.
    pub fn percentage(&self) -> Option<f64> {
        (self.total > 0).then(|| self.completed as f64 * 100.0 / self.total as f64)
    }

    /// Returns the path joined with `/`.
    pub fn scope(&self) -> String {
        self.path.join("/")
    }
}

/// Receives progress events.
///
/// Called from worker tasks, so implementations must be cheap and must not
/// block.
pub trait ProgressSink: Send + Sync {
    /// Handles one event.
    fn on_progress(&self, event: &ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _: &ProgressEvent) {}
}

/// Emits every event as a `tracing` debug event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        tracing::debug!(
            target: TRACING_TARGET,
            scope = %event.scope(),
            completed = event.completed,
            total = event.total,
            "{}",
            event.message
        );
    }
}

struct ProgressScope {
    path: Vec<String>,
    completed: AtomicUsize,
    total: AtomicUsize,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

/// Cloneable handle to a progress scope.
///
/// Scopes form a tree mirroring run, node and step. Counters belong to the
/// scope; clones share them.
#[derive(Clone)]
pub struct Progress {
    scope: Arc<ProgressScope>,
}

impl Progress {
    /// Creates a root scope.
    pub fn new(
        label: impl Into<String>,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_path(vec![label.into()], 0, sink, cancel)
    }

    /// Creates a root scope that reports nowhere.
    pub fn noop() -> Self {
        Self::new("run", Arc::new(NoopProgress), CancellationToken::new())
    }

    fn with_path(
        path: Vec<String>,
        total: usize,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scope: Arc::new(ProgressScope {
                path,
                completed: AtomicUsize::new(0),
                total: AtomicUsize::new(total),
                sink,
                cancel,
            }),
        }
    }

    /// Creates a nested scope with its own counters.
    pub fn child(&self, label: impl Into<String>, total: usize) -> Self {
        let mut path = self.scope.path.clone();
        path.push(label.into());
        Self::with_path(path, total, self.scope.sink.clone(), self.scope.cancel.clone())
    }

    /// Sets the number of work units in this scope.
    pub fn set_total(&self, total: usize) {
        self.scope.total.store(total, Ordering::Relaxed);
    }

    /// Marks one unit of work as completed and reports it.
    pub fn advance(&self, message: impl Into<String>) {
        self.scope.completed.fetch_add(1, Ordering::Relaxed);
        self.emit(message.into());
    }

    /// Reports a message without changing the counters.
    pub fn log(&self, message: impl Into<String>) {
        self.emit(message.into());
    }

    /// Returns the number of completed units.
    pub fn completed(&self) -> usize {
        self.scope.completed.load(Ordering::Relaxed)
    }

    /// Returns the number of units in this scope.
    pub fn total(&self) -> usize {
        self.scope.total.load(Ordering::Relaxed)
    }

    /// Returns the labels from the root to this scope.
    pub fn path(&self) -> &[String] {
        &self.scope.path
    }

    /// Returns whether the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.scope.cancel.is_cancelled()
    }

    fn emit(&self, message: String) {
        let event = ProgressEvent {
            path: self.scope.path.clone(),
            message,
            completed: self.completed(),
            total: self.total(),
        };
        self.scope.sink.on_progress(&event);
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("path", &self.scope.path)
            .field("completed", &self.completed())
            .field("total", &self.total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for Recorder {
        fn on_progress(&self, event: &ProgressEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_child_scopes_report_paths() {
        let recorder = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let root = Progress::new("run", recorder.clone(), cancel.clone());
        let node = root.child("threshold", 2);

        node.advance("step 0");
        node.clone().advance("step 1");
        node.child("step 1", 0).log("halfway");

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].scope(), "run/threshold");
        assert_eq!(events[1].percentage(), Some(100.0));
        assert_eq!(events[2].path.len(), 3);
        assert_eq!(events[2].percentage(), None);

        assert!(!node.is_cancelled());
        cancel.cancel();
        assert!(node.is_cancelled());
    }
}
