//! Mock implementations for testing.

mod node;
mod progress;
mod storage;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use node::{CountingSource, FailingNode, MapNode, PanickingNode, SlowNode};
pub use progress::RecordingProgress;
pub use storage::FlakyStorage;

/// Shared invocation counter.
///
/// Clones observe the same count.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter, returning the new value.
    pub fn increment(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the current value.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
