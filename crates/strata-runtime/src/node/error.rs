//! Errors reported by node logic.

use thiserror::Error;

use crate::error::{BoxedError, RuntimeError};

/// Result type returned by node logic.
pub type NodeResult<T> = Result<T, NodeError>;

/// Failure of a single iteration step.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct NodeError {
    message: String,
    #[source]
    source: Option<BoxedError>,
}

impl NodeError {
    /// Creates an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Attaches an underlying error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<RuntimeError> for NodeError {
    fn from(error: RuntimeError) -> Self {
        Self::new(error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(format!("invalid payload: {error}")).with_source(error)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_runtime_error_conversion_keeps_source() {
        let error = NodeError::from(RuntimeError::Cancelled);
        assert_eq!(error.message(), "execution cancelled");
        assert!(error.source().is_some());
    }
}
