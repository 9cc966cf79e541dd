#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod cache;
pub mod engine;
mod error;
pub mod graph;
pub mod iteration;
pub mod node;
pub mod table;

#[doc(hidden)]
pub mod prelude;

pub use error::{ErrorKind, RuntimeError, RuntimeResult};

/// Tracing target for runtime operations.
pub const TRACING_TARGET: &str = "strata_runtime";
