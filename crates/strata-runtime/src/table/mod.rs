//! Annotated row storage.
//!
//! - [`DataItem`]: An opaque row payload
//! - [`VirtualData`], [`PayloadHandle`], [`ReloadKey`]: Payload handles that
//!   can be evicted to a [`Storage`](crate::cache::Storage) and reloaded
//! - [`AnnotationSet`], [`AnnotationMergeMode`]: String annotations per row
//! - [`Row`], [`DataTable`], [`DataTableBuilder`]: Immutable annotated tables

mod annotation;
mod item;
mod payload;
mod row;
mod table;

pub use annotation::{AnnotationMergeMode, AnnotationSet};
pub use item::DataItem;
pub use payload::{PayloadHandle, ReloadKey, VirtualData};
pub use row::Row;
pub use table::{DataTable, DataTableBuilder};
