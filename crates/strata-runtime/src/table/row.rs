//! Table rows.

use std::sync::Arc;

use super::{AnnotationSet, DataItem, VirtualData};
use crate::cache::Storage;
use crate::error::RuntimeResult;

/// A payload plus its annotations.
///
/// Rows are immutable; the `with_*` methods return modified copies that
/// share the payload.
#[derive(Debug, Clone)]
pub struct Row {
    data: Arc<VirtualData>,
    annotations: AnnotationSet,
}

impl Row {
    /// Creates a row with a resident payload.
    pub fn new(item: impl Into<DataItem>, annotations: AnnotationSet) -> Self {
        Self {
            data: VirtualData::new(item.into()),
            annotations,
        }
    }

    /// Creates a row around an existing payload handle.
    pub fn from_virtual(data: Arc<VirtualData>, annotations: AnnotationSet) -> Self {
        Self { data, annotations }
    }

    /// Returns the payload handle.
    pub fn data(&self) -> &Arc<VirtualData> {
        &self.data
    }

    /// Returns the payload if it is resident.
    pub fn item(&self) -> Option<Arc<DataItem>> {
        self.data.get()
    }

    /// Returns the payload, reloading it from storage if needed.
    pub async fn resolve(&self, storage: &dyn Storage) -> RuntimeResult<Arc<DataItem>> {
        self.data.resolve(storage).await
    }

    /// Returns the annotations.
    pub fn annotations(&self) -> &AnnotationSet {
        &self.annotations
    }

    /// Returns a single annotation value.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key)
    }

    /// Returns a copy of this row with an added or replaced annotation.
    pub fn with_annotation(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            data: self.data.clone(),
            annotations: self.annotations.clone().with(key, value),
        }
    }

    /// Returns a copy of this row with different annotations.
    pub fn with_annotations(&self, annotations: AnnotationSet) -> Self {
        Self {
            data: self.data.clone(),
            annotations,
        }
    }

    /// Returns whether both rows share the same payload.
    pub fn shares_payload(&self, other: &Row) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_on_write_annotations() {
        let row = Row::new(DataItem::new("cell"), AnnotationSet::new().with("k", "1"));
        let copy = row.with_annotation("k", "2");

        assert_eq!(row.annotation("k"), Some("1"));
        assert_eq!(copy.annotation("k"), Some("2"));
        assert!(row.shares_payload(&copy));
    }
}
