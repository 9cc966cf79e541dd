//! Immutable data tables.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{AnnotationSet, DataItem, Row};
use crate::cache::Storage;
use crate::error::RuntimeResult;
use crate::graph::DataKind;

/// Ordered rows produced by one output slot in one run.
///
/// Cloning a table is cheap: rows are shared, never copied, and a table
/// cannot be modified once built.
#[derive(Debug, Clone)]
pub struct DataTable {
    kind: DataKind,
    rows: Arc<[Row]>,
}

impl DataTable {
    /// Creates a table from rows.
    pub fn new(kind: DataKind, rows: Vec<Row>) -> Self {
        Self {
            kind,
            rows: rows.into(),
        }
    }

    /// Creates an empty table.
    pub fn empty(kind: DataKind) -> Self {
        Self::new(kind, Vec::new())
    }

    /// Returns a builder for a table of the given kind.
    pub fn builder(kind: DataKind) -> DataTableBuilder {
        DataTableBuilder::new(kind)
    }

    /// Concatenates tables in order.
    pub fn concat<'a>(kind: DataKind, tables: impl IntoIterator<Item = &'a DataTable>) -> Self {
        let rows = tables
            .into_iter()
            .flat_map(|table| table.rows.iter().cloned())
            .collect();
        Self::new(kind, rows)
    }

    /// Returns the data kind of the table.
    pub fn kind(&self) -> &DataKind {
        &self.kind
    }

    /// Returns the rows.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Returns a row by index.
    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns every annotation key present in any row.
    pub fn annotation_keys(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|row| row.annotations().keys().map(str::to_owned))
            .collect()
    }

    /// Returns the number of rows whose payload is resident.
    pub fn resident_rows(&self) -> usize {
        self.rows.iter().filter(|row| row.data().is_resident()).count()
    }

    /// Reloads every evicted payload from storage.
    pub async fn resolve_all(&self, storage: &dyn Storage) -> RuntimeResult<()> {
        for row in self.rows.iter() {
            row.resolve(storage).await?;
        }
        Ok(())
    }

    /// Evicts every resident payload to storage, returning how many were evicted.
    pub async fn evict_all(&self, storage: &dyn Storage) -> RuntimeResult<usize> {
        let mut evicted = 0;
        for row in self.rows.iter() {
            if row.data().evict(storage).await? {
                evicted += 1;
            }
        }
        Ok(evicted)
    }
}

/// Accumulates rows for a table.
#[derive(Debug, Clone)]
pub struct DataTableBuilder {
    kind: DataKind,
    rows: Vec<Row>,
}

impl DataTableBuilder {
    /// Creates an empty builder.
    pub fn new(kind: DataKind) -> Self {
        Self {
            kind,
            rows: Vec::new(),
        }
    }

    /// Appends a row.
    pub fn push(&mut self, row: Row) -> &mut Self {
        self.rows.push(row);
        self
    }

    /// Appends a new row from a payload and annotations.
    pub fn push_item(
        &mut self,
        item: impl Into<DataItem>,
        annotations: AnnotationSet,
    ) -> &mut Self {
        self.push(Row::new(item, annotations))
    }

    /// Returns the number of rows appended so far.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns whether no rows were appended.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Builds the immutable table.
    pub fn build(self) -> DataTable {
        DataTable::new(self.kind, self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;

    fn table() -> DataTable {
        let mut builder = DataTable::builder(DataKind::new("number"));
        builder
            .push_item(DataItem::new(1), AnnotationSet::new().with("k", "1"))
            .push_item(DataItem::new(2), AnnotationSet::new().with("k", "2").with("extra", "x"));
        builder.build()
    }

    #[test]
    fn test_builder_and_keys() {
        let table = table();
        assert_eq!(table.len(), 2);
        assert_eq!(table.kind().as_str(), "number");
        let keys: Vec<_> = table.annotation_keys().into_iter().collect();
        assert_eq!(keys, vec!["extra".to_owned(), "k".to_owned()]);
    }

    #[test]
    fn test_concat_shares_rows() {
        let first = table();
        let second = table();
        let joined = DataTable::concat(DataKind::new("number"), [&first, &second]);
        assert_eq!(joined.len(), 4);
        assert!(joined.rows()[0].shares_payload(&first.rows()[0]));
        assert!(joined.rows()[2].shares_payload(&second.rows()[0]));
    }

    #[tokio::test]
    async fn test_evict_and_resolve_all() {
        let storage = MemoryStorage::new();
        let table = table();
        assert_eq!(table.evict_all(&storage).await.unwrap(), 2);
        assert_eq!(table.resident_rows(), 0);

        table.resolve_all(&storage).await.unwrap();
        assert_eq!(table.resident_rows(), 2);
        assert_eq!(table.rows()[1].item().unwrap().value(), &serde_json::json!(2));
    }
}
