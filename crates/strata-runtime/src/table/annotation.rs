//! String annotations attached to rows.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// How conflicting annotation values are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnnotationMergeMode {
    /// Keep every distinct value; multiple values become a JSON list string.
    #[default]
    Merge,
    /// Later values replace earlier ones.
    OverwriteExisting,
    /// Earlier values are kept.
    SkipExisting,
    /// Merged result carries no annotations.
    Discard,
}

/// Set of string key/value annotations.
///
/// Keys are unique by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationSet(BTreeMap<String, String>);

impl AnnotationSet {
    /// Creates an empty annotation set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an annotation, returning the set.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts an annotation, returning the previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Returns the value of an annotation.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns whether the key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the annotation keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns the annotations in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of annotations.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a copy where annotations of `other` replace existing keys.
    pub fn overlaid_with(&self, other: &AnnotationSet) -> AnnotationSet {
        let mut result = self.clone();
        for (key, value) in other.iter() {
            result.insert(key, value);
        }
        result
    }

    /// Combines several sets into one according to `mode`.
    pub fn merge_all<'a>(
        sets: impl IntoIterator<Item = &'a AnnotationSet>,
        mode: AnnotationMergeMode,
    ) -> AnnotationSet {
        match mode {
            AnnotationMergeMode::Discard => AnnotationSet::new(),
            AnnotationMergeMode::OverwriteExisting => {
                let mut result = AnnotationSet::new();
                for set in sets {
                    for (key, value) in set.iter() {
                        result.insert(key, value);
                    }
                }
                result
            }
            AnnotationMergeMode::SkipExisting => {
                let mut result = BTreeMap::new();
                for set in sets {
                    for (key, value) in set.iter() {
                        result.entry(key.to_owned()).or_insert_with(|| value.to_owned());
                    }
                }
                AnnotationSet(result)
            }
            AnnotationMergeMode::Merge => {
                let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for set in sets {
                    for (key, value) in set.iter() {
                        match values.entry(key.to_owned()) {
                            Entry::Vacant(entry) => {
                                entry.insert(vec![value.to_owned()]);
                            }
                            Entry::Occupied(mut entry) => {
                                if !entry.get().iter().any(|v| v == value) {
                                    entry.get_mut().push(value.to_owned());
                                }
                            }
                        }
                    }
                }
                values
                    .into_iter()
                    .map(|(key, mut distinct)| {
                        let value = if distinct.len() == 1 {
                            distinct.remove(0)
                        } else {
                            serde_json::Value::from(distinct).to_string()
                        };
                        (key, value)
                    })
                    .collect()
            }
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AnnotationSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
