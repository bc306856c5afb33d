use std::{collections::BTreeMap, time::SystemTime};

use metrics::Key;

/// A numeric field value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FieldValue {
    /// A floating-point value, used for counter sums and gauge values.
    Float(f64),

    /// An unsigned integer value, used for histogram bucket counts.
    Unsigned(u64),
}

/// A single aggregated time-series point, ready to be pushed to the collector.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportRecord {
    /// Metric name.
    pub name: String,

    /// Global tags merged with the series' labels.
    pub tags: BTreeMap<String, String>,

    /// Aggregated fields, in a stable order.
    pub fields: Vec<(String, FieldValue)>,

    /// Time of the export tick that produced this record.
    pub timestamp: SystemTime,
}

impl ExportRecord {
    /// Gets the value of the field with the given name.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        self.fields.iter().find(|(field, _)| field == name).map(|(_, value)| *value)
    }
}

/// Tags attached to every exported record.
///
/// Global tags are fixed once the exporter is built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlobalTags {
    tags: BTreeMap<String, String>,
}

impl GlobalTags {
    /// Creates an empty set of global tags.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a tag, replacing any previous value for the same key.
    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.insert(key.into(), value.into());
    }

    /// Gets the value of a tag.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns the number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns `true` if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Merges the labels of `key` over the global tags.
    ///
    /// On a key collision the label wins, and among labels sharing a key the last one wins.
    pub fn merge(&self, key: &Key) -> BTreeMap<String, String> {
        let mut tags = self.tags.clone();
        for label in key.labels() {
            tags.insert(label.key().to_owned(), label.value().to_owned());
        }
        tags
    }
}
