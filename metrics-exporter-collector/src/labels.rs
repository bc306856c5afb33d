use metrics::{Key, Label};

use crate::errors::ConfigError;

/// An ordered list of label key/value pairs.
///
/// Labels are kept in the order they were added, which is the order used when they are merged into the tags of an
/// exported record: if the same key is added twice, the later value wins. Two `LabelValues` compare equal when their
/// pairs are equal after a stable sort by key.
#[derive(Clone, Debug, Default)]
pub struct LabelValues {
    labels: Vec<Label>,
}

impl LabelValues {
    /// Creates an empty `LabelValues`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `LabelValues` from a flat list of alternating keys and values.
    ///
    /// # Errors
    ///
    /// If `flat` has an odd number of elements, an error is returned.
    pub fn from_flat<S>(flat: &[S]) -> Result<Self, ConfigError>
    where
        S: AsRef<str>,
    {
        Self::new().try_with(flat)
    }

    /// Returns a copy of these labels extended with a flat list of alternating keys and values.
    ///
    /// # Errors
    ///
    /// If `flat` has an odd number of elements, an error is returned.
    pub fn try_with<S>(&self, flat: &[S]) -> Result<Self, ConfigError>
    where
        S: AsRef<str>,
    {
        if flat.len() % 2 != 0 {
            return Err(ConfigError::OddLabelValues { count: flat.len() });
        }

        let mut labels = Vec::with_capacity(self.labels.len() + flat.len() / 2);
        labels.extend_from_slice(&self.labels);
        labels.extend(
            flat.chunks_exact(2)
                .map(|pair| Label::new(pair[0].as_ref().to_owned(), pair[1].as_ref().to_owned())),
        );

        Ok(Self { labels })
    }

    /// Returns a copy of these labels extended with a flat list of alternating keys and values.
    ///
    /// # Panics
    ///
    /// Panics if `flat` has an odd number of elements.
    pub fn with<S>(&self, flat: &[S]) -> Self
    where
        S: AsRef<str>,
    {
        match self.try_with(flat) {
            Ok(labels) => labels,
            Err(e) => panic!("{e}"),
        }
    }

    /// Returns the number of pairs.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns `true` if there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Iterates over the pairs in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.labels.iter()
    }

    fn sorted(&self) -> Vec<Label> {
        let mut labels = self.labels.clone();
        labels.sort_by(|a, b| a.key().cmp(b.key()));
        labels
    }

    /// Builds the series key for these labels under the given metric name.
    ///
    /// Labels are stably sorted by key, so the same set of pairs always maps to the same series no matter which order
    /// they were added in, while repeated keys keep their relative order.
    pub(crate) fn to_key(&self, name: &str) -> Key {
        Key::from_parts(name.to_owned(), self.sorted())
    }
}

impl PartialEq for LabelValues {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len() && self.sorted() == other.sorted()
    }
}

impl Eq for LabelValues {}

impl<'a> IntoIterator for &'a LabelValues {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
