use std::sync::Arc;

use metrics::Key;

use crate::{errors::ConfigError, labels::LabelValues, space::LabelValueSpace};

/// Name, labels, and storage shared by every handle type.
#[derive(Clone)]
struct Binding {
    name: Arc<str>,
    labels: LabelValues,
    key: Key,
    space: Arc<LabelValueSpace>,
}

impl Binding {
    fn new(name: &str, space: Arc<LabelValueSpace>) -> Self {
        let labels = LabelValues::new();
        let key = labels.to_key(name);
        Self { name: Arc::from(name), labels, key, space }
    }

    fn try_with<S>(&self, label_values: &[S]) -> Result<Self, ConfigError>
    where
        S: AsRef<str>,
    {
        let labels = self.labels.try_with(label_values)?;
        let key = labels.to_key(&self.name);
        Ok(Self { name: Arc::clone(&self.name), labels, key, space: Arc::clone(&self.space) })
    }

    fn with<S>(&self, label_values: &[S]) -> Self
    where
        S: AsRef<str>,
    {
        match self.try_with(label_values) {
            Ok(binding) => binding,
            Err(e) => panic!("{e}"),
        }
    }
}

macro_rules! impl_common {
    ($handle:ident) => {
        impl $handle {
            pub(crate) fn new(name: &str, space: Arc<LabelValueSpace>) -> Self {
                Self { binding: Binding::new(name, space) }
            }

            /// Gets the metric name.
            pub fn name(&self) -> &str {
                &self.binding.name
            }

            /// Gets the labels bound to this handle, in the order they were added.
            pub fn labels(&self) -> &LabelValues {
                &self.binding.labels
            }

            /// Returns a new handle with the given flat list of alternating label keys and values appended.
            ///
            /// The receiver is left untouched, and both handles record into the same storage.
            ///
            /// # Panics
            ///
            /// Panics if `label_values` has an odd number of elements.
            #[must_use]
            pub fn with<S>(&self, label_values: &[S]) -> Self
            where
                S: AsRef<str>,
            {
                Self { binding: self.binding.with(label_values) }
            }

            /// Returns a new handle with the given flat list of alternating label keys and values appended.
            ///
            /// # Errors
            ///
            /// If `label_values` has an odd number of elements, an error is returned.
            pub fn try_with<S>(&self, label_values: &[S]) -> Result<Self, ConfigError>
            where
                S: AsRef<str>,
            {
                self.binding.try_with(label_values).map(|binding| Self { binding })
            }
        }
    };
}

/// A counter handle.
///
/// Every delta added within an export tick is summed into the `count` field of the exported record.
#[derive(Clone)]
pub struct Counter {
    binding: Binding,
}

impl_common!(Counter);

impl Counter {
    /// Adds `delta` to the counter.
    pub fn add(&self, delta: f64) {
        self.binding.space.observe(&self.binding.key, delta);
    }
}

/// A gauge handle.
///
/// The `value` field of the exported record is computed by replaying the tick's updates in order: [`set`](Gauge::set)
/// replaces the running value and [`add`](Gauge::add) adjusts it, starting from zero at the beginning of the tick.
#[derive(Clone)]
pub struct Gauge {
    binding: Binding,
}

impl_common!(Gauge);

impl Gauge {
    /// Sets the gauge to `value`.
    pub fn set(&self, value: f64) {
        self.binding.space.observe(&self.binding.key, value);
    }

    /// Adds `delta` to the gauge.
    pub fn add(&self, delta: f64) {
        self.binding.space.add(&self.binding.key, delta);
    }
}

/// A histogram handle.
///
/// Raw values are stored as-is and only bucketed when they are exported.
#[derive(Clone)]
pub struct Histogram {
    binding: Binding,
}

impl_common!(Histogram);

impl Histogram {
    /// Records `value` in the histogram.
    pub fn observe(&self, value: f64) {
        self.binding.space.observe(&self.binding.key, value);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use metrics::Key;

    use super::{Counter, Gauge, Histogram};
    use crate::space::{LabelValueSpace, Sample};

    #[test]
    fn derived_handles_do_not_cross_contaminate() {
        let space = Arc::new(LabelValueSpace::new());
        let base = Counter::new("requests", Arc::clone(&space));

        let get = base.with(&["method", "GET"]);
        let post = base.with(&["method", "POST"]);

        get.add(1.0);
        post.add(2.0);
        post.add(3.0);

        assert!(base.labels().is_empty());

        let snapshot = space.drain();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.get(&Key::from_parts("requests", &[("method", "GET")])),
            Some(&[Sample::Observed(1.0)][..])
        );
        assert_eq!(
            snapshot.get(&Key::from_parts("requests", &[("method", "POST")])),
            Some(&[Sample::Observed(2.0), Sample::Observed(3.0)][..])
        );
    }

    #[test]
    fn with_chains_accumulate_labels() {
        let space = Arc::new(LabelValueSpace::new());
        let histogram = Histogram::new("latency", Arc::clone(&space))
            .with(&["route", "/"])
            .with(&["method", "GET"]);

        histogram.observe(0.25);

        let key = Key::from_parts("latency", &[("method", "GET"), ("route", "/")]);
        assert_eq!(space.drain().get(&key), Some(&[Sample::Observed(0.25)][..]));
        assert_eq!(histogram.name(), "latency");
        assert_eq!(histogram.labels().len(), 2);
    }

    #[test]
    fn gauge_set_and_add_are_tagged() {
        let space = Arc::new(LabelValueSpace::new());
        let gauge = Gauge::new("queue_depth", Arc::clone(&space));

        gauge.set(4.0);
        gauge.add(-1.0);

        assert_eq!(
            space.drain().get(&Key::from_name("queue_depth")),
            Some(&[Sample::Observed(4.0), Sample::Delta(-1.0)][..])
        );
    }

    #[test]
    fn try_with_rejects_odd_lists() {
        let space = Arc::new(LabelValueSpace::new());
        let counter = Counter::new("requests", space);

        assert!(counter.try_with(&["method"]).is_err());
        assert!(counter.try_with(&["method", "GET"]).is_ok());
    }
}
