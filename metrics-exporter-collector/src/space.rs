use std::{hash::BuildHasherDefault, mem, ops::ControlFlow};

use hashbrown::{HashMap, HashSet};
use metrics::Key;
use metrics_util::Hashable;
use parking_lot::{Mutex, RwLock};

type SeriesHasher = BuildHasherDefault<<Key as Hashable>::Hasher>;
type SeriesHashMap<V> = HashMap<Key, V, SeriesHasher>;

/// A single raw sample, tagged with the entry point that recorded it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sample {
    /// A value recorded through `observe`: counter increments, gauge sets, and histogram
    /// observations.
    Observed(f64),

    /// A delta recorded through `add`, used by gauge additions.
    Delta(f64),
}

impl Sample {
    /// Returns the raw value of the sample.
    pub fn value(self) -> f64 {
        match self {
            Sample::Observed(v) | Sample::Delta(v) => v,
        }
    }
}

/// Concurrent storage for raw samples, keyed by series.
///
/// Each series is identified by a metric name and a set of labels. The space holds every sample
/// recorded since the last [`drain`](LabelValueSpace::drain), along with the set of every series
/// ever seen. Series are never unregistered: draining only hands over their samples.
///
/// # Concurrency
///
/// Pending samples live in a map behind a read/write lock, and every series in it has its own
/// mutex around its sample list. Recording a sample holds the map's read lock and the series' lock
/// for a single push, so writers on different series never contend with each other. The write
/// lock is only taken the first time a series is seen after a drain.
///
/// Draining takes the write lock just long enough to swap the pending map for an empty one, which
/// means that at the moment of the drain no writer is mid-push: a sample either lands entirely in
/// the drained snapshot or entirely in the next one. The drained map is turned into a snapshot
/// after the lock is released.
#[derive(Default)]
pub struct LabelValueSpace {
    pending: RwLock<SeriesHashMap<Mutex<Vec<Sample>>>>,
    registered: RwLock<HashSet<Key, SeriesHasher>>,
}

impl LabelValueSpace {
    /// Creates an empty `LabelValueSpace`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an observed value to the series identified by `key`, creating the series if it does
    /// not yet exist.
    pub fn observe(&self, key: &Key, value: f64) {
        self.append(key, Sample::Observed(value));
    }

    /// Appends a delta to the series identified by `key`, creating the series if it does not yet
    /// exist.
    pub fn add(&self, key: &Key, delta: f64) {
        self.append(key, Sample::Delta(delta));
    }

    fn append(&self, key: &Key, sample: Sample) {
        {
            let pending = self.pending.read();
            if let Some(samples) = pending.get(key) {
                samples.lock().push(sample);
                return;
            }
        }

        self.pending.write().entry(key.clone()).or_default().get_mut().push(sample);

        if !self.registered.read().contains(key) {
            self.registered.write().insert(key.clone());
        }
    }

    /// Takes every sample recorded since the last drain.
    ///
    /// Series without any samples are left out of the snapshot, but stay registered.
    pub fn drain(&self) -> Snapshot {
        let capacity = self.series_count();
        let fresh = SeriesHashMap::with_capacity_and_hasher(capacity, SeriesHasher::default());
        let drained = mem::replace(&mut *self.pending.write(), fresh);

        let series = drained
            .into_iter()
            .map(|(key, samples)| (key, samples.into_inner()))
            .collect();
        Snapshot { series }
    }

    /// Returns the number of series known to this space.
    pub fn series_count(&self) -> usize {
        self.registered.read().len()
    }
}

/// Samples taken out of a [`LabelValueSpace`] by a drain.
#[derive(Debug, Default)]
pub struct Snapshot {
    series: SeriesHashMap<Vec<Sample>>,
}

impl Snapshot {
    /// Returns the number of series in the snapshot.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Returns `true` if the snapshot holds no series.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Returns the total number of samples across all series.
    pub fn sample_count(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    /// Gets the samples for a series, in the order they were recorded.
    pub fn get(&self, key: &Key) -> Option<&[Sample]> {
        self.series.get(key).map(Vec::as_slice)
    }

    /// Visits every series in the snapshot, in no particular order.
    ///
    /// Iteration stops early if `f` returns [`ControlFlow::Break`].
    pub fn walk<F>(&self, mut f: F)
    where
        F: FnMut(&Key, &[Sample]) -> ControlFlow<()>,
    {
        for (key, samples) in &self.series {
            if f(key, samples).is_break() {
                return;
            }
        }
    }
}

impl IntoIterator for Snapshot {
    type Item = (Key, Vec<Sample>);
    type IntoIter = hashbrown::hash_map::IntoIter<Key, Vec<Sample>>;

    fn into_iter(self) -> Self::IntoIter {
        self.series.into_iter()
    }
}
