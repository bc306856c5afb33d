//! Bucketing of raw histogram samples.

use crate::errors::BucketsError;

/// Classifies raw samples into a fixed set of buckets.
///
/// Each bucket is defined by an inclusive upper bound, and bounds are strictly increasing. Unless the last explicit
/// bound is already `+inf` or `f64::MAX`, an overflow bucket with an upper bound of `+inf` is appended, so every
/// sample lands in some bucket. A last bound of `f64::MAX` is widened to `+inf` and becomes the overflow bucket.
///
/// Bucket counts are not kept here: [`aggregate`](HistogramAggregator::aggregate) computes them from scratch for the
/// samples it is given, which for the exporter are the raw samples of a single export tick.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramAggregator {
    bounds: Vec<f64>,
    field_names: Vec<String>,
}

impl HistogramAggregator {
    /// Creates a new `HistogramAggregator` from the given upper bounds.
    ///
    /// # Errors
    ///
    /// If `bounds` is empty, contains NaN, or is not strictly increasing, an error is returned.
    pub fn new(bounds: &[f64]) -> Result<Self, BucketsError> {
        if bounds.is_empty() {
            return Err(BucketsError::Empty);
        }

        for (index, bound) in bounds.iter().copied().enumerate() {
            if bound.is_nan() {
                return Err(BucketsError::NotANumber { index });
            }
            if index > 0 && bound <= bounds[index - 1] {
                return Err(BucketsError::NotIncreasing { index, bound });
            }
        }

        let mut bounds = bounds.to_vec();
        match bounds.last_mut() {
            // Nothing but `+inf` and NaN lies above `f64::MAX`, so it already is the overflow bound.
            Some(last) if *last >= f64::MAX => *last = f64::INFINITY,
            _ => bounds.push(f64::INFINITY),
        }

        let field_names = bounds
            .iter()
            .scan(f64::NEG_INFINITY, |lower, upper| {
                let name = format!("{lower}-{upper}");
                *lower = *upper;
                Some(name)
            })
            .collect();

        Ok(Self { bounds, field_names })
    }

    /// Gets the upper bound of every bucket, including the overflow bucket.
    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Gets the number of buckets, including the overflow bucket.
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    /// Always `false`: there is at least the overflow bucket.
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Gets the field name of every bucket, in bucket order.
    ///
    /// A bucket is named after its exclusive lower edge and its inclusive upper edge, as `<lower>-<upper>`, with the
    /// first bucket's lower edge being `-inf`: bounds of `[10, 20]` give `-inf-10`, `10-20`, and `20-inf`.
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    /// Returns the index of the bucket that `value` falls into.
    ///
    /// This is the first bucket whose upper bound is greater than or equal to `value`. NaN falls into the overflow
    /// bucket.
    pub fn classify(&self, value: f64) -> usize {
        if value.is_nan() {
            return self.bounds.len() - 1;
        }

        // The overflow bound is `+inf`, so the partition point is always in range.
        self.bounds.partition_point(|upper| *upper < value)
    }

    /// Counts how many of the given samples fall into each bucket.
    pub fn bucket_counts<I>(&self, samples: I) -> Vec<u64>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut counts = vec![0u64; self.bounds.len()];
        for sample in samples {
            counts[self.classify(sample)] += 1;
        }
        counts
    }

    /// Counts the given samples per bucket, returning `(field name, count)` for every bucket, empty ones included.
    pub fn aggregate<I>(&self, samples: I) -> Vec<(String, u64)>
    where
        I: IntoIterator<Item = f64>,
    {
        self.field_names.iter().cloned().zip(self.bucket_counts(samples)).collect()
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec as arb_vec, prelude::*};

    use super::HistogramAggregator;
    use crate::errors::BucketsError;

    #[test]
    fn rejects_invalid_bounds() {
        assert_eq!(HistogramAggregator::new(&[]), Err(BucketsError::Empty));
        assert_eq!(
            HistogramAggregator::new(&[1.0, f64::NAN]),
            Err(BucketsError::NotANumber { index: 1 })
        );
        assert_eq!(
            HistogramAggregator::new(&[1.0, 5.0, 5.0]),
            Err(BucketsError::NotIncreasing { index: 2, bound: 5.0 })
        );
        assert_eq!(
            HistogramAggregator::new(&[10.0, 2.0]),
            Err(BucketsError::NotIncreasing { index: 1, bound: 2.0 })
        );
    }

    #[test]
    fn appends_overflow_bucket() {
        let histogram = HistogramAggregator::new(&[10.0, 20.0]).unwrap();
        assert_eq!(histogram.bounds(), &[10.0, 20.0, f64::INFINITY]);

        let histogram = HistogramAggregator::new(&[10.0, f64::INFINITY]).unwrap();
        assert_eq!(histogram.bounds(), &[10.0, f64::INFINITY]);
    }

    #[test]
    fn max_bound_is_the_overflow_bucket() {
        let histogram = HistogramAggregator::new(&[10.0, f64::MAX]).unwrap();
        assert_eq!(histogram.bounds(), &[10.0, f64::INFINITY]);
        assert_eq!(histogram.field_names(), &["-inf-10", "10-inf"]);
        assert_eq!(histogram, HistogramAggregator::new(&[10.0]).unwrap());

        assert_eq!(histogram.classify(f64::MAX), 1);
        assert_eq!(histogram.classify(f64::INFINITY), 1);
        assert_eq!(histogram.classify(f64::NAN), 1);
    }

    #[test]
    fn classify_uses_inclusive_upper_bounds() {
        let histogram = HistogramAggregator::new(&[10.0, 20.0]).unwrap();

        assert_eq!(histogram.classify(f64::NEG_INFINITY), 0);
        assert_eq!(histogram.classify(-3.0), 0);
        assert_eq!(histogram.classify(10.0), 0);
        assert_eq!(histogram.classify(10.000_001), 1);
        assert_eq!(histogram.classify(20.0), 1);
        assert_eq!(histogram.classify(20.000_001), 2);
        assert_eq!(histogram.classify(f64::MAX), 2);
        assert_eq!(histogram.classify(f64::INFINITY), 2);
        assert_eq!(histogram.classify(f64::NAN), 2);
    }

    #[test]
    fn aggregate_names_fields_by_range() {
        let histogram = HistogramAggregator::new(&[10.0, 20.0]).unwrap();
        let fields = histogram.aggregate([5.0, 15.0, 25.0]);

        assert_eq!(
            fields,
            vec![("-inf-10".to_string(), 1), ("10-20".to_string(), 1), ("20-inf".to_string(), 1)]
        );
    }

    #[test]
    fn aggregate_is_per_call() {
        let histogram = HistogramAggregator::new(&[0.5, 1.5]).unwrap();

        let first = histogram.bucket_counts([0.1, 0.2, 1.0, 3.0]);
        assert_eq!(first, vec![2, 1, 1]);

        let second = histogram.bucket_counts([1.5]);
        assert_eq!(second, vec![0, 1, 0]);

        assert_eq!(histogram.field_names(), &["-inf-0.5", "0.5-1.5", "1.5-inf"]);
    }

    fn arb_bounds() -> impl Strategy<Value = Vec<f64>> {
        arb_vec(-1.0e6..1.0e6f64, 1..16).prop_map(|mut bounds| {
            bounds.sort_by(f64::total_cmp);
            bounds.dedup();
            bounds
        })
    }

    proptest! {
        #[test]
        fn classify_is_monotonic(
            bounds in arb_bounds(),
            a in -2.0e6..2.0e6f64,
            b in -2.0e6..2.0e6f64,
        ) {
            let histogram = HistogramAggregator::new(&bounds).unwrap();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

            prop_assert!(histogram.classify(lo) <= histogram.classify(hi));
            prop_assert_eq!(histogram.classify(lo), histogram.classify(lo));
        }

        #[test]
        fn classify_edges(bounds in arb_bounds()) {
            let histogram = HistogramAggregator::new(&bounds).unwrap();
            let first = bounds[0];
            let last = bounds[bounds.len() - 1];

            prop_assert_eq!(histogram.classify(first), 0);
            prop_assert_eq!(histogram.classify(first - 1.0), 0);
            prop_assert_eq!(histogram.classify(last + 1.0), histogram.len() - 1);
        }

        #[test]
        fn classified_bucket_contains_value(bounds in arb_bounds(), value in -2.0e6..2.0e6f64) {
            let histogram = HistogramAggregator::new(&bounds).unwrap();
            let index = histogram.classify(value);
            let upper = histogram.bounds()[index];

            prop_assert!(value <= upper);
            if index > 0 {
                prop_assert!(value > histogram.bounds()[index - 1]);
            }
        }
    }
}
