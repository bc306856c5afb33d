use crate::{histogram::HistogramAggregator, record::FieldValue, space::Sample};

/// Field name used for counter sums.
pub const COUNT_FIELD: &str = "count";

/// Field name used for gauge values.
pub const VALUE_FIELD: &str = "value";

/// Kind-specific reduction of one series' samples into record fields.
#[derive(Clone, Copy, Debug)]
pub enum Aggregation<'a> {
    /// Sums every sample into a `count` field.
    Sum,

    /// Replays samples in order into a `value` field: observed values replace the running value, deltas adjust it.
    ///
    /// The running value starts at zero, so a series that only saw deltas reports their sum, and a series that only
    /// saw sets reports the last one.
    Gauge,

    /// Counts samples per bucket, one unsigned field per bucket.
    Buckets(&'a HistogramAggregator),
}

impl Aggregation<'_> {
    /// Reduces `samples` into the fields of an export record.
    pub fn apply(&self, samples: &[Sample]) -> Vec<(String, FieldValue)> {
        match self {
            Aggregation::Sum => {
                let sum = samples.iter().map(|sample| sample.value()).sum();
                vec![(COUNT_FIELD.to_string(), FieldValue::Float(sum))]
            }
            Aggregation::Gauge => {
                let value = samples.iter().fold(0.0, |current, sample| match *sample {
                    Sample::Observed(value) => value,
                    Sample::Delta(delta) => current + delta,
                });
                vec![(VALUE_FIELD.to_string(), FieldValue::Float(value))]
            }
            Aggregation::Buckets(aggregator) => aggregator
                .aggregate(samples.iter().map(|sample| sample.value()))
                .into_iter()
                .map(|(name, count)| (name, FieldValue::Unsigned(count)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Aggregation;
    use crate::{histogram::HistogramAggregator, record::FieldValue, space::Sample};

    fn observed(values: &[f64]) -> Vec<Sample> {
        values.iter().copied().map(Sample::Observed).collect()
    }

    fn deltas(values: &[f64]) -> Vec<Sample> {
        values.iter().copied().map(Sample::Delta).collect()
    }

    #[test]
    fn sum_adds_everything() {
        let fields = Aggregation::Sum.apply(&observed(&[3.0, 4.0, 5.0]));
        assert_eq!(fields, vec![("count".to_string(), FieldValue::Float(12.0))]);
    }

    #[test]
    fn gauge_sets_keep_the_last_value() {
        let fields = Aggregation::Gauge.apply(&observed(&[1.0, 2.0, 7.5]));
        assert_eq!(fields, vec![("value".to_string(), FieldValue::Float(7.5))]);
    }

    #[test]
    fn gauge_adds_are_summed() {
        let fields = Aggregation::Gauge.apply(&deltas(&[1.0, 2.0, 7.5]));
        assert_eq!(fields, vec![("value".to_string(), FieldValue::Float(10.5))]);
    }

    #[test]
    fn gauge_replays_mixed_updates_in_order() {
        let samples =
            [Sample::Delta(3.0), Sample::Observed(10.0), Sample::Delta(-2.0), Sample::Delta(0.5)];
        let fields = Aggregation::Gauge.apply(&samples);
        assert_eq!(fields, vec![("value".to_string(), FieldValue::Float(8.5))]);
    }

    #[test]
    fn buckets_emit_every_bucket() {
        let histogram = HistogramAggregator::new(&[10.0, 20.0, 30.0]).unwrap();
        let fields = Aggregation::Buckets(&histogram).apply(&observed(&[5.0, 15.0, 25.0, 12.0]));

        assert_eq!(
            fields,
            vec![
                ("-inf-10".to_string(), FieldValue::Unsigned(1)),
                ("10-20".to_string(), FieldValue::Unsigned(2)),
                ("20-30".to_string(), FieldValue::Unsigned(1)),
                ("30-inf".to_string(), FieldValue::Unsigned(0)),
            ]
        );
    }
}
