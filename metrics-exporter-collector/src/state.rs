use std::{
    collections::BTreeMap,
    ops::ControlFlow,
    sync::Arc,
    time::{Duration, SystemTime},
};

use tracing::{debug, trace};

use crate::{
    aggregate::Aggregation,
    errors::{ConfigError, ExportError},
    forwarder::RetentionRequest,
    histogram::HistogramAggregator,
    kind::MetricKind,
    record::{ExportRecord, GlobalTags},
    space::{LabelValueSpace, Snapshot},
    telemetry::TelemetryUpdate,
};

/// Exporter state configuration.
pub struct StateConfiguration {
    /// Tags attached to every exported record.
    pub global_tags: GlobalTags,

    /// Whether or not to collect/emit internal telemetry.
    pub telemetry: bool,
}

/// What was declared for a metric name when it was registered.
#[derive(Debug, PartialEq)]
struct Retention {
    samples_to_store: usize,
    buckets: Option<HistogramAggregator>,
}

/// The storage and registrations for a single metric kind.
#[derive(Default)]
struct MetricSet {
    space: Arc<LabelValueSpace>,
    retention: BTreeMap<String, Retention>,
}

/// Exporter state.
///
/// Owns one sample space per metric kind, and every registration made against them.
pub(crate) struct State {
    config: StateConfiguration,
    counters: MetricSet,
    gauges: MetricSet,
    histograms: MetricSet,
}

impl State {
    /// Creates a new `State` from the given configuration.
    pub fn new(config: StateConfiguration) -> Self {
        State {
            config,
            counters: MetricSet::default(),
            gauges: MetricSet::default(),
            histograms: MetricSet::default(),
        }
    }

    fn set(&self, kind: MetricKind) -> &MetricSet {
        match kind {
            MetricKind::Counter => &self.counters,
            MetricKind::Gauge => &self.gauges,
            MetricKind::Histogram => &self.histograms,
        }
    }

    fn set_mut(&mut self, kind: MetricKind) -> &mut MetricSet {
        match kind {
            MetricKind::Counter => &mut self.counters,
            MetricKind::Gauge => &mut self.gauges,
            MetricKind::Histogram => &mut self.histograms,
        }
    }

    /// Returns `true` if telemetry is enabled.
    pub fn telemetry_enabled(&self) -> bool {
        self.config.telemetry
    }

    /// Registers a metric, returning the space its handles should record into.
    ///
    /// Registering a name again for the same kind with the same parameters is allowed. Histogram bounds are compared
    /// after the overflow bucket is appended, so `[10]` and `[10, +inf]` are the same configuration.
    pub fn register(
        &mut self,
        kind: MetricKind,
        name: &str,
        samples_to_store: usize,
        bounds: Option<&[f64]>,
    ) -> Result<Arc<LabelValueSpace>, ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::EmptyMetricName);
        }

        let buckets = bounds
            .map(HistogramAggregator::new)
            .transpose()
            .map_err(|source| ConfigError::InvalidBuckets { name: name.to_string(), source })?;
        let retention = Retention { samples_to_store, buckets };

        let set = self.set_mut(kind);
        match set.retention.get(name) {
            Some(existing) if *existing != retention => {
                return Err(ConfigError::ConflictingRegistration { kind, name: name.to_string() });
            }
            Some(_) => {
                trace!(
                    %kind,
                    metric_name = name,
                    "Metric already registered with identical configuration."
                );
            }
            None => {
                debug!(%kind, metric_name = name, samples_to_store, "Registered metric.");
                set.retention.insert(name.to_string(), retention);
            }
        }

        Ok(Arc::clone(&set.space))
    }

    /// Returns the retention request of every registered metric, sorted by kind and then by name.
    pub fn retention_requests(&self, interval: Duration) -> Vec<RetentionRequest<'_>> {
        [MetricKind::Counter, MetricKind::Gauge, MetricKind::Histogram]
            .into_iter()
            .flat_map(|kind| {
                self.set(kind).retention.iter().map(move |(name, retention)| RetentionRequest {
                    name,
                    kind,
                    interval,
                    sample_count: retention.samples_to_store,
                    bucket_bounds: retention.buckets.as_ref().map(HistogramAggregator::bounds),
                })
            })
            .collect()
    }

    /// Drains every space and aggregates the samples into export records stamped with `now`.
    ///
    /// All three spaces are drained before anything is aggregated, so the records of one call cover the same window.
    ///
    /// # Errors
    ///
    /// If a histogram series has samples but no bucket bounds were registered for its name, an error is returned and
    /// the drained samples are discarded.
    pub fn flush(
        &self,
        now: SystemTime,
        telemetry: &mut TelemetryUpdate,
    ) -> Result<Vec<ExportRecord>, ExportError> {
        let counters = self.counters.space.drain();
        let gauges = self.gauges.space.drain();
        let histograms = self.histograms.space.drain();

        telemetry.track_drain(MetricKind::Counter, counters.len(), counters.sample_count());
        telemetry.track_drain(MetricKind::Gauge, gauges.len(), gauges.sample_count());
        telemetry.track_drain(MetricKind::Histogram, histograms.len(), histograms.sample_count());
        telemetry.track_registered(MetricKind::Counter, self.counters.space.series_count());
        telemetry.track_registered(MetricKind::Gauge, self.gauges.space.series_count());
        telemetry.track_registered(MetricKind::Histogram, self.histograms.space.series_count());

        let mut records = Vec::with_capacity(counters.len() + gauges.len() + histograms.len());
        self.append_records(&mut records, &counters, now, |_| Ok(Aggregation::Sum))?;
        self.append_records(&mut records, &gauges, now, |_| Ok(Aggregation::Gauge))?;
        let histogram_retention = &self.histograms.retention;
        self.append_records(&mut records, &histograms, now, |name| {
            histogram_retention
                .get(name)
                .and_then(|retention| retention.buckets.as_ref())
                .map(Aggregation::Buckets)
                .ok_or_else(|| ExportError::MissingHistogramBounds { name: name.to_string() })
        })?;

        Ok(records)
    }

    fn append_records<'a, F>(
        &self,
        records: &mut Vec<ExportRecord>,
        snapshot: &Snapshot,
        now: SystemTime,
        mut aggregation_for: F,
    ) -> Result<(), ExportError>
    where
        F: FnMut(&str) -> Result<Aggregation<'a>, ExportError>,
    {
        let mut result = Ok(());
        snapshot.walk(|key, samples| match aggregation_for(key.name()) {
            Ok(aggregation) => {
                records.push(ExportRecord {
                    name: key.name().to_string(),
                    tags: self.config.global_tags.merge(key),
                    fields: aggregation.apply(samples),
                    timestamp: now,
                });
                ControlFlow::Continue(())
            }
            Err(e) => {
                result = Err(e);
                ControlFlow::Break(())
            }
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use metrics::Key;

    use super::{State, StateConfiguration};
    use crate::{
        errors::{ConfigError, ExportError},
        kind::MetricKind,
        record::{FieldValue, GlobalTags},
        telemetry::TelemetryUpdate,
    };

    fn state() -> State {
        let mut global_tags = GlobalTags::new();
        global_tags.insert("service", "checkout");
        global_tags.insert("host", "node-1");
        State::new(StateConfiguration { global_tags, telemetry: false })
    }

    #[test]
    fn register_validates_name_and_buckets() {
        let mut state = state();

        assert!(matches!(
            state.register(MetricKind::Counter, "", 10, None),
            Err(ConfigError::EmptyMetricName)
        ));
        assert!(matches!(
            state.register(MetricKind::Histogram, "latency", 10, Some(&[2.0, 1.0])),
            Err(ConfigError::InvalidBuckets { .. })
        ));
    }

    #[test]
    fn reregistration_must_match() {
        let mut state = state();

        state.register(MetricKind::Histogram, "latency", 10, Some(&[1.0, 2.0])).unwrap();
        let bounds = [1.0, 2.0, f64::INFINITY];
        state.register(MetricKind::Histogram, "latency", 10, Some(&bounds)).unwrap();

        assert!(matches!(
            state.register(MetricKind::Histogram, "latency", 10, Some(&[1.0, 3.0])),
            Err(ConfigError::ConflictingRegistration { kind: MetricKind::Histogram, .. })
        ));
        assert!(matches!(
            state.register(MetricKind::Histogram, "latency", 20, Some(&[1.0, 2.0])),
            Err(ConfigError::ConflictingRegistration { .. })
        ));

        // Names are scoped per kind.
        state.register(MetricKind::Counter, "latency", 99, None).unwrap();
    }

    #[test]
    fn retention_requests_are_sorted_by_kind_then_name() {
        let mut state = state();
        state.register(MetricKind::Histogram, "latency", 5, Some(&[1.0])).unwrap();
        state.register(MetricKind::Gauge, "queue_depth", 3, None).unwrap();
        state.register(MetricKind::Counter, "requests", 2, None).unwrap();
        state.register(MetricKind::Counter, "errors", 1, None).unwrap();

        let interval = Duration::from_secs(5);
        let requests = state.retention_requests(interval);
        let order: Vec<_> = requests.iter().map(|r| (r.kind, r.name, r.sample_count)).collect();
        assert_eq!(
            order,
            vec![
                (MetricKind::Counter, "errors", 1),
                (MetricKind::Counter, "requests", 2),
                (MetricKind::Gauge, "queue_depth", 3),
                (MetricKind::Histogram, "latency", 5),
            ]
        );
        assert_eq!(requests[3].bucket_bounds, Some(&[1.0, f64::INFINITY][..]));
        assert_eq!(requests[0].bucket_bounds, None);
        assert!(requests.iter().all(|r| r.interval == interval));
    }

    #[test]
    fn flush_aggregates_each_kind() {
        let mut state = state();
        let counters = state.register(MetricKind::Counter, "requests", 10, None).unwrap();
        let gauges = state.register(MetricKind::Gauge, "queue_depth", 10, None).unwrap();
        let histograms =
            state.register(MetricKind::Histogram, "latency", 10, Some(&[10.0, 20.0])).unwrap();

        let requests = Key::from_parts("requests", &[("method", "GET")]);
        for v in [3.0, 4.0, 5.0] {
            counters.observe(&requests, v);
        }
        let depth = Key::from_name("queue_depth");
        for v in [1.0, 2.0, 7.5] {
            gauges.observe(&depth, v);
        }
        let latency = Key::from_name("latency");
        for v in [5.0, 15.0, 25.0] {
            histograms.observe(&latency, v);
        }

        let now = SystemTime::now();
        let mut telemetry = TelemetryUpdate::default();
        let records = state.flush(now, &mut telemetry).unwrap();

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.timestamp == now));
        assert!(records
            .iter()
            .all(|r| r.tags.get("service").map(String::as_str) == Some("checkout")));

        let counter = records.iter().find(|r| r.name == "requests").unwrap();
        assert_eq!(counter.field("count"), Some(FieldValue::Float(12.0)));
        assert_eq!(counter.tags.get("method").map(String::as_str), Some("GET"));

        let gauge = records.iter().find(|r| r.name == "queue_depth").unwrap();
        assert_eq!(gauge.field("value"), Some(FieldValue::Float(7.5)));

        let histogram = records.iter().find(|r| r.name == "latency").unwrap();
        assert_eq!(histogram.field("-inf-10"), Some(FieldValue::Unsigned(1)));
        assert_eq!(histogram.field("10-20"), Some(FieldValue::Unsigned(1)));
        assert_eq!(histogram.field("20-inf"), Some(FieldValue::Unsigned(1)));

        assert_eq!(telemetry.samples(MetricKind::Counter), 3);
        assert_eq!(telemetry.samples(MetricKind::Histogram), 3);

        // Nothing new was recorded, so the next flush is empty.
        assert!(state.flush(SystemTime::now(), &mut telemetry).unwrap().is_empty());
    }

    #[test]
    fn unregistered_histogram_is_fatal() {
        let mut state = state();
        let histograms =
            state.register(MetricKind::Histogram, "latency", 10, Some(&[1.0])).unwrap();
        histograms.observe(&Key::from_name("unknown"), 1.0);

        let result = state.flush(SystemTime::now(), &mut TelemetryUpdate::default());
        match result {
            Err(e @ ExportError::MissingHistogramBounds { .. }) => assert!(e.is_fatal()),
            other => panic!("unexpected flush result: {other:?}"),
        }
    }
}
