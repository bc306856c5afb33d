use metrics::{counter, gauge, Counter, Gauge};

use crate::kind::MetricKind;

const REGISTERED_SERIES: &str = "collector.exporter.registered_series";

/// Exporter telemetry.
///
/// `Telemetry` collects information about the exporter's behavior and can be optionally enabled to emit this
/// information as normal metrics through whichever recorder the host application has installed.
pub struct Telemetry {
    ticks_succeeded: Counter,
    ticks_failed: Counter,
    records_pushed: Counter,
    records_dropped: Counter,
    counter_samples: Counter,
    gauge_samples: Counter,
    histogram_samples: Counter,
    counter_series: Counter,
    gauge_series: Counter,
    histogram_series: Counter,
    counter_registered: Gauge,
    gauge_registered: Gauge,
    histogram_registered: Gauge,
}

impl Telemetry {
    /// Creates a `Telemetry` instance.
    pub fn new() -> Self {
        let success_labels = telemetry_tags!("result" => "success");
        let failed_labels = telemetry_tags!("result" => "failed");
        let base_labels = telemetry_tags!();
        let counter_labels = telemetry_tags!("kind" => MetricKind::Counter.as_str());
        let gauge_labels = telemetry_tags!("kind" => MetricKind::Gauge.as_str());
        let histogram_labels = telemetry_tags!("kind" => MetricKind::Histogram.as_str());

        Self {
            ticks_succeeded: counter!("collector.exporter.ticks", success_labels.iter()),
            ticks_failed: counter!("collector.exporter.ticks", failed_labels.iter()),
            records_pushed: counter!("collector.exporter.records_pushed", base_labels.iter()),
            records_dropped: counter!("collector.exporter.records_dropped", base_labels.iter()),
            counter_samples: counter!("collector.exporter.samples", counter_labels.iter()),
            gauge_samples: counter!("collector.exporter.samples", gauge_labels.iter()),
            histogram_samples: counter!("collector.exporter.samples", histogram_labels.iter()),
            counter_series: counter!("collector.exporter.series", counter_labels.iter()),
            gauge_series: counter!("collector.exporter.series", gauge_labels.iter()),
            histogram_series: counter!("collector.exporter.series", histogram_labels.iter()),
            counter_registered: gauge!(REGISTERED_SERIES, counter_labels.iter()),
            gauge_registered: gauge!(REGISTERED_SERIES, gauge_labels.iter()),
            histogram_registered: gauge!(REGISTERED_SERIES, histogram_labels.iter()),
        }
    }

    /// Applies the given telemetry update, updating the internal metrics.
    #[allow(clippy::cast_precision_loss)]
    pub fn apply_update(&mut self, update: &TelemetryUpdate) {
        self.ticks_succeeded.increment(update.ticks_succeeded);
        self.ticks_failed.increment(update.ticks_failed);
        self.records_pushed.increment(update.records_pushed);
        self.records_dropped.increment(update.records_dropped);
        self.counter_samples.increment(update.counter_samples);
        self.gauge_samples.increment(update.gauge_samples);
        self.histogram_samples.increment(update.histogram_samples);
        self.counter_series.increment(update.counter_series);
        self.gauge_series.increment(update.gauge_series);
        self.histogram_series.increment(update.histogram_series);
        self.counter_registered.set(update.counter_registered as f64);
        self.gauge_registered.set(update.gauge_registered as f64);
        self.histogram_registered.set(update.histogram_registered as f64);
    }
}

/// A buffer for collecting telemetry updates over a single export tick.
#[derive(Debug, Default)]
pub struct TelemetryUpdate {
    ticks_succeeded: u64,
    ticks_failed: u64,
    records_pushed: u64,
    records_dropped: u64,
    counter_samples: u64,
    gauge_samples: u64,
    histogram_samples: u64,
    counter_series: u64,
    gauge_series: u64,
    histogram_series: u64,
    counter_registered: u64,
    gauge_registered: u64,
    histogram_registered: u64,
}

impl TelemetryUpdate {
    /// Clears the update buffer, resetting it back to an empty state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Tracks the series and samples drained from the space of the given kind.
    pub fn track_drain(&mut self, kind: MetricKind, series: usize, samples: usize) {
        let (series_total, samples_total) = match kind {
            MetricKind::Counter => (&mut self.counter_series, &mut self.counter_samples),
            MetricKind::Gauge => (&mut self.gauge_series, &mut self.gauge_samples),
            MetricKind::Histogram => (&mut self.histogram_series, &mut self.histogram_samples),
        };
        *series_total += series as u64;
        *samples_total += samples as u64;
    }

    /// Tracks how many series are registered in the space of the given kind.
    pub fn track_registered(&mut self, kind: MetricKind, series: usize) {
        let registered = match kind {
            MetricKind::Counter => &mut self.counter_registered,
            MetricKind::Gauge => &mut self.gauge_registered,
            MetricKind::Histogram => &mut self.histogram_registered,
        };
        *registered = series as u64;
    }

    /// Tracks a tick whose batch, if any, was pushed successfully.
    pub fn track_push_succeeded(&mut self, records: usize) {
        self.ticks_succeeded += 1;
        self.records_pushed += records as u64;
    }

    /// Tracks a tick whose batch was dropped.
    pub fn track_push_failed(&mut self, records: usize) {
        self.ticks_failed += 1;
        self.records_dropped += records as u64;
    }

    /// Returns the number of samples drained for the given kind.
    pub fn samples(&self, kind: MetricKind) -> u64 {
        match kind {
            MetricKind::Counter => self.counter_samples,
            MetricKind::Gauge => self.gauge_samples,
            MetricKind::Histogram => self.histogram_samples,
        }
    }

    /// Returns `true` if the tick that produced this update failed.
    pub fn failed(&self) -> bool {
        self.ticks_failed > 0
    }
}

macro_rules! _telemetry_tags {
    ($($k:literal => $v:expr),*) => {
        [
            ::metrics::Label::from_static_parts("client", "rust"),
            ::metrics::Label::from_static_parts("client_version", env!("CARGO_PKG_VERSION")),
            $(::metrics::Label::from_static_parts($k, $v),)*
        ]
    };
}

pub(crate) use _telemetry_tags as telemetry_tags;

#[cfg(test)]
mod tests {
    use metrics::{Key, Label};
    use metrics_util::{
        debugging::{DebugValue, DebuggingRecorder},
        CompositeKey, MetricKind as UtilMetricKind,
    };

    use super::{Telemetry, TelemetryUpdate};
    use crate::kind::MetricKind;

    fn labels(extra: &[(&'static str, &'static str)]) -> Vec<Label> {
        let mut labels = vec![
            Label::from_static_parts("client", "rust"),
            Label::from_static_parts("client_version", env!("CARGO_PKG_VERSION")),
        ];
        labels.extend(extra.iter().map(|&(k, v)| Label::from_static_parts(k, v)));
        labels
    }

    type SnapshotEntry =
        (CompositeKey, Option<metrics::Unit>, Option<metrics::SharedString>, DebugValue);

    fn find<'a>(
        snapshot: &'a [SnapshotEntry],
        kind: UtilMetricKind,
        name: &'static str,
        extra: &[(&'static str, &'static str)],
    ) -> Option<&'a DebugValue> {
        let expected = CompositeKey::new(kind, Key::from_parts(name, labels(extra)));
        snapshot.iter().find(|(key, _, _, _)| *key == expected).map(|(_, _, _, value)| value)
    }

    fn counter_value(
        snapshot: &[SnapshotEntry],
        name: &'static str,
        extra: &[(&'static str, &'static str)],
    ) -> Option<u64> {
        match find(snapshot, UtilMetricKind::Counter, name, extra) {
            Some(DebugValue::Counter(value)) => Some(*value),
            _ => None,
        }
    }

    fn gauge_value(
        snapshot: &[SnapshotEntry],
        name: &'static str,
        extra: &[(&'static str, &'static str)],
    ) -> Option<f64> {
        match find(snapshot, UtilMetricKind::Gauge, name, extra) {
            Some(DebugValue::Gauge(value)) => Some(value.0),
            _ => None,
        }
    }

    #[test]
    fn update_is_applied_through_installed_recorder() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            let mut telemetry = Telemetry::new();

            let mut update = TelemetryUpdate::default();
            update.track_drain(MetricKind::Counter, 2, 7);
            update.track_drain(MetricKind::Histogram, 1, 3);
            update.track_push_succeeded(3);
            telemetry.apply_update(&update);

            update.clear();
            update.track_push_failed(4);
            update.track_registered(MetricKind::Counter, 5);
            telemetry.apply_update(&update);
        });

        let snapshot = snapshotter.snapshot().into_vec();

        assert_eq!(
            counter_value(&snapshot, "collector.exporter.ticks", &[("result", "success")]),
            Some(1)
        );
        assert_eq!(
            counter_value(&snapshot, "collector.exporter.ticks", &[("result", "failed")]),
            Some(1)
        );
        assert_eq!(counter_value(&snapshot, "collector.exporter.records_pushed", &[]), Some(3));
        assert_eq!(counter_value(&snapshot, "collector.exporter.records_dropped", &[]), Some(4));
        assert_eq!(
            counter_value(&snapshot, "collector.exporter.samples", &[("kind", "counter")]),
            Some(7)
        );
        assert_eq!(
            counter_value(&snapshot, "collector.exporter.series", &[("kind", "counter")]),
            Some(2)
        );
        assert_eq!(
            counter_value(&snapshot, "collector.exporter.samples", &[("kind", "histogram")]),
            Some(3)
        );
        assert_eq!(
            counter_value(&snapshot, "collector.exporter.samples", &[("kind", "gauge")]),
            Some(0)
        );
        assert_eq!(
            gauge_value(&snapshot, "collector.exporter.registered_series", &[("kind", "counter")]),
            Some(5.0)
        );
        assert_eq!(
            gauge_value(&snapshot, "collector.exporter.registered_series", &[("kind", "gauge")]),
            Some(0.0)
        );
    }

    #[test]
    fn clear_resets_everything() {
        let mut update = TelemetryUpdate::default();
        update.track_drain(MetricKind::Gauge, 1, 5);
        update.track_push_failed(1);
        assert!(update.failed());
        assert_eq!(update.samples(MetricKind::Gauge), 5);

        update.clear();
        assert!(!update.failed());
        assert_eq!(update.samples(MetricKind::Gauge), 0);
    }
}
