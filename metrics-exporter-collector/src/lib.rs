//! A client-side aggregating exporter that periodically pushes metrics to a remote time-series collector.
//!
//! # Usage
//!
//! Metrics are registered on the exporter before it is started, each one with the number of samples the collector
//! should retain for it:
//!
//! ```no_run
//! # use metrics_exporter_collector::CollectorBuilder;
//! // First, create a builder.
//!
//! // The builder can configure many aspects of the exporter, such as the collector address, how connection failures
//! // are retried, and how often metrics are exported. The service and host names are mandatory, as they are attached
//! // to every exported record.
//! let mut exporter = CollectorBuilder::default()
//!     .with_remote_address("127.0.0.1:8086")
//!     .expect("invalid collector address")
//!     .with_service("checkout")
//!     .with_host("node-1")
//!     .build()
//!     .expect("failed to build exporter");
//!
//! // Then, register metrics. Registration hands back a handle that can be cloned, derived with extra labels, and used
//! // from any thread.
//! let requests = exporter.counter("requests", 60).expect("invalid counter");
//! let queue_depth = exporter.gauge("queue_depth", 60).expect("invalid gauge");
//! let latency = exporter.histogram("latency", 60, &[0.005, 0.05, 0.5]).expect("invalid histogram");
//!
//! // Starting the exporter connects to the collector, declares the retention of every registered metric, and spawns a
//! // background thread that exports on a fixed interval.
//! let handle = exporter.start().expect("failed to start exporter");
//!
//! requests.with(&["method", "GET"]).add(1.0);
//! queue_depth.set(12.0);
//! latency.with(&["route", "/cart"]).observe(0.012);
//!
//! handle.shutdown().expect("exporter stopped with an error");
//! ```
//!
//! # Features
//!
//! ## Client-side aggregation
//!
//! Handles only append raw samples to in-memory storage. On every export tick, the storage is drained and each series
//! is aggregated according to its kind: counters are summed into a `count` field, gauges report their value in a
//! `value` field, and histograms report one unsigned count per bucket. Every record of a tick carries the same
//! timestamp, and the whole tick is pushed as a single batch.
//!
//! Samples are never carried over: if a push fails, the batch is dropped and the next tick starts fresh.
//!
//! ## Histogram buckets
//!
//! Histogram bucket bounds are fixed at registration. Every bucket bound is an inclusive upper bound, and an overflow
//! bucket up to `+inf` is always present. Bucket fields are named after their range, such as `-inf-10`, `10-20` and
//! `20-inf` for bounds of `[10, 20]`.
//!
//! ## Transports
//!
//! The exporter ships with a TCP transport that speaks line protocol, but any [`Transport`] can be plugged in with
//! [`CollectorExporter::start_with_transport`] or [`CollectorExporter::bootstrap`].
//!
//! ## Telemetry
//!
//! The exporter captures its own internal telemetry around the number of export ticks, records pushed or dropped, and
//! samples and series drained, and emits it through the [`metrics`] facade. All internal telemetry is under the
//! `collector.exporter` namespace.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::new_without_default)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod aggregate;
pub use self::aggregate::{Aggregation, COUNT_FIELD, VALUE_FIELD};

mod builder;
pub use self::builder::{CollectorBuilder, CollectorExporter};

mod errors;
pub use self::errors::{
    BootstrapError, BucketsError, BuildError, ConfigError, ExportError, TransportError,
};

mod forwarder;
pub use self::forwarder::{
    sync::{ExportCycle, ExporterHandle},
    tcp::TcpTransport,
    RetentionRequest, Transport,
};

mod handles;
pub use self::handles::{Counter, Gauge, Histogram};

mod histogram;
pub use self::histogram::HistogramAggregator;

mod kind;
pub use self::kind::MetricKind;

mod labels;
pub use self::labels::LabelValues;

mod record;
pub use self::record::{ExportRecord, FieldValue, GlobalTags};

mod space;
pub use self::space::{LabelValueSpace, Sample, Snapshot};

mod state;
mod telemetry;

mod writer;
pub use self::writer::{LineProtocolWriter, WriteResult, RETENTION_MEASUREMENT};
