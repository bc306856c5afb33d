use std::error::Error as StdError;

use thiserror::Error;

use crate::kind::MetricKind;

/// Type-erased error coming from a [`Transport`][crate::Transport] implementation.
pub type TransportError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors that could occur while building the exporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// A mandatory global tag was not set, or was set to an empty value.
    #[error("global tag '{tag}' must be set to a non-empty value")]
    MissingGlobalTag {
        /// The tag key.
        tag: &'static str,
    },

    /// The dial attempt count was zero.
    #[error("dial attempts must be at least 1")]
    ZeroDialAttempts,

    /// The export interval was zero.
    #[error("export interval must be non-zero")]
    ZeroExportInterval,
}

/// Reasons a set of histogram bucket bounds is rejected.
#[derive(Debug, Error, PartialEq)]
pub enum BucketsError {
    /// No bounds were given.
    #[error("at least one bucket bound is required")]
    Empty,

    /// A bound was NaN.
    #[error("bucket bound at index {index} is NaN")]
    NotANumber {
        /// Position of the offending bound.
        index: usize,
    },

    /// A bound was not strictly greater than the one before it.
    #[error("bucket bound at index {index} ({bound}) is not greater than the previous bound")]
    NotIncreasing {
        /// Position of the offending bound.
        index: usize,
        /// The offending bound.
        bound: f64,
    },
}

/// Configuration errors.
///
/// These are programming errors: the exporter should not go on producing telemetry that nobody can trust.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A flat label list had an odd number of elements.
    #[error("label values must come in key/value pairs, got {count} strings")]
    OddLabelValues {
        /// Number of strings given.
        count: usize,
    },

    /// A metric was registered with an empty name.
    #[error("metric names must not be empty")]
    EmptyMetricName,

    /// A histogram was registered with invalid bucket bounds.
    #[error("invalid buckets for histogram '{name}'")]
    InvalidBuckets {
        /// Histogram name.
        name: String,
        /// Why the bounds were rejected.
        #[source]
        source: BucketsError,
    },

    /// A metric name was registered twice for the same kind with different parameters.
    #[error("{kind} '{name}' is already registered with a different configuration")]
    ConflictingRegistration {
        /// Metric kind.
        kind: MetricKind,
        /// Metric name.
        name: String,
    },
}

/// Errors that prevent the export loop from starting.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Every dial attempt to the collector failed.
    #[error("failed to connect to collector after {attempts} attempt(s)")]
    Dial {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the last attempt.
        #[source]
        source: TransportError,
    },

    /// The collector did not accept the retention policy of a metric.
    #[error("failed to register retention for {kind} '{name}' after {attempts} attempt(s)")]
    Registration {
        /// Metric kind.
        kind: MetricKind,
        /// Metric name.
        name: String,
        /// Number of attempts made.
        attempts: u32,
        /// The error from the last attempt.
        #[source]
        source: TransportError,
    },

    /// Failed to spawn the background export thread.
    #[error("failed to spawn background thread for exporter")]
    Backend(#[source] std::io::Error),
}

/// Errors raised by an export tick.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The batch could not be pushed to the collector. The batch is dropped.
    #[error("failed to push {records} record(s) to collector")]
    Push {
        /// Number of records in the dropped batch.
        records: usize,
        /// Transport failure.
        #[source]
        source: TransportError,
    },

    /// Samples were observed for a histogram that has no bucket bounds registered.
    #[error("no bucket bounds registered for histogram '{name}'")]
    MissingHistogramBounds {
        /// Histogram name.
        name: String,
    },

    /// The export thread panicked.
    #[error("export thread panicked")]
    Backend,
}

impl ExportError {
    /// Returns `true` if the export loop must stop after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ExportError::Push { .. })
    }
}
