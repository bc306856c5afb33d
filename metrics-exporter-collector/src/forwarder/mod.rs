use std::{
    net::{SocketAddr, ToSocketAddrs as _},
    time::Duration,
};

use crate::{kind::MetricKind, record::ExportRecord};

pub(crate) mod bootstrap;
pub mod sync;
pub mod tcp;

/// A connection to a remote collector.
///
/// The transport is owned by the export thread once the exporter is started, so implementations do not need any
/// internal synchronization.
pub trait Transport {
    /// Error type returned by every transport operation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connects to the collector, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// If the collector cannot be reached in time, an error is returned. Connection is retried by the caller.
    fn connect(&mut self, timeout: Duration) -> Result<(), Self::Error>;

    /// Declares how many samples the collector should keep for a metric, and how often they arrive.
    ///
    /// # Errors
    ///
    /// If the collector does not accept the retention policy, an error is returned.
    fn register_retention(&mut self, request: &RetentionRequest<'_>) -> Result<(), Self::Error>;

    /// Pushes the records of a single export tick as one batch.
    ///
    /// # Errors
    ///
    /// If the batch cannot be delivered, an error is returned. The batch is not retried.
    fn push(&mut self, records: &[ExportRecord]) -> Result<(), Self::Error>;
}

impl<T> Transport for &mut T
where
    T: Transport + ?Sized,
{
    type Error = T::Error;

    fn connect(&mut self, timeout: Duration) -> Result<(), Self::Error> {
        (**self).connect(timeout)
    }

    fn register_retention(&mut self, request: &RetentionRequest<'_>) -> Result<(), Self::Error> {
        (**self).register_retention(request)
    }

    fn push(&mut self, records: &[ExportRecord]) -> Result<(), Self::Error> {
        (**self).push(records)
    }
}

/// Retention policy for a single metric, declared to the collector before any of its records are pushed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetentionRequest<'a> {
    /// Metric name.
    pub name: &'a str,

    /// Metric kind.
    pub kind: MetricKind,

    /// Interval between two records of the same series.
    pub interval: Duration,

    /// Number of samples the collector should keep for each series of the metric.
    pub sample_count: usize,

    /// Bucket upper bounds for histograms, including the trailing `+inf` bound.
    pub bucket_bounds: Option<&'a [f64]>,
}

#[derive(Clone, Debug)]
pub(crate) enum RemoteAddr {
    Tcp(Vec<SocketAddr>),
}

impl RemoteAddr {
    /// Returns the transport ID for the remote address.
    pub const fn transport_id(&self) -> &'static str {
        match self {
            RemoteAddr::Tcp(_) => "tcp",
        }
    }

    pub fn socket_addrs(&self) -> &[SocketAddr] {
        match self {
            RemoteAddr::Tcp(addrs) => addrs,
        }
    }
}

impl<'a> TryFrom<&'a str> for RemoteAddr {
    type Error = String;

    fn try_from(addr: &'a str) -> Result<Self, Self::Error> {
        let addr = match addr.split_once("://") {
            Some(("tcp", rest)) => rest,
            Some((scheme, _)) => return Err(format!("invalid scheme '{scheme}' (expected 'tcp')")),
            None => addr,
        };

        match addr.to_socket_addrs() {
            Ok(addrs) => {
                let addrs: Vec<_> = addrs.collect();
                if addrs.is_empty() {
                    Err(format!("'{addr}' did not resolve to any address"))
                } else {
                    Ok(RemoteAddr::Tcp(addrs))
                }
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Forwarder configuration.
#[derive(Clone, Debug)]
pub(crate) struct ForwarderConfiguration {
    pub remote_addr: RemoteAddr,
    pub dial_attempts: u32,
    pub dial_backoff: Duration,
    pub dial_timeout: Duration,
    pub request_timeout: Duration,
    pub export_interval: Duration,
}
