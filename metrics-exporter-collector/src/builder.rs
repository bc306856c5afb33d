use std::{net::SocketAddr, thread, time::Duration};

use tracing::info;

use crate::{
    errors::{BootstrapError, BuildError, ConfigError},
    forwarder::{
        bootstrap::bootstrap,
        sync::{ExportCycle, ExporterHandle},
        tcp::TcpTransport,
        ForwarderConfiguration, RemoteAddr, Transport,
    },
    handles::{Counter, Gauge, Histogram},
    kind::MetricKind,
    record::GlobalTags,
    state::{State, StateConfiguration},
};

const DEFAULT_DIAL_ATTEMPTS: u32 = 3;
const DEFAULT_DIAL_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(5);

const SERVICE_TAG: &str = "service";
const HOST_TAG: &str = "host";

/// Builder for a collector exporter.
pub struct CollectorBuilder {
    remote_addr: RemoteAddr,
    dial_attempts: u32,
    dial_backoff: Duration,
    dial_timeout: Duration,
    request_timeout: Duration,
    export_interval: Duration,
    service: Option<String>,
    host: Option<String>,
    global_tags: GlobalTags,
    telemetry: bool,
}

impl CollectorBuilder {
    /// Set the address of the collector.
    ///
    /// The address needs to be in the format of `<host>:<port>`, optionally prefixed with `tcp://`. Host names are
    /// resolved when this method is called.
    ///
    /// Defaults to `127.0.0.1:8086`.
    ///
    /// # Errors
    ///
    /// If the given address is not able to be parsed or resolved, an error will be returned indicating the reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        self.remote_addr = RemoteAddr::try_from(addr.as_ref())
            .map_err(|reason| BuildError::InvalidRemoteAddress { reason })?;
        Ok(self)
    }

    /// Set the number of attempts made to connect to the collector, and to register each metric's retention.
    ///
    /// Must be at least 1.
    ///
    /// Defaults to 3.
    #[must_use]
    pub fn with_dial_attempts(mut self, attempts: u32) -> Self {
        self.dial_attempts = attempts;
        self
    }

    /// Set how long to wait between two failed attempts.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_dial_backoff(mut self, backoff: Duration) -> Self {
        self.dial_backoff = backoff;
        self
    }

    /// Set the timeout of a single connection attempt.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set the timeout of a single request to the collector.
    ///
    /// When the timeout is reached, the request is aborted. For a batch of records, the batch is dropped without
    /// retrying.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the interval between two exports.
    ///
    /// Every export sends whatever was recorded since the previous one, so this is also the resolution of the exported
    /// time series. It is declared to the collector as part of each metric's retention policy.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_export_interval(mut self, interval: Duration) -> Self {
        self.export_interval = interval;
        self
    }

    /// Set the name of the service being instrumented.
    ///
    /// Attached to every record as the `service` tag. Mandatory.
    #[must_use]
    pub fn with_service<S>(mut self, service: S) -> Self
    where
        S: Into<String>,
    {
        self.service = Some(service.into());
        self
    }

    /// Set the name of the host the service runs on.
    ///
    /// Attached to every record as the `host` tag. Mandatory.
    #[must_use]
    pub fn with_host<S>(mut self, host: S) -> Self
    where
        S: Into<String>,
    {
        self.host = Some(host.into());
        self
    }

    /// Add a tag to attach to every record.
    ///
    /// Labels of a series take precedence over global tags with the same key. The `service` and `host` tags are always
    /// taken from [`with_service`](CollectorBuilder::with_service) and [`with_host`](CollectorBuilder::with_host).
    #[must_use]
    pub fn with_global_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.global_tags.insert(key, value);
        self
    }

    /// Sets whether or not to enable telemetry for the exporter.
    ///
    /// When enabled, the exporter emits metrics about its own operation through the [`metrics`] facade, such as the
    /// number of export ticks, how many records were pushed or dropped, and how many samples and series were drained.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Builds the exporter.
    ///
    /// Metrics must then be registered on the exporter before it is started.
    ///
    /// # Errors
    ///
    /// If the service or host is missing or empty, or if the dial attempts or export interval are zero, an error will
    /// be returned.
    pub fn build(self) -> Result<CollectorExporter, BuildError> {
        if self.dial_attempts == 0 {
            return Err(BuildError::ZeroDialAttempts);
        }
        if self.export_interval.is_zero() {
            return Err(BuildError::ZeroExportInterval);
        }

        let service = non_empty(self.service, SERVICE_TAG)?;
        let host = non_empty(self.host, HOST_TAG)?;

        let mut global_tags = self.global_tags;
        global_tags.insert(SERVICE_TAG, service);
        global_tags.insert(HOST_TAG, host);

        let state = State::new(StateConfiguration { global_tags, telemetry: self.telemetry });

        let config = ForwarderConfiguration {
            remote_addr: self.remote_addr,
            dial_attempts: self.dial_attempts,
            dial_backoff: self.dial_backoff,
            dial_timeout: self.dial_timeout,
            request_timeout: self.request_timeout,
            export_interval: self.export_interval,
        };

        Ok(CollectorExporter { config, state })
    }
}

fn non_empty(value: Option<String>, tag: &'static str) -> Result<String, BuildError> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(BuildError::MissingGlobalTag { tag }),
    }
}

impl Default for CollectorBuilder {
    fn default() -> Self {
        CollectorBuilder {
            remote_addr: RemoteAddr::Tcp(vec![SocketAddr::from(([127, 0, 0, 1], 8086))]),
            dial_attempts: DEFAULT_DIAL_ATTEMPTS,
            dial_backoff: DEFAULT_DIAL_BACKOFF,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            export_interval: DEFAULT_EXPORT_INTERVAL,
            service: None,
            host: None,
            global_tags: GlobalTags::new(),
            telemetry: true,
        }
    }
}

/// A configured exporter, accepting metric registrations until it is started.
///
/// Every metric is registered with the number of samples the collector should retain for it. Handles can be cloned
/// and derived with extra labels freely, and keep recording after the exporter is started.
pub struct CollectorExporter {
    config: ForwarderConfiguration,
    state: State,
}

impl CollectorExporter {
    /// Registers a counter.
    ///
    /// # Errors
    ///
    /// If the name is empty, or already registered as a counter with a different sample count, an error is returned.
    pub fn counter(&mut self, name: &str, samples_to_store: usize) -> Result<Counter, ConfigError> {
        let space = self.state.register(MetricKind::Counter, name, samples_to_store, None)?;
        Ok(Counter::new(name, space))
    }

    /// Registers a gauge.
    ///
    /// # Errors
    ///
    /// If the name is empty, or already registered as a gauge with a different sample count, an error is returned.
    pub fn gauge(&mut self, name: &str, samples_to_store: usize) -> Result<Gauge, ConfigError> {
        let space = self.state.register(MetricKind::Gauge, name, samples_to_store, None)?;
        Ok(Gauge::new(name, space))
    }

    /// Registers a histogram with the given bucket upper bounds.
    ///
    /// An overflow bucket with an upper bound of `+inf` is added unless `bounds` already ends with
    /// `+inf` or `f64::MAX`, in which case that last bound serves as the overflow bucket.
    ///
    /// # Errors
    ///
    /// If the name is empty, if the bounds are empty, contain NaN or are not strictly increasing, or if the name is
    /// already registered as a histogram with a different sample count or different bounds, an error is returned.
    pub fn histogram(
        &mut self,
        name: &str,
        samples_to_store: usize,
        bounds: &[f64],
    ) -> Result<Histogram, ConfigError> {
        let space =
            self.state.register(MetricKind::Histogram, name, samples_to_store, Some(bounds))?;
        Ok(Histogram::new(name, space))
    }

    /// Connects to the collector through `transport` and registers the retention of every metric.
    ///
    /// The returned export cycle can be driven manually with [`ExportCycle::export`], or run in the background with
    /// [`ExportCycle::spawn`].
    ///
    /// # Errors
    ///
    /// If the collector cannot be reached, or does not accept the retention of any one metric, within the configured
    /// number of attempts, an error is returned.
    pub fn bootstrap<T>(self, transport: T) -> Result<ExportCycle<T>, BootstrapError>
    where
        T: Transport,
    {
        self.bootstrap_with_sleep(transport, thread::sleep)
    }

    pub(crate) fn bootstrap_with_sleep<T, S>(
        self,
        mut transport: T,
        sleep: S,
    ) -> Result<ExportCycle<T>, BootstrapError>
    where
        T: Transport,
        S: FnMut(Duration),
    {
        bootstrap(&mut transport, &self.config, &self.state, sleep)?;
        Ok(ExportCycle::new(transport, self.state, self.config.export_interval))
    }

    /// Starts exporting in the background through the given transport.
    ///
    /// # Errors
    ///
    /// If bootstrapping fails, or the background thread cannot be spawned, an error is returned.
    pub fn start_with_transport<T>(self, transport: T) -> Result<ExporterHandle, BootstrapError>
    where
        T: Transport + Send + 'static,
    {
        self.bootstrap(transport)?.spawn()
    }

    /// Starts exporting in the background to the configured collector address, over TCP.
    ///
    /// # Errors
    ///
    /// If bootstrapping fails, or the background thread cannot be spawned, an error is returned.
    pub fn start(self) -> Result<ExporterHandle, BootstrapError> {
        info!(
            transport = self.config.remote_addr.transport_id(),
            addrs = ?self.config.remote_addr.socket_addrs(),
            "Starting collector exporter."
        );

        let addrs = self.config.remote_addr.socket_addrs().to_vec();
        let transport = TcpTransport::new(addrs, self.config.request_timeout);
        self.start_with_transport(transport)
    }
}
