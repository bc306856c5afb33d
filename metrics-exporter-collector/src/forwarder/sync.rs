use std::{
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use tracing::{debug, error, info, trace};

use crate::{
    errors::{BootstrapError, ExportError},
    kind::MetricKind,
    state::State,
    telemetry::{Telemetry, TelemetryUpdate},
};

use super::Transport;

/// A bootstrapped exporter, ready to run its export loop.
///
/// Each call to [`export`](ExportCycle::export) runs a single export tick: every space is drained, the samples are
/// aggregated into records stamped with a single timestamp, and the records are pushed to the collector as one batch.
/// [`spawn`](ExportCycle::spawn) runs export ticks at the configured interval on a background thread.
pub struct ExportCycle<T> {
    transport: T,
    state: State,
    interval: Duration,
    telemetry: Option<Telemetry>,
    telemetry_update: TelemetryUpdate,
}

impl<T> ExportCycle<T>
where
    T: Transport,
{
    pub(crate) fn new(transport: T, state: State, interval: Duration) -> Self {
        ExportCycle {
            transport,
            state,
            interval,
            telemetry: None,
            telemetry_update: TelemetryUpdate::default(),
        }
    }

    /// Gets the interval between two export ticks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Gets a reference to the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Runs a single export tick, returning the number of records pushed.
    ///
    /// If nothing was recorded since the previous tick, nothing is pushed.
    ///
    /// # Errors
    ///
    /// If the batch could not be pushed, [`ExportError::Push`] is returned and the batch is dropped. If a histogram
    /// has samples but no registered bucket bounds, [`ExportError::MissingHistogramBounds`] is returned and nothing is
    /// pushed. Samples drained by a failed tick are never exported.
    pub fn export(&mut self) -> Result<usize, ExportError> {
        self.telemetry_update.clear();
        let result = self.export_at(SystemTime::now());
        trace!(
            failed = self.telemetry_update.failed(),
            counter_samples = self.telemetry_update.samples(MetricKind::Counter),
            gauge_samples = self.telemetry_update.samples(MetricKind::Gauge),
            histogram_samples = self.telemetry_update.samples(MetricKind::Histogram),
            "Export tick finished."
        );
        self.update_telemetry();
        result
    }

    fn export_at(&mut self, now: SystemTime) -> Result<usize, ExportError> {
        let records = match self.state.flush(now, &mut self.telemetry_update) {
            Ok(records) => records,
            Err(e) => {
                self.telemetry_update.track_push_failed(0);
                return Err(e);
            }
        };

        if records.is_empty() {
            debug!("No samples recorded since last export. Skipping push.");
            self.telemetry_update.track_push_succeeded(0);
            return Ok(0);
        }

        let len = records.len();
        match self.transport.push(&records) {
            Ok(()) => {
                self.telemetry_update.track_push_succeeded(len);
                Ok(len)
            }
            Err(e) => {
                self.telemetry_update.track_push_failed(len);
                Err(ExportError::Push { records: len, source: Box::new(e) })
            }
        }
    }

    fn update_telemetry(&mut self) {
        // Telemetry handles are registered lazily, on the first tick, so that they go through whichever recorder the
        // host application installed after building the exporter.
        if self.state.telemetry_enabled() {
            let telemetry = self.telemetry.get_or_insert_with(Telemetry::new);
            telemetry.apply_update(&self.telemetry_update);
        }
    }

    /// Runs export ticks at the configured interval until `shutdown` receives a message or is disconnected.
    ///
    /// Push failures are logged and the loop continues with the next tick.
    ///
    /// # Errors
    ///
    /// If a tick fails with a fatal error, the loop stops and the error is returned.
    fn run(mut self, shutdown: Receiver<()>) -> Result<(), ExportError> {
        info!(interval = ?self.interval, "Starting export loop.");

        let ticker = tick(self.interval);
        loop {
            select! {
                recv(ticker) -> _ => match self.export() {
                    Ok(records) => debug!(records, "Exported metrics."),
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "Stopping export loop after fatal error.");
                        return Err(e);
                    }
                    Err(e) => error!(error = %e, "Failed to export metrics."),
                },
                recv(shutdown) -> _ => {
                    info!("Stopping export loop.");
                    return Ok(());
                }
            }
        }
    }

    /// Runs the export loop on a background thread.
    ///
    /// # Errors
    ///
    /// If the background thread cannot be spawned, an error is returned.
    pub fn spawn(self) -> Result<ExporterHandle, BootstrapError>
    where
        T: Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let thread = thread::Builder::new()
            .name("metrics-exporter-collector".to_string())
            .spawn(move || self.run(shutdown_rx))
            .map_err(BootstrapError::Backend)?;

        Ok(ExporterHandle { shutdown: Some(shutdown_tx), thread: Some(thread) })
    }
}

/// Handle to a running export loop.
///
/// Dropping the handle stops the loop before its next tick, without waiting for it.
pub struct ExporterHandle {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<Result<(), ExportError>>>,
}

impl ExporterHandle {
    /// Returns `true` if the export loop is still running.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Stops the export loop and waits for it to exit.
    ///
    /// No final export is made: samples recorded since the last tick are discarded.
    ///
    /// # Errors
    ///
    /// If the loop had already stopped on a fatal error, that error is returned. If the loop panicked,
    /// [`ExportError::Backend`] is returned.
    pub fn shutdown(mut self) -> Result<(), ExportError> {
        if let Some(shutdown) = self.shutdown.take() {
            // The loop may have already exited, in which case there is nobody left to notify.
            let _ = shutdown.try_send(());
        }
        self.wait()
    }

    /// Waits for the export loop to stop on its own, which only happens on a fatal error.
    ///
    /// # Errors
    ///
    /// The error that stopped the loop is returned. If the loop panicked, [`ExportError::Backend`] is returned.
    pub fn join(mut self) -> Result<(), ExportError> {
        self.wait()
    }

    fn wait(&mut self) -> Result<(), ExportError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ExportError::Backend)?,
            None => Ok(()),
        }
    }
}
