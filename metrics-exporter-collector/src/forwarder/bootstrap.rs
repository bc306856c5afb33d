use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{errors::BootstrapError, state::State};

use super::{ForwarderConfiguration, Transport};

/// Bounded retries with a fixed backoff.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Retry {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Retry {
    /// Runs `op` until it succeeds or `attempts` calls have failed.
    ///
    /// `sleep` is called with the backoff between two failed attempts, never after the last one. On exhaustion, the
    /// number of attempts made and the last error are returned.
    pub fn run<T, E, F, S>(&self, mut op: F, mut sleep: S) -> Result<T, (u32, E)>
    where
        F: FnMut(u32) -> Result<T, E>,
        S: FnMut(Duration),
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.attempts => return Err((attempt, e)),
                Err(_) => {
                    sleep(self.backoff);
                    attempt += 1;
                }
            }
        }
    }
}

/// Connects the transport and registers the retention of every metric known to `state`.
///
/// Both steps share the same retry policy. Nothing is pushed until both have succeeded.
pub(crate) fn bootstrap<T, S>(
    transport: &mut T,
    config: &ForwarderConfiguration,
    state: &State,
    mut sleep: S,
) -> Result<(), BootstrapError>
where
    T: Transport,
    S: FnMut(Duration),
{
    let retry = Retry { attempts: config.dial_attempts, backoff: config.dial_backoff };

    retry
        .run(
            |attempt| {
                transport.connect(config.dial_timeout).map_err(|e| {
                    warn!(
                        attempt,
                        max_attempts = retry.attempts,
                        error = %e,
                        "Failed to connect to collector."
                    );
                    e
                })
            },
            &mut sleep,
        )
        .map_err(|(attempts, e)| BootstrapError::Dial { attempts, source: Box::new(e) })?;

    info!(addr = ?config.remote_addr, "Connected to collector.");

    for request in state.retention_requests(config.export_interval) {
        retry
            .run(
                |attempt| {
                    transport.register_retention(&request).map_err(|e| {
                        warn!(
                            attempt,
                            metric_name = request.name,
                            kind = %request.kind,
                            error = %e,
                            "Failed to register metric retention."
                        );
                        e
                    })
                },
                &mut sleep,
            )
            .map_err(|(attempts, e)| BootstrapError::Registration {
                kind: request.kind,
                name: request.name.to_string(),
                attempts,
                source: Box::new(e),
            })?;

        debug!(
            metric_name = request.name,
            kind = %request.kind,
            sample_count = request.sample_count,
            "Registered metric retention."
        );
    }

    Ok(())
}
