use std::{
    io::{self, Write as _},
    net::{SocketAddr, TcpStream},
    time::{Duration, SystemTime},
};

use tracing::{debug, trace, warn};

use crate::{
    record::ExportRecord,
    writer::{LineProtocolWriter, WriteResult},
};

use super::{RetentionRequest, Transport};

struct Endpoint {
    addrs: Vec<SocketAddr>,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl Endpoint {
    fn connect(&self) -> io::Result<TcpStream> {
        let mut last_error = None;
        for addr in &self.addrs {
            match TcpStream::connect_timeout(addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(self.write_timeout))?;
                    stream.set_nodelay(true)?;
                    debug!(%addr, "Connected to collector.");
                    return Ok(stream);
                }
                Err(e) => {
                    trace!(%addr, error = %e, "Failed to connect to collector address.");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no collector address to connect to")
        }))
    }
}

enum ClientState {
    // Transport is currently disconnected.
    Disconnected,

    // Transport is connected and ready to send lines.
    Ready(TcpStream),
}

impl ClientState {
    fn try_send(&mut self, endpoint: &Endpoint, payload: &[u8]) -> io::Result<()> {
        loop {
            match std::mem::replace(self, ClientState::Disconnected) {
                ClientState::Disconnected => {
                    let stream = endpoint.connect()?;
                    *self = ClientState::Ready(stream);
                }
                ClientState::Ready(mut stream) => {
                    let result = stream.write_all(payload).and_then(|()| stream.flush());
                    if result.is_ok() {
                        *self = ClientState::Ready(stream);
                    }

                    return result;
                }
            }
        }
    }
}

/// A [`Transport`] that writes line protocol over a TCP connection.
///
/// Each batch is encoded and written in a single call. When a write fails, the connection is dropped and a new one is
/// established on the next write.
pub struct TcpTransport {
    endpoint: Endpoint,
    state: ClientState,
    writer: LineProtocolWriter,
}

impl TcpTransport {
    /// Creates a new `TcpTransport` for the given addresses, tried in order.
    ///
    /// Every write gives up after `write_timeout`. No connection is made until [`Transport::connect`] is called or the
    /// first batch is pushed.
    pub fn new(addrs: Vec<SocketAddr>, write_timeout: Duration) -> Self {
        TcpTransport {
            endpoint: Endpoint { addrs, connect_timeout: write_timeout, write_timeout },
            state: ClientState::Disconnected,
            writer: LineProtocolWriter::new(),
        }
    }

    /// Returns `true` if a connection is currently established.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ClientState::Ready(_))
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.writer.buffer().is_empty() {
            return Ok(());
        }

        let len = self.writer.buffer().len();
        let result = self.state.try_send(&self.endpoint, self.writer.buffer());
        match &result {
            Ok(()) => trace!(bytes = len, "Sent payload."),
            Err(e) => debug!(
                bytes = len,
                error = %e,
                "Failed to send payload. Connection will be re-established."
            ),
        }
        result
    }
}

impl Transport for TcpTransport {
    type Error = io::Error;

    fn connect(&mut self, timeout: Duration) -> Result<(), Self::Error> {
        self.endpoint.connect_timeout = timeout;
        let stream = self.endpoint.connect()?;
        self.state = ClientState::Ready(stream);
        Ok(())
    }

    fn register_retention(&mut self, request: &RetentionRequest<'_>) -> Result<(), Self::Error> {
        self.writer.clear();
        let result = self.writer.write_retention(request, SystemTime::now());
        log_write_failures(&result);
        self.send_buffered()
    }

    fn push(&mut self, records: &[ExportRecord]) -> Result<(), Self::Error> {
        self.writer.clear();
        let result = self.writer.write_batch(records);
        log_write_failures(&result);
        self.send_buffered()
    }
}

fn log_write_failures(result: &WriteResult) {
    if result.any_failures() {
        warn!(
            records_dropped = result.records_dropped(),
            fields_skipped = result.fields_skipped(),
            "Some records could not be fully encoded."
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        io::Read as _,
        net::TcpListener,
        thread,
        time::{Duration, UNIX_EPOCH},
    };

    use super::TcpTransport;
    use crate::{
        forwarder::{RetentionRequest, Transport},
        kind::MetricKind,
        record::{ExportRecord, FieldValue},
    };

    #[test]
    fn round_trip_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut received = String::new();
            stream.read_to_string(&mut received).unwrap();
            received
        });

        let mut transport = TcpTransport::new(vec![addr], Duration::from_secs(1));
        assert!(!transport.is_connected());
        transport.connect(Duration::from_secs(1)).unwrap();
        assert!(transport.is_connected());

        let request = RetentionRequest {
            name: "requests",
            kind: MetricKind::Counter,
            interval: Duration::from_secs(5),
            sample_count: 10,
            bucket_bounds: None,
        };
        transport.register_retention(&request).unwrap();

        let mut tags = BTreeMap::new();
        tags.insert("service".to_string(), "checkout".to_string());
        let record = ExportRecord {
            name: "requests".to_string(),
            tags,
            fields: vec![("count".to_string(), FieldValue::Float(12.0))],
            timestamp: UNIX_EPOCH + Duration::from_secs(1),
        };
        transport.push(&[record]).unwrap();
        drop(transport);

        let received = server.join().unwrap();
        let lines: Vec<_> = received.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0]
            .starts_with("_retention,kind=counter,metric=requests interval_ms=5000u,samples=10u "));
        assert_eq!(lines[1], "requests,service=checkout count=12.0 1000000000");
    }

    #[test]
    fn connect_fails_when_nobody_listens() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let mut transport = TcpTransport::new(vec![addr], Duration::from_millis(200));
        assert!(transport.connect(Duration::from_millis(200)).is_err());
        assert!(!transport.is_connected());
    }

    #[test]
    fn empty_batch_needs_no_connection() {
        let mut transport = TcpTransport::new(Vec::new(), Duration::from_millis(200));
        transport.push(&[]).unwrap();
    }
}
