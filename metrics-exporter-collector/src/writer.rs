use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    forwarder::RetentionRequest,
    record::{ExportRecord, FieldValue},
};

/// Measurement name of retention declarations.
pub const RETENTION_MEASUREMENT: &str = "_retention";

const MEASUREMENT_ESCAPES: &[u8] = b",\\ ";
const TAG_ESCAPES: &[u8] = b",=\\ ";

struct FieldValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl FieldValueFormatter {
    fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    fn format_u64(&mut self, value: u64) -> &str {
        self.int_writer.format(value)
    }

    fn format_u128(&mut self, value: u128) -> &str {
        self.int_writer.format(value)
    }

    fn format_f64(&mut self, value: f64) -> &str {
        self.float_writer.format_finite(value)
    }
}

/// Outcome of writing records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteResult {
    lines_written: u64,
    records_dropped: u64,
    fields_skipped: u64,
    tags_skipped: u64,
}

impl WriteResult {
    fn merge(&mut self, other: WriteResult) {
        self.lines_written += other.lines_written;
        self.records_dropped += other.records_dropped;
        self.fields_skipped += other.fields_skipped;
        self.tags_skipped += other.tags_skipped;
    }

    /// Returns `true` if any record, field or tag could not be encoded.
    pub const fn any_failures(&self) -> bool {
        self.records_dropped != 0 || self.fields_skipped != 0 || self.tags_skipped != 0
    }

    /// Returns the number of lines written.
    pub const fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Returns the number of records dropped because none of their fields could be encoded.
    pub const fn records_dropped(&self) -> u64 {
        self.records_dropped
    }

    /// Returns the number of fields skipped because their value was not finite, or their key held a
    /// line break.
    pub const fn fields_skipped(&self) -> u64 {
        self.fields_skipped
    }

    /// Returns the number of tags skipped because their key or value held a line break.
    pub const fn tags_skipped(&self) -> u64 {
        self.tags_skipped
    }
}

/// Encodes records as newline-delimited line protocol.
///
/// Each record becomes one line of the form `<name>[,<tag>=<value>...] <field>=<value>[,...] [<timestamp>]`,
/// where the timestamp is in nanoseconds since the Unix epoch. Tags are written in key order. Float fields are
/// written as-is and unsigned fields carry a `u` suffix.
///
/// Backslashes, commas and spaces are escaped in measurement names, and equal signs are escaped as well in tag keys,
/// tag values and field keys. Line breaks cannot be escaped: a tag or field whose key or value holds one is skipped,
/// and a record whose name holds one is dropped. Tags with an empty value are left out, as line protocol cannot
/// represent them. Non-finite float fields are skipped, and a record left without any field is dropped entirely.
pub struct LineProtocolWriter {
    buf: Vec<u8>,
    formatter: FieldValueFormatter,
}

impl LineProtocolWriter {
    /// Creates an empty `LineProtocolWriter`.
    pub fn new() -> Self {
        Self { buf: Vec::new(), formatter: FieldValueFormatter::new() }
    }

    /// Gets the encoded lines written since the last [`clear`](LineProtocolWriter::clear).
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Clears the buffer, keeping its allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Writes every record of a batch.
    pub fn write_batch(&mut self, records: &[ExportRecord]) -> WriteResult {
        let mut result = WriteResult::default();
        for record in records {
            result.merge(self.write_record(record));
        }
        result
    }

    /// Writes a single record.
    pub fn write_record(&mut self, record: &ExportRecord) -> WriteResult {
        let mut result = WriteResult::default();
        if has_line_break(&record.name) {
            result.records_dropped += 1;
            return result;
        }

        let start = self.buf.len();

        write_escaped(&mut self.buf, &record.name, MEASUREMENT_ESCAPES);
        for (key, value) in &record.tags {
            if has_line_break(key) || has_line_break(value) {
                result.tags_skipped += 1;
                continue;
            }
            write_tag(&mut self.buf, key, value);
        }

        let mut fields_written = 0;
        for (key, value) in &record.fields {
            let finite = match value {
                FieldValue::Float(v) => v.is_finite(),
                FieldValue::Unsigned(_) => true,
            };
            if !finite || has_line_break(key) {
                result.fields_skipped += 1;
                continue;
            }

            self.buf.push(if fields_written == 0 { b' ' } else { b',' });
            write_escaped(&mut self.buf, key, TAG_ESCAPES);
            self.buf.push(b'=');
            match *value {
                FieldValue::Float(v) => {
                    self.buf.extend_from_slice(self.formatter.format_f64(v).as_bytes());
                }
                FieldValue::Unsigned(v) => {
                    self.buf.extend_from_slice(self.formatter.format_u64(v).as_bytes());
                    self.buf.push(b'u');
                }
            }
            fields_written += 1;
        }

        if fields_written == 0 {
            self.buf.truncate(start);
            result.records_dropped += 1;
            return result;
        }

        // Points before the epoch are left without a timestamp, and get stamped on arrival instead.
        if let Ok(since_epoch) = record.timestamp.duration_since(UNIX_EPOCH) {
            self.buf.push(b' ');
            let nanos = self.formatter.format_u128(since_epoch.as_nanos());
            self.buf.extend_from_slice(nanos.as_bytes());
        }

        self.buf.push(b'\n');
        result.lines_written += 1;
        result
    }

    /// Writes the declaration of a metric's retention policy.
    ///
    /// The declaration is a line in the `_retention` measurement, tagged with the metric name, its kind and, for
    /// histograms, its `|`-separated bucket bounds, with the export interval in milliseconds and the number of samples
    /// to keep as fields.
    pub fn write_retention(
        &mut self,
        request: &RetentionRequest<'_>,
        now: SystemTime,
    ) -> WriteResult {
        let mut tags = BTreeMap::new();
        tags.insert("metric".to_string(), request.name.to_string());
        tags.insert("kind".to_string(), request.kind.as_str().to_string());
        if let Some(bounds) = request.bucket_bounds {
            let bounds = bounds.iter().map(|b| b.to_string()).collect::<Vec<_>>().join("|");
            tags.insert("bounds".to_string(), bounds);
        }

        let interval_ms = u64::try_from(request.interval.as_millis()).unwrap_or(u64::MAX);
        let record = ExportRecord {
            name: RETENTION_MEASUREMENT.to_string(),
            tags,
            fields: vec![
                ("interval_ms".to_string(), FieldValue::Unsigned(interval_ms)),
                ("samples".to_string(), FieldValue::Unsigned(request.sample_count as u64)),
            ],
            timestamp: now,
        };
        self.write_record(&record)
    }
}

impl Default for LineProtocolWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn write_tag(buf: &mut Vec<u8>, key: &str, value: &str) {
    if key.is_empty() || value.is_empty() {
        return;
    }

    buf.push(b',');
    write_escaped(buf, key, TAG_ESCAPES);
    buf.push(b'=');
    write_escaped(buf, value, TAG_ESCAPES);
}

fn has_line_break(s: &str) -> bool {
    s.bytes().any(|b| b == b'\n' || b == b'\r')
}

fn write_escaped(buf: &mut Vec<u8>, s: &str, escapes: &[u8]) {
    for b in s.bytes() {
        if escapes.contains(&b) {
            buf.push(b'\\');
        }
        buf.push(b);
    }
}
