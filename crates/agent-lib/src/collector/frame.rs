//! Decoder for the container runtime's multiplexed log stream
//!
//! When a container runs without a TTY, the runtime interleaves stdout and
//! stderr into one byte stream of length-prefixed frames:
//!
//! ```text
//! +--------+---------+---------+---------+------------------------+
//! | byte 0 | byte 1  | byte 2  | byte 3  | bytes 4..8             |
//! | stream | padding | padding | padding | payload length (u32 BE)|
//! +--------+---------+---------+---------+------------------------+
//! | payload (length bytes)                                        |
//! +---------------------------------------------------------------+
//! ```
//!
//! Decoding is pure: [`FrameIter`] pulls frames out of a fully buffered
//! slice and [`parse_log_stream`] turns them into [`LogRecord`]s.

use crate::models::{LogLevel, LogRecord, LogSource, Metadata};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Size of the fixed frame header
pub const HEADER_LEN: usize = 8;

/// Output stream a frame was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Stdout,
    Stderr,
}

impl StreamType {
    /// Map the header tag; anything but 2 is treated as primary output
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            2 => StreamType::Stderr,
            _ => StreamType::Stdout,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Stdout => "stdout",
            StreamType::Stderr => "stderr",
        }
    }
}

/// One decoded frame, borrowing its payload from the input buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub stream: StreamType,
    pub payload: &'a [u8],
}

/// Pull-based iterator over the frames of a buffered log stream
///
/// Iteration ends at the first incomplete header or payload; a truncated
/// trailer is not an error.
#[derive(Debug, Clone)]
pub struct FrameIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.buf[self.pos..];
        if rest.len() < HEADER_LEN {
            return None;
        }

        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = HEADER_LEN.checked_add(len)?;
        if end > rest.len() {
            return None;
        }

        self.pos += end;
        Some(Frame {
            stream: StreamType::from_tag(rest[0]),
            payload: &rest[HEADER_LEN..end],
        })
    }
}

/// Records decoded from one stream plus the newest record time seen
#[derive(Debug, Clone, Default)]
pub struct ParsedLogs {
    pub records: Vec<LogRecord>,
    pub latest: Option<DateTime<Utc>>,
}

/// Decode a container's log stream into records
///
/// Frames whose payload trims to nothing produce no record. Payloads
/// without a leading runtime timestamp are stamped with `now`.
pub fn parse_log_stream(
    bytes: &[u8],
    container_id: &str,
    container_name: &str,
    now: DateTime<Utc>,
) -> ParsedLogs {
    let mut parsed = ParsedLogs::default();

    for frame in FrameIter::new(bytes) {
        let text = String::from_utf8_lossy(frame.payload);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let (timestamp, message) = split_timestamp(text).unwrap_or((now, text));
        let level = infer_level(frame.stream, message);

        let mut metadata = Metadata::new();
        metadata.insert("containerId".into(), Value::from(container_id));
        metadata.insert("containerName".into(), Value::from(container_name));
        metadata.insert("streamType".into(), Value::from(frame.stream.as_str()));
        metadata.insert("timestamp".into(), Value::from(timestamp.timestamp_millis()));

        parsed
            .records
            .push(LogRecord::new(level, LogSource::Container, message, metadata));
        parsed.latest = Some(parsed.latest.map_or(timestamp, |t| t.max(timestamp)));
    }

    parsed
}

/// Split a `2024-01-01T12:00:00.000000000Z message` line into its parts
///
/// The message part must be a single line; anything else is left whole.
pub fn split_timestamp(text: &str) -> Option<(DateTime<Utc>, &str)> {
    let split = text.find(char::is_whitespace)?;
    let (token, rest) = text.split_at(split);
    if !is_runtime_timestamp(token) {
        return None;
    }

    let message = rest.trim_start();
    if message.contains(|c: char| c == '\n' || c == '\r') {
        return None;
    }

    let ts = DateTime::parse_from_rfc3339(token).ok()?;
    Some((ts.with_timezone(&Utc), message))
}

/// Shape check for `YYYY-MM-DDThh:mm:ss.<digits>Z`
fn is_runtime_timestamp(token: &str) -> bool {
    const SHAPE: &[u8] = b"dddd-dd-ddTdd:dd:dd.";
    let bytes = token.as_bytes();
    if bytes.len() < SHAPE.len() + 2 || bytes[bytes.len() - 1] != b'Z' {
        return false;
    }

    let shape_ok = SHAPE.iter().zip(bytes).all(|(want, got)| match want {
        b'd' => got.is_ascii_digit(),
        other => got == other,
    });

    shape_ok
        && bytes[SHAPE.len()..bytes.len() - 1]
            .iter()
            .all(u8::is_ascii_digit)
}

/// Infer severity from message content, falling back to the stream
pub fn infer_level(stream: StreamType, message: &str) -> LogLevel {
    let lower = message.to_lowercase();

    if lower.contains("fatal") || lower.contains("panic") {
        return LogLevel::Error;
    }
    if lower.contains("error") || lower.contains(" err ") || lower.contains("[err]") {
        return LogLevel::Error;
    }
    if lower.contains("warn") {
        return LogLevel::Warning;
    }
    if lower.contains("debug") {
        return LogLevel::Debug;
    }

    match stream {
        StreamType::Stderr => LogLevel::Error,
        StreamType::Stdout => LogLevel::Info,
    }
}

#[cfg(test)]
pub(crate) fn encode_frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![tag, 0, 0, 0];
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_frame_iter_reads_header() {
        let mut bytes = encode_frame(1, b"one");
        bytes.extend(encode_frame(2, b"two"));

        let frames: Vec<_> = FrameIter::new(&bytes).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].stream, StreamType::Stdout);
        assert_eq!(frames[0].payload, b"one");
        assert_eq!(frames[1].stream, StreamType::Stderr);
        assert_eq!(frames[1].payload, b"two");
    }

    #[test]
    fn test_unknown_tag_is_primary() {
        let bytes = encode_frame(0, b"stdin?");
        let frame = FrameIter::new(&bytes).next().unwrap();
        assert_eq!(frame.stream, StreamType::Stdout);
    }

    #[test]
    fn test_recovers_every_non_empty_message() {
        let mut bytes = Vec::new();
        for i in 0..25 {
            bytes.extend(encode_frame(1 + (i % 2) as u8, format!("message {}", i).as_bytes()));
            bytes.extend(encode_frame(1, b"   \n"));
        }

        let parsed = parse_log_stream(&bytes, "abc", "web", now());
        assert_eq!(parsed.records.len(), 25);
        assert_eq!(parsed.records[3].message, "message 3");
    }

    #[test]
    fn test_truncated_header_is_ignored() {
        let mut bytes = encode_frame(1, b"complete");
        bytes.extend_from_slice(&[1, 0, 0]);

        let parsed = parse_log_stream(&bytes, "abc", "web", now());
        assert_eq!(parsed.records.len(), 1);
    }

    #[test]
    fn test_truncated_payload_is_ignored() {
        let mut bytes = encode_frame(1, b"complete");
        let mut partial = encode_frame(1, b"this payload is cut short");
        partial.truncate(14);
        bytes.extend(partial);

        let mut iter = FrameIter::new(&bytes);
        assert!(iter.next().is_some());
        assert!(iter.next().is_none());
        assert_eq!(iter.position(), HEADER_LEN + 8);
    }

    #[test]
    fn test_oversized_length_does_not_overflow() {
        let bytes = [1u8, 0, 0, 0, 0xff, 0xff, 0xff, 0xff, b'x'];
        assert_eq!(FrameIter::new(&bytes).count(), 0);
    }

    #[test]
    fn test_message_truncated_to_limit() {
        let long = "a".repeat(5000);
        let bytes = encode_frame(1, long.as_bytes());
        let parsed = parse_log_stream(&bytes, "abc", "web", now());
        assert_eq!(parsed.records[0].message.len(), 1000);
    }

    #[test]
    fn test_timestamp_prefix_is_split() {
        let bytes = encode_frame(1, b"2024-01-01T12:00:00.000000000Z hello");
        let parsed = parse_log_stream(&bytes, "abc", "web", now());

        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(parsed.records[0].message, "hello");
        assert_eq!(
            parsed.records[0].metadata["timestamp"],
            Value::from(expected.timestamp_millis())
        );
        assert_eq!(parsed.latest, Some(expected));
    }

    #[test]
    fn test_missing_timestamp_uses_now() {
        let bytes = encode_frame(1, b"  plain line  ");
        let parsed = parse_log_stream(&bytes, "abc", "web", now());
        assert_eq!(parsed.records[0].message, "plain line");
        assert_eq!(parsed.latest, Some(now()));
    }

    #[test]
    fn test_latest_is_newest_record() {
        let mut bytes = encode_frame(1, b"2024-01-01T12:00:05.5Z later");
        bytes.extend(encode_frame(1, b"2024-01-01T12:00:01.000000001Z earlier"));
        let parsed = parse_log_stream(&bytes, "abc", "web", now());

        let expected = Utc
            .with_ymd_and_hms(2024, 1, 1, 12, 0, 5)
            .unwrap()
            + chrono::Duration::milliseconds(500);
        assert_eq!(parsed.latest, Some(expected));
    }

    #[test]
    fn test_split_timestamp_rejects_lookalikes() {
        assert!(split_timestamp("2024-01-01 hello").is_none());
        assert!(split_timestamp("2024-01-01T12:00:00Z hello").is_none());
        assert!(split_timestamp("2024-01-01T12:00:00.123Z").is_none());
        assert!(split_timestamp("2024-01-01T12:00:00.1Z first\nsecond").is_none());
    }

    #[test]
    fn test_metadata_provenance() {
        let bytes = encode_frame(2, b"boom");
        let parsed = parse_log_stream(&bytes, "0123456789ab", "api", now());
        let meta = &parsed.records[0].metadata;
        assert_eq!(meta["containerId"], "0123456789ab");
        assert_eq!(meta["containerName"], "api");
        assert_eq!(meta["streamType"], "stderr");
        assert_eq!(parsed.records[0].source, LogSource::Container);
    }

    #[test]
    fn test_level_inference() {
        assert_eq!(infer_level(StreamType::Stdout, "FATAL: disk full"), LogLevel::Error);
        assert_eq!(infer_level(StreamType::Stdout, "kernel panic"), LogLevel::Error);
        assert_eq!(infer_level(StreamType::Stdout, "an Error occurred"), LogLevel::Error);
        assert_eq!(infer_level(StreamType::Stdout, "code err here"), LogLevel::Error);
        assert_eq!(infer_level(StreamType::Stdout, "[WARN] slow"), LogLevel::Warning);
        assert_eq!(infer_level(StreamType::Stdout, "[debug] details"), LogLevel::Debug);
        assert_eq!(infer_level(StreamType::Stderr, "plain"), LogLevel::Error);
        assert_eq!(infer_level(StreamType::Stdout, "plain"), LogLevel::Info);
    }

    #[test]
    fn test_fatal_wins_over_warn() {
        assert_eq!(
            infer_level(StreamType::Stdout, "warn: fatal condition"),
            LogLevel::Error
        );
    }
}
