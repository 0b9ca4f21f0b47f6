//! Incremental multipart/form-data parser.
//!
//! The parser is fed raw body bytes as they arrive and emits ordered lifecycle
//! events: file parts stream out chunk-by-chunk, field parts are buffered and
//! emitted whole. Events for one part are strictly sequential (begin, data*,
//! end) before the next part begins, so data events carry no part tag. A
//! malformed boundary, oversized header block, or truncated stream fails the
//! parse; no further events are emitted afterwards.

use crate::errors::UploadError;
use bytes::{Buf, Bytes, BytesMut};

/// Limits applied while parsing. This is the only configuration surface that
/// reaches the parser; storage capabilities and the filename function are
/// never part of it.
#[derive(Clone, Debug)]
pub struct ParserConfig {
    /// Maximum size of one part's header block.
    pub max_header_bytes: usize,
    /// Maximum buffered size of one non-file field value.
    pub max_field_bytes: usize,
    /// Maximum number of parts in one body.
    pub max_parts: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 16 * 1024,
            max_field_bytes: 1024 * 1024,
            max_parts: 1000,
        }
    }
}

/// Lifecycle events emitted while consuming a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub enum MultipartEvent {
    /// A file part opened. Emitted before any of its data.
    FileBegin {
        name: String,
        filename: String,
        content_type: Option<String>,
    },
    /// One chunk of the current file part, in arrival order.
    FileData(Bytes),
    /// The current file part's byte stream completed cleanly.
    FileEnd,
    /// A non-file field, fully buffered.
    Field { name: String, value: String },
    /// The closing boundary delimiter was seen; no further parts follow.
    End,
}

enum State {
    /// Seeking the first boundary delimiter; preamble bytes are discarded.
    Preamble,
    /// Just consumed a boundary delimiter; deciding between next part and end.
    Delimiter,
    /// Accumulating one part's header block.
    Headers,
    /// Buffering a field part's value.
    FieldBody { name: String, value: Vec<u8> },
    /// Streaming a file part's payload.
    FileBody,
    /// Closing delimiter seen; epilogue bytes are ignored.
    Done,
    /// A prior feed failed; the parser emits nothing further.
    Failed,
}

/// Incremental multipart parser. Feed it body bytes in arrival order and
/// collect the events each feed yields; call [`finish`](Self::finish) once the
/// transport signals end-of-stream.
pub struct MultipartParser {
    /// `--{boundary}`
    delimiter: Vec<u8>,
    buf: BytesMut,
    state: State,
    config: ParserConfig,
    parts_seen: usize,
}

struct PartHeaders {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
}

impl MultipartParser {
    pub fn new(boundary: &str, config: ParserConfig) -> Result<Self, UploadError> {
        if boundary.is_empty() {
            return Err(UploadError::Malformed("empty multipart boundary".into()));
        }
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary.as_bytes());
        Ok(Self {
            delimiter,
            buf: BytesMut::new(),
            state: State::Preamble,
            config,
            parts_seen: 0,
        })
    }

    /// Consume the next slice of body bytes, returning the events it unlocked.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<MultipartEvent>, UploadError> {
        match self.state {
            State::Failed => {
                return Err(UploadError::Malformed(
                    "multipart parser already failed".into(),
                ));
            }
            State::Done => return Ok(Vec::new()),
            _ => {}
        }
        self.buf.extend_from_slice(data);

        let mut events = Vec::new();
        loop {
            let advanced = match self.state {
                State::Preamble => self.step_preamble()?,
                State::Delimiter => self.step_delimiter(&mut events)?,
                State::Headers => self.step_headers(&mut events)?,
                State::FieldBody { .. } | State::FileBody => self.step_body(&mut events)?,
                State::Done => {
                    self.buf.clear();
                    false
                }
                State::Failed => unreachable!("failed state checked above"),
            };
            if !advanced {
                break;
            }
        }
        Ok(events)
    }

    /// Signal end of the transport stream. Errors unless the closing boundary
    /// delimiter was already seen.
    pub fn finish(&mut self) -> Result<(), UploadError> {
        match self.state {
            State::Done => Ok(()),
            _ => {
                self.state = State::Failed;
                Err(UploadError::Malformed(
                    "truncated multipart stream: missing closing boundary".into(),
                ))
            }
        }
    }

    fn fail(&mut self, msg: impl Into<String>) -> UploadError {
        self.state = State::Failed;
        UploadError::Malformed(msg.into())
    }

    fn step_preamble(&mut self) -> Result<bool, UploadError> {
        let needle = self.delimiter.clone();
        let mut search_from = 0;
        loop {
            match find(&self.buf[search_from..], &needle) {
                Some(rel) => {
                    let i = search_from + rel;
                    // The delimiter must open the body or sit on its own line.
                    if i == 0 || (i >= 2 && &self.buf[i - 2..i] == b"\r\n") {
                        self.buf.advance(i + needle.len());
                        self.state = State::Delimiter;
                        return Ok(true);
                    }
                    search_from = i + 1;
                }
                None => {
                    // Discard preamble, keeping enough tail to match a
                    // delimiter split across feeds (plus its preceding CRLF).
                    let keep = needle.len() + 1;
                    if self.buf.len() > keep {
                        self.buf.advance(self.buf.len() - keep);
                    }
                    return Ok(false);
                }
            }
        }
    }

    fn step_delimiter(&mut self, events: &mut Vec<MultipartEvent>) -> Result<bool, UploadError> {
        if self.buf.len() < 2 {
            return Ok(false);
        }
        match &self.buf[..2] {
            b"\r\n" => {
                self.buf.advance(2);
                self.state = State::Headers;
                Ok(true)
            }
            b"--" => {
                self.buf.advance(2);
                self.state = State::Done;
                events.push(MultipartEvent::End);
                Ok(true)
            }
            _ => Err(self.fail("invalid bytes after boundary delimiter")),
        }
    }

    fn step_headers(&mut self, events: &mut Vec<MultipartEvent>) -> Result<bool, UploadError> {
        let end = match find(&self.buf, b"\r\n\r\n") {
            Some(i) => i,
            None => {
                if self.buf.len() > self.config.max_header_bytes {
                    return Err(self.fail("part header block too large"));
                }
                return Ok(false);
            }
        };
        if end > self.config.max_header_bytes {
            return Err(self.fail("part header block too large"));
        }

        self.parts_seen += 1;
        if self.parts_seen > self.config.max_parts {
            return Err(self.fail(format!("more than {} parts", self.config.max_parts)));
        }

        let block = self.buf.split_to(end + 4);
        let headers = match parse_part_headers(&block[..end]) {
            Ok(headers) => headers,
            Err(msg) => return Err(self.fail(msg)),
        };

        match headers.filename {
            Some(filename) => {
                events.push(MultipartEvent::FileBegin {
                    name: headers.name,
                    filename,
                    content_type: headers.content_type,
                });
                self.state = State::FileBody;
            }
            None => {
                self.state = State::FieldBody {
                    name: headers.name,
                    value: Vec::new(),
                };
            }
        }
        Ok(true)
    }

    fn step_body(&mut self, events: &mut Vec<MultipartEvent>) -> Result<bool, UploadError> {
        // Part data runs until a CRLF followed by the boundary delimiter.
        let mut needle = Vec::with_capacity(self.delimiter.len() + 2);
        needle.extend_from_slice(b"\r\n");
        needle.extend_from_slice(&self.delimiter);

        match find(&self.buf, &needle) {
            Some(i) => {
                let data = self.buf.split_to(i).freeze();
                self.buf.advance(needle.len());
                self.emit_body(data, true, events)?;
                self.state = State::Delimiter;
                Ok(true)
            }
            None => {
                // Everything except a possible partial delimiter tail is
                // guaranteed to be part data and can be released now.
                let keep = needle.len() - 1;
                if self.buf.len() > keep {
                    let releasable = self.buf.len() - keep;
                    let data = self.buf.split_to(releasable).freeze();
                    self.emit_body(data, false, events)?;
                }
                Ok(false)
            }
        }
    }

    fn emit_body(
        &mut self,
        data: Bytes,
        at_end: bool,
        events: &mut Vec<MultipartEvent>,
    ) -> Result<(), UploadError> {
        match &mut self.state {
            State::FieldBody { name, value } => {
                if value.len() + data.len() > self.config.max_field_bytes {
                    let limit = self.config.max_field_bytes;
                    return Err(self.fail(format!("field exceeds {} bytes", limit)));
                }
                value.extend_from_slice(&data);
                if at_end {
                    events.push(MultipartEvent::Field {
                        name: std::mem::take(name),
                        value: String::from_utf8_lossy(value).into_owned(),
                    });
                }
            }
            State::FileBody => {
                if !data.is_empty() {
                    events.push(MultipartEvent::FileData(data));
                }
                if at_end {
                    events.push(MultipartEvent::FileEnd);
                }
            }
            _ => unreachable!("emit_body called outside a body state"),
        }
        Ok(())
    }
}

/// Extract the boundary parameter from a `Content-Type` header value.
/// Returns `None` unless the value is `multipart/form-data` with a non-empty
/// boundary.
pub fn boundary_from_content_type(value: &str) -> Option<String> {
    let mut pieces = value.split(';');
    let mime = pieces.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    for piece in pieces {
        if let Some((key, value)) = piece.trim().split_once('=') {
            if key.trim().eq_ignore_ascii_case("boundary") {
                let value = value.trim().trim_matches('"');
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn parse_part_headers(raw: &[u8]) -> Result<PartHeaders, String> {
    let text =
        std::str::from_utf8(raw).map_err(|_| "part headers are not valid UTF-8".to_string())?;

    let mut disposition = None;
    let mut content_type = None;
    for line in text.split("\r\n").filter(|l| !l.is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| format!("malformed header line `{}`", line))?;
        match key.trim().to_ascii_lowercase().as_str() {
            "content-disposition" => disposition = Some(value.trim()),
            "content-type" => content_type = Some(value.trim().to_string()),
            _ => {}
        }
    }

    let disposition = disposition.ok_or_else(|| "part missing content-disposition".to_string())?;
    let name = header_param(disposition, "name")
        .ok_or_else(|| "content-disposition missing field name".to_string())?;
    let filename = header_param(disposition, "filename");
    Ok(PartHeaders {
        name,
        filename,
        content_type,
    })
}

/// Pull a (possibly quoted) parameter out of a header value like
/// `form-data; name="file"; filename="a.png"`.
fn header_param(value: &str, key: &str) -> Option<String> {
    for piece in value.split(';') {
        if let Some((k, v)) = piece.trim().split_once('=') {
            if k.trim().eq_ignore_ascii_case(key) {
                let v = v.trim();
                let v = v
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .unwrap_or(v);
                return Some(v.replace("\\\"", "\""));
            }
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "XBOUNDARY";

    fn body(parts: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for part in parts {
            out.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            out.extend_from_slice(part.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        out
    }

    fn parse_all(raw: &[u8], chunk_size: usize) -> Result<Vec<MultipartEvent>, UploadError> {
        let mut parser = MultipartParser::new(BOUNDARY, ParserConfig::default())?;
        let mut events = Vec::new();
        for chunk in raw.chunks(chunk_size) {
            events.extend(parser.feed(chunk)?);
        }
        parser.finish()?;
        Ok(events)
    }

    /// Concatenate consecutive FileData events so chunking does not affect
    /// comparisons.
    fn coalesce(events: Vec<MultipartEvent>) -> Vec<MultipartEvent> {
        let mut out: Vec<MultipartEvent> = Vec::new();
        for ev in events {
            match ev {
                MultipartEvent::FileData(next) => match out.last_mut() {
                    Some(MultipartEvent::FileData(prev)) => {
                        let mut merged = prev.to_vec();
                        merged.extend_from_slice(&next);
                        *prev = Bytes::from(merged);
                    }
                    _ => out.push(MultipartEvent::FileData(next)),
                },
                other => out.push(other),
            }
        }
        out
    }

    #[test]
    fn extracts_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=abc123"),
            Some("abc123".to_string())
        );
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=\"quoted bound\""),
            Some("quoted bound".to_string())
        );
        assert_eq!(boundary_from_content_type("multipart/form-data"), None);
        assert_eq!(
            boundary_from_content_type("application/json; boundary=abc"),
            None
        );
    }

    #[test]
    fn parses_fields_and_files() {
        let raw = body(&[
            "Content-Disposition: form-data; name=\"key\"\r\n\r\nvalue",
            "Content-Disposition: form-data; name=\"file\"; filename=\"a.bin\"\r\n\
             Content-Type: application/octet-stream\r\n\r\nhello bytes",
        ]);
        let events = coalesce(parse_all(&raw, raw.len()).unwrap());
        assert_eq!(
            events,
            vec![
                MultipartEvent::Field {
                    name: "key".into(),
                    value: "value".into()
                },
                MultipartEvent::FileBegin {
                    name: "file".into(),
                    filename: "a.bin".into(),
                    content_type: Some("application/octet-stream".into()),
                },
                MultipartEvent::FileData(Bytes::from_static(b"hello bytes")),
                MultipartEvent::FileEnd,
                MultipartEvent::End,
            ]
        );
    }

    #[test]
    fn event_order_is_stable_under_byte_at_a_time_feeding() {
        let raw = body(&[
            "Content-Disposition: form-data; name=\"a\"\r\n\r\nfirst",
            "Content-Disposition: form-data; name=\"f\"; filename=\"x\"\r\n\r\npayload-data",
            "Content-Disposition: form-data; name=\"b\"\r\n\r\nsecond",
        ]);
        let whole = coalesce(parse_all(&raw, raw.len()).unwrap());
        let trickled = coalesce(parse_all(&raw, 1).unwrap());
        assert_eq!(whole, trickled);
    }

    #[test]
    fn empty_file_part_produces_no_data_events() {
        let raw = body(&["Content-Disposition: form-data; name=\"f\"; filename=\"e\"\r\n\r\n"]);
        let events = parse_all(&raw, 7).unwrap();
        assert_eq!(
            events,
            vec![
                MultipartEvent::FileBegin {
                    name: "f".into(),
                    filename: "e".into(),
                    content_type: None,
                },
                MultipartEvent::FileEnd,
                MultipartEvent::End,
            ]
        );
    }

    #[test]
    fn truncated_stream_is_malformed() {
        let mut raw = body(&["Content-Disposition: form-data; name=\"k\"\r\n\r\nv"]);
        raw.truncate(raw.len() - 8); // drop the closing delimiter
        let err = parse_all(&raw, raw.len()).unwrap_err();
        assert!(matches!(err, UploadError::Malformed(_)));
    }

    #[test]
    fn missing_field_name_is_malformed() {
        let raw = body(&["Content-Disposition: form-data\r\n\r\nv"]);
        let err = parse_all(&raw, raw.len()).unwrap_err();
        assert!(matches!(err, UploadError::Malformed(_)));
    }

    #[test]
    fn oversized_header_block_is_rejected() {
        let mut parser = MultipartParser::new(
            BOUNDARY,
            ParserConfig {
                max_header_bytes: 32,
                ..ParserConfig::default()
            },
        )
        .unwrap();
        let mut raw = format!("--{}\r\n", BOUNDARY).into_bytes();
        raw.extend_from_slice(b"Content-Disposition: form-data; name=\"way-too-long-for-the-limit\"\r\n\r\n");
        let err = parser.feed(&raw).unwrap_err();
        assert!(matches!(err, UploadError::Malformed(_)));
    }

    #[test]
    fn field_size_limit_applies_while_streaming() {
        let big = "x".repeat(64);
        let raw = body(&[&format!(
            "Content-Disposition: form-data; name=\"k\"\r\n\r\n{}",
            big
        )]);
        let mut parser = MultipartParser::new(
            BOUNDARY,
            ParserConfig {
                max_field_bytes: 16,
                ..ParserConfig::default()
            },
        )
        .unwrap();
        let mut failed = false;
        for chunk in raw.chunks(8) {
            if parser.feed(chunk).is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);
    }
}
