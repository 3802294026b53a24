//! The incremental HTTP/1.1 request parser (spec.md §4.2).
//!
//! `HttpRequest::feed` consumes whatever bytes are available and advances
//! a resumable state machine; it never blocks and never assumes a single
//! call sees a whole request. Every boundary (request-line terminator,
//! header terminator, chunk-size terminator) accepts either `\r\n` or a
//! bare `\n`, per spec.md §3.5's line-ending invariant.

use crate::http::multipart::{MultipartParser, UploadedFile};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            _ => Err(ParseError::InvalidMethod),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Top-level parser phase (spec.md §3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserPhase {
    RequestLine,
    Headers,
    IdentityBody,
    ChunkedBody,
    MultipartBody,
    Complete,
    Error,
}

/// Nested phase for `ParserPhase::ChunkedBody` (spec.md §3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    ChunkSize,
    ChunkData(usize),
    ChunkEndCrlf,
    Trailer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    MalformedRequestLine,
    InvalidMethod,
    HeaderTooLong,
    InvalidHeaderLine,
    InvalidChunkSize,
    MalformedMultipart,
    PayloadTooLarge,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ParseError::MalformedRequestLine => "malformed request line",
            ParseError::InvalidMethod => "invalid HTTP method",
            ParseError::HeaderTooLong => "header line too long",
            ParseError::InvalidHeaderLine => "invalid header line",
            ParseError::InvalidChunkSize => "invalid chunk size",
            ParseError::MalformedMultipart => "malformed multipart body",
            ParseError::PayloadTooLarge => "payload exceeds configured limit",
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for ParseError {}

const MAX_HEADER_LINE: usize = 8192;
const MAX_CHUNK_SIZE_LINE: usize = 32;

/// A case-insensitive header store with last-wins duplicate policy
/// (spec.md §3.2).
#[derive(Debug, Default, Clone)]
pub struct HeaderMap {
    inner: HashMap<String, String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: String) {
        self.inner.insert(name.to_ascii_lowercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.inner.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    /// Raw URI, exactly as it appeared on the wire (spec.md §4.2).
    pub uri: String,
    pub version: String,
    pub headers: HeaderMap,
    /// Trailer headers from a chunked body's TRAILER phase — kept off the
    /// main header map (spec.md §9 open question: "currently discarded" in
    /// the original; this implementation keeps the bytes without merging
    /// them into `headers`).
    pub trailers: HeaderMap,
    pub body: Vec<u8>,
    pub uploaded_files: Vec<UploadedFile>,
    pub form_fields: HashMap<String, String>,

    pub phase: ParserPhase,
    pub error: Option<ParseError>,

    buffer: Vec<u8>,
    content_length: usize,
    body_consumed: usize,
    chunk_phase: ChunkPhase,
    multipart: Option<MultipartParser>,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        HttpRequest {
            method: Method::Get,
            uri: String::new(),
            version: String::new(),
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
            body: Vec::new(),
            uploaded_files: Vec::new(),
            form_fields: HashMap::new(),
            phase: ParserPhase::RequestLine,
            error: None,
            buffer: Vec::new(),
            content_length: 0,
            body_consumed: 0,
            chunk_phase: ChunkPhase::ChunkSize,
            multipart: None,
        }
    }

    /// URI path with the query string (if any) stripped (spec.md §4.2).
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or(&self.uri)
    }

    pub fn query(&self) -> &str {
        self.uri.splitn(2, '?').nth(1).unwrap_or("")
    }

    pub fn content_length_header(&self) -> usize {
        self.headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0)
    }

    pub fn is_chunked(&self) -> bool {
        self.headers
            .get("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    pub fn multipart_boundary(&self) -> Option<String> {
        let ct = self.headers.get("content-type")?;
        if !ct.trim_start().to_ascii_lowercase().starts_with("multipart/form-data") {
            return None;
        }
        ct.split(';')
            .skip(1)
            .find_map(|param| {
                let param = param.trim();
                param.strip_prefix("boundary=")
            })
            .map(|b| format!("--{}", b.trim_matches('"')))
    }

    /// Feeds `bytes` into the parser and advances as far as it can.
    /// Idempotent against empty input; any byte not yet classified stays
    /// owed to the caller (retained in the internal buffer).
    pub fn feed(&mut self, bytes: &[u8], max_body_size: usize) -> ParserPhase {
        self.buffer.extend_from_slice(bytes);

        loop {
            match self.phase {
                ParserPhase::RequestLine => {
                    if !self.try_parse_request_line() {
                        break;
                    }
                }
                ParserPhase::Headers => {
                    if !self.try_parse_headers() {
                        break;
                    }
                }
                ParserPhase::IdentityBody => {
                    if !self.consume_identity_body(max_body_size) {
                        break;
                    }
                }
                ParserPhase::ChunkedBody => {
                    if !self.consume_chunked_body(max_body_size) {
                        break;
                    }
                }
                ParserPhase::MultipartBody => {
                    if !self.consume_multipart_body(max_body_size) {
                        break;
                    }
                }
                ParserPhase::Complete | ParserPhase::Error => break,
            }
        }

        self.phase
    }

    fn fail(&mut self, err: ParseError) {
        self.error = Some(err);
        self.phase = ParserPhase::Error;
    }

    fn try_parse_request_line(&mut self) -> bool {
        let Some((line_end, consumed)) = find_line(&self.buffer) else {
            if self.buffer.len() > MAX_HEADER_LINE {
                self.fail(ParseError::MalformedRequestLine);
                return true;
            }
            return false;
        };

        if line_end == 0 {
            // Tolerate leading blank lines before the request line.
            self.buffer.drain(..consumed);
            return true;
        }

        let line = self.buffer[..line_end].to_vec();
        self.buffer.drain(..consumed);

        let Ok(line) = String::from_utf8(line) else {
            self.fail(ParseError::MalformedRequestLine);
            return true;
        };

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            self.fail(ParseError::MalformedRequestLine);
            return true;
        }

        let method = match Method::from_str(parts[0]) {
            Ok(m) => m,
            Err(e) => {
                self.fail(e);
                return true;
            }
        };

        self.method = method;
        self.uri = parts[1].to_string();
        self.version = parts[2].to_string();
        self.phase = ParserPhase::Headers;
        true
    }

    fn try_parse_headers(&mut self) -> bool {
        let Some((line_end, consumed)) = find_line(&self.buffer) else {
            if self.buffer.len() > MAX_HEADER_LINE {
                self.fail(ParseError::HeaderTooLong);
                return true;
            }
            return false;
        };

        if line_end == 0 {
            self.buffer.drain(..consumed);
            self.start_body();
            return true;
        }

        let line = self.buffer[..line_end].to_vec();
        self.buffer.drain(..consumed);

        let Ok(line) = String::from_utf8(line) else {
            self.fail(ParseError::InvalidHeaderLine);
            return true;
        };

        match line.split_once(':') {
            Some((name, value)) => {
                self.headers.insert(name.trim(), value.trim().to_string());
                true
            }
            None => {
                self.fail(ParseError::InvalidHeaderLine);
                true
            }
        }
    }

    /// Dispatches to the correct body framing once headers are complete
    /// (spec.md §4.2): chunked, multipart, or identity.
    fn start_body(&mut self) {
        self.content_length = self.content_length_header();

        if self.is_chunked() {
            self.phase = ParserPhase::ChunkedBody;
            self.chunk_phase = ChunkPhase::ChunkSize;
        } else if let Some(boundary) = self.multipart_boundary() {
            match MultipartParser::new(boundary) {
                Ok(p) => {
                    self.multipart = Some(p);
                    self.phase = ParserPhase::MultipartBody;
                }
                Err(e) => self.fail(e),
            }
        } else if self.content_length == 0 {
            self.phase = ParserPhase::Complete;
        } else {
            self.phase = ParserPhase::IdentityBody;
        }
    }

    fn consume_identity_body(&mut self, max_body_size: usize) -> bool {
        if self.content_length > max_body_size {
            self.fail(ParseError::PayloadTooLarge);
            return true;
        }
        if self.buffer.is_empty() {
            return false;
        }
        let remaining = self.content_length - self.body_consumed;
        let take = remaining.min(self.buffer.len());
        if take == 0 {
            self.phase = ParserPhase::Complete;
            return true;
        }
        self.body.extend(self.buffer.drain(..take));
        self.body_consumed += take;
        if self.body_consumed >= self.content_length {
            self.phase = ParserPhase::Complete;
        }
        true
    }

    fn consume_multipart_body(&mut self, max_body_size: usize) -> bool {
        if self.content_length > max_body_size {
            self.fail(ParseError::PayloadTooLarge);
            return true;
        }
        if self.buffer.is_empty() {
            return false;
        }
        let remaining = self.content_length.saturating_sub(self.body_consumed);
        if remaining == 0 {
            self.phase = ParserPhase::Complete;
            return true;
        }
        let take = remaining.min(self.buffer.len());
        let chunk: Vec<u8> = self.buffer.drain(..take).collect();
        self.body_consumed += take;

        let parser = self.multipart.as_mut().expect("multipart parser present in MultipartBody phase");
        if let Err(e) = parser.feed(&chunk, &mut self.uploaded_files, &mut self.form_fields) {
            self.fail(e);
            return true;
        }

        if self.body_consumed >= self.content_length {
            self.phase = ParserPhase::Complete;
        }
        true
    }

    fn consume_chunked_body(&mut self, max_body_size: usize) -> bool {
        loop {
            match self.chunk_phase {
                ChunkPhase::ChunkSize => {
                    let Some((line_end, consumed)) = find_line(&self.buffer) else {
                        if self.buffer.len() > MAX_CHUNK_SIZE_LINE {
                            self.fail(ParseError::InvalidChunkSize);
                            return true;
                        }
                        return false;
                    };
                    let line = &self.buffer[..line_end];
                    let hex_part = line
                        .iter()
                        .position(|&b| b == b';')
                        .map(|p| &line[..p])
                        .unwrap_or(line);
                    let hex_str = match std::str::from_utf8(hex_part) {
                        Ok(s) => s.trim(),
                        Err(_) => {
                            self.fail(ParseError::InvalidChunkSize);
                            return true;
                        }
                    };
                    let size = match usize::from_str_radix(hex_str, 16) {
                        Ok(s) => s,
                        Err(_) => {
                            self.fail(ParseError::InvalidChunkSize);
                            return true;
                        }
                    };
                    self.buffer.drain(..consumed);
                    if self.body.len() + size > max_body_size {
                        self.fail(ParseError::PayloadTooLarge);
                        return true;
                    }
                    self.chunk_phase = if size == 0 {
                        ChunkPhase::Trailer
                    } else {
                        ChunkPhase::ChunkData(size)
                    };
                }
                ChunkPhase::ChunkData(remaining) => {
                    if self.buffer.is_empty() {
                        return false;
                    }
                    let take = remaining.min(self.buffer.len());
                    self.body.extend(self.buffer.drain(..take));
                    let left = remaining - take;
                    if left == 0 {
                        self.chunk_phase = ChunkPhase::ChunkEndCrlf;
                    } else {
                        self.chunk_phase = ChunkPhase::ChunkData(left);
                        return false;
                    }
                }
                ChunkPhase::ChunkEndCrlf => {
                    let Some((line_end, consumed)) = find_line(&self.buffer) else {
                        return false;
                    };
                    if line_end != 0 {
                        self.fail(ParseError::InvalidChunkSize);
                        return true;
                    }
                    self.buffer.drain(..consumed);
                    self.chunk_phase = ChunkPhase::ChunkSize;
                }
                ChunkPhase::Trailer => {
                    let Some((line_end, consumed)) = find_line(&self.buffer) else {
                        if self.buffer.len() > MAX_HEADER_LINE {
                            self.fail(ParseError::HeaderTooLong);
                            return true;
                        }
                        return false;
                    };
                    if line_end == 0 {
                        self.buffer.drain(..consumed);
                        self.phase = ParserPhase::Complete;
                        return true;
                    }
                    let line = self.buffer[..line_end].to_vec();
                    self.buffer.drain(..consumed);
                    match String::from_utf8(line).ok().and_then(|l| {
                        l.split_once(':').map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
                    }) {
                        Some((name, value)) => self.trailers.insert(&name, value),
                        None => {
                            self.fail(ParseError::InvalidHeaderLine);
                            return true;
                        }
                    }
                }
            }
        }
    }

    /// Resets parser state for the next serial request on the same
    /// connection (spec.md §5: "a new parser instance is assigned per
    /// request ... to allow serial request reuse without state leaks").
    /// Any bytes already fed but not yet consumed by this request (a
    /// pipelined follow-up request) are preserved.
    pub fn reset(&mut self) {
        let leftover = std::mem::take(&mut self.buffer);
        *self = HttpRequest::new();
        self.buffer = leftover;
    }

    pub fn has_buffered_bytes(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// Finds the next line terminator (`\r\n` or bare `\n`), tolerant per
/// spec.md §3.5/§4.2. Returns `(content_end, total_bytes_including_terminator)`.
pub(crate) fn find_line(buf: &[u8]) -> Option<(usize, usize)> {
    for i in 0..buf.len() {
        if buf[i] == b'\n' {
            if i > 0 && buf[i - 1] == b'\r' {
                return Some((i - 1, i + 1));
            }
            return Some((i, i + 1));
        }
    }
    None
}

/// Finds the first occurrence of `needle` in `haystack` at or after
/// `start`.
pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if needle.is_empty() || start >= haystack.len() {
        return None;
    }
    haystack[start..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + start)
}
