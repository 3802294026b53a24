//! The multipart/form-data sub-machine (spec.md §4.3).
//!
//! Parts are accumulated entirely in memory: a part whose
//! `Content-Disposition` carries a `filename` becomes an [`UploadedFile`],
//! everything else becomes a `form_fields` entry. The boundary search
//! tolerates both `\r\n` and bare `\n` line endings, same as the rest of
//! the request parser.

use crate::http::request::{find_line, find_subsequence};
use crate::http::request::ParseError;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field_name: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartPhase {
    /// Before the first boundary line has been consumed.
    Preamble,
    PartHeaders,
    PartBody,
    End,
}

struct PendingPart {
    field_name: String,
    filename: Option<String>,
    content_type: Option<String>,
    body: Vec<u8>,
}

pub struct MultipartParser {
    boundary: Vec<u8>,
    phase: PartPhase,
    buf: Vec<u8>,
    current: Option<PendingPart>,
}

impl MultipartParser {
    pub fn new(boundary: String) -> Result<Self, ParseError> {
        if boundary.len() <= 2 {
            return Err(ParseError::MalformedMultipart);
        }
        Ok(MultipartParser {
            boundary: boundary.into_bytes(),
            phase: PartPhase::Preamble,
            buf: Vec::new(),
            current: None,
        })
    }

    /// Feeds a chunk of the request body. Completed parts are pushed into
    /// `uploads`/`fields` as soon as their closing boundary is seen; bytes
    /// held back pending a boundary decision never exceed
    /// `boundary.len() + 2` (the safety margin spec.md §4.3 requires so a
    /// boundary split across reads is never misdetected as body data).
    pub fn feed(
        &mut self,
        chunk: &[u8],
        uploads: &mut Vec<UploadedFile>,
        fields: &mut HashMap<String, String>,
    ) -> Result<(), ParseError> {
        self.buf.extend_from_slice(chunk);

        loop {
            match self.phase {
                PartPhase::End => return Ok(()),
                PartPhase::Preamble => {
                    if !self.consume_boundary_line(true)? {
                        return Ok(());
                    }
                }
                PartPhase::PartHeaders => {
                    if !self.consume_part_headers()? {
                        return Ok(());
                    }
                }
                PartPhase::PartBody => {
                    if !self.consume_part_body(uploads, fields)? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Consumes a `--boundary` or `--boundary--` line. `initial` allows the
    /// very first boundary to be preceded by arbitrary preamble bytes,
    /// which are discarded per RFC 2046.
    fn consume_boundary_line(&mut self, initial: bool) -> Result<bool, ParseError> {
        let Some(pos) = find_subsequence(&self.buf, &self.boundary, 0) else {
            if initial && self.buf.len() > self.boundary.len() + 2 {
                // Drop everything except a safety margin; the boundary
                // cannot start any earlier than that in future data.
                let keep_from = self.buf.len() - (self.boundary.len() + 2);
                self.buf.drain(..keep_from);
            }
            return Ok(false);
        };
        self.buf.drain(..pos);

        let after = self.boundary.len();
        if self.buf.len() < after + 2 {
            return Ok(false);
        }
        let is_end = &self.buf[after..after + 2] == b"--";
        let (line_end, consumed) = if is_end {
            match find_line(&self.buf[after + 2..]) {
                Some((le, c)) => (after + 2 + le, after + 2 + c),
                None => return Ok(false),
            }
        } else {
            match find_line(&self.buf[after..]) {
                Some((le, c)) => (after + le, after + c),
                None => return Ok(false),
            }
        };
        let _ = line_end;
        self.buf.drain(..consumed);

        self.phase = if is_end {
            PartPhase::End
        } else {
            PartPhase::PartHeaders
        };
        Ok(true)
    }

    fn consume_part_headers(&mut self) -> Result<bool, ParseError> {
        let Some((line_end, consumed)) = find_line(&self.buf) else {
            return Ok(false);
        };

        if line_end == 0 {
            self.buf.drain(..consumed);
            if self.current.is_none() {
                self.current = Some(PendingPart {
                    field_name: String::new(),
                    filename: None,
                    content_type: None,
                    body: Vec::new(),
                });
            }
            self.phase = PartPhase::PartBody;
            return Ok(true);
        }

        let line = self.buf[..line_end].to_vec();
        self.buf.drain(..consumed);
        let line = String::from_utf8(line).map_err(|_| ParseError::MalformedMultipart)?;

        let (name, value) = line.split_once(':').ok_or(ParseError::MalformedMultipart)?;
        let part = self.current.get_or_insert_with(|| PendingPart {
            field_name: String::new(),
            filename: None,
            content_type: None,
            body: Vec::new(),
        });

        match name.trim().to_ascii_lowercase().as_str() {
            "content-disposition" => {
                let (field_name, filename) = parse_content_disposition(value.trim());
                part.field_name = field_name;
                part.filename = filename;
            }
            "content-type" => part.content_type = Some(value.trim().to_string()),
            _ => {}
        }
        Ok(true)
    }

    fn consume_part_body(
        &mut self,
        uploads: &mut Vec<UploadedFile>,
        fields: &mut HashMap<String, String>,
    ) -> Result<bool, ParseError> {
        match find_subsequence(&self.buf, &self.boundary, 0) {
            Some(pos) => {
                // The boundary is always preceded by a CRLF (or bare LF)
                // that belongs to the delimiter, not the part body.
                let body_end = strip_trailing_line_break(&self.buf[..pos]);
                let part = self.current.take().ok_or(ParseError::MalformedMultipart)?;
                self.finish_part(part, body_end.to_vec(), uploads, fields);
                self.buf.drain(..pos);
                self.phase = PartPhase::Preamble;
                Ok(true)
            }
            None => {
                let margin = self.boundary.len() + 2;
                if self.buf.len() > margin {
                    let flush_len = self.buf.len() - margin;
                    let flushed: Vec<u8> = self.buf.drain(..flush_len).collect();
                    if let Some(part) = self.current.as_mut() {
                        part.body.extend(flushed);
                    }
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn finish_part(
        &self,
        part: PendingPart,
        trailing: Vec<u8>,
        uploads: &mut Vec<UploadedFile>,
        fields: &mut HashMap<String, String>,
    ) {
        let mut body = part.body;
        body.extend(trailing);

        match part.filename {
            Some(filename) => uploads.push(UploadedFile {
                field_name: part.field_name,
                filename,
                content_type: part.content_type,
                bytes: body,
            }),
            None => {
                let value = String::from_utf8_lossy(&body).into_owned();
                fields.insert(part.field_name, value);
            }
        }
    }
}

/// Trims exactly one trailing line break (`\r\n` or `\n`) — the one that
/// separates the part body from the following boundary delimiter.
fn strip_trailing_line_break(body: &[u8]) -> &[u8] {
    if body.ends_with(b"\r\n") {
        &body[..body.len() - 2]
    } else if body.ends_with(b"\n") {
        &body[..body.len() - 1]
    } else {
        body
    }
}

/// Parses `form-data; name="field"; filename="f.txt"` into
/// `(field_name, Some(filename))`, or `(field_name, None)` when no
/// `filename` parameter is present.
fn parse_content_disposition(value: &str) -> (String, Option<String>) {
    let mut field_name = String::new();
    let mut filename = None;

    for param in value.split(';').skip(1) {
        let param = param.trim();
        if let Some(v) = param.strip_prefix("name=") {
            field_name = v.trim_matches('"').to_string();
        } else if let Some(v) = param.strip_prefix("filename=") {
            filename = Some(v.trim_matches('"').to_string());
        }
    }

    (field_name, filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundary_body(boundary: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, filename, data) in parts {
            out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            match filename {
                Some(f) => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\r\n", name, f)
                        .as_bytes(),
                ),
                None => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        out
    }

    #[test]
    fn parses_single_field() {
        let raw = boundary_body("X", &[("title", None, b"hello")]);
        let mut parser = MultipartParser::new("--X".to_string()).unwrap();
        let mut uploads = Vec::new();
        let mut fields = HashMap::new();
        parser.feed(&raw, &mut uploads, &mut fields).unwrap();
        assert_eq!(fields.get("title"), Some(&"hello".to_string()));
        assert!(uploads.is_empty());
    }

    #[test]
    fn parses_file_and_field_mixed() {
        let raw = boundary_body(
            "X",
            &[("title", None, b"hi"), ("upload", Some("a.txt"), b"file-bytes")],
        );
        let mut parser = MultipartParser::new("--X".to_string()).unwrap();
        let mut uploads = Vec::new();
        let mut fields = HashMap::new();
        parser.feed(&raw, &mut uploads, &mut fields).unwrap();
        assert_eq!(fields.get("title"), Some(&"hi".to_string()));
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].filename, "a.txt");
        assert_eq!(uploads[0].bytes, b"file-bytes");
    }

    #[test]
    fn tolerates_byte_by_byte_fragmentation() {
        let raw = boundary_body("X", &[("upload", Some("a.bin"), b"\x00\x01binary\x02\x03")]);
        let mut parser = MultipartParser::new("--X".to_string()).unwrap();
        let mut uploads = Vec::new();
        let mut fields = HashMap::new();
        for byte in &raw {
            parser.feed(&[*byte], &mut uploads, &mut fields).unwrap();
        }
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].bytes, b"\x00\x01binary\x02\x03");
    }
}
