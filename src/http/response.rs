//! The outbound HTTP response envelope (spec.md §3.3).
//!
//! Headers are kept as an ordered list rather than a map: the order a
//! handler sets them in is the order they are written on the wire, which
//! matters when CGI output headers (`cgi.rs`) are copied through mostly
//! unchanged. Error-page body resolution lives in `error_page.rs`, not
//! here — this module only knows how to serialize a response that has
//! already been built.

use std::path::Path;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub version: String,
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status_code: u16) -> Self {
        HttpResponse {
            version: "HTTP/1.1".to_string(),
            status_text: status_text(status_code).to_string(),
            status_code,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn set_status(&mut self, code: u16) {
        self.status_code = code;
        self.status_text = status_text(code).to_string();
    }

    /// Sets a header, replacing any prior value under the same
    /// case-insensitive name and keeping its original position.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(existing) = self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            existing.1 = value;
        } else {
            self.headers.push((name.to_string(), value));
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.set_header("Content-Length", body.len().to_string());
        self.body = body;
    }

    pub fn redirect(code: u16, location: &str) -> Self {
        let mut res = HttpResponse::new(code);
        res.set_header("Location", location);
        res.set_body(Vec::new());
        res
    }

    /// Serializes status line, headers, and body. Content-Length is
    /// always present and correct; Transfer-Encoding is never emitted
    /// (spec.md §6 — the body is always complete before the first byte
    /// of the response is written).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.head_bytes();
        out.extend_from_slice(&self.body);
        out
    }

    pub fn head_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(
            format!("{} {} {}\r\n", self.version, self.status_code, self.status_text).as_bytes(),
        );
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        if self.header("Content-Length").is_none() {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Looks up a MIME type by file extension (spec.md §4.6 step 5, static
/// file serving); falls back to a generic octet stream for anything
/// unrecognized, which browsers treat as a download.
pub fn mime_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("xml") => "application/xml",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// Builds a minimal directory listing page (spec.md §4.6 step 6,
/// autoindex). Entries are not otherwise sorted beyond what
/// `std::fs::read_dir` yields.
pub fn generate_autoindex(dir: &Path, uri_path: &str) -> HttpResponse {
    let mut body = format!(
        "<!DOCTYPE html><html><head><title>Index of {0}</title></head><body><h1>Index of {0}</h1><ul>",
        uri_path
    );

    if uri_path != "/" {
        body.push_str("<li><a href=\"../\">../</a></li>");
    }

    match std::fs::read_dir(dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                let suffix = if is_dir { "/" } else { "" };
                body.push_str(&format!(
                    "<li><a href=\"{0}{1}\">{0}{1}</a></li>",
                    name, suffix
                ));
            }
        }
        Err(_) => {
            let mut res = HttpResponse::new(500);
            res.set_body(b"failed to read directory".to_vec());
            return res;
        }
    }

    body.push_str("</ul></body></html>");

    let mut res = HttpResponse::new(200);
    res.set_header("Content-Type", "text/html");
    res.set_body(body.into_bytes());
    res
}
