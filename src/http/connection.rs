//! Per-connection state the event loop owns (spec.md §3.4).
//!
//! A `Connection` bundles the socket, the in-progress request parser, the
//! pending write buffer, and whatever background action (CGI process or
//! streamed file download) is currently feeding that write buffer. The
//! event loop in `server.rs` drives all of this; this module only holds
//! the state and the mechanical read/write/reset operations.

use crate::cgi::CgiProcess;
use crate::config::ServerConfig;
use crate::http::request::HttpRequest;
use mio::net::TcpStream;
use mio::Token;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::Instant;

const READ_CHUNK: usize = 16384;
/// Backpressure threshold (spec.md §5): once this many unparsed bytes
/// are buffered for a connection whose action can't drain them yet
/// (e.g. a CGI child that is still starting up), stop polling it
/// readable until some of the backlog clears.
pub const MAX_PENDING_READ: usize = 1 << 20;

/// What is currently producing bytes for `write_buffer` besides a
/// already-fully-buffered response (spec.md §3.4).
pub enum ConnectionAction {
    None,
    Cgi(CgiProcess),
    FileDownload { file: File, remaining: usize },
}

impl std::fmt::Debug for ConnectionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionAction::None => write!(f, "None"),
            ConnectionAction::Cgi(_) => write!(f, "Cgi"),
            ConnectionAction::FileDownload { remaining, .. } => {
                write!(f, "FileDownload(remaining={})", remaining)
            }
        }
    }
}

pub struct Connection {
    pub stream: TcpStream,
    pub write_buffer: Vec<u8>,
    pub request: HttpRequest,
    pub port: u16,
    pub config_list: Vec<Arc<ServerConfig>>,
    pub server_config: Option<Arc<ServerConfig>>,
    pub action: ConnectionAction,
    pub closed: bool,
    /// Set once a complete response (or a terminal error) means this
    /// connection must close after the write buffer drains, even if the
    /// client asked to keep it alive (spec.md §9: keep-alive decision).
    pub close_after_write: bool,
    pub last_activity: Instant,
    /// mio tokens for this connection's in-flight CGI pipes, if any —
    /// the event loop keeps the reverse mapping (pipe token -> this
    /// connection's token) but needs these back to deregister on teardown.
    pub cgi_stdout_token: Option<Token>,
    pub cgi_stdin_token: Option<Token>,
    /// The matched location's `error_pages` for the CGI request currently
    /// in flight (spec.md §4.7 lookup order), consulted by the event loop
    /// when a spawn failure, timeout, or child crash needs to synthesize
    /// a response after `dispatch_request` has already returned.
    pub cgi_error_pages: HashMap<u16, String>,
}

impl Connection {
    pub fn new(stream: TcpStream, port: u16, config_list: Vec<Arc<ServerConfig>>) -> Self {
        Connection {
            stream,
            write_buffer: Vec::new(),
            request: HttpRequest::new(),
            port,
            config_list,
            server_config: None,
            action: ConnectionAction::None,
            closed: false,
            close_after_write: false,
            last_activity: Instant::now(),
            cgi_stdout_token: None,
            cgi_stdin_token: None,
            cgi_error_pages: HashMap::new(),
        }
    }

    pub fn should_close(&self) -> bool {
        self.closed && self.write_buffer.is_empty()
    }

    /// Picks the server block for this connection's `Host` header
    /// (spec.md §4.6 step 1), falling back to the default server on this
    /// port and finally the first declared one.
    pub fn resolve_server_config(&self) -> Arc<ServerConfig> {
        if let Some(host_header) = self.request.headers.get("host") {
            let hostname = host_header.split(':').next().unwrap_or("");
            if let Some(cfg) = self
                .config_list
                .iter()
                .find(|c| c.server_names.iter().any(|n| n == hostname))
            {
                return Arc::clone(cfg);
            }
        }
        self.config_list
            .iter()
            .find(|c| c.default_server)
            .or_else(|| self.config_list.first())
            .cloned()
            .expect("a connection always has at least one server config for its port")
    }

    /// Drains the socket into the request parser's feed buffer. Returns
    /// `true` on EOF or unrecoverable error, signalling the caller to
    /// close the connection once any pending write finishes.
    pub fn read_into(&mut self, out: &mut Vec<u8>) -> bool {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return true,
                Ok(n) => {
                    out.extend_from_slice(&buf[..n]);
                    if out.len() >= MAX_PENDING_READ {
                        return false;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
                Err(_) => return true,
            }
        }
    }

    /// Flushes as much of `write_buffer` to the socket as it will
    /// accept. Returns `true` if the connection should be torn down due
    /// to a write error.
    pub fn flush_write_buffer(&mut self) -> bool {
        match self.stream.write(&self.write_buffer) {
            Ok(n) => {
                self.write_buffer.drain(..n);
                false
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }

    /// Pulls the next chunk from an in-progress file download into the
    /// write buffer (spec.md §4.6 step 5, static file streaming).
    pub fn pump_file_download(&mut self) -> io::Result<()> {
        if let ConnectionAction::FileDownload { file, remaining } = &mut self.action {
            if *remaining == 0 {
                self.action = ConnectionAction::None;
                return Ok(());
            }
            let mut chunk = vec![0u8; READ_CHUNK.min(*remaining)];
            let n = file.read(&mut chunk)?;
            if n == 0 {
                self.action = ConnectionAction::None;
            } else {
                self.write_buffer.extend_from_slice(&chunk[..n]);
                *remaining -= n;
            }
        }
        Ok(())
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}
