//! The event loop (spec.md §4.1): a single `mio::Poll` multiplexes every
//! listening socket, client socket, and CGI pipe in the process. Nothing
//! here blocks except two narrow, bounded exceptions spec.md §5 allows:
//! reaping a child whose stdout has already hit EOF, and force-killing
//! one that has timed out.
//!
//! Two token maps route pipe readiness back to the connection that owns
//! it (spec.md §5's "two maps: pipe_stdout -> client, pipe_stdin ->
//! client"); the connection itself only ever appears once, keyed by its
//! own token, in `connections`.

use crate::cgi::{self, CgiProcess};
use crate::config::AppConfig;
use crate::config::ServerConfig;
use crate::error::{CleanError, Result};
use crate::error_page;
use crate::handlers;
use crate::http::connection::{Connection, ConnectionAction};
use crate::http::request::{ParseError, ParserPhase};
use crate::http::response::HttpResponse;
use crate::listener;
use crate::router::{self, RouteAction, RoutingError};
use crate::timeouts;
use mio::net::TcpListener;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// How long a single `poll` wait blocks before returning empty, so the
/// timeout sweep runs regularly even on an otherwise idle server.
const POLL_TICK: std::time::Duration = std::time::Duration::from_millis(250);

pub struct Server {
    poll: Poll,
    listeners: HashMap<Token, (TcpListener, u16)>,
    port_servers: HashMap<u16, Vec<Arc<ServerConfig>>>,
    connections: HashMap<Token, Connection>,
    cgi_stdout_tokens: HashMap<Token, Token>,
    cgi_stdin_tokens: HashMap<Token, Token>,
    next_token: usize,
    config: Arc<AppConfig>,
}

impl Server {
    pub fn new(config: AppConfig) -> Result<Self> {
        let raw_listeners = listener::bind_all(&config)?;
        let poll = Poll::new().map_err(CleanError::from)?;

        let mut listeners = HashMap::new();
        let mut next_token = 0usize;
        for (mut l, port) in raw_listeners {
            let token = Token(next_token);
            next_token += 1;
            poll.registry()
                .register(&mut l, token, Interest::READABLE)
                .map_err(CleanError::from)?;
            listeners.insert(token, (l, port));
        }

        let server_arcs: Vec<Arc<ServerConfig>> =
            config.servers.iter().cloned().map(Arc::new).collect();
        let mut port_servers: HashMap<u16, Vec<Arc<ServerConfig>>> = HashMap::new();
        for arc in &server_arcs {
            for &port in &arc.ports {
                port_servers.entry(port).or_default().push(Arc::clone(arc));
            }
        }

        Ok(Server {
            poll,
            listeners,
            port_servers,
            connections: HashMap::new(),
            cgi_stdout_tokens: HashMap::new(),
            cgi_stdin_tokens: HashMap::new(),
            next_token,
            config: Arc::new(config),
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        loop {
            match self.poll.poll(&mut events, Some(POLL_TICK)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CleanError::from(e)),
            }

            self.run_timeout_tick()?;

            let ready: Vec<(Token, bool, bool)> = events
                .iter()
                .map(|e| (e.token(), e.is_readable(), e.is_writable()))
                .collect();

            for (token, readable, writable) in ready {
                if self.listeners.contains_key(&token) {
                    self.accept_all(token)?;
                } else if self.cgi_stdout_tokens.contains_key(&token) {
                    if readable {
                        self.handle_cgi_stdout_readable(token)?;
                    }
                } else if self.cgi_stdin_tokens.contains_key(&token) {
                    if writable {
                        self.handle_cgi_stdin_writable(token)?;
                    }
                } else if self.connections.contains_key(&token) {
                    if readable {
                        self.handle_client_readable(token)?;
                    }
                    if writable {
                        self.handle_client_writable(token)?;
                    }
                }
            }
        }
    }

    fn alloc_token(&mut self) -> Token {
        let t = self.next_token;
        self.next_token += 1;
        Token(t)
    }

    /// The largest `client_max_body_size` configured for any server or
    /// location bound to `port` — a safe, generous streaming ceiling used
    /// before the request's actual location is known (spec.md §4.6 step
    /// 3's authoritative per-location check happens later, in
    /// `router::resolve`).
    fn port_wide_max(&self, port: u16) -> usize {
        self.config
            .servers
            .iter()
            .filter(|s| s.ports.contains(&port))
            .map(|s| {
                let loc_max = s
                    .locations
                    .iter()
                    .filter_map(|l| l.client_max_body_size)
                    .max()
                    .unwrap_or(0);
                s.client_max_body_size.max(loc_max)
            })
            .max()
            .unwrap_or(crate::config::types::DEFAULT_CLIENT_MAX_BODY_SIZE)
    }

    fn accept_all(&mut self, listener_token: Token) -> Result<()> {
        let port = match self.listeners.get(&listener_token) {
            Some((_, p)) => *p,
            None => return Ok(()),
        };
        loop {
            let accepted = match self.listeners.get_mut(&listener_token) {
                Some((l, _)) => l.accept(),
                None => return Ok(()),
            };
            match accepted {
                Ok((mut stream, _addr)) => {
                    let token = self.alloc_token();
                    if let Err(e) = self.poll.registry().register(&mut stream, token, Interest::READABLE) {
                        weblog::warn!("failed to register accepted socket: {}", e);
                        continue;
                    }
                    let config_list = self.port_servers.get(&port).cloned().unwrap_or_default();
                    self.connections.insert(token, Connection::new(stream, port, config_list));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    weblog::warn!("accept failed on port {}: {}", port, e);
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_client_readable(&mut self, token: Token) -> Result<()> {
        let (eof, bytes, cgi_active) = {
            let conn = match self.connections.get_mut(&token) {
                Some(c) => c,
                None => return Ok(()),
            };
            let mut buf = Vec::new();
            let eof = conn.read_into(&mut buf);
            conn.touch();
            let cgi_active = matches!(conn.action, ConnectionAction::Cgi(_));
            (eof, buf, cgi_active)
        };

        if !bytes.is_empty() && !cgi_active {
            self.drive_parser(token, &bytes)?;
        }

        if eof {
            if let Some(conn) = self.connections.get_mut(&token) {
                conn.closed = true;
            }
            let still_cgi = self
                .connections
                .get(&token)
                .map(|c| matches!(c.action, ConnectionAction::Cgi(_)))
                .unwrap_or(false);
            if still_cgi {
                self.cancel_cgi(token);
            }
            self.maybe_close(token);
        }
        Ok(())
    }

    /// Feeds `initial_bytes` into the parser, dispatching every complete
    /// request found along the way, and keeps draining already-buffered
    /// pipelined bytes (feeding `&[]`) as long as each dispatch resets
    /// the parser for another request rather than handing off to CGI.
    fn drive_parser(&mut self, token: Token, initial_bytes: &[u8]) -> Result<()> {
        let port = match self.connections.get(&token) {
            Some(c) => c.port,
            None => return Ok(()),
        };
        let max_body = self.port_wide_max(port);

        let mut pending = initial_bytes.to_vec();
        loop {
            let phase = match self.connections.get_mut(&token) {
                Some(conn) => {
                    let fed = std::mem::take(&mut pending);
                    conn.request.feed(&fed, max_body)
                }
                None => return Ok(()),
            };

            match phase {
                ParserPhase::Complete => {
                    let keep_going = self.dispatch_request(token)?;
                    if !keep_going {
                        break;
                    }
                    let has_more = self
                        .connections
                        .get(&token)
                        .map(|c| c.request.has_buffered_bytes())
                        .unwrap_or(false);
                    if !has_more {
                        break;
                    }
                }
                ParserPhase::Error => {
                    self.handle_parse_error(token)?;
                    break;
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Resolves, routes, and answers (or spawns CGI for) the request that
    /// just completed parsing. Returns `true` if a synchronous response
    /// was produced and the connection is ready to try another pipelined
    /// request; `false` if a CGI child is now in flight and nothing more
    /// should be attempted on this connection until it finishes.
    fn dispatch_request(&mut self, token: Token) -> Result<bool> {
        let (server_config, route_result, wants_close) = {
            let conn = match self.connections.get_mut(&token) {
                Some(c) => c,
                None => return Ok(false),
            };
            let server_config = conn.resolve_server_config();
            conn.server_config = Some(Arc::clone(&server_config));
            let wants_close = conn
                .request
                .headers
                .get("connection")
                .map(|v| v.eq_ignore_ascii_case("close"))
                .unwrap_or(false);
            let route_result = router::resolve(&server_config, &conn.request);
            (server_config, route_result, wants_close)
        };

        if let Ok(RouteAction::Cgi { script, cgi_path, root, timeout, error_pages }) = &route_result {
            let spawn_result = match self.connections.get(&token) {
                Some(conn) => cgi::spawn(cgi_path, script, root, &conn.request, &server_config, *timeout),
                None => return Ok(false),
            };
            match spawn_result {
                Ok(process) => {
                    self.register_cgi(token, process)?;
                    if let Some(conn) = self.connections.get_mut(&token) {
                        conn.close_after_write = wants_close;
                        conn.cgi_error_pages = error_pages.clone();
                        conn.request.reset();
                    }
                    return Ok(false);
                }
                Err(e) => {
                    weblog::warn!("cgi spawn failed for {:?}: {}", script, e);
                    if let Some(conn) = self.connections.get_mut(&token) {
                        let res = error_page::build(500, Some(&server_config), Some(error_pages));
                        conn.write_buffer.extend_from_slice(&res.to_bytes());
                    }
                }
            }
        } else if let Some(conn) = self.connections.get_mut(&token) {
            build_synchronous_response(conn, route_result, &server_config);
        }

        if let Some(conn) = self.connections.get_mut(&token) {
            conn.close_after_write = wants_close;
            conn.request.reset();
        }
        self.arm_writable(token)?;
        Ok(true)
    }

    fn register_cgi(&mut self, token: Token, process: CgiProcess) -> Result<()> {
        let stdout_fd = process.stdout_fd();
        let stdin_fd = process.stdin_fd();

        let stdout_token = self.alloc_token();
        self.poll
            .registry()
            .register(&mut SourceFd(&stdout_fd), stdout_token, Interest::READABLE)
            .map_err(CleanError::from)?;
        self.cgi_stdout_tokens.insert(stdout_token, token);

        let stdin_token = if let Some(fd) = stdin_fd {
            let t = self.alloc_token();
            self.poll
                .registry()
                .register(&mut SourceFd(&fd), t, Interest::WRITABLE)
                .map_err(CleanError::from)?;
            self.cgi_stdin_tokens.insert(t, token);
            Some(t)
        } else {
            None
        };

        if let Some(conn) = self.connections.get_mut(&token) {
            conn.cgi_stdout_token = Some(stdout_token);
            conn.cgi_stdin_token = stdin_token;
            conn.action = ConnectionAction::Cgi(process);
        }
        Ok(())
    }

    fn handle_cgi_stdin_writable(&mut self, stdin_token: Token) -> Result<()> {
        let client_token = match self.cgi_stdin_tokens.get(&stdin_token) {
            Some(t) => *t,
            None => return Ok(()),
        };

        let mut fd_before = None;
        let mut done = false;
        if let Some(conn) = self.connections.get_mut(&client_token) {
            if let ConnectionAction::Cgi(process) = &mut conn.action {
                fd_before = process.stdin_fd();
                if let Err(e) = process.write_stdin() {
                    weblog::warn!("cgi stdin write failed: {}", e);
                    done = true;
                } else if !process.needs_stdin_write() {
                    done = true;
                }
            }
        }

        if done {
            if let Some(fd) = fd_before {
                let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
            }
            self.cgi_stdin_tokens.remove(&stdin_token);
            if let Some(conn) = self.connections.get_mut(&client_token) {
                conn.cgi_stdin_token = None;
            }
        }
        Ok(())
    }

    fn handle_cgi_stdout_readable(&mut self, stdout_token: Token) -> Result<()> {
        let client_token = match self.cgi_stdout_tokens.get(&stdout_token) {
            Some(t) => *t,
            None => return Ok(()),
        };

        let mut finished = false;
        let mut failed = false;
        if let Some(conn) = self.connections.get_mut(&client_token) {
            if let ConnectionAction::Cgi(process) = &mut conn.action {
                match process.read_stdout() {
                    Ok(true) => finished = true,
                    Ok(false) => {}
                    Err(e) => {
                        weblog::warn!("cgi stdout read failed: {}", e);
                        finished = true;
                        failed = true;
                    }
                }
            }
        }

        if finished {
            self.finish_cgi(client_token, stdout_token, failed)?;
        }
        Ok(())
    }

    /// Deregisters both CGI pipes (stdout now, stdin if it's still
    /// pending — a script that never reads its whole body), reaps the
    /// child, and queues its response for writing.
    fn finish_cgi(&mut self, client_token: Token, stdout_token: Token, failed: bool) -> Result<()> {
        if let Some(conn) = self.connections.get(&client_token) {
            if let ConnectionAction::Cgi(process) = &conn.action {
                let fd = process.stdout_fd();
                let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
            }
        }
        self.cgi_stdout_tokens.remove(&stdout_token);

        if let Some(conn) = self.connections.get_mut(&client_token) {
            conn.cgi_stdout_token = None;
            if let Some(stdin_token) = conn.cgi_stdin_token.take() {
                if let ConnectionAction::Cgi(process) = &conn.action {
                    if let Some(fd) = process.stdin_fd() {
                        let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
                    }
                }
                self.cgi_stdin_tokens.remove(&stdin_token);
            }
        }

        let conn = match self.connections.get_mut(&client_token) {
            Some(c) => c,
            None => return Ok(()),
        };
        let server = conn.server_config.clone();
        let error_pages = std::mem::take(&mut conn.cgi_error_pages);
        let action = std::mem::replace(&mut conn.action, ConnectionAction::None);

        let response = match action {
            ConnectionAction::Cgi(process) => {
                let parsed = process.finish();
                if failed {
                    error_page::build(500, server.as_deref(), Some(&error_pages))
                } else {
                    parsed.unwrap_or_else(|_| error_page::build(500, server.as_deref(), Some(&error_pages)))
                }
            }
            _ => error_page::build(500, server.as_deref(), Some(&error_pages)),
        };

        conn.write_buffer.extend_from_slice(&response.to_bytes());
        self.arm_writable(client_token)?;
        Ok(())
    }

    fn handle_parse_error(&mut self, token: Token) -> Result<()> {
        let conn = match self.connections.get_mut(&token) {
            Some(c) => c,
            None => return Ok(()),
        };
        let server_config = conn.resolve_server_config();
        let status = conn
            .request
            .error
            .as_ref()
            .map(status_for_parse_error)
            .unwrap_or(400);
        let res = error_page::build(status, Some(&server_config), None);
        conn.write_buffer.extend_from_slice(&res.to_bytes());
        conn.close_after_write = true;
        self.arm_writable(token)?;
        Ok(())
    }

    fn handle_client_writable(&mut self, token: Token) -> Result<()> {
        let mut write_error = false;
        if let Some(conn) = self.connections.get_mut(&token) {
            if conn.write_buffer.is_empty() {
                let _ = conn.pump_file_download();
            }
            if !conn.write_buffer.is_empty() {
                write_error = conn.flush_write_buffer();
                conn.touch();
            }
            if write_error {
                conn.closed = true;
            }
        }

        let done_responding = self
            .connections
            .get(&token)
            .map(|c| c.write_buffer.is_empty() && matches!(c.action, ConnectionAction::None))
            .unwrap_or(false);

        if !done_responding {
            self.maybe_close(token);
            return Ok(());
        }

        let should_close = self
            .connections
            .get(&token)
            .map(|c| c.closed || c.close_after_write)
            .unwrap_or(true);

        if should_close {
            self.destroy_connection(token);
            return Ok(());
        }

        if let Some(conn) = self.connections.get_mut(&token) {
            let _ = self.poll.registry().reregister(&mut conn.stream, token, Interest::READABLE);
        }
        self.drive_parser(token, &[])
    }

    fn run_timeout_tick(&mut self) -> Result<()> {
        let now = Instant::now();

        for token in timeouts::timed_out_cgi(&self.connections) {
            self.timeout_cgi(token)?;
        }

        for token in timeouts::idle_connections(&self.connections, now) {
            self.destroy_connection(token);
        }

        Ok(())
    }

    fn timeout_cgi(&mut self, token: Token) -> Result<()> {
        self.cancel_cgi(token);
        if let Some(conn) = self.connections.get_mut(&token) {
            let server = conn.server_config.clone();
            let error_pages = std::mem::take(&mut conn.cgi_error_pages);
            let res = error_page::build(504, server.as_deref(), Some(&error_pages));
            conn.write_buffer.clear();
            conn.write_buffer.extend_from_slice(&res.to_bytes());
            conn.close_after_write = true;
        }
        self.arm_writable(token)?;
        Ok(())
    }

    /// Kills and reaps an in-flight CGI child and deregisters its pipes,
    /// leaving the connection itself in place for the caller to decide
    /// what happens next (spec.md §4.4 cancellation).
    fn cancel_cgi(&mut self, token: Token) {
        if let Some(conn) = self.connections.get_mut(&token) {
            let action = std::mem::replace(&mut conn.action, ConnectionAction::None);
            if let ConnectionAction::Cgi(mut process) = action {
                if let Some(stdout_token) = conn.cgi_stdout_token.take() {
                    let fd = process.stdout_fd();
                    let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
                    self.cgi_stdout_tokens.remove(&stdout_token);
                }
                if let Some(stdin_token) = conn.cgi_stdin_token.take() {
                    if let Some(fd) = process.stdin_fd() {
                        let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
                    }
                    self.cgi_stdin_tokens.remove(&stdin_token);
                }
                process.kill();
            }
        }
    }

    fn maybe_close(&mut self, token: Token) {
        let should = self.connections.get(&token).map(|c| c.should_close()).unwrap_or(false);
        if should {
            self.destroy_connection(token);
        }
    }

    fn destroy_connection(&mut self, token: Token) {
        self.cancel_cgi(token);
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
        }
    }

    fn arm_writable(&mut self, token: Token) -> Result<()> {
        if let Some(conn) = self.connections.get_mut(&token) {
            self.poll
                .registry()
                .reregister(&mut conn.stream, token, Interest::WRITABLE)
                .map_err(CleanError::from)?;
        }
        Ok(())
    }
}

/// Builds the response for every non-CGI [`RouteAction`] (CGI is handled
/// by the caller, since spawning needs `&mut Server` to register pipes).
fn build_synchronous_response(
    conn: &mut Connection,
    route_result: std::result::Result<RouteAction, RoutingError>,
    server_config: &Arc<ServerConfig>,
) {
    let res: HttpResponse = match route_result {
        Ok(RouteAction::Redirect { code, location }) => HttpResponse::redirect(code, &location),
        Ok(RouteAction::Static { root, index, autoindex, error_pages }) => {
            let (res, action) = handlers::handle_get(
                &conn.request,
                &root,
                index.as_deref(),
                autoindex,
                server_config,
                &error_pages,
            );
            conn.action = action;
            res
        }
        Ok(RouteAction::Delete { root, error_pages }) => {
            handlers::handle_delete(&conn.request, &root, server_config, &error_pages)
        }
        Ok(RouteAction::Upload { dir, error_pages }) => {
            handlers::handle_upload(&conn.request, &dir, server_config, &error_pages)
        }
        Ok(RouteAction::Cgi { .. }) => unreachable!("CGI is handled by the caller before this point"),
        Err(RoutingError::NotFound) => error_page::build(404, Some(server_config), None),
        Err(RoutingError::MethodNotAllowed { error_pages }) => {
            error_page::build(405, Some(server_config), Some(&error_pages))
        }
        Err(RoutingError::PayloadTooLarge { error_pages }) => {
            error_page::build(413, Some(server_config), Some(&error_pages))
        }
    };
    conn.write_buffer.extend_from_slice(&res.to_bytes());
}

fn status_for_parse_error(err: &ParseError) -> u16 {
    match err {
        ParseError::PayloadTooLarge => 413,
        _ => 400,
    }
}
