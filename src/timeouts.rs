//! Idle-connection and CGI wall-clock timeout sweeps (SPEC_FULL.md
//! supplemental feature, grounded on the teacher's own sweep-the-
//! connection-map draft of this file).
//!
//! These are pure queries over the connection map — the actual
//! deregistration/kill/response-building happens in `server.rs`, which
//! owns the `Poll` and the CGI pipe token maps these sweeps can't see.

use crate::http::connection::{Connection, ConnectionAction};
use mio::Token;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long a connection may sit with no read or write activity before
/// the event loop tears it down (spec.md §5: resource bounds).
pub const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Connections idle longer than [`IDLE_CONNECTION_TIMEOUT`]. A
/// connection with an in-flight CGI is still subject to this — the CGI's
/// own timeout governs the child process, not the client socket's idle
/// clock, and a client that stops reading for a minute is gone either way.
pub fn idle_connections(connections: &HashMap<Token, Connection>, now: Instant) -> Vec<Token> {
    connections
        .iter()
        .filter(|(_, conn)| now.duration_since(conn.last_activity) > IDLE_CONNECTION_TIMEOUT)
        .map(|(token, _)| *token)
        .collect()
}

/// CGI processes that have run past their configured `cgi_timeout`
/// (spec.md §4.4).
pub fn timed_out_cgi(connections: &HashMap<Token, Connection>) -> Vec<Token> {
    connections
        .iter()
        .filter_map(|(token, conn)| match &conn.action {
            ConnectionAction::Cgi(process) if process.timed_out() => Some(*token),
            _ => None,
        })
        .collect()
}
