//! Listener setup (spec.md §4.1): one non-blocking listening socket per
//! unique port declared across every server block, so virtual hosts that
//! share a port share a single socket instead of each binding their own.

use crate::config::AppConfig;
use crate::error::Result;
use mio::net::TcpListener;
use std::collections::HashSet;
use std::net::SocketAddr;

/// Binds and starts listening on every unique port in `config`, in
/// declaration order. Each [`TcpListener`] is already non-blocking (mio
/// sets this at construction) and has a kernel backlog sized by the OS
/// default.
pub fn bind_all(config: &AppConfig) -> Result<Vec<(TcpListener, u16)>> {
    let mut ports = Vec::new();
    let mut seen = HashSet::new();
    for server in &config.servers {
        for &port in &server.ports {
            if seen.insert(port) {
                ports.push(port);
            }
        }
    }

    let mut listeners = Vec::with_capacity(ports.len());
    for port in ports {
        let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
        let listener = TcpListener::bind(addr)
            .map_err(|e| format!("failed to bind 0.0.0.0:{}: {}", port, e))?;
        weblog::info!("listening on 0.0.0.0:{}", port);
        listeners.push((listener, port));
    }

    Ok(listeners)
}
