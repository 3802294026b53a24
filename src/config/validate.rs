//! Load-time invariants (spec.md §3.1): every port is bound by at least one
//! server, exactly one server per port is the default (the first declared),
//! and location paths are unique within a server.

use super::types::{AppConfig, ServerConfig};
use crate::error::{CleanError, Result};
use std::collections::{HashMap, HashSet};

pub fn finish(servers: Vec<ServerConfig>) -> Result<AppConfig> {
    let mut servers = servers;
    assign_default_servers(&mut servers);

    for server in &servers {
        let mut seen = HashSet::new();
        for loc in &server.locations {
            if !seen.insert(loc.path.as_str()) {
                return Err(CleanError::from(format!(
                    "duplicate location path '{}' within a server",
                    loc.path
                )));
            }
        }
    }

    if servers.is_empty() {
        return Err(CleanError::from("configuration defines no servers".to_string()));
    }

    Ok(AppConfig { servers })
}

/// First `ServerConfig` declared for a port becomes that port's default,
/// per spec.md §3.1 ("exactly one ServerConfig is designated the default
/// (first declared)").
fn assign_default_servers(servers: &mut [ServerConfig]) {
    let mut claimed: HashMap<u16, usize> = HashMap::new();
    for (idx, server) in servers.iter().enumerate() {
        for &port in &server.ports {
            claimed.entry(port).or_insert(idx);
        }
    }

    let default_indices: HashSet<usize> = claimed.values().copied().collect();
    for (idx, server) in servers.iter_mut().enumerate() {
        server.default_server = default_indices.contains(&idx);
    }
}
