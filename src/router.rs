//! Request routing (spec.md §4.6): picks the server block, then the
//! location, then decides what kind of action the matched location
//! implies.

use crate::config::{AppConfig, LocationConfig, ServerConfig};
use crate::http::{HttpRequest, Method};
use std::collections::HashMap;
use std::path::PathBuf;

/// A routing failure, carrying the matched location's `error_page`
/// directives (if a location was matched before the failure) so
/// `error_page::build` can consult them before the server's own
/// (spec.md §4.7 lookup order). `NotFound` has none: no location
/// matched, so only the server's error pages apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    NotFound,
    MethodNotAllowed { error_pages: HashMap<u16, String> },
    PayloadTooLarge { error_pages: HashMap<u16, String> },
}

/// The body-size ceiling that applies to `loc` (spec.md §4.6 step 3): a
/// location's own `client_max_body_size` overrides its server's, the
/// server's value otherwise stands.
pub fn effective_max_body_size(server: &ServerConfig, loc: &LocationConfig) -> usize {
    loc.client_max_body_size.unwrap_or(server.client_max_body_size)
}

/// What a matched location tells the event loop to do with this request
/// (spec.md §4.6 steps 3-8).
#[derive(Debug)]
pub enum RouteAction {
    Redirect { code: u16, location: String },
    Cgi { script: PathBuf, cgi_path: PathBuf, root: PathBuf, timeout: std::time::Duration, error_pages: HashMap<u16, String> },
    Upload { dir: PathBuf, error_pages: HashMap<u16, String> },
    /// Serve a file or directory under `root` (spec.md §4.6 steps 5-6).
    Static { root: PathBuf, index: Option<String>, autoindex: bool, error_pages: HashMap<u16, String> },
    Delete { root: PathBuf, error_pages: HashMap<u16, String> },
}

/// Picks the server block for `port`/`host` (spec.md §4.6 step 1): exact
/// `server_name` match among the servers bound to this port, falling
/// back to the first-declared server on that port (the `default_server`
/// one, per config load-time invariant).
pub fn select_server<'a>(config: &'a AppConfig, port: u16, host: &str) -> Option<&'a ServerConfig> {
    let candidates = config.servers_for_port(port);
    let host = host.split(':').next().unwrap_or(host);

    candidates
        .iter()
        .find(|s| s.server_names.iter().any(|n| n == host))
        .or_else(|| candidates.iter().find(|s| s.default_server))
        .or_else(|| candidates.first())
        .copied()
}

/// Resolves a request against `server` into a concrete action, or a
/// routing error if the path matches nothing servable or the method
/// isn't allowed at the matched location (spec.md §4.6 steps 2-8).
pub fn resolve(server: &ServerConfig, req: &HttpRequest) -> Result<RouteAction, RoutingError> {
    let path = req.path();
    let location = server.match_location(path);

    let loc = location.ok_or(RoutingError::NotFound)?;

    let declared_size = req.content_length_header().max(req.body.len());
    if declared_size > effective_max_body_size(server, loc) {
        return Err(RoutingError::PayloadTooLarge { error_pages: loc.error_pages.clone() });
    }

    if !loc.method_allowed(&req.method) {
        return Err(RoutingError::MethodNotAllowed { error_pages: loc.error_pages.clone() });
    }

    if let Some((code, target)) = &loc.redirect {
        return Ok(RouteAction::Redirect { code: *code, location: target.clone() });
    }

    if loc.is_cgi_target(path) {
        let root = loc.root.clone().unwrap_or_else(|| server.root.clone());
        let script = resolve_under_root(&root, path);
        let cgi_path = loc.cgi_path.clone().expect("is_cgi_target implies cgi_path is set");
        return Ok(RouteAction::Cgi {
            script,
            cgi_path,
            root,
            timeout: loc.cgi_timeout,
            error_pages: loc.error_pages.clone(),
        });
    }

    if req.method == Method::Post {
        return match &loc.upload_path {
            Some(dir) => Ok(RouteAction::Upload { dir: dir.clone(), error_pages: loc.error_pages.clone() }),
            // spec.md §4.6 step 9: POST without an upload_path is simply
            // not handled at this location, regardless of allow_methods.
            None => Err(RoutingError::MethodNotAllowed { error_pages: loc.error_pages.clone() }),
        };
    }

    if req.method == Method::Delete {
        let root = loc.root.clone().unwrap_or_else(|| server.root.clone());
        return Ok(RouteAction::Delete { root, error_pages: loc.error_pages.clone() });
    }

    if req.method != Method::Get {
        return Err(RoutingError::MethodNotAllowed { error_pages: loc.error_pages.clone() });
    }

    let root = loc.root.clone().unwrap_or_else(|| server.root.clone());
    Ok(RouteAction::Static {
        root,
        index: loc.index.clone(),
        autoindex: loc.autoindex,
        error_pages: loc.error_pages.clone(),
    })
}

/// Maps a request path onto the filesystem by joining it onto `root`
/// (spec.md §4.6 step 4: `root` behaves like nginx's `root`, not
/// `alias` — the full URI path is appended, location prefix included).
pub fn resolve_under_root(root: &std::path::Path, uri_path: &str) -> PathBuf {
    root.join(uri_path.trim_start_matches('/'))
}

pub fn location_for<'a>(server: &'a ServerConfig, path: &str) -> Option<&'a LocationConfig> {
    server.match_location(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load;

    fn sample_config() -> AppConfig {
        load(
            r#"
            server {
                listen 8080;
                server_name example.com;
                root /var/www;

                location / {
                    index index.html;
                }

                location /cgi-bin {
                    cgi_path /usr/bin/python3;
                    cgi_ext .py;
                }

                location /upload {
                    upload_path /var/uploads;
                    allow_methods POST;
                }
            }
            "#,
        )
        .unwrap()
    }

    fn req(method: Method, uri: &str) -> HttpRequest {
        let mut r = HttpRequest::new();
        r.method = method;
        r.uri = uri.to_string();
        r
    }

    #[test]
    fn selects_default_server_when_no_name_matches() {
        let cfg = sample_config();
        let server = select_server(&cfg, 8080, "unknown-host").unwrap();
        assert!(server.default_server);
    }

    #[test]
    fn resolves_static_route_with_longest_prefix() {
        let cfg = sample_config();
        let server = select_server(&cfg, 8080, "example.com").unwrap();
        let action = resolve(server, &req(Method::Get, "/index.html")).unwrap();
        matches!(action, RouteAction::Static { .. });
    }

    #[test]
    fn resolves_cgi_route() {
        let cfg = sample_config();
        let server = select_server(&cfg, 8080, "example.com").unwrap();
        let action = resolve(server, &req(Method::Get, "/cgi-bin/hello.py")).unwrap();
        match action {
            RouteAction::Cgi { script, .. } => {
                assert_eq!(script, std::path::PathBuf::from("/var/www/cgi-bin/hello.py"));
            }
            other => panic!("expected Cgi, got {:?}", other),
        }
    }

    #[test]
    fn rejects_disallowed_method() {
        let cfg = sample_config();
        let server = select_server(&cfg, 8080, "example.com").unwrap();
        let err = resolve(server, &req(Method::Delete, "/upload/foo")).unwrap_err();
        assert!(matches!(err, RoutingError::MethodNotAllowed { .. }));
    }

    #[test]
    fn rejects_body_over_effective_limit() {
        let cfg = sample_config();
        let server = select_server(&cfg, 8080, "example.com").unwrap();
        let mut r = req(Method::Post, "/upload/foo");
        r.headers.insert("content-length", (server.client_max_body_size + 1).to_string());
        let err = resolve(server, &r).unwrap_err();
        assert!(matches!(err, RoutingError::PayloadTooLarge { .. }));
    }
}
