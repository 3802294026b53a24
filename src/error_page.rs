//! Error-page resolution (spec.md §4.7).
//!
//! A non-2xx response looks up `code` first in the matched location's
//! `error_page` directives, then the server's, and falls back to a
//! synthesized plain-text body if neither has one or the file isn't
//! readable. Per SPEC_FULL.md's answer to the "which root resolves a
//! configured error page" open question, the page path is always
//! resolved against the *server*'s root, never a matched location's root
//! — a 404 inside `/uploads/` should not start looking for its error
//! page under `/uploads/errors/`.

use crate::config::ServerConfig;
use crate::http::HttpResponse;
use std::collections::HashMap;

/// Builds the final error response for `code`: `location_pages` (the
/// matched location's `error_pages`, if a location was matched) is
/// checked before `server`'s, matching spec.md §4.7's lookup order.
/// Falls back to a synthesized `"{code} {text}"` plain-text body when
/// neither has a readable page.
pub fn build(
    code: u16,
    server: Option<&ServerConfig>,
    location_pages: Option<&HashMap<u16, String>>,
) -> HttpResponse {
    if let Some(server) = server {
        let page = location_pages
            .and_then(|pages| pages.get(&code))
            .or_else(|| server.error_pages.get(&code));
        if let Some(page) = page {
            let path = server.root.join(page.trim_start_matches('/'));
            if let Ok(content) = std::fs::read(&path) {
                let mut res = HttpResponse::new(code);
                res.set_header("Content-Type", "text/html");
                res.set_body(content);
                return res;
            }
            weblog::warn!("configured error page for {} not readable: {:?}", code, path);
        }
    }

    let mut res = HttpResponse::new(code);
    res.set_header("Content-Type", "text/plain");
    res.set_body(format!("{} {}", code, crate::http::response::status_text(code)).into_bytes());
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn falls_back_to_synthesized_body_when_no_config() {
        let res = build(404, None, None);
        assert_eq!(res.status_code, 404);
        assert_eq!(res.body, b"404 Not Found");
    }

    #[test]
    fn falls_back_when_configured_page_is_missing_on_disk() {
        let mut server = ServerConfig::default();
        server.error_pages = HashMap::from([(500, "/missing.html".to_string())]);
        let res = build(500, Some(&server), None);
        assert_eq!(res.body, b"500 Internal Server Error");
    }

    #[test]
    fn serves_configured_page_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("404.html"), b"<h1>missing</h1>").unwrap();
        let mut server = ServerConfig::default();
        server.root = dir.path().to_path_buf();
        server.error_pages = HashMap::from([(404, "/404.html".to_string())]);
        let res = build(404, Some(&server), None);
        assert_eq!(res.body, b"<h1>missing</h1>");
    }

    #[test]
    fn location_error_page_takes_priority_over_server() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("loc_404.html"), b"<h1>loc</h1>").unwrap();
        std::fs::write(dir.path().join("srv_404.html"), b"<h1>srv</h1>").unwrap();
        let mut server = ServerConfig::default();
        server.root = dir.path().to_path_buf();
        server.error_pages = HashMap::from([(404, "/srv_404.html".to_string())]);
        let loc_pages = HashMap::from([(404, "/loc_404.html".to_string())]);
        let res = build(404, Some(&server), Some(&loc_pages));
        assert_eq!(res.body, b"<h1>loc</h1>");
    }

    #[test]
    fn falls_back_to_server_page_when_location_has_none_for_code() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("srv_500.html"), b"<h1>srv</h1>").unwrap();
        let mut server = ServerConfig::default();
        server.root = dir.path().to_path_buf();
        server.error_pages = HashMap::from([(500, "/srv_500.html".to_string())]);
        let loc_pages = HashMap::from([(404, "/loc_404.html".to_string())]);
        let res = build(500, Some(&server), Some(&loc_pages));
        assert_eq!(res.body, b"<h1>srv</h1>");
    }
}
