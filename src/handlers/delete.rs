//! DELETE handling (spec.md §4.6 step 7).

use crate::config::ServerConfig;
use crate::error_page;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::router;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;

/// Removes the file named by `req`'s URI under `root`. Directories are
/// never removed (403) — this is a file deletion endpoint, not `rm -rf`.
pub fn handle_delete(
    req: &HttpRequest,
    root: &Path,
    server: &ServerConfig,
    location_pages: &HashMap<u16, String>,
) -> HttpResponse {
    let path = req.path();
    if path.contains("..") {
        return error_page::build(403, Some(server), Some(location_pages));
    }

    let target = router::resolve_under_root(root, path);

    // spec.md §4.6 step 7 also rejects "embedded path separators beyond
    // the location prefix" — guard against a crafted URI (or a symlink
    // planted under `root`) resolving to a file outside `root` entirely,
    // which a plain `..` substring check can't catch once symlinks are
    // involved.
    if !is_contained_in(&target, root) {
        return error_page::build(403, Some(server), Some(location_pages));
    }

    match std::fs::symlink_metadata(&target) {
        Ok(meta) if meta.is_dir() => error_page::build(403, Some(server), Some(location_pages)),
        Ok(_) => match std::fs::remove_file(&target) {
            Ok(()) => HttpResponse::new(204),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                error_page::build(403, Some(server), Some(location_pages))
            }
            Err(_) => error_page::build(500, Some(server), Some(location_pages)),
        },
        Err(e) if e.kind() == ErrorKind::NotFound => error_page::build(404, Some(server), Some(location_pages)),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            error_page::build(403, Some(server), Some(location_pages))
        }
        Err(_) => error_page::build(500, Some(server), Some(location_pages)),
    }
}

/// Whether `target`'s canonicalized parent directory falls under
/// `root`'s canonicalized form. Falls back to a non-canonicalized prefix
/// check when either side doesn't exist yet, since a target that hasn't
/// been created can't be canonicalized.
fn is_contained_in(target: &Path, root: &Path) -> bool {
    let root_canon = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let parent = target.parent().unwrap_or(target);
    let parent_canon = std::fs::canonicalize(parent).unwrap_or_else(|_| parent.to_path_buf());
    parent_canon.starts_with(&root_canon)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(uri: &str) -> HttpRequest {
        let mut r = HttpRequest::new();
        r.uri = uri.to_string();
        r
    }

    fn no_pages() -> HashMap<u16, String> {
        HashMap::new()
    }

    #[test]
    fn deletes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let server = ServerConfig::default();
        let res = handle_delete(&req("/a.txt"), dir.path(), &server, &no_pages());
        assert_eq!(res.status_code, 204);
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let server = ServerConfig::default();
        let res = handle_delete(&req("/missing.txt"), dir.path(), &server, &no_pages());
        assert_eq!(res.status_code, 404);
    }

    #[test]
    fn refuses_to_delete_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let server = ServerConfig::default();
        let res = handle_delete(&req("/sub"), dir.path(), &server, &no_pages());
        assert_eq!(res.status_code, 403);
        assert!(dir.path().join("sub").exists());
    }

    #[test]
    fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let server = ServerConfig::default();
        let res = handle_delete(&req("/../etc/passwd"), dir.path(), &server, &no_pages());
        assert_eq!(res.status_code, 403);
    }
}
