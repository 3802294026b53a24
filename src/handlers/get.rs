//! Static file serving (spec.md §4.6 steps 5-6).

use crate::config::ServerConfig;
use crate::error_page;
use crate::http::connection::ConnectionAction;
use crate::http::request::HttpRequest;
use crate::http::response::{generate_autoindex, mime_type_for, HttpResponse};
use crate::router;
use std::fs::File;
use std::io::ErrorKind;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Resolves `req`'s URI under `root` and either hands back a 200 with a
/// [`ConnectionAction::FileDownload`] to stream the body, or a finished
/// error response with no further action.
pub fn handle_get(
    req: &HttpRequest,
    root: &Path,
    index: Option<&str>,
    autoindex: bool,
    server: &ServerConfig,
    location_pages: &HashMap<u16, String>,
) -> (HttpResponse, ConnectionAction) {
    let uri_path = req.path();
    let fs_path = router::resolve_under_root(root, uri_path);

    if uri_path.ends_with('/') {
        let index_path = fs_path.join(index.unwrap_or(crate::config::types::DEFAULT_INDEX));
        if let Ok(meta) = std::fs::metadata(&index_path) {
            if meta.is_file() {
                return serve_file(&index_path, meta.len(), server, location_pages);
            }
        }
        return if autoindex {
            match std::fs::metadata(&fs_path) {
                Ok(meta) if meta.is_dir() => {
                    (generate_autoindex(&fs_path, uri_path), ConnectionAction::None)
                }
                _ => (error_page::build(404, Some(server), Some(location_pages)), ConnectionAction::None),
            }
        } else {
            (error_page::build(403, Some(server), Some(location_pages)), ConnectionAction::None)
        };
    }

    match std::fs::metadata(&fs_path) {
        Ok(meta) if meta.is_file() => serve_file(&fs_path, meta.len(), server, location_pages),
        Ok(meta) if meta.is_dir() => {
            if autoindex {
                (generate_autoindex(&fs_path, uri_path), ConnectionAction::None)
            } else {
                (error_page::build(403, Some(server), Some(location_pages)), ConnectionAction::None)
            }
        }
        Ok(_) => (error_page::build(404, Some(server), Some(location_pages)), ConnectionAction::None),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            match retry_with_html_suffix(&fs_path) {
                Some((retry_path, len)) => serve_file(&retry_path, len, server, location_pages),
                None => (error_page::build(404, Some(server), Some(location_pages)), ConnectionAction::None),
            }
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            (error_page::build(403, Some(server), Some(location_pages)), ConnectionAction::None)
        }
        Err(_) => (error_page::build(404, Some(server), Some(location_pages)), ConnectionAction::None),
    }
}

/// A URI with no extension that doesn't exist verbatim gets one retry
/// with `.html` appended (spec.md §4.6 step 5).
fn retry_with_html_suffix(fs_path: &Path) -> Option<(PathBuf, u64)> {
    if fs_path.extension().is_some() {
        return None;
    }
    let mut name = fs_path.file_name()?.to_os_string();
    name.push(".html");
    let retry = fs_path.with_file_name(name);
    let meta = std::fs::metadata(&retry).ok()?;
    if meta.is_file() {
        Some((retry, meta.len()))
    } else {
        None
    }
}

fn serve_file(
    path: &Path,
    len: u64,
    server: &ServerConfig,
    location_pages: &HashMap<u16, String>,
) -> (HttpResponse, ConnectionAction) {
    match File::open(path) {
        Ok(file) => {
            let mut res = HttpResponse::new(200);
            res.set_header("Content-Type", mime_type_for(path));
            res.set_header("Content-Length", len.to_string());
            let action = ConnectionAction::FileDownload {
                file,
                remaining: len as usize,
            };
            (res, action)
        }
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            (error_page::build(403, Some(server), Some(location_pages)), ConnectionAction::None)
        }
        Err(_) => (error_page::build(404, Some(server), Some(location_pages)), ConnectionAction::None),
    }
}
