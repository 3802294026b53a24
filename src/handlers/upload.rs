//! multipart/form-data upload handling (spec.md §4.6 step 8).
//!
//! The request parser (`http/multipart.rs`) has already split the body
//! into [`UploadedFile`](crate::http::UploadedFile)s by the time a
//! request reaches here — this handler only has to write them to disk.

use crate::config::ServerConfig;
use crate::error_page;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use nix::unistd::{access, AccessFlags};
use std::collections::HashMap;
use std::path::Path;

/// Writes every uploaded file in `req` into `dir`, keyed by the
/// submitted filename's basename (directory components are stripped so a
/// crafted `filename` can't escape `dir`).
pub fn handle_upload(
    req: &HttpRequest,
    dir: &Path,
    server: &ServerConfig,
    location_pages: &HashMap<u16, String>,
) -> HttpResponse {
    let is_multipart = req
        .headers
        .get("content-type")
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false);
    if !is_multipart {
        return error_page::build(400, Some(server), Some(location_pages));
    }

    match std::fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => {}
        _ => return error_page::build(500, Some(server), Some(location_pages)),
    }

    if access(dir, AccessFlags::W_OK).is_err() {
        return error_page::build(500, Some(server), Some(location_pages));
    }

    if req.uploaded_files.is_empty() {
        return error_page::build(400, Some(server), Some(location_pages));
    }

    for file in &req.uploaded_files {
        let name = Path::new(&file.filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let dest = dir.join(name);
        if std::fs::write(&dest, &file.bytes).is_err() {
            return error_page::build(500, Some(server), Some(location_pages));
        }
    }

    let mut res = HttpResponse::new(200);
    res.set_header("Content-Type", "text/plain");
    res.set_body(format!("{} file(s) uploaded", req.uploaded_files.len()).into_bytes());
    res
}
