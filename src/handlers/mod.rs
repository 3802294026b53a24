//! Static file, upload, and delete handlers (spec.md §4.6 steps 4-8).
//!
//! Each handler builds an [`HttpResponse`] (and, for file downloads, a
//! [`ConnectionAction`] to drive the rest of the transfer) from a
//! resolved [`RouteAction`]. CGI is handled separately in `cgi.rs` —
//! spawning a child process is a different shape of work than anything
//! here.

mod delete;
mod get;
mod upload;

pub use delete::handle_delete;
pub use get::handle_get;
pub use upload::handle_upload;
