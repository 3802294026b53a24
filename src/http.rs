//! HTTP/1.1 wire types (spec.md §3.2/§3.3/§3.5, §4.2/§4.3).
//!
//! `request` holds the resumable parser (`feed`) and the structured
//! request it builds; `multipart` is the nested sub-machine §4.3
//! describes; `response` is the outbound envelope; `connection` is the
//! per-client state the event loop owns (spec.md §3.4).

pub mod connection;
pub mod multipart;
pub mod request;
pub mod response;

pub use connection::Connection;
pub use multipart::UploadedFile;
pub use request::{HttpRequest, Method, ParseError, ParserPhase};
pub use response::HttpResponse;
