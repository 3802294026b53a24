//! Error handling (SPEC_FULL.md §7): a boxed-`dyn Error` wrapper used for
//! the one place a failure can legitimately escape a connection's scope —
//! configuration load and listener bind, both of which abort the process.
//! Per-connection errors never use this type; they become a status code
//! inside the connection's own handler (see `router::RoutingError` and
//! `http::request::ParseError`).

use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};

pub struct CleanError(pub Box<dyn Error>);

impl Debug for CleanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for CleanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[31mERROR\x1b[0m: {}", self.0)
    }
}

impl Error for CleanError {}

impl From<confparse::ConfigError> for CleanError {
    fn from(e: confparse::ConfigError) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<std::io::Error> for CleanError {
    fn from(e: std::io::Error) -> Self {
        CleanError(Box::new(e))
    }
}

impl From<std::net::AddrParseError> for CleanError {
    fn from(e: std::net::AddrParseError) -> Self {
        CleanError(Box::new(e))
    }
}

#[derive(Debug)]
struct Generic(String);

impl Display for Generic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for Generic {}

impl From<String> for CleanError {
    fn from(s: String) -> Self {
        CleanError(Box::new(Generic(s)))
    }
}

impl From<&str> for CleanError {
    fn from(s: &str) -> Self {
        CleanError(Box::new(Generic(s.to_string())))
    }
}

pub type Result<T> = std::result::Result<T, CleanError>;
