//! Configuration tree (spec.md §3.1) and the loader that turns a
//! `confparse`-parsed config file into it.

pub mod display;
pub mod loader;
pub mod size;
pub mod types;
pub mod validate;

pub use display::display_config;
pub use types::{AppConfig, LocationConfig, ServerConfig};

use crate::error::Result;

pub fn load(source: &str) -> Result<AppConfig> {
    let blocks = confparse::parse_config(source)?;
    let servers = loader::load_servers(&blocks)?;
    validate::finish(servers)
}
