//! Walks the `confparse::Block` tree produced from the config file text into
//! the domain types in `config::types`. Grounded in the directive set
//! SPEC_FULL.md §6 fixes and in `examples/original_source/ConfigParser.cpp`'s
//! `listen`/`server_name`/`root`/`error_page` handling, generalized to the
//! full grammar (that draft ignored `location` blocks entirely).

use super::size::parse_size;
use super::types::{LocationConfig, ServerConfig};
use crate::error::{CleanError, Result};
use crate::http::Method;
use confparse::Block;
use std::path::PathBuf;
use std::str::FromStr;

pub fn load_servers(blocks: &[Block]) -> Result<Vec<ServerConfig>> {
    let mut servers = Vec::new();
    for block in blocks {
        if block.name != "server" {
            return Err(CleanError::from(format!(
                "unexpected top-level block '{}', expected 'server'",
                block.name
            )));
        }
        servers.push(load_server(block)?);
    }
    Ok(servers)
}

fn load_server(block: &Block) -> Result<ServerConfig> {
    let mut cfg = ServerConfig::default();

    for directive in &block.directives {
        match directive.name.as_str() {
            "listen" => {
                let port: u16 = directive
                    .args
                    .first()
                    .ok_or_else(|| CleanError::from("listen requires a port argument"))?
                    .parse()
                    .map_err(|_| CleanError::from("listen port must be a u16"))?;
                cfg.ports.push(port);
            }
            "server_name" => cfg.server_names.extend(directive.args.iter().cloned()),
            "root" => {
                cfg.root = PathBuf::from(
                    directive
                        .args
                        .first()
                        .ok_or_else(|| CleanError::from("root requires a path argument"))?,
                )
            }
            "client_max_body_size" => {
                let raw = directive
                    .args
                    .first()
                    .ok_or_else(|| CleanError::from("client_max_body_size requires a value"))?;
                cfg.client_max_body_size = parse_size(raw)?;
            }
            "error_page" => {
                let (code, path) = parse_error_page(&directive.args)?;
                cfg.error_pages.insert(code, path);
            }
            other => {
                return Err(CleanError::from(format!(
                    "unrecognized directive '{}' in server block",
                    other
                )));
            }
        }
    }

    for loc_block in block.blocks_named("location") {
        cfg.locations.push(load_location(loc_block)?);
    }

    if cfg.ports.is_empty() {
        return Err(CleanError::from(
            "server block has no 'listen' directive".to_string(),
        ));
    }

    Ok(cfg)
}

fn load_location(block: &Block) -> Result<LocationConfig> {
    let mut loc = LocationConfig::default();
    loc.path = block
        .args
        .first()
        .ok_or_else(|| CleanError::from("location block requires a path argument"))?
        .clone();

    for directive in &block.directives {
        match directive.name.as_str() {
            "root" => {
                loc.root = Some(PathBuf::from(
                    directive
                        .args
                        .first()
                        .ok_or_else(|| CleanError::from("root requires a path argument"))?,
                ))
            }
            "index" => {
                loc.index = Some(
                    directive
                        .args
                        .first()
                        .ok_or_else(|| CleanError::from("index requires a filename argument"))?
                        .clone(),
                )
            }
            "allow_methods" => {
                loc.allow_methods = directive
                    .args
                    .iter()
                    .map(|s| Method::from_str(s))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|_| CleanError::from("allow_methods contains an unknown method"))?;
            }
            "client_max_body_size" => {
                let raw = directive
                    .args
                    .first()
                    .ok_or_else(|| CleanError::from("client_max_body_size requires a value"))?;
                loc.client_max_body_size = Some(parse_size(raw)?);
            }
            "error_page" => {
                let (code, path) = parse_error_page(&directive.args)?;
                loc.error_pages.insert(code, path);
            }
            "cgi_path" => {
                loc.cgi_path = Some(PathBuf::from(
                    directive
                        .args
                        .first()
                        .ok_or_else(|| CleanError::from("cgi_path requires a path argument"))?,
                ))
            }
            "cgi_ext" => {
                loc.cgi_ext = Some(
                    directive
                        .args
                        .first()
                        .ok_or_else(|| CleanError::from("cgi_ext requires an extension argument"))?
                        .clone(),
                )
            }
            "cgi_timeout" => {
                let secs: u64 = directive
                    .args
                    .first()
                    .ok_or_else(|| CleanError::from("cgi_timeout requires a seconds argument"))?
                    .parse()
                    .map_err(|_| CleanError::from("cgi_timeout must be an integer"))?;
                loc.cgi_timeout = std::time::Duration::from_secs(secs);
            }
            "redirect" => {
                loc.redirect = Some(parse_redirect(&directive.args)?);
            }
            "upload_path" => {
                loc.upload_path = Some(PathBuf::from(
                    directive
                        .args
                        .first()
                        .ok_or_else(|| CleanError::from("upload_path requires a path argument"))?,
                ))
            }
            "autoindex" => {
                let value = directive
                    .args
                    .first()
                    .map(|s| s.as_str())
                    .unwrap_or("off");
                loc.autoindex = match value {
                    "on" => true,
                    "off" => false,
                    other => {
                        return Err(CleanError::from(format!(
                            "autoindex must be 'on' or 'off', found '{}'",
                            other
                        )));
                    }
                };
            }
            other => {
                return Err(CleanError::from(format!(
                    "unrecognized directive '{}' in location block",
                    other
                )));
            }
        }
    }

    Ok(loc)
}

fn parse_error_page(args: &[String]) -> Result<(u16, String)> {
    if args.len() != 2 {
        return Err(CleanError::from(
            "error_page requires exactly a status code and a path".to_string(),
        ));
    }
    let code: u16 = args[0]
        .parse()
        .map_err(|_| CleanError::from("error_page status code must be numeric"))?;
    Ok((code, args[1].clone()))
}

/// `redirect CODE URL` or bare `redirect URL` (defaults to 301).
fn parse_redirect(args: &[String]) -> Result<(u16, String)> {
    match args.len() {
        1 => Ok((301, args[0].clone())),
        2 => {
            let code: u16 = args[0]
                .parse()
                .map_err(|_| CleanError::from("redirect status code must be numeric"))?;
            Ok((code, args[1].clone()))
        }
        _ => Err(CleanError::from(
            "redirect takes a URL, or a status code and a URL".to_string(),
        )),
    }
}
