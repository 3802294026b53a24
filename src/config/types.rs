use crate::http::Method;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CLIENT_MAX_BODY_SIZE: usize = 1_048_576; // 1 MiB
pub const DEFAULT_CGI_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_INDEX: &str = "index.html";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub servers: Vec<ServerConfig>,
}

impl AppConfig {
    /// All servers bound to `port`, in declaration order.
    pub fn servers_for_port(&self, port: u16) -> Vec<&ServerConfig> {
        self.servers
            .iter()
            .filter(|s| s.ports.contains(&port))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub ports: Vec<u16>,
    pub server_names: Vec<String>,
    pub root: PathBuf,
    pub client_max_body_size: usize,
    pub error_pages: HashMap<u16, String>,
    pub locations: Vec<LocationConfig>,
    pub default_server: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            server_names: Vec::new(),
            root: PathBuf::from("./www"),
            client_max_body_size: DEFAULT_CLIENT_MAX_BODY_SIZE,
            error_pages: HashMap::new(),
            locations: Vec::new(),
            default_server: false,
        }
    }
}

impl ServerConfig {
    /// Longest-prefix match among this server's locations (spec.md §4.6 step 2).
    /// Uniqueness of location paths (enforced at load time) rules out ties.
    pub fn match_location(&self, uri_path: &str) -> Option<&LocationConfig> {
        self.locations
            .iter()
            .filter(|loc| uri_path.starts_with(loc.path.as_str()))
            .max_by_key(|loc| loc.path.len())
    }
}

#[derive(Debug, Clone)]
pub struct LocationConfig {
    pub path: String,
    pub root: Option<PathBuf>,
    pub index: Option<String>,
    pub allow_methods: Vec<Method>,
    pub client_max_body_size: Option<usize>,
    pub error_pages: HashMap<u16, String>,
    pub cgi_path: Option<PathBuf>,
    pub cgi_ext: Option<String>,
    pub cgi_timeout: Duration,
    pub redirect: Option<(u16, String)>,
    pub upload_path: Option<PathBuf>,
    pub autoindex: bool,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            root: None,
            index: None,
            allow_methods: Vec::new(),
            client_max_body_size: None,
            error_pages: HashMap::new(),
            cgi_path: None,
            cgi_ext: None,
            cgi_timeout: DEFAULT_CGI_TIMEOUT,
            redirect: None,
            upload_path: None,
            autoindex: false,
        }
    }
}

impl LocationConfig {
    pub fn method_allowed(&self, method: &Method) -> bool {
        self.allow_methods.is_empty() || self.allow_methods.contains(method)
    }

    pub fn is_cgi_target(&self, uri_path: &str) -> bool {
        match (&self.cgi_path, &self.cgi_ext) {
            (Some(_), Some(ext)) => uri_path.ends_with(ext.as_str()),
            _ => false,
        }
    }
}
