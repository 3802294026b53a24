//! Black-box tests for virtual-host selection and request routing
//! (spec.md §4.6), built on top of a real parsed configuration rather
//! than hand-built config structs, so the grammar and the router are
//! exercised together.

use webserv::config;
use webserv::http::request::HttpRequest;
use webserv::http::Method;
use webserv::router::{self, RouteAction, RoutingError};

fn config_text() -> &'static str {
    r#"
        server {
            listen 8080;
            server_name example.com;
            root /var/www;

            location / {
                index index.html;
            }

            location /a {
                index a.html;
            }

            location /a/b {
                index b.html;
            }

            location /cgi-bin {
                cgi_path /usr/bin/python3;
                cgi_ext .py;
            }

            location /upload {
                upload_path /var/uploads;
                allow_methods POST;
            }

            location /gone {
                redirect 301 /new-home;
            }

            location /admin {
                allow_methods GET;
            }
        }

        server {
            listen 8080;
            server_name other.example;
            root /var/other;
        }
    "#
}

fn req(method: Method, uri: &str) -> HttpRequest {
    let mut r = HttpRequest::new();
    r.method = method;
    r.uri = uri.to_string();
    r
}

#[test]
fn virtual_host_matches_by_server_name() {
    let app = config::load(config_text()).unwrap();
    let server = router::select_server(&app, 8080, "other.example").unwrap();
    assert_eq!(server.root.to_str().unwrap(), "/var/other");
}

#[test]
fn virtual_host_falls_back_to_first_declared_server() {
    let app = config::load(config_text()).unwrap();
    let server = router::select_server(&app, 8080, "unknown.example").unwrap();
    assert!(server.default_server);
    assert_eq!(server.root.to_str().unwrap(), "/var/www");
}

#[test]
fn longest_prefix_location_wins() {
    let app = config::load(config_text()).unwrap();
    let server = router::select_server(&app, 8080, "example.com").unwrap();
    let loc = router::location_for(server, "/a/b/c").unwrap();
    assert_eq!(loc.path, "/a/b");
}

#[test]
fn get_on_root_resolves_to_static() {
    let app = config::load(config_text()).unwrap();
    let server = router::select_server(&app, 8080, "example.com").unwrap();
    let action = router::resolve(server, &req(Method::Get, "/index.html")).unwrap();
    assert!(matches!(action, RouteAction::Static { .. }));
}

#[test]
fn redirect_location_short_circuits_before_cgi_or_static() {
    let app = config::load(config_text()).unwrap();
    let server = router::select_server(&app, 8080, "example.com").unwrap();
    let action = router::resolve(server, &req(Method::Get, "/gone")).unwrap();
    match action {
        RouteAction::Redirect { code, location } => {
            assert_eq!(code, 301);
            assert_eq!(location, "/new-home");
        }
        other => panic!("expected Redirect, got {:?}", other),
    }
}

#[test]
fn cgi_extension_match_routes_to_cgi() {
    let app = config::load(config_text()).unwrap();
    let server = router::select_server(&app, 8080, "example.com").unwrap();
    let action = router::resolve(server, &req(Method::Get, "/cgi-bin/hello.py?x=1")).unwrap();
    assert!(matches!(action, RouteAction::Cgi { .. }));
}

#[test]
fn post_with_upload_path_resolves_to_upload() {
    let app = config::load(config_text()).unwrap();
    let server = router::select_server(&app, 8080, "example.com").unwrap();
    let action = router::resolve(server, &req(Method::Post, "/upload/a.txt")).unwrap();
    assert!(matches!(action, RouteAction::Upload { .. }));
}

#[test]
fn post_without_upload_path_is_method_not_allowed() {
    let app = config::load(config_text()).unwrap();
    let server = router::select_server(&app, 8080, "example.com").unwrap();
    let err = router::resolve(server, &req(Method::Post, "/a/report")).unwrap_err();
    assert!(matches!(err, RoutingError::MethodNotAllowed { .. }));
}

#[test]
fn delete_resolves_to_delete_action_when_allowed() {
    let app = config::load(config_text()).unwrap();
    let server = router::select_server(&app, 8080, "example.com").unwrap();
    let action = router::resolve(server, &req(Method::Delete, "/a/file.txt")).unwrap();
    assert!(matches!(action, RouteAction::Delete { .. }));
}

#[test]
fn method_restricted_location_rejects_disallowed_verb() {
    let app = config::load(config_text()).unwrap();
    let server = router::select_server(&app, 8080, "example.com").unwrap();
    let err = router::resolve(server, &req(Method::Delete, "/admin/panel")).unwrap_err();
    assert!(matches!(err, RoutingError::MethodNotAllowed { .. }));
}

#[test]
fn unmatched_path_is_not_found() {
    let app = config::load("server { listen 80; }").unwrap();
    let server = router::select_server(&app, 80, "any").unwrap();
    let err = router::resolve(server, &req(Method::Get, "/anything")).unwrap_err();
    assert_eq!(err, RoutingError::NotFound);
}

#[test]
fn body_over_effective_limit_is_rejected() {
    let src = r#"
        server {
            listen 80;
            location / { client_max_body_size 10; }
        }
    "#;
    let app = config::load(src).unwrap();
    let server = router::select_server(&app, 80, "any").unwrap();
    let mut r = req(Method::Get, "/file");
    r.headers.insert("content-length", "11".to_string());
    let err = router::resolve(server, &r).unwrap_err();
    assert!(matches!(err, RoutingError::PayloadTooLarge { .. }));
}
