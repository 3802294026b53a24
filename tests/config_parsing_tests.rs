//! Black-box tests for the configuration loader: `confparse`'s brace
//! grammar fed through `webserv::config::load` into the domain model
//! (spec.md §3.1/§6).

use webserv::config;
use webserv::http::Method;

#[test]
fn loads_full_server_block() {
    let src = r#"
        server {
            listen 8080;
            listen 8081;
            server_name example.com www.example.com;
            root /var/www;
            client_max_body_size 2M;
            error_page 404 /errors/404.html;
            error_page 500 /errors/500.html;

            location / {
                index home.html;
                autoindex off;
            }

            location /api {
                allow_methods GET POST;
                client_max_body_size 512K;
            }

            location /cgi-bin {
                cgi_path /usr/bin/python3;
                cgi_ext .py;
                cgi_timeout 3;
            }

            location /upload {
                upload_path /var/uploads;
                allow_methods POST;
            }

            location /old {
                redirect 301 /new;
            }
        }
    "#;

    let app = config::load(src).expect("valid config should load");
    assert_eq!(app.servers.len(), 1);
    let server = &app.servers[0];
    assert_eq!(server.ports, vec![8080, 8081]);
    assert_eq!(server.server_names, vec!["example.com", "www.example.com"]);
    assert_eq!(server.client_max_body_size, 2 * 1024 * 1024);
    assert_eq!(server.error_pages.get(&404).unwrap(), "/errors/404.html");
    assert!(server.default_server);
    assert_eq!(server.locations.len(), 5);

    let api = server.locations.iter().find(|l| l.path == "/api").unwrap();
    assert_eq!(api.client_max_body_size, Some(512 * 1024));
    assert!(api.method_allowed(&Method::Get));
    assert!(!api.method_allowed(&Method::Delete));

    let cgi = server.locations.iter().find(|l| l.path == "/cgi-bin").unwrap();
    assert_eq!(cgi.cgi_timeout.as_secs(), 3);
    assert!(cgi.is_cgi_target("/cgi-bin/hello.py"));
    assert!(!cgi.is_cgi_target("/cgi-bin/hello.rb"));

    let old = server.locations.iter().find(|l| l.path == "/old").unwrap();
    assert_eq!(old.redirect, Some((301, "/new".to_string())));
}

#[test]
fn bare_redirect_target_defaults_to_301() {
    let src = r#"
        server {
            listen 80;
            location /away { redirect http://example.com/; }
        }
    "#;
    let app = config::load(src).unwrap();
    let loc = &app.servers[0].locations[0];
    assert_eq!(loc.redirect, Some((301, "http://example.com/".to_string())));
}

#[test]
fn size_suffixes_are_case_insensitive() {
    let src = r#"
        server {
            listen 80;
            client_max_body_size 4g;
        }
    "#;
    let app = config::load(src).unwrap();
    assert_eq!(app.servers[0].client_max_body_size, 4 * 1024 * 1024 * 1024);
}

#[test]
fn rejects_server_without_listen() {
    let src = "server { root /var/www; }";
    assert!(config::load(src).is_err());
}

#[test]
fn rejects_duplicate_location_paths_within_a_server() {
    let src = r#"
        server {
            listen 80;
            location /a { index x.html; }
            location /a { index y.html; }
        }
    "#;
    assert!(config::load(src).is_err());
}

#[test]
fn rejects_unrecognized_directive() {
    let src = r#"
        server {
            listen 80;
            keepalive_timeout 30;
        }
    "#;
    assert!(config::load(src).is_err());
}

#[test]
fn first_declared_server_on_a_port_becomes_default() {
    let src = r#"
        server {
            listen 80;
            server_name first.example;
        }
        server {
            listen 80;
            server_name second.example;
        }
    "#;
    let app = config::load(src).unwrap();
    assert!(app.servers[0].default_server);
    assert!(!app.servers[1].default_server);
}

#[test]
fn comments_and_multi_value_directives_are_parsed() {
    let src = "
        server {
            # this is the main vhost
            listen 80; # trailing comments are skipped too
            server_name a.example b.example c.example;
        }
    ";
    let app = config::load(src).unwrap();
    assert_eq!(app.servers[0].server_names.len(), 3);
}
