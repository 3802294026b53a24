//! End-to-end tests that drive a real `Server` over a real TCP socket
//! (spec.md §8's literal scenarios): chunked bodies reaching a CGI child,
//! multipart uploads, pipelined requests on a persistent connection, and
//! a CGI wall-clock timeout. Each test binds its own port so they can run
//! independently of one another.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};
use webserv::config;
use webserv::server::Server;

fn spawn_server(config_src: &str) {
    let app = config::load(config_src).expect("test config should load");
    thread::spawn(move || {
        let mut server = Server::new(app).expect("server should bind and start");
        let _ = server.run();
    });
    thread::sleep(Duration::from_millis(200));
}

fn read_response(stream: &mut TcpStream) -> String {
    let mut buf = [0u8; 8192];
    let n = stream.read(&mut buf).expect("should receive a response");
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

fn write_cgi_script(path: &std::path::Path, body: &str) {
    std::fs::write(path, body).unwrap();
}

/// A POST body streamed in hand-fragmented chunks should reach the CGI
/// child whole (spec.md §8 scenario 4, and the chunked-framing property
/// from §8 exercised against a real non-blocking pipe rather than the
/// in-memory parser).
#[test]
fn chunked_body_reaches_cgi_child_intact() {
    let test_root = std::env::temp_dir().join("webserv_test_cgi_chunked");
    let _ = std::fs::remove_dir_all(&test_root);
    std::fs::create_dir_all(test_root.join("cgi-bin")).unwrap();
    let script = test_root.join("cgi-bin").join("echo.sh");
    write_cgi_script(&script, "#!/bin/sh\necho 'Content-Type: text/plain'\necho ''\ncat\n");

    let config_src = format!(
        r#"
        server {{
            listen 18080;
            root {root};
            location /cgi-bin {{
                cgi_path /bin/sh;
                cgi_ext .sh;
            }}
        }}
        "#,
        root = test_root.display(),
    );
    spawn_server(&config_src);

    let mut stream = TcpStream::connect("127.0.0.1:18080").expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let head = "POST /cgi-bin/echo.sh HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\n\r\n";
    stream.write_all(head.as_bytes()).unwrap();

    stream.write_all(b"5\r\nHello\r\n").unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"7\r\n World!\r\n").unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"0\r\n\r\n").unwrap();
    stream.flush().unwrap();

    let response = read_response(&mut stream);
    assert!(response.contains("200"), "unexpected response: {response}");
    assert!(response.ends_with("Hello World!"), "unexpected response: {response}");

    let _ = std::fs::remove_dir_all(&test_root);
}

#[test]
fn multipart_upload_over_identity_framing_writes_file() {
    let test_root = std::env::temp_dir().join("webserv_test_upload");
    let upload_dir = test_root.join("uploads");
    let _ = std::fs::remove_dir_all(&test_root);
    std::fs::create_dir_all(&upload_dir).unwrap();

    let config_src = format!(
        r#"
        server {{
            listen 18081;
            root {root};
            location /upload {{
                upload_path {upload};
                allow_methods POST;
            }}
        }}
        "#,
        root = test_root.display(),
        upload = upload_dir.display(),
    );
    spawn_server(&config_src);

    let mut stream = TcpStream::connect("127.0.0.1:18081").expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let boundary = "WEBSERVBOUNDARY";
    let part = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"f\"; filename=\"note.txt\"\r\n\r\nHello World!\r\n--{b}--\r\n",
        b = boundary
    );
    let head = format!(
        "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary={}\r\nContent-Length: {}\r\n\r\n",
        boundary,
        part.len(),
    );
    stream.write_all(head.as_bytes()).unwrap();
    stream.write_all(part.as_bytes()).unwrap();
    stream.flush().unwrap();

    let response = read_response(&mut stream);
    assert!(response.contains("200 OK"), "unexpected response: {response}");

    let uploaded = std::fs::read_to_string(upload_dir.join("note.txt")).unwrap();
    assert_eq!(uploaded, "Hello World!");

    let _ = std::fs::remove_dir_all(&test_root);
}

#[test]
fn pipelined_requests_on_a_persistent_connection_both_answer() {
    let test_root = std::env::temp_dir().join("webserv_test_pipeline");
    let _ = std::fs::remove_dir_all(&test_root);
    std::fs::create_dir_all(&test_root).unwrap();
    std::fs::write(test_root.join("index.html"), "Hello").unwrap();

    let config_src = format!(
        r#"
        server {{
            listen 18082;
            server_name localhost;
            root {root};
            location / {{ index index.html; }}
        }}
        "#,
        root = test_root.display(),
    );
    spawn_server(&config_src);

    let mut stream = TcpStream::connect("127.0.0.1:18082").expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let pipelined = "GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n\
                      GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n";
    stream.write_all(pipelined.as_bytes()).unwrap();

    let mut seen = String::new();
    while seen.matches("HTTP/1.1").count() < 2 {
        seen.push_str(&read_response(&mut stream));
    }
    assert_eq!(seen.matches("200 OK").count(), 2, "both pipelined GETs should succeed: {seen}");

    let _ = std::fs::remove_dir_all(&test_root);
}

#[test]
fn missing_location_returns_404_with_valid_envelope() {
    let test_root = std::env::temp_dir().join("webserv_test_404");
    let _ = std::fs::remove_dir_all(&test_root);
    std::fs::create_dir_all(&test_root).unwrap();

    let config_src = format!(
        r#"
        server {{
            listen 18083;
            root {root};
            location / {{ index index.html; }}
        }}
        "#,
        root = test_root.display(),
    );
    spawn_server(&config_src);

    let mut stream = TcpStream::connect("127.0.0.1:18083").expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream
        .write_all(b"GET /missing.html HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 404"));
    assert!(response.contains("Content-Length:"));

    let _ = std::fs::remove_dir_all(&test_root);
}

/// A CGI child that never exits must be killed and reaped within its
/// configured wall-clock timeout, and the client sees a 504 rather than
/// hanging forever (spec.md §8 scenario 5).
#[test]
fn cgi_timeout_yields_504() {
    let test_root = std::env::temp_dir().join("webserv_test_cgi_timeout");
    let _ = std::fs::remove_dir_all(&test_root);
    std::fs::create_dir_all(test_root.join("cgi-bin")).unwrap();
    let script = test_root.join("cgi-bin").join("hang.sh");
    write_cgi_script(&script, "#!/bin/sh\nsleep 30\n");

    let config_src = format!(
        r#"
        server {{
            listen 18084;
            root {root};
            location /cgi-bin {{
                cgi_path /bin/sh;
                cgi_ext .sh;
                cgi_timeout 1;
            }}
        }}
        "#,
        root = test_root.display(),
    );
    spawn_server(&config_src);

    let mut stream = TcpStream::connect("127.0.0.1:18084").expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
        .write_all(b"GET /cgi-bin/hang.sh HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    let started = Instant::now();
    let response = read_response(&mut stream);
    assert!(response.starts_with("HTTP/1.1 504"), "unexpected response: {response}");
    assert!(started.elapsed() < Duration::from_secs(4), "504 should arrive close to the configured timeout");

    let _ = std::fs::remove_dir_all(&test_root);
}
