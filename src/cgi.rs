//! CGI/1.1 process orchestration (spec.md §4.4/§4.5).
//!
//! A CGI invocation is a non-blocking child process: stdin/stdout are
//! piped, stderr is duped onto stdout in the child so diagnostic output
//! ends up in the server log rather than silently vanishing. The server
//! never streams the child's stdout straight to the client — spec.md §6
//! forbids emitting Transfer-Encoding, so stdout is accumulated fully
//! and parsed into a complete response only once the pipe hits EOF.

use crate::config::ServerConfig;
use crate::http::{HttpRequest, HttpResponse};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

pub struct CgiProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
    stdin_buffer: Vec<u8>,
    stdout_buffer: Vec<u8>,
    started: Instant,
    timeout: Duration,
}

/// Spawns `cgi_path script` with the CGI/1.1 environment for `req`,
/// piping stdin/stdout and duping the child's stderr onto its stdout
/// (spec.md §4.4 — merged diagnostic stream).
pub fn spawn(
    cgi_path: &Path,
    script: &Path,
    root: &Path,
    req: &HttpRequest,
    server: &ServerConfig,
    timeout: Duration,
) -> io::Result<CgiProcess> {
    let working_dir = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let env = build_cgi_env(req, server, script);

    let mut command = Command::new(cgi_path);
    command
        .arg(script)
        .current_dir(working_dir)
        .env_clear()
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    unsafe {
        command.pre_exec(|| {
            // Rust's own stdio wiring (dup2 of the pipe ends onto 0/1/2)
            // runs before this closure, so fd 1 is already the stdout
            // pipe here; dup fd 2 onto it to merge stderr in.
            nix::unistd::dup2(1, 2).map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            Ok(())
        });
    }

    let mut child = command.spawn()?;
    let stdin = child.stdin.take();
    let stdout = child.stdout.take().expect("stdout was piped");
    // stderr is duped onto stdout in the child; the parent end is unused.
    drop(child.stderr.take());

    set_nonblocking(stdout.as_raw_fd())?;
    if let Some(stdin) = &stdin {
        set_nonblocking(stdin.as_raw_fd())?;
    }

    Ok(CgiProcess {
        child,
        stdin,
        stdout,
        stdin_buffer: req.body.clone(),
        stdout_buffer: Vec::new(),
        started: Instant::now(),
        timeout,
    })
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(to_io_error)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(to_io_error)?;
    Ok(())
}

fn to_io_error(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

impl CgiProcess {
    pub fn stdin_fd(&self) -> Option<RawFd> {
        self.stdin.as_ref().map(|s| s.as_raw_fd())
    }

    pub fn stdout_fd(&self) -> RawFd {
        self.stdout.as_raw_fd()
    }

    pub fn needs_stdin_write(&self) -> bool {
        self.stdin.is_some() && !self.stdin_buffer.is_empty()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn timed_out(&self) -> bool {
        self.started.elapsed() >= self.timeout
    }

    /// Writes as much of the buffered request body as the pipe accepts
    /// right now. Closes stdin once the whole body has been written,
    /// signalling EOF to the script (spec.md §4.4 stdin draining).
    pub fn write_stdin(&mut self) -> io::Result<()> {
        let Some(stdin) = self.stdin.as_mut() else { return Ok(()) };
        if self.stdin_buffer.is_empty() {
            self.stdin = None;
            return Ok(());
        }
        match stdin.write(&self.stdin_buffer) {
            Ok(0) => Ok(()),
            Ok(n) => {
                self.stdin_buffer.drain(..n);
                if self.stdin_buffer.is_empty() {
                    self.stdin = None;
                }
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Reads whatever is available on stdout into the accumulator.
    /// Returns `true` once EOF (read returning 0) has been observed —
    /// the caller should then call [`CgiProcess::finish`].
    pub fn read_stdout(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; 8192];
        loop {
            match self.stdout.read(&mut buf) {
                Ok(0) => return Ok(true),
                Ok(n) => self.stdout_buffer.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    /// Reaps the child with a blocking wait (the process has already hit
    /// EOF on stdout, so it should exit imminently) and parses the
    /// accumulated stdout into a complete response (spec.md §4.5).
    pub fn finish(mut self) -> io::Result<HttpResponse> {
        let _ = self.child.wait();
        Ok(parse_cgi_output(&self.stdout_buffer))
    }

    /// Forcibly terminates a CGI process that has exceeded its timeout
    /// (spec.md §4.4): SIGKILL then a non-blocking reap so a process
    /// stuck in uninterruptible sleep doesn't stall the event loop.
    pub fn kill(&mut self) {
        let pid = Pid::from_raw(self.child.id() as i32);
        let _ = signal::kill(pid, Signal::SIGKILL);
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => {
                let _ = self.child.wait();
            }
            Ok(_) => {}
        }
    }
}

/// Builds the CGI/1.1 meta-variables (spec.md §4.4) for `req`, executed
/// as `script` under `server`.
fn build_cgi_env(req: &HttpRequest, server: &ServerConfig, script: &Path) -> HashMap<String, String> {
    let mut env = HashMap::new();

    env.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    env.insert("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string());
    env.insert("SERVER_SOFTWARE".to_string(), "webserv/0.1".to_string());
    env.insert("REQUEST_METHOD".to_string(), req.method.to_string());
    env.insert("SCRIPT_NAME".to_string(), req.path().to_string());
    env.insert("SCRIPT_FILENAME".to_string(), script.to_string_lossy().into_owned());
    env.insert("PATH_INFO".to_string(), req.path().to_string());
    env.insert("QUERY_STRING".to_string(), req.query().to_string());
    env.insert(
        "SERVER_NAME".to_string(),
        server.server_names.first().cloned().unwrap_or_default(),
    );
    env.insert(
        "SERVER_PORT".to_string(),
        server.ports.first().map(|p| p.to_string()).unwrap_or_default(),
    );
    env.insert("REDIRECT_STATUS".to_string(), "200".to_string());

    if let Some(ct) = req.headers.get("content-type") {
        env.insert("CONTENT_TYPE".to_string(), ct.to_string());
    }
    env.insert("CONTENT_LENGTH".to_string(), req.body.len().to_string());

    for (name, value) in req.headers.iter() {
        if name == "content-type" || name == "content-length" {
            continue;
        }
        let key = format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"));
        env.insert(key, value.clone());
    }

    env
}

/// Substrings that mark the child's post-execve diagnostic rather than a
/// real CGI document (spec.md §4.5 error policy).
const EXECVE_DIAGNOSTICS: [&str; 3] = ["execve failed", "No such file or directory", "Permission denied"];

/// Parses a complete CGI stdout blob (spec.md §4.5): a `Status:` header
/// becomes the response status line and is dropped from the forwarded
/// header set; everything else is copied through as-is. Empty output, or
/// output whose first line looks like the child's post-execve
/// diagnostic, is treated as a server-side failure (500) rather than a
/// malformed document.
pub fn parse_cgi_output(raw: &[u8]) -> HttpResponse {
    if raw.is_empty() {
        return HttpResponse::new(500);
    }
    let first_line = raw.split(|&b| b == b'\n').next().unwrap_or(raw);
    let first_line = String::from_utf8_lossy(first_line);
    if EXECVE_DIAGNOSTICS.iter().any(|d| first_line.contains(d)) {
        return HttpResponse::new(500);
    }

    let header_end = find_header_terminator(raw);

    let (header_bytes, body): (&[u8], &[u8]) = match header_end {
        Some((end, consumed)) => (&raw[..end], &raw[consumed..]),
        None => (raw, &[]),
    };

    let header_section = String::from_utf8_lossy(header_bytes);
    let mut status = 200u16;
    let mut headers = Vec::new();

    for line in header_section.lines() {
        let Some((name, value)) = line.split_once(':') else { continue };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("status") {
            status = value
                .split_whitespace()
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(200);
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let mut res = HttpResponse::new(status);
    for (name, value) in headers {
        res.set_header(&name, value);
    }
    res.set_body(body.to_vec());
    res
}

/// Finds the header/body separator, tolerating both `\r\n\r\n` and a
/// bare `\n\n` the way CGI scripts commonly emit it.
fn find_header_terminator(raw: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, pos + 4));
    }
    raw.windows(2).position(|w| w == b"\n\n").map(|pos| (pos, pos + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_and_headers() {
        let raw = b"Status: 404 Not Found\r\nContent-Type: text/plain\r\n\r\nnope";
        let res = parse_cgi_output(raw);
        assert_eq!(res.status_code, 404);
        assert_eq!(res.header("Content-Type"), Some("text/plain"));
        assert_eq!(res.body, b"nope");
    }

    #[test]
    fn defaults_to_200_without_status_header() {
        let raw = b"Content-Type: text/html\r\n\r\n<p>hi</p>";
        let res = parse_cgi_output(raw);
        assert_eq!(res.status_code, 200);
        assert_eq!(res.body, b"<p>hi</p>");
    }

    #[test]
    fn tolerates_bare_lf_terminator() {
        let raw = b"Content-Type: text/plain\n\nbody";
        let res = parse_cgi_output(raw);
        assert_eq!(res.body, b"body");
    }

    #[test]
    fn header_less_output_is_treated_as_body() {
        let raw = b"just some bytes with no header terminator";
        let res = parse_cgi_output(raw);
        assert_eq!(res.status_code, 200);
        assert_eq!(res.body, raw);
    }
}
