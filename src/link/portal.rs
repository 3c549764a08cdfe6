//! Provisioning portal plumbing: a small HTTP responder plus the captive
//! DNS responder, both serviced from the cooperative loop.
//!
//! The portal only transports requests; deciding what a request means stays
//! with the connectivity manager, which keeps the control API testable as
//! plain function calls. Requests are parsed with `httparse`, responses are
//! written by hand, and every connection is one-shot (`Connection: close`).

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use super::dns::DnsResponder;

pub(crate) const PORTAL_PAGE: &str = include_str!("portal.html");

/// Hard cap on a whole request, headers and body. Credential submissions
/// are tiny; anything bigger is not for us.
const MAX_REQUEST_BYTES: usize = 4096;

const MAX_HEADERS: usize = 32;

/// Per-client socket deadline. A browser on the captive page sends its
/// request immediately after connecting, so this only trips on stalled
/// clients and keeps one of them from eating the tick.
const CLIENT_IO_TIMEOUT: Duration = Duration::from_millis(250);

/// Provisioning portal settings. Defaults are the production values; tests
/// bind to ephemeral loopback ports and shrink the linger.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Name of the broadcast setup network.
    pub ssid: String,
    /// Address clients are steered to, used in DNS answers and redirects.
    pub ip: Ipv4Addr,
    pub http_bind: SocketAddr,
    pub dns_bind: SocketAddr,
    /// How long the portal stays up after a client has seen the
    /// "connected" status, so the success screen still renders.
    pub success_linger: Duration,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            ssid: "Pharos-Setup".to_string(),
            ip: Ipv4Addr::new(192, 168, 4, 1),
            http_bind: (Ipv4Addr::UNSPECIFIED, 80).into(),
            dns_bind: (Ipv4Addr::UNSPECIFIED, 53).into(),
            success_linger: Duration::from_secs(5),
        }
    }
}

/// Credential submission as it arrives on the wire. Everything defaults so
/// that a missing field is a validation failure, not a parse failure.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConnectBody {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub enterprise: bool,
}

/// A parsed portal request, ready for the manager to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ControlRequest {
    Page,
    Scan,
    Connect(ConnectBody),
    Status,
    BadRequest(&'static str),
    /// Anything unmatched: captive-portal convention redirects to the page.
    Redirect,
}

pub(crate) fn route(method: &str, path: &str, body: &[u8]) -> ControlRequest {
    let path = path.split('?').next().unwrap_or(path);
    match (method, path) {
        ("GET", "/") | ("GET", "/index.html") => ControlRequest::Page,
        ("GET", "/api/scan") => ControlRequest::Scan,
        ("GET", "/api/status") => ControlRequest::Status,
        ("POST", "/api/connect") => match serde_json::from_slice(body) {
            Ok(body) => ControlRequest::Connect(body),
            Err(e) => {
                debug!("rejecting connect body: {e}");
                ControlRequest::BadRequest("Invalid JSON body")
            }
        },
        _ => ControlRequest::Redirect,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpResponse {
    status: u16,
    content_type: &'static str,
    body: String,
    location: Option<String>,
}

impl HttpResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
            location: None,
        }
    }

    pub fn page() -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: PORTAL_PAGE.to_string(),
            location: None,
        }
    }

    pub fn redirect(to: String) -> Self {
        Self {
            status: 302,
            content_type: "text/plain",
            body: String::new(),
            location: Some(to),
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[cfg(test)]
    pub fn body(&self) -> &str {
        &self.body
    }

    #[cfg(test)]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    fn write_to(&self, stream: &mut TcpStream) -> io::Result<()> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n",
            self.status,
            reason(self.status),
            self.content_type,
            self.body.len(),
        );
        if let Some(location) = &self.location {
            head.push_str("Location: ");
            head.push_str(location);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        stream.write_all(head.as_bytes())?;
        stream.write_all(self.body.as_bytes())?;
        stream.flush()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Found",
        400 => "Bad Request",
        409 => "Conflict",
        _ => "OK",
    }
}

/// The listening half of the provisioning portal.
pub(crate) struct Portal {
    listener: TcpListener,
    http_addr: SocketAddr,
    dns: DnsResponder,
}

impl Portal {
    pub fn open(config: &PortalConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.http_bind)?;
        listener.set_nonblocking(true)?;
        let http_addr = listener.local_addr()?;
        let dns = DnsResponder::bind(config.dns_bind, config.ip)?;
        info!("provisioning portal listening on {http_addr}");
        Ok(Self {
            listener,
            http_addr,
            dns,
        })
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn dns_addr(&self) -> SocketAddr {
        self.dns.addr()
    }

    /// Accepts and parses one pending request, or `None` when no client is
    /// waiting. Unparseable clients are dropped and the next one is tried.
    pub fn next_request(&mut self) -> Option<(TcpStream, ControlRequest)> {
        loop {
            let (mut stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
                Err(e) => {
                    debug!("portal accept failed: {e}");
                    return None;
                }
            };

            match read_request(&mut stream) {
                Ok(request) => return Some((stream, request)),
                Err(e) => {
                    debug!("dropping portal client {peer}: {e}");
                    continue;
                }
            }
        }
    }

    pub fn respond(&self, mut stream: TcpStream, response: HttpResponse) {
        if let Err(e) = response.write_to(&mut stream) {
            debug!("portal response write failed: {e}");
        }
        // dropping the stream closes the one-shot connection
    }

    pub fn service_dns(&mut self) {
        self.dns.service();
    }
}

/// Reads one full request off the stream, bounded by [`CLIENT_IO_TIMEOUT`]
/// and [`MAX_REQUEST_BYTES`].
fn read_request(stream: &mut TcpStream) -> io::Result<ControlRequest> {
    // the accepted socket must not inherit the listener's non-blocking mode
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_IO_TIMEOUT))?;
    stream.set_write_timeout(Some(CLIENT_IO_TIMEOUT))?;

    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(parsed) = try_parse(&buf)? {
            let (method, path, body_start, content_length) = parsed;
            // Content-Length is untrusted; reject anything past the byte cap
            let end = body_start
                .checked_add(content_length)
                .filter(|&end| end <= MAX_REQUEST_BYTES)
                .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "request too large"))?;
            while buf.len() < end {
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    return Err(ErrorKind::UnexpectedEof.into());
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            return Ok(route(&method, &path, &buf[body_start..end]));
        }

        if buf.len() >= MAX_REQUEST_BYTES {
            return Err(io::Error::new(ErrorKind::InvalidData, "headers too large"));
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

type ParsedHead = (String, String, usize, usize);

/// Parses the request head out of `buf`: `(method, path, body offset,
/// content length)`, or `None` while the head is still incomplete.
fn try_parse(buf: &[u8]) -> io::Result<Option<ParsedHead>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    match request.parse(buf) {
        Ok(httparse::Status::Complete(body_start)) => {
            let method = request.method.unwrap_or("").to_string();
            let path = request.path.unwrap_or("/").to_string();
            let content_length = request
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case("content-length"))
                .and_then(|h| std::str::from_utf8(h.value).ok())
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            Ok(Some((method, path, body_start, content_length)))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(io::Error::new(ErrorKind::InvalidData, e)),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn routes_page_and_api_paths() {
        assert_eq!(route("GET", "/", b""), ControlRequest::Page);
        assert_eq!(route("GET", "/index.html", b""), ControlRequest::Page);
        assert_eq!(route("GET", "/api/scan", b""), ControlRequest::Scan);
        assert_eq!(route("GET", "/api/status", b""), ControlRequest::Status);
    }

    #[test]
    fn routes_ignore_query_strings() {
        assert_eq!(route("GET", "/api/status?x=1", b""), ControlRequest::Status);
    }

    #[test]
    fn unmatched_paths_redirect() {
        // captive-portal detection endpoints land here
        assert_eq!(route("GET", "/generate_204", b""), ControlRequest::Redirect);
        assert_eq!(route("GET", "/hotspot-detect.html", b""), ControlRequest::Redirect);
        assert_eq!(route("PUT", "/api/scan", b""), ControlRequest::Redirect);
        assert_eq!(route("GET", "/api/connect", b""), ControlRequest::Redirect);
    }

    #[test]
    fn connect_parses_credentials() {
        let body = br#"{"ssid":"HomeNet","pass":"hunter22","user":"","enterprise":false}"#;
        assert_eq!(
            route("POST", "/api/connect", body),
            ControlRequest::Connect(ConnectBody {
                ssid: "HomeNet".to_string(),
                pass: "hunter22".to_string(),
                user: String::new(),
                enterprise: false,
            })
        );
    }

    #[test]
    fn connect_defaults_missing_fields() {
        let body = br#"{"ssid":"HomeNet"}"#;
        assert_eq!(
            route("POST", "/api/connect", body),
            ControlRequest::Connect(ConnectBody {
                ssid: "HomeNet".to_string(),
                pass: String::new(),
                user: String::new(),
                enterprise: false,
            })
        );
    }

    #[test]
    fn connect_rejects_invalid_json() {
        assert_eq!(
            route("POST", "/api/connect", b"ssid=HomeNet"),
            ControlRequest::BadRequest("Invalid JSON body")
        );
    }

    #[test]
    fn try_parse_waits_for_a_full_head() {
        assert_eq!(try_parse(b"GET /api/st").unwrap(), None);

        let head = b"GET /api/status HTTP/1.1\r\nHost: portal\r\n\r\n";
        let (method, path, body_start, content_length) =
            try_parse(head).unwrap().unwrap();
        assert_eq!(method, "GET");
        assert_eq!(path, "/api/status");
        assert_eq!(body_start, head.len());
        assert_eq!(content_length, 0);
    }

    #[test]
    fn try_parse_reads_content_length() {
        let head = b"POST /api/connect HTTP/1.1\r\nContent-Length: 17\r\n\r\n";
        let (_, _, _, content_length) = try_parse(head).unwrap().unwrap();
        assert_eq!(content_length, 17);
    }

    #[test]
    fn portal_answers_over_loopback() {
        let config = PortalConfig {
            http_bind: "127.0.0.1:0".parse().unwrap(),
            dns_bind: "127.0.0.1:0".parse().unwrap(),
            ..PortalConfig::default()
        };
        let mut portal = Portal::open(&config).unwrap();

        let mut client = TcpStream::connect(portal.http_addr()).unwrap();
        client
            .write_all(b"GET /api/status HTTP/1.1\r\nHost: portal\r\n\r\n")
            .unwrap();

        let (stream, request) = portal.next_request().unwrap();
        assert_eq!(request, ControlRequest::Status);
        portal.respond(stream, HttpResponse::json(200, serde_json::json!({"status": "idle"})));

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("{\"status\":\"idle\"}"));
    }

    #[test]
    fn no_pending_client_means_no_request() {
        let config = PortalConfig {
            http_bind: "127.0.0.1:0".parse().unwrap(),
            dns_bind: "127.0.0.1:0".parse().unwrap(),
            ..PortalConfig::default()
        };
        let mut portal = Portal::open(&config).unwrap();
        assert!(portal.next_request().is_none());
    }
}
