//! Application-level reachability check.
//!
//! Having an address says nothing about having internet: captive portals
//! hand out leases and answer every GET with a 200 login page. The probe
//! therefore requires an exact body match against a known endpoint before
//! the manager will call a link online.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::debug;

/// Health-check endpoint the device expects to reach once truly online.
pub const DEFAULT_PROBE_URL: &str = "https://api.pharos.io/ping";

/// Exact body [`DEFAULT_PROBE_URL`] answers with.
pub const DEFAULT_PROBE_BODY: &str = "Pong!";

/// Bound on the whole probe round trip.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(4);

/// Answers "does this link reach the real internet right now?".
pub trait Prober {
    fn check(&mut self) -> bool;
}

/// HTTP [`Prober`]: true iff the endpoint returns 200 and the trimmed body
/// equals the expected literal.
#[derive(Debug)]
pub struct HttpProbe {
    url: String,
    expected: String,
    client: Client,
}

impl HttpProbe {
    pub fn new(
        url: impl Into<String>,
        expected: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            expected: expected.into(),
            client,
        })
    }
}

impl Prober for HttpProbe {
    fn check(&mut self) -> bool {
        let response = match self.client.get(&self.url).send() {
            Ok(response) => response,
            Err(e) => {
                debug!("reachability probe failed: {e}");
                return false;
            }
        };

        if response.status() != StatusCode::OK {
            debug!("reachability probe returned {}", response.status());
            return false;
        }

        match response.text() {
            Ok(body) if body.trim() == self.expected => true,
            Ok(body) => {
                debug!("reachability probe body mismatch ({} bytes)", body.len());
                false
            }
            Err(e) => {
                debug!("reachability probe body unreadable: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_for(server: &mockito::Server) -> HttpProbe {
        HttpProbe::new(
            format!("{}/ping", server.url()),
            DEFAULT_PROBE_BODY,
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn accepts_exact_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/ping")
            .with_status(200)
            .with_body("Pong!")
            .create();

        assert!(probe_for(&server).check());
        mock.assert();
    }

    #[test]
    fn accepts_body_with_surrounding_whitespace() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/ping")
            .with_status(200)
            .with_body("\nPong!  \n")
            .create();

        assert!(probe_for(&server).check());
    }

    #[test]
    fn rejects_wrong_body() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/ping")
            .with_status(200)
            .with_body("pong")
            .create();

        assert!(!probe_for(&server).check());
    }

    #[test]
    fn rejects_captive_portal_style_content() {
        let mut server = mockito::Server::new();
        // a captive portal happily answers 200 with its own page
        server
            .mock("GET", "/ping")
            .with_status(200)
            .with_body("{\"status\":\"ok\"}")
            .create();

        assert!(!probe_for(&server).check());
    }

    #[test]
    fn rejects_non_200_status() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/ping")
            .with_status(404)
            .with_body("Pong!")
            .create();

        assert!(!probe_for(&server).check());
    }

    #[test]
    fn rejects_unreachable_endpoint() {
        let mut probe = HttpProbe::new(
            // port 1 is never listening
            "http://127.0.0.1:1/ping",
            DEFAULT_PROBE_BODY,
            Duration::from_secs(1),
        )
        .unwrap();

        assert!(!probe.check());
    }
}
