//! Network bring-up. This component decides how the device gets online:
//! wired link first, then saved wireless credentials, then a self-hosted
//! provisioning portal where a user submits credentials from their phone.

pub mod control;
mod dns;
mod portal;
pub mod probe;

pub use portal::PortalConfig;

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::Store;
use crate::types::{LinkCredentials, SecurityMode, WIFI_NAMESPACE};
use control::{AssociationState, LinkControl, LinkError};
use portal::{ConnectBody, ControlRequest, HttpResponse, Portal};
use probe::Prober;

/// Portal HTTP requests served per poll. Keeps one busy browser tab from
/// starving pending-attempt resolution.
const MAX_REQUESTS_PER_TICK: usize = 4;

/// The connectivity manager's sole observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Connected,
    ProvisioningPortalActive,
}

/// Which physical path is currently online.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    None,
    Wireless,
    Wired,
}

/// Why a connection attempt did not produce a working link. The `Display`
/// strings are shown to users as-is, on the device and on the portal page.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Connection timed out. Check the password and try again.")]
    AssociationTimeout,
    #[error("Authentication failed. Check the password and try again.")]
    AuthRejected,
    #[error("Enterprise authentication failed. Check the username and password.")]
    EnterpriseAuthFailed,
    #[error("Connected to the network, but no internet access was detected.")]
    NoInternet,
    #[error("Enterprise (802.1X) networks are not supported by this firmware.")]
    EnterpriseUnsupported,
}

impl From<LinkError> for ConnectError {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::EnterpriseUnsupported => Self::EnterpriseUnsupported,
        }
    }
}

fn auth_failure(mode: SecurityMode) -> ConnectError {
    match mode {
        SecurityMode::Enterprise => ConnectError::EnterpriseAuthFailed,
        _ => ConnectError::AuthRejected,
    }
}

fn timeout_failure(mode: SecurityMode) -> ConnectError {
    match mode {
        // the long EAP handshake gives no better signal than its deadline
        SecurityMode::Enterprise => ConnectError::EnterpriseAuthFailed,
        _ => ConnectError::AssociationTimeout,
    }
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub portal: PortalConfig,
    /// Association deadline for open and personal-auth networks.
    pub personal_timeout: Duration,
    /// Association deadline for enterprise networks, longer because of the
    /// EAP handshake.
    pub enterprise_timeout: Duration,
    /// Step between association-state reads in the blocking paths.
    pub association_poll: Duration,
    /// How long `start` waits for the wired path to come up and get an
    /// address before moving on.
    pub wired_settle: Duration,
    /// Interval between wired-link re-checks while the portal is active.
    pub wired_recheck: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            portal: PortalConfig::default(),
            personal_timeout: Duration::from_secs(15),
            enterprise_timeout: Duration::from_secs(20),
            association_poll: Duration::from_millis(250),
            wired_settle: Duration::from_secs(2),
            wired_recheck: Duration::from_secs(5),
        }
    }
}

/// A portal-triggered connection attempt in flight. At most one exists at a
/// time; the control API rejects submissions while it is unresolved.
#[derive(Debug)]
struct PendingAttempt {
    credentials: LinkCredentials,
    deadline: Instant,
    outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptOutcome {
    Pending,
    Connected(Ipv4Addr),
    Failed(ConnectError),
}

/// Orchestrates wired detection, saved-credential retry and the
/// provisioning portal.
///
/// `L` is the platform's [`LinkControl`] implementation, `P` the
/// reachability [`Prober`]. Both are injected so the whole ladder runs
/// against fakes in tests.
pub struct ConnectivityManager<L, P> {
    link: L,
    probe: P,
    config: LinkConfig,
    state: ConnectivityState,
    kind: ConnectionKind,
    ip: Option<Ipv4Addr>,
    portal: Option<Portal>,
    pending: Option<PendingAttempt>,
    portal_stop_at: Option<Instant>,
    last_wired_check: Option<Instant>,
}

impl<L: LinkControl, P: Prober> ConnectivityManager<L, P> {
    pub fn new(link: L, probe: P, config: LinkConfig) -> Self {
        Self {
            link,
            probe,
            config,
            state: ConnectivityState::Idle,
            kind: ConnectionKind::None,
            ip: None,
            portal: None,
            pending: None,
            portal_stop_at: None,
            last_wired_check: None,
        }
    }

    /// Boot-time bring-up, run once. Tries the wired link, then saved
    /// credentials (a blocking attempt bounded by the per-mode timeout),
    /// and falls back to opening the provisioning portal. Progress strings
    /// go to `status` at each stage.
    ///
    /// Returns once the device is [`ConnectivityState::Connected`] or the
    /// portal is up; the only error is failing to bind the portal sockets.
    pub fn start(
        &mut self,
        store: &dyn Store,
        mut status: impl FnMut(&str),
    ) -> io::Result<()> {
        store.register_namespace(WIFI_NAMESPACE);
        self.state = ConnectivityState::Connecting;

        status("Checking for wired connection...");
        if self.try_wired() {
            info!(ip = ?self.ip, "online via wired link");
            status("Connected");
            return Ok(());
        }

        if let Some(credentials) = LinkCredentials::load(store) {
            status(&format!("Attempting connection to \"{}\"", credentials.ssid));
            match self.connect_blocking(&credentials) {
                Ok(ip) => {
                    self.set_connected(ConnectionKind::Wireless, Some(ip));
                    info!(%ip, ssid = %credentials.ssid, "online via saved credentials");
                    status("Connected");
                    return Ok(());
                }
                Err(e) => {
                    warn!("saved-credential connection failed: {e}");
                    status(&e.to_string());
                }
            }
        }

        self.open_portal()?;
        status(&format!("Join \"{}\" to set up", self.config.portal.ssid));
        Ok(())
    }

    /// One cooperative tick. A no-op unless the portal is active.
    ///
    /// Services, strictly in order: the HTTP and DNS responders, then
    /// pending-attempt resolution, then the teardown checks (post-success
    /// linger, wired takeover). A client request landing in the same tick
    /// as a state transition therefore still sees the state as it was when
    /// the request arrived.
    pub fn poll(&mut self, store: &dyn Store) {
        let Some(mut portal) = self.portal.take() else {
            return;
        };

        for _ in 0..MAX_REQUESTS_PER_TICK {
            let Some((stream, request)) = portal.next_request() else {
                break;
            };
            let response = self.handle_control(request);
            portal.respond(stream, response);
        }
        portal.service_dns();

        self.advance_pending(store);

        if let Some(stop_at) = self.portal_stop_at {
            if Instant::now() >= stop_at {
                info!("provisioning portal closing after successful setup");
                self.pending = None;
                self.portal_stop_at = None;
                return; // portal dropped, sockets closed
            }
        }
        if self.wired_takeover() {
            info!("wired link came up, closing provisioning portal");
            self.pending = None;
            self.portal_stop_at = None;
            return;
        }

        self.portal = Some(portal);
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn connection_kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn is_online(&self) -> bool {
        self.state == ConnectivityState::Connected
    }

    /// Address of whichever interface is online.
    pub fn ip_address(&self) -> Option<Ipv4Addr> {
        self.ip
    }

    /// Name of the setup network, for the display layer.
    pub fn portal_ssid(&self) -> &str {
        &self.config.portal.ssid
    }

    /// Bound address of the portal's HTTP responder while it is active.
    pub fn portal_http_addr(&self) -> Option<SocketAddr> {
        self.portal.as_ref().map(Portal::http_addr)
    }

    /// Bound address of the portal's DNS responder while it is active.
    pub fn portal_dns_addr(&self) -> Option<SocketAddr> {
        self.portal.as_ref().map(Portal::dns_addr)
    }

    /// Waits briefly for the wired path, then probes it. True means we are
    /// now connected wired.
    fn try_wired(&mut self) -> bool {
        let deadline = Instant::now() + self.config.wired_settle;
        while !self.link.wired_up() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.config.association_poll);
        }

        if !self.probe.check() {
            debug!("wired link present but reachability probe failed");
            return false;
        }
        let ip = self.link.wired_ip();
        self.set_connected(ConnectionKind::Wired, ip);
        true
    }

    /// Blocking association attempt used for saved credentials at boot.
    fn connect_blocking(
        &mut self,
        credentials: &LinkCredentials,
    ) -> Result<Ipv4Addr, ConnectError> {
        self.link.begin_association(credentials)?;

        let deadline = Instant::now() + self.association_timeout(credentials.mode);
        loop {
            match self.link.association_state() {
                AssociationState::Associated => break,
                AssociationState::AuthRejected => {
                    self.link.disconnect();
                    return Err(auth_failure(credentials.mode));
                }
                _ => {
                    if Instant::now() >= deadline {
                        self.link.disconnect();
                        return Err(timeout_failure(credentials.mode));
                    }
                    thread::sleep(self.config.association_poll);
                }
            }
        }

        if !self.probe.check() {
            self.link.disconnect();
            return Err(ConnectError::NoInternet);
        }
        Ok(self.link.station_ip().unwrap_or(Ipv4Addr::UNSPECIFIED))
    }

    fn association_timeout(&self, mode: SecurityMode) -> Duration {
        match mode {
            SecurityMode::Enterprise => self.config.enterprise_timeout,
            _ => self.config.personal_timeout,
        }
    }

    fn set_connected(&mut self, kind: ConnectionKind, ip: Option<Ipv4Addr>) {
        debug_assert!(kind != ConnectionKind::None);
        self.state = ConnectivityState::Connected;
        self.kind = kind;
        self.ip = ip;
        // the setup network must never stay visible once we are online
        self.link.conceal_access_point();
    }

    fn open_portal(&mut self) -> io::Result<()> {
        let portal = Portal::open(&self.config.portal)?;
        if !self.link.start_access_point(&self.config.portal.ssid) {
            warn!("access point failed to start; portal reachable over existing links only");
        }
        self.state = ConnectivityState::ProvisioningPortalActive;
        self.kind = ConnectionKind::None;
        self.portal = Some(portal);
        self.pending = None;
        self.portal_stop_at = None;
        self.last_wired_check = Some(Instant::now());
        Ok(())
    }

    fn handle_control(&mut self, request: ControlRequest) -> HttpResponse {
        match request {
            ControlRequest::Page => HttpResponse::page(),
            ControlRequest::Scan => HttpResponse::json(200, json!(self.link.scan())),
            ControlRequest::Connect(body) => self.handle_connect(body),
            ControlRequest::Status => self.handle_status(),
            ControlRequest::BadRequest(msg) => {
                HttpResponse::json(400, json!({"ok": false, "msg": msg}))
            }
            ControlRequest::Redirect => {
                HttpResponse::redirect(format!("http://{}/", self.config.portal.ip))
            }
        }
    }

    /// Validates a submission and kicks off the asynchronous attempt. The
    /// response never waits on the association; browsers inside a captive
    /// view give up long before a 15s handshake resolves.
    fn handle_connect(&mut self, body: ConnectBody) -> HttpResponse {
        if self.pending.is_some() {
            return HttpResponse::json(
                409,
                json!({"ok": false, "msg": "A connection attempt is already in progress"}),
            );
        }
        if body.ssid.is_empty() {
            return HttpResponse::json(400, json!({"ok": false, "msg": "Missing SSID"}));
        }
        if body.enterprise && body.user.is_empty() {
            return HttpResponse::json(
                400,
                json!({"ok": false, "msg": "Username is required for enterprise networks"}),
            );
        }

        let credentials = if body.enterprise {
            LinkCredentials::enterprise(body.ssid, body.user, body.pass)
        } else if body.pass.is_empty() {
            LinkCredentials::open(body.ssid)
        } else {
            LinkCredentials::personal(body.ssid, body.pass)
        };

        if let Err(e) = self.link.begin_association(&credentials) {
            let e = ConnectError::from(e);
            warn!("portal submission rejected: {e}");
            return HttpResponse::json(200, json!({"ok": false, "msg": e.to_string()}));
        }

        info!(ssid = %credentials.ssid, "portal connection attempt started");
        let deadline = Instant::now() + self.association_timeout(credentials.mode);
        self.pending = Some(PendingAttempt {
            credentials,
            deadline,
            outcome: AttemptOutcome::Pending,
        });
        HttpResponse::json(200, json!({"status": "connecting"}))
    }

    fn handle_status(&mut self) -> HttpResponse {
        let Some(pending) = &self.pending else {
            return HttpResponse::json(200, json!({"status": "idle"}));
        };

        match pending.outcome.clone() {
            AttemptOutcome::Pending => HttpResponse::json(200, json!({"status": "connecting"})),
            AttemptOutcome::Connected(ip) => {
                // the client has now seen the result; close shop shortly
                if self.portal_stop_at.is_none() {
                    self.portal_stop_at =
                        Some(Instant::now() + self.config.portal.success_linger);
                }
                HttpResponse::json(200, json!({"status": "connected", "ip": ip.to_string()}))
            }
            AttemptOutcome::Failed(e) => {
                // failures are reported once, then the slot reopens
                self.pending = None;
                HttpResponse::json(200, json!({"status": "failed", "msg": e.to_string()}))
            }
        }
    }

    /// Drives an unresolved [`PendingAttempt`] forward one step.
    fn advance_pending(&mut self, store: &dyn Store) {
        let (mode, deadline) = match &self.pending {
            Some(p) if p.outcome == AttemptOutcome::Pending => (p.credentials.mode, p.deadline),
            _ => return,
        };

        let resolution = match self.link.association_state() {
            AssociationState::Associated => {
                if self.probe.check() {
                    Ok(self.link.station_ip().unwrap_or(Ipv4Addr::UNSPECIFIED))
                } else {
                    self.link.disconnect();
                    Err(ConnectError::NoInternet)
                }
            }
            AssociationState::AuthRejected => {
                self.link.disconnect();
                Err(auth_failure(mode))
            }
            _ if Instant::now() >= deadline => {
                self.link.disconnect();
                Err(timeout_failure(mode))
            }
            _ => return, // still associating, check again next tick
        };

        let Some(pending) = &mut self.pending else {
            return;
        };
        match resolution {
            Ok(ip) => {
                if !pending.credentials.save(store) {
                    warn!("connected but failed to persist credentials");
                }
                info!(%ip, ssid = %pending.credentials.ssid, "portal connection attempt succeeded");
                pending.outcome = AttemptOutcome::Connected(ip);
                self.set_connected(ConnectionKind::Wireless, Some(ip));
            }
            Err(e) => {
                info!("portal connection attempt failed: {e}");
                pending.outcome = AttemptOutcome::Failed(e);
            }
        }
    }

    /// While the portal is up, periodically looks for a wired link and
    /// probes it. True means wired took over and the portal should close.
    fn wired_takeover(&mut self) -> bool {
        let due = self
            .last_wired_check
            .is_none_or(|t| t.elapsed() >= self.config.wired_recheck);
        if !due {
            return false;
        }
        self.last_wired_check = Some(Instant::now());

        if !self.link.wired_up() {
            return false;
        }
        if !self.probe.check() {
            debug!("wired link up but reachability probe failed, keeping portal");
            return false;
        }
        let ip = self.link.wired_ip();
        self.set_connected(ConnectionKind::Wired, ip);
        true
    }
}
