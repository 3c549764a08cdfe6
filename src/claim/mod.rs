//! Device claiming. Once online, the device announces itself on a pub/sub
//! topic derived from its claim code and waits for the backend to adopt it
//! and hand down a bridge id. Everything here is driven from the
//! cooperative loop; nothing blocks.

pub mod code;
pub mod transport;

pub use transport::{ClaimMessage, InboundMessage, PubSubTransport};

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::store::Store;
use crate::types::{ClaimCode, InvalidClaimCode};

/// Store namespace owned by the claiming component.
pub const DEVICE_NAMESPACE: &str = "device";
pub const CLAIM_CODE_KEY: &str = "claim_code";
pub const BRIDGE_ID_KEY: &str = "bridge_id";

/// Ack status the backend sends when the announcement was recorded.
const ACK_REGISTERED: &str = "registered";

/// Where a claim session currently stands. `Provisioned` and `Error` are
/// terminal; everything in between retries until [`ClaimSession::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimState {
    #[default]
    Idle,
    Connecting,
    Subscribing,
    Publishing,
    WaitingAck,
    Registered,
    Provisioned,
    Error,
}

#[derive(Debug, Clone)]
pub struct ClaimConfig {
    /// Version string sent with the register announcement.
    pub firmware_version: String,
    /// Interval between broker connection attempts.
    pub connect_retry: Duration,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            connect_retry: Duration::from_secs(5),
        }
    }
}

/// The claiming state machine. Owns its transport; drive it with
/// [`begin`](Self::begin) once and [`tick`](Self::tick) every loop pass.
pub struct ClaimSession<T> {
    transport: T,
    config: ClaimConfig,
    state: ClaimState,
    topic: String,
    client_id: String,
    subscribed: bool,
    published: bool,
    last_connect_attempt: Option<Instant>,
    status: &'static str,
    last_error: Option<String>,
}

impl<T: PubSubTransport> ClaimSession<T> {
    pub fn new(transport: T, config: ClaimConfig) -> Self {
        Self {
            transport,
            config,
            state: ClaimState::Idle,
            topic: String::new(),
            client_id: String::new(),
            subscribed: false,
            published: false,
            last_connect_attempt: None,
            status: "",
            last_error: None,
        }
    }

    /// Starts (or restarts) a session for `code`. Derives the shared topic
    /// and a per-code client id; an invalid code parks the session in
    /// [`ClaimState::Error`] and is also returned to the caller.
    pub fn begin(&mut self, code: &str) -> Result<(), InvalidClaimCode> {
        let code = match ClaimCode::parse(code) {
            Ok(code) => code,
            Err(e) => {
                warn!("refusing claim session for invalid code {code:?}");
                self.state = ClaimState::Error;
                self.status = "Invalid claim code";
                self.last_error = Some(format!("invalid claim code {code:?}"));
                return Err(e);
            }
        };

        if self.transport.is_connected() {
            self.transport.disconnect();
        }
        self.topic = format!("claim/{code}");
        self.client_id = format!("provision-{code}");
        self.subscribed = false;
        self.published = false;
        self.last_connect_attempt = None;
        self.state = ClaimState::Connecting;
        self.status = "Connecting...";
        self.last_error = None;
        info!(topic = %self.topic, "claim session starting");
        Ok(())
    }

    /// One cooperative step: reconnect if the broker link dropped, push the
    /// handshake forward, dispatch anything the backend sent. Each call does
    /// as much as the transport allows and leaves the rest for the next
    /// tick.
    pub fn tick(&mut self, store: &dyn Store) {
        if matches!(
            self.state,
            ClaimState::Idle | ClaimState::Provisioned | ClaimState::Error
        ) {
            return;
        }

        if !self.transport.is_connected() {
            if self.state != ClaimState::Connecting {
                warn!("claim transport dropped, reconnecting");
                self.state = ClaimState::Connecting;
                self.status = "Connecting...";
            }
            // a fresh broker session knows nothing of the old one
            self.subscribed = false;
            self.published = false;

            let due = self
                .last_connect_attempt
                .is_none_or(|t| t.elapsed() >= self.config.connect_retry);
            if !due {
                return;
            }
            self.last_connect_attempt = Some(Instant::now());
            if !self.transport.connect(&self.client_id) {
                let code = self.transport.last_error_code();
                debug!(code, "broker connect failed");
                self.last_error = Some(format!("broker connect failed (code {code})"));
                return;
            }
            self.state = ClaimState::Subscribing;
            self.status = "Connected to broker";
        }

        for message in self.transport.poll() {
            self.handle_message(store, message);
        }

        if self.state == ClaimState::Subscribing && !self.subscribed {
            if !self.transport.subscribe(&self.topic) {
                let code = self.transport.last_error_code();
                debug!(code, "subscribe failed, will retry");
                self.last_error = Some(format!("subscribe failed (code {code})"));
                return;
            }
            self.subscribed = true;
            self.state = ClaimState::Publishing;
            self.status = "Subscribed, registering device";
        }

        if self.state == ClaimState::Publishing && !self.published {
            let register = ClaimMessage::Register {
                firmware_version: self.config.firmware_version.clone(),
            };
            let payload = match serde_json::to_vec(&register) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("failed to encode register message: {e}");
                    return;
                }
            };
            if !self.transport.publish(&self.topic, &payload) {
                let code = self.transport.last_error_code();
                debug!(code, "register publish failed, will retry");
                self.last_error = Some(format!("register publish failed (code {code})"));
                return;
            }
            self.published = true;
            self.state = ClaimState::WaitingAck;
            self.status = "Waiting for registration ack";
        }
    }

    /// Tears the session down from any state. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.transport.is_connected() {
            self.transport.disconnect();
        }
        self.state = ClaimState::Idle;
        self.status = "";
        self.subscribed = false;
        self.published = false;
        self.last_connect_attempt = None;
        self.last_error = None;
    }

    pub fn state(&self) -> ClaimState {
        self.state
    }

    /// Human-readable progress line for the display.
    pub fn status_message(&self) -> &str {
        self.status
    }

    /// Detail of the most recent failure, kept until the next `begin` or
    /// `stop`.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn handle_message(&mut self, store: &dyn Store, message: InboundMessage) {
        if message.topic != self.topic {
            debug!(topic = %message.topic, "ignoring message on unexpected topic");
            return;
        }
        let parsed: ClaimMessage = match serde_json::from_slice(&message.payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("ignoring malformed claim message: {e}");
                return;
            }
        };

        match parsed {
            // our own announcement echoed back on the shared topic
            ClaimMessage::Register { .. } => {}
            ClaimMessage::Ack { status } => {
                if self.state == ClaimState::WaitingAck && status == ACK_REGISTERED {
                    info!("registration acknowledged, waiting for adoption");
                    self.state = ClaimState::Registered;
                    self.status = "Waiting for adoption...";
                } else {
                    debug!(%status, state = ?self.state, "ignoring ack");
                }
            }
            ClaimMessage::Provision { bridge_id } => {
                if !matches!(
                    self.state,
                    ClaimState::WaitingAck | ClaimState::Registered
                ) {
                    debug!(state = ?self.state, "ignoring provision outside registration");
                    return;
                }
                if store.put(DEVICE_NAMESPACE, BRIDGE_ID_KEY, &bridge_id) {
                    info!(%bridge_id, "device provisioned");
                    self.state = ClaimState::Provisioned;
                    self.status = "Provisioned!";
                } else {
                    // remain in place; the backend re-delivers and the
                    // persist is retried then
                    warn!("failed to persist bridge id");
                }
            }
        }
    }
}

/// Bridge id a past session persisted, when the device is already claimed.
pub fn stored_bridge_id(store: &dyn Store) -> Option<String> {
    store.get(DEVICE_NAMESPACE, BRIDGE_ID_KEY)
}

pub fn is_claimed(store: &dyn Store) -> bool {
    stored_bridge_id(store).is_some()
}
