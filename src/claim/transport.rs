//! Transport seam for the claim protocol: a minimal pub/sub surface the
//! platform backs with its broker client, plus the wire format itself.

use serde::{Deserialize, Serialize};

/// A message delivered on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Broker operations the claim session drives. All results are plain
/// booleans; the session treats every failure as retryable and consults
/// [`last_error_code`](Self::last_error_code) only for logging.
///
/// Inbound delivery is pull-based: implementations queue messages as they
/// arrive and hand the backlog over in [`poll`](Self::poll). Each transport
/// instance has its own queue, so independent sessions never see each
/// other's traffic.
pub trait PubSubTransport {
    /// Connects to the broker under `client_id`. Idempotent while
    /// connected.
    fn connect(&mut self, client_id: &str) -> bool;

    fn disconnect(&mut self);

    fn subscribe(&mut self, topic: &str) -> bool;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> bool;

    /// Drains every message received since the last call.
    fn poll(&mut self) -> Vec<InboundMessage>;

    fn is_connected(&self) -> bool;

    /// Platform error code of the most recent failure, for diagnostics.
    fn last_error_code(&self) -> i32;
}

/// Everything that moves on a `claim/<code>` topic. The topic is shared
/// between the device and the backend, so the device sees its own
/// `register` echoed back.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClaimMessage {
    /// Device announcement, sent once per broker session.
    Register { firmware_version: String },
    /// Backend confirmation that the announcement was recorded.
    Ack { status: String },
    /// Backend adoption result carrying the assigned bridge.
    Provision { bridge_id: String },
}
