//! Connectivity bring-up and device claiming core for the Pharos display.
//!
//! This crate is the platform-independent half of the device firmware: a
//! connectivity manager that walks wired link → saved wireless credentials
//! → self-hosted provisioning portal, a claim session that announces the
//! device over pub/sub until the backend adopts it, the namespaced
//! credential store both persist into, and the touch gesture recognizer
//! driving the on-device UI.
//!
//! Platform integrations implement three traits ([`LinkControl`],
//! [`Prober`], [`PubSubTransport`]); everything above them is
//! single-threaded and driven from one cooperative loop via
//! [`ConnectivityManager::poll`] and [`ClaimSession::tick`].
//!
//! # Example
//!
//! ```
//! use pharos::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! store.put("wifi", "ssid", "HomeNet");
//! assert_eq!(store.get("wifi", "ssid").as_deref(), Some("HomeNet"));
//! ```

pub mod claim;
pub mod gesture;
pub mod link;
pub mod store;
pub mod types;

pub use claim::{ClaimConfig, ClaimSession, ClaimState, PubSubTransport};
pub use gesture::{GestureConfig, GestureEvent, GestureRecognizer, TouchSample};
pub use link::control::LinkControl;
pub use link::probe::{HttpProbe, Prober};
pub use link::{
    ConnectError, ConnectionKind, ConnectivityManager, ConnectivityState, LinkConfig,
    PortalConfig,
};
pub use store::{FileStore, MemoryStore, Store};
pub use types::{ClaimCode, LinkCredentials, NetworkInfo, SecurityMode};
