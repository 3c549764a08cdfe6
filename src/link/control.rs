//! Platform seam for the network hardware.
//!
//! The connectivity manager drives radios and wired PHYs exclusively through
//! [`LinkControl`], so the manager itself stays host-independent and tests
//! can script link behavior without any hardware.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::types::{LinkCredentials, NetworkInfo};

/// Where the current station-side association attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssociationState {
    /// No attempt in progress.
    #[default]
    Idle,
    /// Attempt started, outcome not yet known.
    Associating,
    /// Associated and addressed.
    Associated,
    /// The access point rejected our authentication. Terminal for the
    /// attempt; platforms that cannot distinguish this from a slow
    /// association may simply never report it and let the deadline fire.
    AuthRejected,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("Enterprise (802.1X) networks are not supported by this firmware.")]
    EnterpriseUnsupported,
}

/// Operations the platform must provide for wired and wireless bring-up.
///
/// Implementations are expected to have selected a concurrent
/// access-point-plus-station network mode once at process start and to keep
/// it for the life of the process: switching modes can drop a live
/// association, so nothing in this trait ever changes mode.
/// [`conceal_access_point`](LinkControl::conceal_access_point) only stops
/// the beacon.
///
/// Wired link/address events typically arrive on the platform's own event
/// context. Implementations must latch them into plain flags that
/// [`wired_up`](LinkControl::wired_up) reads; the cooperative loop never
/// blocks on them.
pub trait LinkControl {
    /// True when the wired path has a link and an assigned address.
    fn wired_up(&self) -> bool;

    /// Address of the wired interface, when it has one.
    fn wired_ip(&self) -> Option<Ipv4Addr>;

    /// Kicks off a station association. Must return without waiting for the
    /// outcome; progress is read back through
    /// [`association_state`](LinkControl::association_state).
    fn begin_association(&mut self, credentials: &LinkCredentials) -> Result<(), LinkError>;

    fn association_state(&self) -> AssociationState;

    /// Address of the station interface once associated.
    fn station_ip(&self) -> Option<Ipv4Addr>;

    /// Drops any station association and tears down any in-flight
    /// authentication context (including 802.1X state).
    fn disconnect(&mut self);

    /// Networks currently visible to the radio. Platforms with slow scans
    /// should serve cached results; this is called from the portal's
    /// request path.
    fn scan(&mut self) -> Vec<NetworkInfo>;

    /// Starts broadcasting the provisioning network.
    fn start_access_point(&mut self, ssid: &str) -> bool;

    /// Stops the provisioning network beacon without changing network mode;
    /// clients already associated stay associated.
    fn conceal_access_point(&mut self);
}
