use std::fmt::Display;
use std::ops::Deref;

use serde::Serialize;
use thiserror::Error;

use crate::store::Store;

/// Namespace holding the saved wireless credentials.
pub const WIFI_NAMESPACE: &str = "wifi";

const KEY_SSID: &str = "ssid";
const KEY_PASS: &str = "pass";
const KEY_USER: &str = "user";
const KEY_ENTERPRISE: &str = "enterprise";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    Open,
    Personal,
    Enterprise,
}

/// A set of wireless credentials, persisted as a unit under
/// [`WIFI_NAMESPACE`]. An empty `ssid` means "no saved credentials".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCredentials {
    pub ssid: String,
    pub passphrase: String,
    pub identity: String,
    pub mode: SecurityMode,
}

impl LinkCredentials {
    pub fn open(ssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            passphrase: String::new(),
            identity: String::new(),
            mode: SecurityMode::Open,
        }
    }

    pub fn personal(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
            identity: String::new(),
            mode: SecurityMode::Personal,
        }
    }

    pub fn enterprise(
        ssid: impl Into<String>,
        identity: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
            identity: identity.into(),
            mode: SecurityMode::Enterprise,
        }
    }

    /// Loads the saved credentials, or `None` when no ssid was ever saved.
    pub fn load(store: &dyn Store) -> Option<Self> {
        let ssid = store.get(WIFI_NAMESPACE, KEY_SSID).filter(|s| !s.is_empty())?;
        let passphrase = store.get(WIFI_NAMESPACE, KEY_PASS).unwrap_or_default();
        let identity = store.get(WIFI_NAMESPACE, KEY_USER).unwrap_or_default();
        let mode = if store.get_bool(WIFI_NAMESPACE, KEY_ENTERPRISE) {
            SecurityMode::Enterprise
        } else if passphrase.is_empty() {
            SecurityMode::Open
        } else {
            SecurityMode::Personal
        };

        Some(Self {
            ssid,
            passphrase,
            identity,
            mode,
        })
    }

    /// Persists the full credential set. Returns false if any write failed.
    pub fn save(&self, store: &dyn Store) -> bool {
        store.put(WIFI_NAMESPACE, KEY_SSID, &self.ssid)
            && store.put(WIFI_NAMESPACE, KEY_PASS, &self.passphrase)
            && store.put(WIFI_NAMESPACE, KEY_USER, &self.identity)
            && store.put_bool(
                WIFI_NAMESPACE,
                KEY_ENTERPRISE,
                self.mode == SecurityMode::Enterprise,
            )
    }
}

/// One visible network as reported by a scan, serialized straight onto the
/// portal wire.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub ssid: String,
    pub rssi: i32,
    pub channel: u8,
    pub open: bool,
    pub enterprise: bool,
}

/// Characters a claim code may use. Visually ambiguous glyphs (`0/O`, `1/I/L`)
/// are excluded because users copy these codes by eye.
pub const CLAIM_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Length of a claim code in characters.
pub const CLAIM_CODE_LEN: usize = 6;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("claim code must be {CLAIM_CODE_LEN} characters from the claim alphabet")]
pub struct InvalidClaimCode;

/// A short human-readable code users enter in the companion app to associate
/// this device with their account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClaimCode(String);

impl ClaimCode {
    pub fn parse(s: &str) -> Result<Self, InvalidClaimCode> {
        if s.len() != CLAIM_CODE_LEN || !s.bytes().all(|b| CLAIM_ALPHABET.contains(&b)) {
            return Err(InvalidClaimCode);
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ClaimCode {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for ClaimCode {
    fn default() -> Self {
        let code = (0..CLAIM_CODE_LEN)
            .map(|_| CLAIM_ALPHABET[rand::random_range(0..CLAIM_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }
}

impl Display for ClaimCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<ClaimCode> for String {
    fn from(value: ClaimCode) -> Self {
        value.0
    }
}
