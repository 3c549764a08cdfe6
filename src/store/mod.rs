//! Namespaced persistent key/value storage.
//!
//! Both state machines in this crate persist through the [`Store`] trait and
//! never touch a concrete backend directly, so tests can swap in
//! [`MemoryStore`] and devices can pick whatever medium they actually have.
//! All methods take `&self`; implementations serialize their own access.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

mod file;

pub use file::FileStore;

/// Namespaced key/value storage.
///
/// `put`-style operations report success as a plain bool: persistence
/// failures are never fatal in this system, callers retry or carry on
/// degraded (see the claim protocol's adoption handling).
pub trait Store {
    fn get(&self, namespace: &str, key: &str) -> Option<String>;

    fn put(&self, namespace: &str, key: &str, value: &str) -> bool;

    /// Removes a single key. Returns false if the key was not present.
    fn remove(&self, namespace: &str, key: &str) -> bool;

    /// Drops every key in the namespace.
    fn clear_namespace(&self, namespace: &str) -> bool;

    /// Declares that a namespace belongs to this firmware and must be wiped
    /// on a full factory reset.
    fn register_namespace(&self, namespace: &str);

    fn get_or(&self, namespace: &str, key: &str, default: &str) -> String {
        self.get(namespace, key)
            .unwrap_or_else(|| default.to_string())
    }

    fn get_bool(&self, namespace: &str, key: &str) -> bool {
        self.get(namespace, key).as_deref() == Some("true")
    }

    fn put_bool(&self, namespace: &str, key: &str, value: bool) -> bool {
        self.put(namespace, key, if value { "true" } else { "false" })
    }
}

/// In-memory [`Store`], used by tests and by hosts without persistence.
/// Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), String>>,
    registered: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wipes every registered namespace.
    pub fn factory_reset(&self) -> bool {
        let registered = self
            .registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for namespace in &registered {
            self.clear_namespace(namespace);
        }
        true
    }
}

impl Store for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (namespace.to_string(), key.to_string()),
                value.to_string(),
            );
        true
    }

    fn remove(&self, namespace: &str, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some()
    }

    fn clear_namespace(&self, namespace: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(ns, _), _| ns != namespace);
        true
    }

    fn register_namespace(&self, namespace: &str) {
        let mut registered = self
            .registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !registered.iter().any(|ns| ns == namespace) {
            registered.push(namespace.to_string());
        }
    }
}
