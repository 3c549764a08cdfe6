use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use super::Store;

/// File-backed [`Store`]: one file per key under `<root>/<namespace>/<key>`.
///
/// Writes go through a temp-file-then-rename dance so a power cut mid-write
/// never leaves a half-written value behind.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    registered: Mutex<Vec<String>>,
}

impl FileStore {
    /// Opens a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            registered: Mutex::new(Vec::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Wipes every registered namespace. Namespaces never registered are
    /// left alone, so unrelated state survives a reset.
    pub fn factory_reset(&self) -> bool {
        let registered = self
            .registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut ok = true;
        for namespace in &registered {
            ok &= self.clear_namespace(namespace);
        }
        info!("factory reset cleared {} namespaces", registered.len());
        ok
    }

    fn entry_path(&self, namespace: &str, key: &str) -> Option<PathBuf> {
        if !valid_name(namespace) || !valid_name(key) {
            warn!("rejecting invalid store name {namespace:?}/{key:?}");
            return None;
        }
        Some(self.root.join(namespace).join(key))
    }
}

/// Namespace and key names double as file names, keep them boring.
fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Writes `value` to `path` via a temp file in the same directory, syncing
/// before the rename so the value is durable once this returns.
fn write_atomic(path: &Path, value: &str) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(value.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)
}

impl Store for FileStore {
    fn get(&self, namespace: &str, key: &str) -> Option<String> {
        let path = self.entry_path(namespace, key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Some(value),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("failed to read {}: {e}", path.display());
                None
            }
        }
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> bool {
        let Some(path) = self.entry_path(namespace, key) else {
            return false;
        };
        let result = fs::create_dir_all(self.root.join(namespace))
            .and_then(|()| write_atomic(&path, value));
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to write {}: {e}", path.display());
                false
            }
        }
    }

    fn remove(&self, namespace: &str, key: &str) -> bool {
        let Some(path) = self.entry_path(namespace, key) else {
            return false;
        };
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!("failed to remove {}: {e}", path.display());
                false
            }
        }
    }

    fn clear_namespace(&self, namespace: &str) -> bool {
        if !valid_name(namespace) {
            return false;
        }
        match fs::remove_dir_all(self.root.join(namespace)) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                warn!("failed to clear namespace {namespace}: {e}");
                false
            }
        }
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

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn values_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            assert!(store.put("wifi", "ssid", "HomeNet"));
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.get("wifi", "ssid"), Some("HomeNet".to_string()));
    }

    #[test]
    fn missing_keys_read_as_none() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert_eq!(store.get("wifi", "ssid"), None);
        assert!(!store.remove("wifi", "ssid"));
    }

    #[test]
    fn remove_deletes_the_value() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("wifi", "ssid", "HomeNet");
        assert!(store.remove("wifi", "ssid"));
        assert_eq!(store.get("wifi", "ssid"), None);
    }

    #[test]
    fn clear_namespace_is_scoped() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("wifi", "ssid", "HomeNet");
        store.put("device", "claim_code", "ABC234");

        assert!(store.clear_namespace("wifi"));
        assert_eq!(store.get("wifi", "ssid"), None);
        assert_eq!(store.get("device", "claim_code"), Some("ABC234".to_string()));

        // clearing an absent namespace is fine
        assert!(store.clear_namespace("wifi"));
    }

    #[test]
    fn factory_reset_spares_unregistered_namespaces() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.register_namespace("wifi");
        store.register_namespace("device");
        store.put("wifi", "ssid", "HomeNet");
        store.put("device", "claim_code", "ABC234");
        store.put("calibration", "offset", "17");

        assert!(store.factory_reset());
        assert_eq!(store.get("wifi", "ssid"), None);
        assert_eq!(store.get("device", "claim_code"), None);
        assert_eq!(store.get("calibration", "offset"), Some("17".to_string()));
    }

    #[test]
    fn path_like_names_are_rejected() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(!store.put("wifi", "../escape", "x"));
        assert!(!store.put("", "key", "x"));
        assert_eq!(store.get("wifi", "../escape"), None);
    }

    #[test]
    fn bool_helpers_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(!store.get_bool("wifi", "enterprise"));
        store.put_bool("wifi", "enterprise", true);
        assert!(store.get_bool("wifi", "enterprise"));
    }
}
