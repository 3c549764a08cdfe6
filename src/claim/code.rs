//! Claim-code persistence. The code survives reboots so the sticker or
//! on-screen prompt a user pairs against stays valid.

use tracing::{info, warn};

use crate::store::Store;
use crate::types::ClaimCode;

use super::{CLAIM_CODE_KEY, DEVICE_NAMESPACE};

/// Returns the device's claim code, generating and persisting a fresh one
/// when the store has none. A stored value that fails validation (bad
/// length, character outside the alphabet) is replaced rather than served.
///
/// Registers the device namespace on the way, so a factory reset wipes the
/// code and the next boot mints a fresh one.
pub fn get_or_create(store: &dyn Store) -> ClaimCode {
    store.register_namespace(DEVICE_NAMESPACE);

    if let Some(saved) = store.get(DEVICE_NAMESPACE, CLAIM_CODE_KEY) {
        match ClaimCode::parse(&saved) {
            Ok(code) => return code,
            Err(_) => warn!("stored claim code {saved:?} is invalid, regenerating"),
        }
    }

    let code = ClaimCode::default();
    info!(%code, "generated claim code");
    if !store.put(DEVICE_NAMESPACE, CLAIM_CODE_KEY, code.as_str()) {
        // still usable this boot; the next boot will mint another
        warn!("failed to persist claim code");
    }
    code
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{CLAIM_ALPHABET, CLAIM_CODE_LEN};

    #[test]
    fn returns_the_stored_code() {
        let store = MemoryStore::new();
        store.put(DEVICE_NAMESPACE, CLAIM_CODE_KEY, "ABC234");

        assert_eq!(get_or_create(&store).as_str(), "ABC234");
    }

    #[test]
    fn generates_and_persists_when_missing() {
        let store = MemoryStore::new();

        let code = get_or_create(&store);

        assert_eq!(code.as_str().len(), CLAIM_CODE_LEN);
        assert!(code.bytes().all(|b| CLAIM_ALPHABET.contains(&b)));
        assert_eq!(
            store.get(DEVICE_NAMESPACE, CLAIM_CODE_KEY).as_deref(),
            Some(code.as_str())
        );
    }

    #[test]
    fn replaces_a_corrupt_stored_code() {
        let store = MemoryStore::new();
        store.put(DEVICE_NAMESPACE, CLAIM_CODE_KEY, "abc12");

        let code = get_or_create(&store);

        assert!(ClaimCode::parse(code.as_str()).is_ok());
        assert_eq!(
            store.get(DEVICE_NAMESPACE, CLAIM_CODE_KEY).as_deref(),
            Some(code.as_str())
        );
    }

    #[test]
    fn consecutive_calls_agree() {
        let store = MemoryStore::new();

        let first = get_or_create(&store);
        let second = get_or_create(&store);

        assert_eq!(first, second);
    }

    #[test]
    fn factory_reset_wipes_the_code() {
        let store = MemoryStore::new();
        let first = get_or_create(&store);

        assert!(store.factory_reset());
        assert_eq!(store.get(DEVICE_NAMESPACE, CLAIM_CODE_KEY), None);

        // the next boot mints a fresh one
        assert_ne!(get_or_create(&store), first);
    }
}
