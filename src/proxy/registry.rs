//! Process-wide registry of established tunnels.
//!
//! Keyed by normalized target URL so that `wss://Target.Example` and
//! `wss://target.example/` count as the same target. Several tunnels may
//! point at one target; the target stays proxied until the last of them
//! unregisters.

// ============================================================================
// Imports
// ============================================================================

use std::sync::LazyLock;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;
use url::Url;

use crate::identifiers::TunnelId;

// ============================================================================
// Registry
// ============================================================================

static ACTIVE_TUNNELS: LazyLock<Mutex<FxHashMap<String, FxHashSet<TunnelId>>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));

/// Returns the registry key for `url`.
///
/// Parsable URLs use their canonical form; anything else is used trimmed.
#[must_use]
pub fn normalize(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(parsed) => parsed.into(),
        Err(_) => url.trim().to_owned(),
    }
}

/// Records `id` as an established tunnel to `key`.
pub(crate) fn register(key: &str, id: TunnelId) {
    let mut tunnels = ACTIVE_TUNNELS.lock();
    tunnels.entry(key.to_owned()).or_default().insert(id);
    trace!(%id, key, "Tunnel registered");
}

/// Removes `id`. Other tunnels to the same target are unaffected.
pub(crate) fn unregister(key: &str, id: TunnelId) {
    let mut tunnels = ACTIVE_TUNNELS.lock();
    if let Some(ids) = tunnels.get_mut(key) {
        ids.remove(&id);
        if ids.is_empty() {
            tunnels.remove(key);
        }
        trace!(%id, key, "Tunnel unregistered");
    }
}

/// Returns `true` if an established tunnel targets `url`.
#[must_use]
pub fn is_proxying(url: &str) -> bool {
    ACTIVE_TUNNELS.lock().contains_key(&normalize(url))
}

/// Returns the number of distinct proxied targets.
#[must_use]
pub fn active_count() -> usize {
    ACTIVE_TUNNELS.lock().len()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("wss://Target.Example"), "wss://target.example/");
        assert_eq!(normalize(" ws://h:80/a "), "ws://h/a");
        assert_eq!(normalize("not a url"), "not a url");
    }

    #[test]
    fn test_register_and_unregister() {
        let key = normalize("wss://registry-basic.example/");
        let id = TunnelId::generate();

        assert!(!is_proxying("wss://registry-basic.example"));
        register(&key, id);
        assert!(is_proxying("wss://REGISTRY-BASIC.example"));
        assert!(active_count() >= 1);

        unregister(&key, id);
        assert!(!is_proxying("wss://registry-basic.example"));
    }

    #[test]
    fn test_shared_target_needs_every_tunnel_gone() {
        let key = normalize("wss://registry-shared.example/");
        let first = TunnelId::generate();
        let second = TunnelId::generate();

        register(&key, first);
        register(&key, second);

        unregister(&key, first);
        assert!(is_proxying(&key));

        unregister(&key, second);
        assert!(!is_proxying(&key));
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        unregister("wss://registry-unknown.example/", TunnelId::generate());
        assert!(!is_proxying("wss://registry-unknown.example/"));
    }
}
