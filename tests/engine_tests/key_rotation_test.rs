use std::{sync::Arc, time::Duration};

use ifrit::{
    config::KeyManagerConfig,
    provider::{
        key_health::KeyHealthTracker,
        key_manager::KeyManager,
        key_store::{KeyStore, MemoryKeyStore},
        ProviderId, StoredKey,
    },
    timestamp::ManualClock,
};
use secrecy::{ExposeSecret, SecretString};

const PROVIDER: ProviderId = ProviderId::OpenAI;

struct Keys {
    manager: KeyManager,
    store: Arc<MemoryKeyStore>,
    clock: ManualClock,
}

fn keys(values: &[&str]) -> Keys {
    let store = Arc::new(MemoryKeyStore::new());
    for value in values {
        store.add_key(&PROVIDER, StoredKey::new(*value, None)).unwrap();
    }
    let clock = ManualClock::default();
    let tracker = Arc::new(KeyHealthTracker::new(Arc::new(clock.clone())));
    let manager =
        KeyManager::new(store.clone(), KeyManagerConfig::default()).with_tracker(tracker);
    Keys {
        manager,
        store,
        clock,
    }
}

fn exposed(key: Option<SecretString>) -> Option<String> {
    key.map(|key| key.expose_secret().to_string())
}

#[test]
fn test_rotation_wraps_after_n_calls() {
    let keys = keys(&["sk-first-000", "sk-second-00", "sk-third-000"]);
    let original = exposed(keys.manager.get_key(&PROVIDER));
    for _ in 0..3 {
        keys.manager.rotate_key(&PROVIDER);
    }
    assert_eq!(exposed(keys.manager.get_key(&PROVIDER)), original);
}

#[test]
fn test_removing_a_key_never_indexes_out_of_bounds() {
    let keys = keys(&["sk-first-000", "sk-second-00"]);
    keys.manager.rotate_key(&PROVIDER);
    assert!(keys.manager.remove_key(&PROVIDER, "sk-second-00"));
    assert_eq!(
        exposed(keys.manager.get_key(&PROVIDER)).as_deref(),
        Some("sk-first-000")
    );

    assert!(keys.manager.remove_key(&PROVIDER, "sk-first-000"));
    assert!(keys.manager.get_key(&PROVIDER).is_none());
    assert!(keys.manager.get_available_key(&PROVIDER).is_none());
}

#[test]
fn test_rate_limit_expires_without_clearing() {
    let keys = keys(&["sk-first-000", "sk-second-00"]);
    let replacement = keys.manager.mark_rate_limited(&PROVIDER);
    assert_eq!(exposed(replacement).as_deref(), Some("sk-second-00"));

    keys.manager.rotate_key(&PROVIDER);
    assert_eq!(
        exposed(keys.manager.get_available_key(&PROVIDER)).as_deref(),
        Some("sk-second-00")
    );

    keys.clock.advance(Duration::from_secs(5 * 60 + 1));
    keys.manager.rotate_key(&PROVIDER);
    assert_eq!(
        exposed(keys.manager.get_available_key(&PROVIDER)).as_deref(),
        Some("sk-first-000")
    );
}

#[test]
fn test_three_failures_exhaust_until_success() {
    let keys = keys(&["sk-first-000", "sk-second-00"]);
    for expected in 1..=3 {
        assert_eq!(keys.manager.mark_failure(&PROVIDER), expected);
    }
    assert_eq!(
        exposed(keys.manager.get_available_key(&PROVIDER)).as_deref(),
        Some("sk-second-00")
    );

    keys.manager.rotate_key(&PROVIDER);
    keys.manager.mark_success(&PROVIDER);
    assert_eq!(
        exposed(keys.manager.get_available_key(&PROVIDER)).as_deref(),
        Some("sk-first-000")
    );
    assert_eq!(keys.manager.mark_failure(&PROVIDER), 1);
}

#[test]
fn test_replacement_key_does_not_inherit_cooldown() {
    let keys = keys(&["sk-first-000", "sk-second-00"]);
    keys.manager.rotate_key(&PROVIDER);
    keys.manager.mark_rate_limited(&PROVIDER);
    keys.manager.remove_key(&PROVIDER, "sk-second-00");
    keys.store
        .add_key(&PROVIDER, StoredKey::new("sk-newcomer-0", None))
        .unwrap();

    keys.manager.rotate_key(&PROVIDER);
    assert_eq!(
        exposed(keys.manager.get_key(&PROVIDER)).as_deref(),
        Some("sk-newcomer-0")
    );
    assert_eq!(
        exposed(keys.manager.get_available_key(&PROVIDER)).as_deref(),
        Some("sk-newcomer-0")
    );
}
