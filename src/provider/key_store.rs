//! The key/value configuration store behind client-side configuration.
//!
//! The store is user-editable settings: it owns API keys, the enabled flag per
//! provider and per-capability preferences. Rate-limit and failure state is
//! deliberately *not* kept here (see [`super::key_health`]).

use std::collections::HashMap;

use dashmap::DashMap;
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::debug;

use crate::{
    capability::CapabilitySettings,
    config::KeysConfig,
    timestamp::Timestamp,
};

use super::{ProviderId, StoredKey};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("Key already configured for provider: {0}")]
    DuplicateKey(ProviderId),
    #[error("Key not found for provider: {0}")]
    KeyNotFound(ProviderId),
    #[error("Key store unavailable: {0}")]
    Unavailable(String),
}

pub trait KeyStore: Send + Sync {
    /// Keys for a provider in insertion order.
    fn keys(&self, provider: &ProviderId) -> Vec<StoredKey>;

    /// Every provider with an entry in the store, enabled or not.
    fn providers(&self) -> Vec<ProviderId>;

    fn enabled_providers(&self) -> Vec<ProviderId>;

    fn is_provider_enabled(&self, provider: &ProviderId) -> bool;

    fn set_provider_enabled(&self, provider: &ProviderId, enabled: bool);

    fn capability_settings(&self, capability_id: &str) -> Option<CapabilitySettings>;

    fn set_capability_settings(&self, capability_id: &str, settings: CapabilitySettings);

    /// Appends a key. Adding a key to an unknown provider creates an enabled entry.
    fn add_key(&self, provider: &ProviderId, key: StoredKey) -> Result<(), KeyStoreError>;

    fn remove_key(&self, provider: &ProviderId, key: &str) -> bool;

    fn mark_key_validity(&self, provider: &ProviderId, key: &str, is_valid: bool) -> bool;

    fn touch_key(&self, provider: &ProviderId, key: &str);
}

#[derive(Debug, Clone, Default)]
struct ProviderEntry {
    enabled: bool,
    keys: Vec<StoredKey>,
}

/// In-process [`KeyStore`], used by the CLI and tests.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    providers: DashMap<ProviderId, ProviderEntry>,
    capability_settings: DashMap<String, CapabilitySettings>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(
        config: &KeysConfig,
        capability_settings: &HashMap<String, CapabilitySettings>,
    ) -> Self {
        let store = Self::new();
        for (name, provider_config) in &config.providers {
            let provider = ProviderId::from(name.as_str());
            let keys = provider_config
                .keys
                .iter()
                .filter(|entry| !entry.key.trim().is_empty())
                .map(|entry| {
                    let mut key = StoredKey::new(entry.key.clone(), entry.label.clone());
                    key.is_valid = entry.valid;
                    key
                })
                .collect();
            store.providers.insert(
                provider,
                ProviderEntry {
                    enabled: provider_config.enabled,
                    keys,
                },
            );
        }
        for (capability_id, settings) in capability_settings {
            store
                .capability_settings
                .insert(capability_id.clone(), settings.clone());
        }
        debug!(providers = store.providers.len(), "key store loaded");
        store
    }
}

impl KeyStore for MemoryKeyStore {
    fn keys(&self, provider: &ProviderId) -> Vec<StoredKey> {
        self.providers
            .get(provider)
            .map(|entry| entry.keys.clone())
            .unwrap_or_default()
    }

    fn providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<ProviderId> =
            self.providers.iter().map(|entry| entry.key().clone()).collect();
        providers.sort();
        providers
    }

    fn enabled_providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<ProviderId> = self
            .providers
            .iter()
            .filter(|entry| entry.value().enabled)
            .map(|entry| entry.key().clone())
            .collect();
        providers.sort();
        providers
    }

    fn is_provider_enabled(&self, provider: &ProviderId) -> bool {
        self.providers
            .get(provider)
            .map(|entry| entry.enabled)
            .unwrap_or(false)
    }

    fn set_provider_enabled(&self, provider: &ProviderId, enabled: bool) {
        self.providers.entry(provider.clone()).or_default().enabled = enabled;
    }

    fn capability_settings(&self, capability_id: &str) -> Option<CapabilitySettings> {
        self.capability_settings
            .get(capability_id)
            .map(|settings| settings.value().clone())
    }

    fn set_capability_settings(&self, capability_id: &str, settings: CapabilitySettings) {
        self.capability_settings
            .insert(capability_id.to_string(), settings);
    }

    fn add_key(&self, provider: &ProviderId, key: StoredKey) -> Result<(), KeyStoreError> {
        let mut entry = self
            .providers
            .entry(provider.clone())
            .or_insert_with(|| ProviderEntry {
                enabled: true,
                keys: Vec::new(),
            });
        if entry
            .keys
            .iter()
            .any(|existing| existing.matches(key.key.expose_secret()))
        {
            return Err(KeyStoreError::DuplicateKey(provider.clone()));
        }
        entry.keys.push(key);
        Ok(())
    }

    fn remove_key(&self, provider: &ProviderId, key: &str) -> bool {
        match self.providers.get_mut(provider) {
            Some(mut entry) => {
                let before = entry.keys.len();
                entry.keys.retain(|stored| !stored.matches(key));
                entry.keys.len() != before
            }
            None => false,
        }
    }

    fn mark_key_validity(&self, provider: &ProviderId, key: &str, is_valid: bool) -> bool {
        self.update_key(provider, key, |stored| stored.is_valid = Some(is_valid))
    }

    fn touch_key(&self, provider: &ProviderId, key: &str) {
        self.update_key(provider, key, |stored| {
            stored.last_used = Some(Timestamp::now())
        });
    }
}

impl MemoryKeyStore {
    fn update_key(
        &self,
        provider: &ProviderId,
        key: &str,
        update: impl FnOnce(&mut StoredKey),
    ) -> bool {
        let Some(mut entry) = self.providers.get_mut(provider) else {
            return false;
        };
        let updated = match entry.keys.iter_mut().find(|stored| stored.matches(key)) {
            Some(stored) => {
                update(stored);
                true
            }
            None => false,
        };
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeyEntry, ProviderKeysConfig};

    #[test]
    fn test_add_key_creates_enabled_provider() {
        let store = MemoryKeyStore::new();
        store
            .add_key(&ProviderId::Gemini, StoredKey::new("gemini-key-000001", None))
            .unwrap();
        assert!(store.is_provider_enabled(&ProviderId::Gemini));
        assert_eq!(store.enabled_providers(), vec![ProviderId::Gemini]);
        assert_eq!(store.keys(&ProviderId::Gemini).len(), 1);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let store = MemoryKeyStore::new();
        let provider = ProviderId::DeepSeek;
        store
            .add_key(&provider, StoredKey::new("sk-duplicate-0001", None))
            .unwrap();
        let err = store
            .add_key(&provider, StoredKey::new("sk-duplicate-0001", None))
            .unwrap_err();
        assert_eq!(err, KeyStoreError::DuplicateKey(provider));
    }

    #[test]
    fn test_remove_and_validity() {
        let store = MemoryKeyStore::new();
        let provider = ProviderId::Pexels;
        store
            .add_key(&provider, StoredKey::new("pexels-key-00001", None))
            .unwrap();
        assert!(store.mark_key_validity(&provider, "pexels-key-00001", false));
        assert_eq!(store.keys(&provider)[0].is_valid, Some(false));
        assert!(!store.remove_key(&provider, "missing"));
        assert!(store.remove_key(&provider, "pexels-key-00001"));
        assert!(store.keys(&provider).is_empty());
    }

    #[test]
    fn test_disabled_provider_not_listed() {
        let store = MemoryKeyStore::new();
        store
            .add_key(&ProviderId::Unsplash, StoredKey::new("unsplash-key-001", None))
            .unwrap();
        store.set_provider_enabled(&ProviderId::Unsplash, false);
        assert!(store.enabled_providers().is_empty());
        assert_eq!(store.providers(), vec![ProviderId::Unsplash]);
    }

    #[test]
    fn test_from_config_skips_blank_keys() {
        let mut config = KeysConfig::default();
        config.providers.insert(
            "Gemini".to_string(),
            ProviderKeysConfig {
                enabled: true,
                keys: vec![
                    KeyEntry {
                        key: "gemini-key-000001".to_string(),
                        label: Some("main".to_string()),
                        valid: None,
                    },
                    KeyEntry {
                        key: "   ".to_string(),
                        label: None,
                        valid: None,
                    },
                ],
            },
        );
        let mut settings = HashMap::new();
        settings.insert("summarize".to_string(), CapabilitySettings::disabled());
        let store = MemoryKeyStore::from_config(&config, &settings);
        assert_eq!(store.keys(&ProviderId::Gemini).len(), 1);
        assert_eq!(
            store.capability_settings("summarize"),
            Some(CapabilitySettings::disabled())
        );
    }
}
