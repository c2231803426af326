//! Read-only configuration views consumed by the engine.
//!
//! Client code reads keys and capability preferences from the user's key
//! store; server code receives keys explicitly per request. Both expose the
//! same [`ConfigProvider`] trait so the engine never knows which it has.

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

use crate::{
    capability::CapabilitySettings,
    config::{ConfigError, ConfigResult},
};

use super::{ProviderId, StoredKey, key_store::KeyStore};

/// Where the engine is running. Decides which config provider is built and
/// whether engines share state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    Client,
    Server,
}

impl ExecutionContext {
    pub fn is_server(&self) -> bool {
        matches!(self, ExecutionContext::Server)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConfigSource {
    Client,
    Server,
}

pub trait ConfigProvider: Send + Sync {
    fn provider_keys(&self, provider: &ProviderId) -> Vec<StoredKey>;

    fn first_key(&self, provider: &ProviderId) -> Option<SecretString>;

    fn capability_settings(&self, capability_id: &str) -> Option<CapabilitySettings>;

    fn enabled_providers(&self) -> Vec<ProviderId>;

    fn has_valid_key(&self, provider: &ProviderId) -> bool {
        self.first_key(provider).is_some()
    }

    fn source(&self) -> ConfigSource;
}

/// Config provider backed by the user's key store.
pub struct ClientConfigProvider {
    store: Arc<dyn KeyStore>,
}

impl ClientConfigProvider {
    /// Fails with [`ConfigError::ClientOnServer`] in a server context.
    pub fn new(context: ExecutionContext, store: Arc<dyn KeyStore>) -> ConfigResult<Self> {
        if context.is_server() {
            return Err(ConfigError::ClientOnServer);
        }
        Ok(Self { store })
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }
}

impl ConfigProvider for ClientConfigProvider {
    fn provider_keys(&self, provider: &ProviderId) -> Vec<StoredKey> {
        self.store.keys(provider)
    }

    fn first_key(&self, provider: &ProviderId) -> Option<SecretString> {
        self.store
            .keys(provider)
            .into_iter()
            .find(|key| key.is_valid != Some(false))
            .map(|key| key.key)
    }

    fn capability_settings(&self, capability_id: &str) -> Option<CapabilitySettings> {
        self.store.capability_settings(capability_id)
    }

    fn enabled_providers(&self) -> Vec<ProviderId> {
        self.store.enabled_providers()
    }

    fn source(&self) -> ConfigSource {
        ConfigSource::Client
    }
}

/// Config provider holding keys supplied with a single server request.
/// Nothing here is ever persisted.
#[derive(Debug, Default)]
pub struct ServerConfigProvider {
    keys: DashMap<ProviderId, Vec<StoredKey>>,
}

impl ServerConfigProvider {
    pub fn new(keys: HashMap<ProviderId, Vec<String>>) -> Self {
        let provider = Self::default();
        for (id, values) in keys {
            for value in values {
                provider.add_key(&id, value);
            }
        }
        provider
    }

    /// Adds a request-scoped key. Blank keys are ignored.
    pub fn add_key(&self, provider: &ProviderId, key: impl Into<String>) {
        let key = key.into();
        if key.trim().is_empty() {
            debug!(provider = %provider, "ignoring blank server key");
            return;
        }
        self.keys
            .entry(provider.clone())
            .or_default()
            .push(StoredKey::new(key, None));
    }
}

impl ConfigProvider for ServerConfigProvider {
    fn provider_keys(&self, provider: &ProviderId) -> Vec<StoredKey> {
        self.keys
            .get(provider)
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }

    fn first_key(&self, provider: &ProviderId) -> Option<SecretString> {
        self.keys
            .get(provider)
            .and_then(|keys| keys.first().map(|key| key.key.clone()))
    }

    fn capability_settings(&self, _capability_id: &str) -> Option<CapabilitySettings> {
        Some(CapabilitySettings::enabled())
    }

    fn enabled_providers(&self) -> Vec<ProviderId> {
        let mut providers: Vec<ProviderId> = self
            .keys
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        providers.sort();
        providers
    }

    fn source(&self) -> ConfigSource {
        ConfigSource::Server
    }
}

/// Builds the config provider matching the execution context.
///
/// Client contexts require a store; server contexts start empty and are
/// filled with [`ServerConfigProvider::add_key`] or by
/// `Engine::for_server`.
pub fn create_config_provider(
    context: ExecutionContext,
    store: Option<Arc<dyn KeyStore>>,
) -> ConfigResult<Arc<dyn ConfigProvider>> {
    match (context, store) {
        (ExecutionContext::Client, Some(store)) => {
            Ok(Arc::new(ClientConfigProvider::new(context, store)?))
        }
        (ExecutionContext::Client, None) => Err(ConfigError::Parse(
            "client execution context requires a key store".to_string(),
        )),
        (ExecutionContext::Server, _) => Ok(Arc::new(ServerConfigProvider::default())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::key_store::MemoryKeyStore;
    use secrecy::ExposeSecret;

    fn store_with_keys() -> Arc<MemoryKeyStore> {
        let store = Arc::new(MemoryKeyStore::new());
        store
            .add_key(
                &ProviderId::Gemini,
                StoredKey::new("gemini-invalid-01", None).validated(false),
            )
            .unwrap();
        store
            .add_key(&ProviderId::Gemini, StoredKey::new("gemini-unchecked-2", None))
            .unwrap();
        store
    }

    #[test]
    fn test_client_skips_invalid_keys() {
        let provider =
            ClientConfigProvider::new(ExecutionContext::Client, store_with_keys()).unwrap();
        let key = provider.first_key(&ProviderId::Gemini).unwrap();
        assert_eq!(key.expose_secret(), "gemini-unchecked-2");
        assert!(provider.has_valid_key(&ProviderId::Gemini));
        assert!(!provider.has_valid_key(&ProviderId::OpenAI));
        assert_eq!(provider.provider_keys(&ProviderId::Gemini).len(), 2);
    }

    #[test]
    fn test_client_refuses_server_context() {
        let result = ClientConfigProvider::new(ExecutionContext::Server, store_with_keys());
        assert!(matches!(result, Err(ConfigError::ClientOnServer)));
    }

    #[test]
    fn test_server_returns_first_key_regardless_of_validity() {
        let mut keys = HashMap::new();
        keys.insert(
            ProviderId::DeepSeek,
            vec!["sk-first-000001".to_string(), "sk-second-00002".to_string()],
        );
        let provider = ServerConfigProvider::new(keys);
        let key = provider.first_key(&ProviderId::DeepSeek).unwrap();
        assert_eq!(key.expose_secret(), "sk-first-000001");
        assert_eq!(provider.enabled_providers(), vec![ProviderId::DeepSeek]);
        assert_eq!(provider.source(), ConfigSource::Server);
    }

    #[test]
    fn test_server_settings_always_enabled() {
        let provider = ServerConfigProvider::default();
        assert_eq!(
            provider.capability_settings("anything"),
            Some(CapabilitySettings::enabled())
        );
        assert!(provider.provider_keys(&ProviderId::Pexels).is_empty());
    }

    #[test]
    fn test_server_add_key_ignores_blank() {
        let provider = ServerConfigProvider::default();
        provider.add_key(&ProviderId::Unsplash, "  ");
        assert!(provider.first_key(&ProviderId::Unsplash).is_none());
        provider.add_key(&ProviderId::Unsplash, "unsplash-key-0001");
        assert!(provider.has_valid_key(&ProviderId::Unsplash));
    }

    #[test]
    fn test_factory_selects_by_context() {
        let store: Arc<dyn KeyStore> = store_with_keys();
        let client = create_config_provider(ExecutionContext::Client, Some(store.clone())).unwrap();
        assert_eq!(client.source(), ConfigSource::Client);
        let server = create_config_provider(ExecutionContext::Server, Some(store)).unwrap();
        assert_eq!(server.source(), ConfigSource::Server);
        assert!(create_config_provider(ExecutionContext::Client, None).is_err());
    }
}
