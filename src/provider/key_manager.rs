//! # Key Manager
//!
//! Provider key lifecycle on top of a [`KeyStore`]:
//!
//! * rotation among several keys per provider
//! * validation before a key is accepted
//! * exclusion of keys that are rate limited or exhausted
//!
//! Rotation and health live in a [`KeyHealthTracker`], never in the store:
//! the store is user configuration that survives restarts, the tracker is a
//! runtime signal that must not.
//!
//! ```text
//! get_available_key(p)
//!   start = rotation[p] % n
//!   for i in start, start+1, ... (wrapping, n steps)
//!     skip if rate limited (cooldown not yet elapsed)
//!     skip if exhausted   (>= max consecutive failures)
//!     rotation[p] = i, return keys[i]
//!   none usable -> None
//! ```

use std::sync::Arc;

use futures::future::join_all;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::KeyManagerConfig;

use super::{
    ProviderId, StoredKey,
    key_health::{KeyFingerprint, KeyHealthTracker},
    key_store::KeyStore,
    validation::{
        HealthCheck, HealthStatus, HttpKeyValidator, KeyValidator, ServiceHealth,
        ValidatorHealthCheck,
    },
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KeyValidation {
    pub valid: bool,
    pub models: Option<Vec<String>>,
    pub error: Option<String>,
    pub response_time_ms: u64,
}

impl KeyValidation {
    fn rejected(error: &str, started: Instant) -> Self {
        Self {
            valid: false,
            models: None,
            error: Some(error.to_string()),
            response_time_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AddKeyOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub validation: Option<KeyValidation>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProviderKeySummary {
    pub provider: ProviderId,
    pub enabled: bool,
    pub key_count: usize,
    pub validated_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KeyStatus {
    pub position: usize,
    pub label: Option<String>,
    pub masked: String,
    pub is_valid: Option<bool>,
    pub is_current: bool,
    pub rate_limited: bool,
    pub consecutive_failures: u32,
}

pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    tracker: Arc<KeyHealthTracker>,
    validator: Option<Arc<dyn KeyValidator>>,
    checker: Option<Arc<dyn HealthCheck>>,
    config: KeyManagerConfig,
}

impl KeyManager {
    /// Uses the process-wide health tracker and, when configured, the HTTP
    /// validation endpoint for both validation and health checks.
    pub fn new(store: Arc<dyn KeyStore>, config: KeyManagerConfig) -> Self {
        let validator: Option<Arc<dyn KeyValidator>> =
            config.validation_endpoint.as_ref().map(|endpoint| {
                Arc::new(HttpKeyValidator::new(endpoint.clone(), config.validation_timeout))
                    as Arc<dyn KeyValidator>
            });
        let checker = validator.as_ref().map(|validator| {
            Arc::new(ValidatorHealthCheck::new(validator.clone())) as Arc<dyn HealthCheck>
        });
        Self {
            store,
            tracker: KeyHealthTracker::global(),
            validator,
            checker,
            config,
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<KeyHealthTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn KeyValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_health_check(mut self, checker: Arc<dyn HealthCheck>) -> Self {
        self.checker = Some(checker);
        self
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    pub fn config(&self) -> &KeyManagerConfig {
        &self.config
    }

    /// Keys eligible for rotation: none when the provider is disabled.
    fn active_keys(&self, provider: &ProviderId) -> Vec<StoredKey> {
        if !self.store.is_provider_enabled(provider) {
            return Vec::new();
        }
        self.store.keys(provider)
    }

    fn current(&self, provider: &ProviderId) -> Option<(usize, StoredKey)> {
        let keys = self.active_keys(provider);
        if keys.is_empty() {
            return None;
        }
        let index = self.tracker.rotation_index(provider) % keys.len();
        keys.into_iter().nth(index).map(|key| (index, key))
    }

    fn fingerprint(key: &StoredKey) -> KeyFingerprint {
        KeyFingerprint::of(key.key.expose_secret())
    }

    /// Key at the current rotation position.
    pub fn get_key(&self, provider: &ProviderId) -> Option<SecretString> {
        self.current(provider).map(|(_, key)| key.key)
    }

    /// Advances the rotation position and returns the new current key.
    pub fn rotate_key(&self, provider: &ProviderId) -> Option<SecretString> {
        let keys = self.active_keys(provider);
        if keys.is_empty() {
            return None;
        }
        let next = (self.tracker.rotation_index(provider) % keys.len() + 1) % keys.len();
        self.tracker.set_rotation_index(provider, next);
        debug!(provider = %provider, position = next, "rotated key");
        keys.into_iter().nth(next).map(|key| key.key)
    }

    /// First usable key scanning forward from the current position.
    ///
    /// Moves the rotation position to the returned key.
    pub fn get_available_key(&self, provider: &ProviderId) -> Option<SecretString> {
        let keys = self.active_keys(provider);
        if keys.is_empty() {
            return None;
        }
        let start = self.tracker.rotation_index(provider) % keys.len();
        for offset in 0..keys.len() {
            let index = (start + offset) % keys.len();
            let key = &keys[index];
            let fingerprint = Self::fingerprint(key);
            if self.tracker.is_rate_limited(provider, fingerprint)
                || self.tracker.is_exhausted(
                    provider,
                    fingerprint,
                    self.config.max_consecutive_failures,
                )
            {
                continue;
            }
            self.tracker.set_rotation_index(provider, index);
            self.store.touch_key(provider, key.key.expose_secret());
            return Some(key.key.clone());
        }
        warn!(provider = %provider, keys = keys.len(), "all keys rate limited or exhausted");
        None
    }

    /// Puts the current key on cooldown and returns a replacement, if any.
    pub fn mark_rate_limited(&self, provider: &ProviderId) -> Option<SecretString> {
        let (index, key) = self.current(provider)?;
        self.tracker.mark_rate_limited(
            provider,
            Self::fingerprint(&key),
            self.config.rate_limit_cooldown,
        );
        warn!(
            provider = %provider,
            position = index,
            cooldown_secs = self.config.rate_limit_cooldown.as_secs(),
            "key rate limited"
        );
        self.get_available_key(provider)
    }

    /// Records a failure for the current key; returns the consecutive count.
    pub fn mark_failure(&self, provider: &ProviderId) -> u32 {
        let Some((index, key)) = self.current(provider) else {
            return 0;
        };
        let failures = self.tracker.record_failure(provider, Self::fingerprint(&key));
        if failures >= self.config.max_consecutive_failures {
            warn!(provider = %provider, position = index, failures, "key exhausted");
        }
        failures
    }

    pub fn mark_success(&self, provider: &ProviderId) {
        if let Some((_, key)) = self.current(provider) {
            self.tracker.record_success(provider, Self::fingerprint(&key));
        }
    }

    /// Format check, then the validation endpoint. Never fails: transport
    /// errors are reported in [`KeyValidation::error`].
    #[instrument(level = "debug", skip(self, key))]
    pub async fn validate_key(&self, provider: &ProviderId, key: &str) -> KeyValidation {
        let started = Instant::now();
        if key.trim().len() < self.config.min_key_length {
            return KeyValidation::rejected("API key is too short", started);
        }
        if key.chars().any(char::is_whitespace) {
            return KeyValidation::rejected("API key must not contain whitespace", started);
        }

        let Some(validator) = &self.validator else {
            debug!(provider = %provider, "no validation endpoint; format check only");
            return KeyValidation {
                valid: true,
                models: None,
                error: None,
                response_time_ms: started.elapsed().as_millis() as u64,
            };
        };

        match validator.validate(provider, key).await {
            Ok(response) => KeyValidation {
                valid: response.valid,
                models: response
                    .models
                    .map(|models| models.into_iter().map(|model| model.id).collect()),
                error: response.error,
                response_time_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => {
                warn!(provider = %provider, error = %e, "key validation failed");
                KeyValidation::rejected(&e.to_string(), started)
            }
        }
    }

    /// Validates (unless skipped) and stores a key.
    pub async fn add_key(
        &self,
        provider: &ProviderId,
        key: &str,
        label: Option<String>,
        skip_validation: bool,
    ) -> AddKeyOutcome {
        let key = key.trim();
        let validation = if skip_validation {
            None
        } else {
            Some(self.validate_key(provider, key).await)
        };

        if let Some(validation) = &validation {
            if !validation.valid {
                return AddKeyOutcome {
                    success: false,
                    error: Some(
                        validation
                            .error
                            .clone()
                            .unwrap_or_else(|| "Invalid API key".to_string()),
                    ),
                    validation: Some(validation.clone()),
                };
            }
        }

        let mut stored = StoredKey::new(key, label);
        if validation.is_some() {
            stored.is_valid = Some(true);
        }
        match self.store.add_key(provider, stored) {
            Ok(()) => {
                info!(provider = %provider, validated = validation.is_some(), "key added");
                AddKeyOutcome {
                    success: true,
                    error: None,
                    validation,
                }
            }
            Err(e) => AddKeyOutcome {
                success: false,
                error: Some(e.to_string()),
                validation,
            },
        }
    }

    pub fn remove_key(&self, provider: &ProviderId, key: &str) -> bool {
        let removed = self.store.remove_key(provider, key);
        if removed {
            info!(provider = %provider, "key removed");
        }
        removed
    }

    pub async fn check_health(&self, provider: &ProviderId) -> ServiceHealth {
        let Some(key) = self.get_key(provider) else {
            return ServiceHealth::unconfigured(provider);
        };
        match &self.checker {
            Some(checker) => checker.check(provider, key.expose_secret()).await,
            None => ServiceHealth {
                status: HealthStatus::Unknown,
                message: Some("No health check configured".to_string()),
                ..ServiceHealth::unconfigured(provider)
            },
        }
    }

    /// Health of every provider present in the store, checked concurrently.
    pub async fn check_all_health(&self) -> Vec<ServiceHealth> {
        let providers = self.store.providers();
        join_all(providers.iter().map(|provider| self.check_health(provider))).await
    }

    pub fn has_any_keys(&self) -> bool {
        self.store
            .enabled_providers()
            .iter()
            .any(|provider| !self.store.keys(provider).is_empty())
    }

    pub fn summary(&self) -> Vec<ProviderKeySummary> {
        self.store
            .providers()
            .into_iter()
            .map(|provider| {
                let keys = self.store.keys(&provider);
                ProviderKeySummary {
                    enabled: self.store.is_provider_enabled(&provider),
                    key_count: keys.len(),
                    validated_count: keys.iter().filter(|key| key.is_valid == Some(true)).count(),
                    provider,
                }
            })
            .collect()
    }

    pub fn key_status(&self, provider: &ProviderId) -> Vec<KeyStatus> {
        let keys = self.store.keys(provider);
        let current = match keys.len() {
            0 => None,
            len => Some(self.tracker.rotation_index(provider) % len),
        };
        keys.iter()
            .enumerate()
            .map(|(position, key)| {
                let fingerprint = Self::fingerprint(key);
                KeyStatus {
                    position,
                    label: key.label.clone(),
                    masked: key.masked(),
                    is_valid: key.is_valid,
                    is_current: current == Some(position),
                    rate_limited: self.tracker.is_rate_limited(provider, fingerprint),
                    consecutive_failures: self.tracker.failures(provider, fingerprint),
                }
            })
            .collect()
    }
}
