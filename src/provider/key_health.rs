//! Ephemeral per-key runtime state: rotation position, rate-limit cooldowns
//! and consecutive failure counts.
//!
//! This state is process-local and never persisted. Health is keyed by
//! `(provider, fingerprint of the key)` so that removing a key and adding a
//! different one never inherits the old key's penalty, whatever position the
//! new key lands in. Rate limits expire lazily: the expiry timestamp is
//! compared against the clock whenever the state is read.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use lazy_static::lazy_static;
use ring::digest;
use tracing::debug;

use crate::timestamp::{Clock, SystemClock, Timestamp};

use super::ProviderId;

/// Truncated SHA-256 of a key. Identifies a key without retaining it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyFingerprint([u8; 16]);

impl KeyFingerprint {
    pub fn of(key: &str) -> Self {
        let hash = digest::digest(&digest::SHA256, key.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash.as_ref()[..16]);
        Self(bytes)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyHealth {
    pub rate_limited_until: Option<Timestamp>,
    pub consecutive_failures: u32,
}

type HealthKey = (ProviderId, KeyFingerprint);

pub struct KeyHealthTracker {
    rotation: DashMap<ProviderId, usize>,
    health: DashMap<HealthKey, KeyHealth>,
    clock: Arc<dyn Clock>,
}

lazy_static! {
    static ref GLOBAL_TRACKER: Arc<KeyHealthTracker> =
        Arc::new(KeyHealthTracker::new(Arc::new(SystemClock)));
}

impl KeyHealthTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rotation: DashMap::new(),
            health: DashMap::new(),
            clock,
        }
    }

    /// The process-wide tracker shared by every default `KeyManager`.
    pub fn global() -> Arc<KeyHealthTracker> {
        GLOBAL_TRACKER.clone()
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Raw stored rotation index; callers reduce it modulo the key count.
    pub fn rotation_index(&self, provider: &ProviderId) -> usize {
        self.rotation.get(provider).map(|index| *index).unwrap_or(0)
    }

    pub fn set_rotation_index(&self, provider: &ProviderId, index: usize) {
        self.rotation.insert(provider.clone(), index);
    }

    /// Whether the key is currently cooling down. Clears an expired flag.
    pub fn is_rate_limited(&self, provider: &ProviderId, key: KeyFingerprint) -> bool {
        let now = self.now();
        let Some(mut health) = self.health.get_mut(&(provider.clone(), key)) else {
            return false;
        };
        let until = health.rate_limited_until;
        match until {
            Some(until) if now < until => true,
            Some(_) => {
                debug!(provider = %provider, "rate limit expired");
                health.rate_limited_until = None;
                false
            }
            None => false,
        }
    }

    pub fn failures(&self, provider: &ProviderId, key: KeyFingerprint) -> u32 {
        self.health
            .get(&(provider.clone(), key))
            .map(|health| health.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn is_exhausted(&self, provider: &ProviderId, key: KeyFingerprint, max_failures: u32) -> bool {
        self.failures(provider, key) >= max_failures
    }

    pub fn mark_rate_limited(&self, provider: &ProviderId, key: KeyFingerprint, cooldown: Duration) {
        let until = self.now().checked_add(cooldown);
        self.health
            .entry((provider.clone(), key))
            .or_default()
            .rate_limited_until = until;
    }

    /// Returns the new consecutive failure count.
    pub fn record_failure(&self, provider: &ProviderId, key: KeyFingerprint) -> u32 {
        let mut health = self.health.entry((provider.clone(), key)).or_default();
        let failures = health.consecutive_failures.saturating_add(1);
        health.consecutive_failures = failures;
        failures
    }

    pub fn record_success(&self, provider: &ProviderId, key: KeyFingerprint) {
        if let Some(mut health) = self.health.get_mut(&(provider.clone(), key)) {
            health.consecutive_failures = 0;
        }
    }

    pub fn health(&self, provider: &ProviderId, key: KeyFingerprint) -> KeyHealth {
        self.health
            .get(&(provider.clone(), key))
            .map(|health| health.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::ManualClock;

    fn tracker() -> (KeyHealthTracker, ManualClock) {
        let clock = ManualClock::default();
        (KeyHealthTracker::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        assert_eq!(KeyFingerprint::of("abc"), KeyFingerprint::of("abc"));
        assert_ne!(KeyFingerprint::of("abc"), KeyFingerprint::of("abd"));
    }

    #[test]
    fn test_rate_limit_expires_lazily() {
        let (tracker, clock) = tracker();
        let key = KeyFingerprint::of("key-1");
        tracker.mark_rate_limited(&ProviderId::Gemini, key, Duration::from_secs(300));
        assert!(tracker.is_rate_limited(&ProviderId::Gemini, key));

        clock.advance(Duration::from_secs(299));
        assert!(tracker.is_rate_limited(&ProviderId::Gemini, key));

        clock.advance(Duration::from_secs(1));
        assert!(!tracker.is_rate_limited(&ProviderId::Gemini, key));
        assert_eq!(tracker.health(&ProviderId::Gemini, key).rate_limited_until, None);
    }

    #[test]
    fn test_failures_count_and_reset() {
        let (tracker, _) = tracker();
        let key = KeyFingerprint::of("key-2");
        assert_eq!(tracker.record_failure(&ProviderId::OpenAI, key), 1);
        assert_eq!(tracker.record_failure(&ProviderId::OpenAI, key), 2);
        assert!(!tracker.is_exhausted(&ProviderId::OpenAI, key, 3));
        tracker.record_failure(&ProviderId::OpenAI, key);
        assert!(tracker.is_exhausted(&ProviderId::OpenAI, key, 3));
        tracker.record_success(&ProviderId::OpenAI, key);
        assert_eq!(tracker.failures(&ProviderId::OpenAI, key), 0);
    }

    #[test]
    fn test_state_is_per_provider() {
        let (tracker, _) = tracker();
        let key = KeyFingerprint::of("shared-key");
        tracker.record_failure(&ProviderId::OpenAI, key);
        assert_eq!(tracker.failures(&ProviderId::DeepSeek, key), 0);
        tracker.set_rotation_index(&ProviderId::OpenAI, 4);
        assert_eq!(tracker.rotation_index(&ProviderId::OpenAI), 4);
        assert_eq!(tracker.rotation_index(&ProviderId::DeepSeek), 0);
    }
}
