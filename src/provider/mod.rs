//! # Provider Keys and Configuration Sources
//!
//! Everything about *where credentials come from* lives here:
//!
//! * [`ProviderId`]: the external services handlers talk to
//! * [`StoredKey`]: one configured API key with its bookkeeping
//! * [`key_store`]: the external key/value store the settings UI owns
//! * [`config_provider`]: the read-only view the engine consumes, with a
//!   client (store-backed) and a server (explicit keys) implementation
//! * [`key_manager`]: rotation, validation and rate-limit handling
//! * [`key_health`]: the ephemeral per-key failure state
//! * [`validation`]: the key validation endpoint and health checks

pub mod config_provider;
pub mod key_health;
pub mod key_manager;
pub mod key_store;
pub mod validation;

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// External service a handler may need credentials for.
///
/// Known providers parse case-insensitively; anything else becomes
/// [`ProviderId::Other`] holding the lowercased name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderId {
    Gemini,
    OpenAI,
    DeepSeek,
    OpenRouter,
    Perplexity,
    Anthropic,
    Unsplash,
    Pexels,
    Serper,
    Other(String),
}

impl ProviderId {
    pub fn as_str(&self) -> &str {
        match self {
            ProviderId::Gemini => "gemini",
            ProviderId::OpenAI => "openai",
            ProviderId::DeepSeek => "deepseek",
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Perplexity => "perplexity",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Unsplash => "unsplash",
            ProviderId::Pexels => "pexels",
            ProviderId::Serper => "serper",
            ProviderId::Other(name) => name,
        }
    }

    pub fn known() -> Vec<ProviderId> {
        vec![
            ProviderId::Gemini,
            ProviderId::OpenAI,
            ProviderId::DeepSeek,
            ProviderId::OpenRouter,
            ProviderId::Perplexity,
            ProviderId::Anthropic,
            ProviderId::Unsplash,
            ProviderId::Pexels,
            ProviderId::Serper,
        ]
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ProviderId {
    fn from(name: &str) -> Self {
        let normalized = name.trim().to_ascii_lowercase();
        ProviderId::known()
            .into_iter()
            .find(|provider| provider.as_str() == normalized)
            .unwrap_or(ProviderId::Other(normalized))
    }
}

impl From<String> for ProviderId {
    fn from(name: String) -> Self {
        ProviderId::from(name.as_str())
    }
}

impl From<ProviderId> for String {
    fn from(provider: ProviderId) -> Self {
        provider.as_str().to_string()
    }
}

/// An API key as held by a key store, plus its bookkeeping.
#[derive(Debug, Clone)]
pub struct StoredKey {
    pub key: SecretString,
    pub label: Option<String>,
    pub added_at: Timestamp,
    pub last_used: Option<Timestamp>,
    /// `None` until validated; `Some(false)` keys are skipped by client lookups.
    pub is_valid: Option<bool>,
}

impl StoredKey {
    pub fn new(key: impl Into<String>, label: Option<String>) -> Self {
        Self {
            key: SecretString::from(key.into()),
            label,
            added_at: Timestamp::now(),
            last_used: None,
            is_valid: None,
        }
    }

    pub fn validated(mut self, is_valid: bool) -> Self {
        self.is_valid = Some(is_valid);
        self
    }

    pub fn matches(&self, key: &str) -> bool {
        self.key.expose_secret() == key
    }

    /// Key with everything but the last four characters masked, for display.
    pub fn masked(&self) -> String {
        mask_key(self.key.expose_secret())
    }
}

pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_parses_case_insensitively() {
        assert_eq!(ProviderId::from("Gemini"), ProviderId::Gemini);
        assert_eq!(ProviderId::from("OPENROUTER"), ProviderId::OpenRouter);
        assert_eq!(ProviderId::from(" deepseek "), ProviderId::DeepSeek);
        assert_eq!(ProviderId::from("openai"), ProviderId::OpenAI);
    }

    #[test]
    fn test_provider_id_conversions_agree() {
        let converted: ProviderId = "Serper".into();
        let tried = ProviderId::try_from("Serper").unwrap();
        assert_eq!(converted, ProviderId::Serper);
        assert_eq!(tried, converted);
        assert_eq!(ProviderId::try_from("unknown-api").unwrap().as_str(), "unknown-api");
    }

    #[test]
    fn test_provider_id_other_is_lowercased() {
        let provider = ProviderId::from("MyLLM");
        assert_eq!(provider, ProviderId::Other("myllm".to_string()));
        assert_eq!(provider.to_string(), "myllm");
    }

    #[test]
    fn test_provider_id_serde_as_string() {
        let json = serde_json::to_string(&ProviderId::Perplexity).unwrap();
        assert_eq!(json, "\"perplexity\"");
        let parsed: ProviderId = serde_json::from_str("\"pexels\"").unwrap();
        assert_eq!(parsed, ProviderId::Pexels);
    }

    #[test]
    fn test_known_providers_round_trip_through_display() {
        for provider in ProviderId::known() {
            assert_eq!(ProviderId::from(provider.to_string()), provider);
        }
    }

    #[test]
    fn test_stored_key_mask_and_match() {
        let key = StoredKey::new("sk-abcdefgh1234", Some("primary".to_string()));
        assert!(key.matches("sk-abcdefgh1234"));
        assert!(!key.matches("sk-other"));
        assert_eq!(key.masked(), "***********1234");
        assert_eq!(mask_key("abc"), "***");
        assert!(format!("{:?}", key).contains("REDACTED"));
    }
}
