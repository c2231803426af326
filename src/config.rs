use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
    time::Duration,
};
use thiserror::Error;

use crate::{
    capability::{Capability, CapabilitySettings},
    provider::key_store::KeyStore,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Client config provider cannot be constructed in a server execution context")]
    ClientOnServer,
    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },
    #[error("Failed to write {path}: {message}")]
    Write { path: String, message: String },
    #[error("Failed to parse config: {0}")]
    Parse(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Deadline for a single handler call.
    #[serde(default = "default_handler_timeout", with = "duration_ms")]
    pub handler_timeout: Duration,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub keys: KeyManagerConfig,

    /// Overrides the built-in capability catalog when present.
    #[serde(default)]
    pub capabilities: Option<Vec<Capability>>,

    /// Per-capability preferences seeded into the client key store.
    #[serde(default)]
    pub capability_settings: HashMap<String, CapabilitySettings>,

    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            handler_timeout: default_handler_timeout(),
            cache: CacheConfig::default(),
            keys: KeyManagerConfig::default(),
            capabilities: None,
            capability_settings: HashMap::new(),
            endpoints: EndpointsConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        from_file(path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl", with = "duration_ms")]
    pub ttl: Duration,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            ttl: default_cache_ttl(),
            max_entries: default_cache_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyManagerConfig {
    #[serde(default = "default_rate_limit_cooldown", with = "duration_ms")]
    pub rate_limit_cooldown: Duration,
    /// Consecutive failures after which a key is treated as exhausted.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_min_key_length")]
    pub min_key_length: usize,
    /// URL of the key validation endpoint. Without one, only format checks run.
    #[serde(default)]
    pub validation_endpoint: Option<String>,
    #[serde(default = "default_validation_timeout", with = "duration_ms")]
    pub validation_timeout: Duration,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            rate_limit_cooldown: default_rate_limit_cooldown(),
            max_consecutive_failures: default_max_consecutive_failures(),
            min_key_length: default_min_key_length(),
            validation_endpoint: None,
            validation_timeout: default_validation_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl EndpointConfig {
    fn new(url: &str, model: Option<&str>) -> Self {
        Self {
            url: url.to_string(),
            model: model.map(str::to_string),
        }
    }
}

/// Base URLs and default models for the built-in handlers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointsConfig {
    #[serde(default = "default_openai_endpoint")]
    pub openai: EndpointConfig,
    #[serde(default = "default_deepseek_endpoint")]
    pub deepseek: EndpointConfig,
    #[serde(default = "default_openrouter_endpoint")]
    pub openrouter: EndpointConfig,
    #[serde(default = "default_perplexity_endpoint")]
    pub perplexity: EndpointConfig,
    #[serde(default = "default_gemini_endpoint")]
    pub gemini: EndpointConfig,
    #[serde(default = "default_unsplash_endpoint")]
    pub unsplash: EndpointConfig,
    #[serde(default = "default_pexels_endpoint")]
    pub pexels: EndpointConfig,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            openai: default_openai_endpoint(),
            deepseek: default_deepseek_endpoint(),
            openrouter: default_openrouter_endpoint(),
            perplexity: default_perplexity_endpoint(),
            gemini: default_gemini_endpoint(),
            unsplash: default_unsplash_endpoint(),
            pexels: default_pexels_endpoint(),
        }
    }
}

/// Keys file: provider name → keys.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeysConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderKeysConfig>,
}

impl KeysConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        from_file(path)
    }

    /// Snapshot of a key store, for writing back to a keys file.
    pub fn from_store(store: &dyn KeyStore) -> Self {
        let providers = store
            .providers()
            .into_iter()
            .map(|provider| {
                let keys = store
                    .keys(&provider)
                    .into_iter()
                    .map(|stored| KeyEntry {
                        key: stored.key.expose_secret().to_string(),
                        label: stored.label,
                        valid: stored.is_valid,
                    })
                    .collect();
                let entry = ProviderKeysConfig {
                    enabled: store.is_provider_enabled(&provider),
                    keys,
                };
                (provider.to_string(), entry)
            })
            .collect();
        Self { providers }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path_ref = path.as_ref();
        let write_error = |message: String| ConfigError::Write {
            path: path_ref.display().to_string(),
            message,
        };
        let file = File::create(path_ref).map_err(|e| write_error(e.to_string()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| write_error(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderKeysConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub keys: Vec<KeyEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEntry {
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub valid: Option<bool>,
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> ConfigResult<T> {
    let path_ref = path.as_ref();
    let file = File::open(path_ref).map_err(|e| ConfigError::Read {
        path: path_ref.display().to_string(),
        message: e.to_string(),
    })?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| ConfigError::Parse(e.to_string()))
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> ConfigResult<T> {
    serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
}

fn default_event_buffer_size() -> usize {
    100
}
fn default_handler_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_true() -> bool {
    true
}
fn default_cache_ttl() -> Duration {
    Duration::from_secs(3600)
}
fn default_cache_max_entries() -> usize {
    500
}
fn default_rate_limit_cooldown() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_max_consecutive_failures() -> u32 {
    3
}
fn default_min_key_length() -> usize {
    10
}
fn default_validation_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_openai_endpoint() -> EndpointConfig {
    EndpointConfig::new("https://api.openai.com/v1", Some("gpt-4o-mini"))
}
fn default_deepseek_endpoint() -> EndpointConfig {
    EndpointConfig::new("https://api.deepseek.com/v1", Some("deepseek-chat"))
}
fn default_openrouter_endpoint() -> EndpointConfig {
    EndpointConfig::new(
        "https://openrouter.ai/api/v1",
        Some("meta-llama/llama-3.1-8b-instruct:free"),
    )
}
fn default_perplexity_endpoint() -> EndpointConfig {
    EndpointConfig::new("https://api.perplexity.ai", Some("sonar"))
}
fn default_gemini_endpoint() -> EndpointConfig {
    EndpointConfig::new(
        "https://generativelanguage.googleapis.com/v1beta",
        Some("gemini-1.5-flash"),
    )
}
fn default_unsplash_endpoint() -> EndpointConfig {
    EndpointConfig::new("https://api.unsplash.com", None)
}
fn default_pexels_endpoint() -> EndpointConfig {
    EndpointConfig::new("https://api.pexels.com/v1", None)
}

pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
