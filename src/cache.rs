//! Response cache consulted by sequential executions.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::{
    config::CacheConfig,
    handler::ExecuteResult,
    timestamp::{Clock, SystemClock, Timestamp},
};

#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, capability: &str, prompt: &str, model: Option<&str>)
        -> Option<ExecuteResult>;

    async fn set(
        &self,
        capability: &str,
        prompt: &str,
        model: Option<&str>,
        result: ExecuteResult,
    );
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    capability: String,
    prompt: String,
    model: Option<String>,
}

impl CacheKey {
    fn new(capability: &str, prompt: &str, model: Option<&str>) -> Self {
        Self {
            capability: capability.to_string(),
            prompt: prompt.to_string(),
            model: model.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ExecuteResult,
    stored_at: Timestamp,
}

/// In-memory cache with a fixed TTL and entry cap. Expired entries are
/// dropped on read; when full, the oldest entry is evicted.
pub struct MemoryResponseCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
    clock: Arc<dyn Clock>,
}

impl MemoryResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self::with_clock(ttl, max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            clock,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl, config.max_entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn is_expired(&self, entry: &CacheEntry, now: Timestamp) -> bool {
        now.saturating_since(&entry.stored_at) >= self.ttl
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().stored_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[async_trait]
impl ResponseCache for MemoryResponseCache {
    async fn get(
        &self,
        capability: &str,
        prompt: &str,
        model: Option<&str>,
    ) -> Option<ExecuteResult> {
        let key = CacheKey::new(capability, prompt, model);
        let now = self.clock.now();
        let entry = self.entries.get(&key).map(|entry| entry.value().clone())?;
        if self.is_expired(&entry, now) {
            self.entries.remove(&key);
            debug!(capability, "cache entry expired");
            return None;
        }
        Some(entry.result)
    }

    async fn set(
        &self,
        capability: &str,
        prompt: &str,
        model: Option<&str>,
        result: ExecuteResult,
    ) {
        let key = CacheKey::new(capability, prompt, model);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            CacheEntry {
                result,
                stored_at: self.clock.now(),
            },
        );
    }
}
