//! Registry of capability handlers and handler chain resolution.
//!
//! Handlers are stored by id together with an insertion sequence number.
//! Replacing a handler keeps its sequence, so ordering among equal
//! priorities never changes because a handler was re-registered.

use std::{
    cmp::Reverse,
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use lazy_static::lazy_static;
use tracing::{debug, instrument, warn};

use crate::timestamp::Timestamp;

use super::Handler;

#[derive(Clone)]
struct RegisteredHandler {
    handler: Arc<dyn Handler>,
    registered_at: Timestamp,
    sequence: u64,
    available: bool,
}

/// Inputs for [`HandlerRegistry::handler_chain`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerQuery {
    pub capability_id: String,
    pub preferred_handler_id: Option<String>,
    pub fallback_handler_ids: Vec<String>,
    pub exclude_handler_ids: Vec<String>,
}

impl HandlerQuery {
    pub fn new(capability_id: impl Into<String>) -> Self {
        Self {
            capability_id: capability_id.into(),
            ..Default::default()
        }
    }

    pub fn prefer(mut self, handler_id: impl Into<String>) -> Self {
        self.preferred_handler_id = Some(handler_id.into());
        self
    }

    pub fn fallbacks<I, S>(mut self, handler_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_handler_ids = handler_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude<I, S>(mut self, handler_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_handler_ids = handler_ids.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, RegisteredHandler>,
    sequence: AtomicU64,
}

lazy_static! {
    static ref SHARED_REGISTRY: Arc<HandlerRegistry> = Arc::new(HandlerRegistry::default());
}

impl HandlerRegistry {
    /// The process-wide registry used by client engines.
    pub fn shared() -> Arc<HandlerRegistry> {
        SHARED_REGISTRY.clone()
    }

    /// A registry owned by a single engine.
    pub fn isolated() -> Arc<HandlerRegistry> {
        Arc::new(HandlerRegistry::default())
    }

    /// Inserts a handler. Last write wins: a handler with the same id is
    /// replaced, keeps its insertion position and becomes available again
    /// even if it was switched off with [`HandlerRegistry::set_available`].
    #[instrument(level = "debug", skip(self, handler), fields(handler_id = handler.id()))]
    pub fn register(&self, handler: Arc<dyn Handler>) {
        let id = handler.id().to_string();
        let sequence = match self.handlers.get(&id) {
            Some(existing) => {
                warn!(handler_id = %id, "replacing registered handler");
                existing.sequence
            }
            None => self.sequence.fetch_add(1, Ordering::SeqCst),
        };
        self.handlers.insert(
            id,
            RegisteredHandler {
                handler,
                registered_at: Timestamp::now(),
                sequence,
                available: true,
            },
        );
    }

    pub fn unregister(&self, handler_id: &str) -> bool {
        let removed = self.handlers.remove(handler_id).is_some();
        if removed {
            debug!(handler_id, "handler unregistered");
        }
        removed
    }

    pub fn get(&self, handler_id: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .get(handler_id)
            .map(|entry| entry.handler.clone())
    }

    pub fn registered_at(&self, handler_id: &str) -> Option<Timestamp> {
        self.handlers
            .get(handler_id)
            .map(|entry| entry.registered_at)
    }

    fn entries(&self) -> Vec<RegisteredHandler> {
        let mut entries: Vec<RegisteredHandler> =
            self.handlers.iter().map(|entry| entry.value().clone()).collect();
        entries.sort_by_key(|entry| entry.sequence);
        entries
    }

    /// Every registered handler in insertion order, available or not.
    pub fn all(&self) -> Vec<Arc<dyn Handler>> {
        self.entries().into_iter().map(|entry| entry.handler).collect()
    }

    /// Available handlers for a capability, highest priority first. Equal
    /// priorities keep insertion order.
    pub fn handlers_for(&self, capability_id: &str) -> Vec<Arc<dyn Handler>> {
        let mut handlers: Vec<Arc<dyn Handler>> = self
            .entries()
            .into_iter()
            .filter(|entry| {
                entry.available
                    && entry.handler.is_available()
                    && entry.handler.capabilities().supports(capability_id)
            })
            .map(|entry| entry.handler)
            .collect();
        handlers.sort_by_key(|handler| Reverse(handler.priority()));
        handlers
    }

    /// Ordered, duplicate-free list of handlers to try:
    /// preferred first, then the fallbacks in the given order, then the rest
    /// by priority. Excluded and unavailable handlers never appear.
    pub fn handler_chain(&self, query: &HandlerQuery) -> Vec<Arc<dyn Handler>> {
        let candidates: Vec<Arc<dyn Handler>> = self
            .handlers_for(&query.capability_id)
            .into_iter()
            .filter(|handler| {
                !query
                    .exclude_handler_ids
                    .iter()
                    .any(|excluded| excluded == handler.id())
            })
            .collect();

        let find = |id: &str| candidates.iter().find(|handler| handler.id() == id).cloned();

        let mut chain: Vec<Arc<dyn Handler>> = Vec::with_capacity(candidates.len());
        let mut placed: HashSet<String> = HashSet::new();

        let ordered_ids = query
            .preferred_handler_id
            .iter()
            .chain(query.fallback_handler_ids.iter());
        for id in ordered_ids {
            if placed.contains(id) {
                continue;
            }
            if let Some(handler) = find(id) {
                placed.insert(id.clone());
                chain.push(handler);
            }
        }

        for handler in &candidates {
            if placed.insert(handler.id().to_string()) {
                chain.push(handler.clone());
            }
        }
        chain
    }

    /// Toggles runtime availability. Returns whether the id exists.
    pub fn set_available(&self, handler_id: &str, available: bool) -> bool {
        match self.handlers.get_mut(handler_id) {
            Some(mut entry) => {
                entry.available = available;
                true
            }
            None => {
                warn!(handler_id, "cannot toggle availability of unknown handler");
                false
            }
        }
    }

    pub fn is_available(&self, handler_id: &str) -> Option<bool> {
        self.handlers
            .get(handler_id)
            .map(|entry| entry.available && entry.handler.is_available())
    }

    pub fn can_fulfill(&self, capability_id: &str) -> bool {
        !self.handlers_for(capability_id).is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }
}
