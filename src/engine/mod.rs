//! # Capability Engine
//!
//! The engine turns a capability request into a result by running handlers.
//!
//! ## Execution
//!
//! ```text
//! execute(options)
//!   capability lookup     -> "Unknown capability: <id>"
//!   settings / enabled    -> "Capability is disabled: <id>"
//!   registry chain        -> "No handlers available for capability: <id>"
//!   cache lookup          -> hit: cached result, execution-complete(cached)
//!   for handler in chain
//!     resolve key         -> missing: handler fails, not called
//!     execute with deadline and cancellation token
//!     success             -> cache, execution-complete, return
//!     failure             -> record, next (stop when use_fallback is false)
//!   "All handlers failed for capability: <id>"
//! ```
//!
//! [`Engine::execute_aggregate`] instead runs every available handler for
//! the capability concurrently and merges the successful payloads.
//!
//! ## Construction
//!
//! The [`ExecutionContext`] passed at construction decides sharing:
//!
//! * client engines use a store-backed config provider. [`Engine::shared`]
//!   hands out one engine per process on the [`HandlerRegistry::shared`]
//!   registry, while [`Engine::isolated`] builds a client engine with its
//!   own registry
//! * server engines ([`Engine::for_server`]) use the explicit keys of one
//!   request and own their registry so that concurrent requests never see
//!   each other's handler state
//!
//! Nothing crosses the engine boundary as an error: every failure is an
//! [`ExecuteResult`](crate::handler::ExecuteResult) with `success: false`.

mod aggregate;
mod execute;
pub mod options;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, OnceLock,
    },
};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{
    cache::{MemoryResponseCache, ResponseCache},
    capability::{default_catalog, Capability},
    config::{ConfigResult, EngineConfig, KeysConfig},
    event_bus::{EngineEvent, EventBus, EventReceiver},
    handler::{handler_registry::HandlerRegistry, Handler},
    initializer::InitReport,
    provider::{
        config_provider::{
            ClientConfigProvider, ConfigProvider, ConfigSource, ExecutionContext,
            ServerConfigProvider,
        },
        key_manager::KeyManager,
        key_store::{KeyStore, MemoryKeyStore},
        ProviderId,
    },
};

pub use options::{ExecuteOptions, ProgressCallback, ProgressEvent};

/// Everything an engine is made of. Built by [`EngineBuilder`] or by hand.
pub struct EngineContext {
    pub execution_context: ExecutionContext,
    pub config: EngineConfig,
    pub registry: Arc<HandlerRegistry>,
    pub config_provider: Arc<dyn ConfigProvider>,
    pub key_manager: Option<Arc<KeyManager>>,
    pub cache: Option<Arc<dyn ResponseCache>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub total_handlers: usize,
    pub available_handlers: usize,
    /// Catalog capabilities with at least one available handler.
    pub capabilities_covered: usize,
    pub config_source: ConfigSource,
}

#[derive(Clone)]
struct CapabilityEntry {
    capability: Capability,
    sequence: u64,
}

pub struct Engine {
    execution_context: ExecutionContext,
    config: EngineConfig,
    registry: Arc<HandlerRegistry>,
    config_provider: Arc<dyn ConfigProvider>,
    key_manager: Option<Arc<KeyManager>>,
    cache: Option<Arc<dyn ResponseCache>>,
    event_bus: EventBus,
    capabilities: DashMap<String, CapabilityEntry>,
    capability_sequence: AtomicU64,
    initialized: AtomicBool,
    system_handlers: OnceCell<InitReport>,
}

static SHARED_ENGINE: OnceLock<Arc<Engine>> = OnceLock::new();

impl Engine {
    pub fn new(context: EngineContext) -> Self {
        Self {
            execution_context: context.execution_context,
            event_bus: EventBus::new(context.config.event_buffer_size),
            config: context.config,
            registry: context.registry,
            config_provider: context.config_provider,
            key_manager: context.key_manager,
            cache: context.cache,
            capabilities: DashMap::new(),
            capability_sequence: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            system_handlers: OnceCell::new(),
        }
    }

    pub fn builder(execution_context: ExecutionContext) -> EngineBuilder {
        EngineBuilder::new(execution_context)
    }

    /// The process-wide client engine. The first call builds it from `store`
    /// and `config`; later calls return the same engine and ignore both.
    pub fn shared(store: Arc<dyn KeyStore>, config: EngineConfig) -> ConfigResult<Arc<Engine>> {
        if let Some(engine) = SHARED_ENGINE.get() {
            return Ok(engine.clone());
        }
        let engine = Arc::new(
            EngineBuilder::new(ExecutionContext::Client)
                .config(config)
                .key_store(store)
                .build()?,
        );
        Ok(SHARED_ENGINE.get_or_init(|| engine).clone())
    }

    /// A client engine with its own registry. Keys come from `store`.
    pub fn isolated(store: Arc<dyn KeyStore>, config: EngineConfig) -> ConfigResult<Engine> {
        EngineBuilder::new(ExecutionContext::Client)
            .config(config)
            .key_store(store)
            .registry(HandlerRegistry::isolated())
            .build()
    }

    /// A server engine with its own registry and the keys of one request.
    pub fn for_server(keys: HashMap<ProviderId, Vec<String>>, config: EngineConfig) -> Engine {
        let cache = default_cache(&config);
        Engine::new(EngineContext {
            execution_context: ExecutionContext::Server,
            registry: HandlerRegistry::isolated(),
            config_provider: Arc::new(ServerConfigProvider::new(keys)),
            key_manager: None,
            cache,
            config,
        })
    }

    /// Loads the capability catalog once. Registers no handlers.
    pub fn initialize(&self) {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let catalog = self
            .config
            .capabilities
            .clone()
            .unwrap_or_else(default_catalog);
        let count = catalog.len();
        for capability in catalog {
            if !self.capabilities.contains_key(&capability.id) {
                self.insert_capability(capability);
            }
        }
        info!(
            capabilities = count,
            context = ?self.execution_context,
            "engine initialized"
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub(crate) fn system_init(&self) -> &OnceCell<InitReport> {
        &self.system_handlers
    }

    pub fn execution_context(&self) -> ExecutionContext {
        self.execution_context
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_provider(&self) -> &Arc<dyn ConfigProvider> {
        &self.config_provider
    }

    pub fn key_manager(&self) -> Option<&Arc<KeyManager>> {
        self.key_manager.as_ref()
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    async fn publish(&self, event: EngineEvent) {
        if let Err(e) = self.event_bus.publish(event).await {
            debug!(error = %e, "event not delivered");
        }
    }

    fn insert_capability(&self, capability: Capability) {
        let sequence = match self.capabilities.get(&capability.id) {
            Some(existing) => existing.sequence,
            None => self.capability_sequence.fetch_add(1, Ordering::SeqCst),
        };
        self.capabilities.insert(
            capability.id.clone(),
            CapabilityEntry {
                capability,
                sequence,
            },
        );
    }

    /// Catalog in insertion order.
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut entries: Vec<CapabilityEntry> = self
            .capabilities
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.sequence);
        entries.into_iter().map(|entry| entry.capability).collect()
    }

    pub fn capability(&self, capability_id: &str) -> Option<Capability> {
        self.capabilities
            .get(capability_id)
            .map(|entry| entry.capability.clone())
    }

    /// Adds or replaces a capability; a replaced one keeps its position.
    pub fn add_capability(&self, capability: Capability) {
        debug!(capability = %capability.id, "capability added");
        self.insert_capability(capability);
    }

    pub fn remove_capability(&self, capability_id: &str) -> bool {
        self.capabilities.remove(capability_id).is_some()
    }

    pub async fn register_handler(&self, handler: Arc<dyn Handler>) {
        let handler_id = handler.id().to_string();
        self.registry.register(handler);
        self.publish(EngineEvent::HandlerRegistered { handler_id })
            .await;
    }

    pub fn handlers(&self) -> Vec<Arc<dyn Handler>> {
        self.registry.all()
    }

    pub fn handlers_for(&self, capability_id: &str) -> Vec<Arc<dyn Handler>> {
        self.registry.handlers_for(capability_id)
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let handlers = self.registry.all();
        let available_handlers = handlers
            .iter()
            .filter(|handler| self.registry.is_available(handler.id()) == Some(true))
            .count();
        let capabilities_covered = self
            .capabilities()
            .iter()
            .filter(|capability| self.registry.can_fulfill(&capability.id))
            .count();
        Diagnostics {
            total_handlers: handlers.len(),
            available_handlers,
            capabilities_covered,
            config_source: self.config_provider.source(),
        }
    }
}

fn default_cache(config: &EngineConfig) -> Option<Arc<dyn ResponseCache>> {
    config
        .cache
        .enabled
        .then(|| Arc::new(MemoryResponseCache::from_config(&config.cache)) as Arc<dyn ResponseCache>)
}

pub struct EngineBuilder {
    execution_context: ExecutionContext,
    config: EngineConfig,
    registry: Option<Arc<HandlerRegistry>>,
    key_store: Option<Arc<dyn KeyStore>>,
    config_provider: Option<Arc<dyn ConfigProvider>>,
    key_manager: Option<Arc<KeyManager>>,
    cache: Option<Arc<dyn ResponseCache>>,
    cache_disabled: bool,
}

impl EngineBuilder {
    pub fn new(execution_context: ExecutionContext) -> Self {
        Self {
            execution_context,
            config: EngineConfig::default(),
            registry: None,
            key_store: None,
            config_provider: None,
            key_manager: None,
            cache: None,
            cache_disabled: false,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Backs the client config provider and key manager with this store.
    pub fn key_store(mut self, store: Arc<dyn KeyStore>) -> Self {
        self.key_store = Some(store);
        self
    }

    pub fn config_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.config_provider = Some(provider);
        self
    }

    pub fn key_manager(mut self, key_manager: Arc<KeyManager>) -> Self {
        self.key_manager = Some(key_manager);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self.cache_disabled = false;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self.cache_disabled = true;
        self
    }

    /// Client contexts without an explicit store or provider get an empty
    /// in-memory store seeded with the configured capability settings.
    pub fn build(self) -> ConfigResult<Engine> {
        let context = self.execution_context;
        let registry = self.registry.unwrap_or_else(|| {
            if context.is_server() {
                HandlerRegistry::isolated()
            } else {
                HandlerRegistry::shared()
            }
        });

        let mut key_manager = self.key_manager;
        let config_provider: Arc<dyn ConfigProvider> = match (self.config_provider, context) {
            (Some(provider), _) => provider,
            (None, ExecutionContext::Server) => Arc::new(ServerConfigProvider::default()),
            (None, ExecutionContext::Client) => {
                let store = self.key_store.unwrap_or_else(|| {
                    Arc::new(MemoryKeyStore::from_config(
                        &KeysConfig::default(),
                        &self.config.capability_settings,
                    ))
                });
                if key_manager.is_none() {
                    key_manager = Some(Arc::new(KeyManager::new(
                        store.clone(),
                        self.config.keys.clone(),
                    )));
                }
                Arc::new(ClientConfigProvider::new(context, store)?)
            }
        };

        let cache = if self.cache_disabled {
            None
        } else {
            self.cache.or_else(|| default_cache(&self.config))
        };

        Ok(Engine::new(EngineContext {
            execution_context: context,
            config: self.config,
            registry,
            config_provider,
            key_manager,
            cache,
        }))
    }
}
