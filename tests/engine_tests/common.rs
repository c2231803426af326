use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use ifrit::{
    cache::MemoryResponseCache,
    config::EngineConfig,
    handler::{handler_registry::HandlerRegistry, HandlerResult},
    provider::{
        key_health::KeyHealthTracker,
        key_manager::KeyManager,
        key_store::{KeyStore, MemoryKeyStore},
        StoredKey,
    },
    timestamp::ManualClock,
    Capabilities, Engine, ExecuteResult, ExecutionContext, Handler, HandlerError, HandlerRequest,
    HandlerSource, ProviderId,
};
use serde_json::Value;

pub const CAPABILITY: &str = "summarize";

pub enum Outcome {
    Data(Value),
    Fail(&'static str),
}

/// Handler whose result is fixed at construction.
pub struct FixedHandler {
    id: String,
    capabilities: Capabilities,
    priority: i32,
    provider: Option<ProviderId>,
    outcome: Outcome,
    pub calls: Arc<AtomicUsize>,
}

impl FixedHandler {
    pub fn new(id: &str, priority: i32, outcome: Outcome) -> Self {
        Self {
            id: id.to_string(),
            capabilities: Capabilities::from(&[CAPABILITY][..]),
            priority,
            provider: None,
            outcome,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_provider(mut self, provider: ProviderId) -> Self {
        self.provider = Some(provider);
        self
    }
}

#[async_trait]
impl Handler for FixedHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn provider_id(&self) -> Option<ProviderId> {
        self.provider.clone()
    }

    fn source(&self) -> HandlerSource {
        HandlerSource::Local
    }

    async fn execute(&self, _request: HandlerRequest) -> HandlerResult<ExecuteResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Outcome::Data(data) => Ok(ExecuteResult::success(data.clone())),
            Outcome::Fail(message) => Err(HandlerError::Api(message.to_string())),
        }
    }
}

pub struct Fixture {
    pub engine: Engine,
    pub store: Arc<MemoryKeyStore>,
    pub clock: ManualClock,
    pub cache: Arc<MemoryResponseCache>,
}

impl Fixture {
    pub fn new() -> Self {
        let config = EngineConfig::default();
        let store = Arc::new(MemoryKeyStore::new());
        let clock = ManualClock::default();
        let tracker = Arc::new(KeyHealthTracker::new(Arc::new(clock.clone())));
        let key_manager = Arc::new(
            KeyManager::new(store.clone(), config.keys.clone()).with_tracker(tracker),
        );
        let cache = Arc::new(MemoryResponseCache::with_clock(
            config.cache.ttl,
            config.cache.max_entries,
            Arc::new(clock.clone()),
        ));
        let engine = Engine::builder(ExecutionContext::Client)
            .config(config)
            .registry(HandlerRegistry::isolated())
            .key_store(store.clone())
            .key_manager(key_manager)
            .cache(cache.clone())
            .build()
            .unwrap();
        Self {
            engine,
            store,
            clock,
            cache,
        }
    }

    pub fn add_keys(&self, provider: ProviderId, keys: &[&str]) {
        for key in keys {
            self.store
                .add_key(&provider, StoredKey::new(*key, None))
                .unwrap();
        }
    }

    pub async fn register(&self, handler: FixedHandler) -> Arc<AtomicUsize> {
        let calls = handler.calls.clone();
        self.engine.register_handler(Arc::new(handler)).await;
        calls
    }
}
