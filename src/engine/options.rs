use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::provider::{config_provider::ConfigProvider, ProviderId};

/// Progress notifications, fired from both execution modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "kebab-case")]
pub enum ProgressEvent {
    /// Aggregation only: number of handlers about to run.
    Started { total: usize },
    HandlerStarted { handler_id: String },
    HandlerCompleted {
        handler_id: String,
        success: bool,
        count: usize,
    },
    /// Aggregation only: fired once every handler has settled.
    Completed { successful: usize, failed: usize },
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// One capability request.
#[derive(Clone)]
pub struct ExecuteOptions {
    pub capability: String,
    pub prompt: String,
    pub model: Option<String>,
    /// Passed through to handlers as `HandlerContext::params`.
    pub params: HashMap<String, Value>,
    /// Overrides the capability's configured default handler.
    pub preferred_handler_id: Option<String>,
    pub exclude_handler_ids: Vec<String>,
    pub use_fallback: bool,
    pub use_cache: bool,
    /// Per-handler deadline; the engine's configured timeout when `None`.
    pub timeout: Option<Duration>,
    pub cancellation: CancellationToken,
    /// Request-scoped configuration replacing the engine's own.
    pub config_provider: Option<Arc<dyn ConfigProvider>>,
    /// Keys supplied with a server request. Ignored when `config_provider` is set.
    pub server_keys: Option<HashMap<ProviderId, Vec<String>>>,
    pub on_progress: Option<ProgressCallback>,
}

impl ExecuteOptions {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            prompt: String::new(),
            model: None,
            params: HashMap::new(),
            preferred_handler_id: None,
            exclude_handler_ids: Vec::new(),
            use_fallback: true,
            use_cache: true,
            timeout: None,
            cancellation: CancellationToken::new(),
            config_provider: None,
            server_keys: None,
            on_progress: None,
        }
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn prefer(mut self, handler_id: impl Into<String>) -> Self {
        self.preferred_handler_id = Some(handler_id.into());
        self
    }

    pub fn exclude(mut self, handler_id: impl Into<String>) -> Self {
        self.exclude_handler_ids.push(handler_id.into());
        self
    }

    pub fn use_fallback(mut self, use_fallback: bool) -> Self {
        self.use_fallback = use_fallback;
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn config_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.config_provider = Some(provider);
        self
    }

    pub fn server_keys(mut self, keys: HashMap<ProviderId, Vec<String>>) -> Self {
        self.server_keys = Some(keys);
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub(crate) fn report(&self, event: ProgressEvent) {
        if let Some(callback) = &self.on_progress {
            callback(event);
        }
    }
}

impl fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("capability", &self.capability)
            .field("model", &self.model)
            .field("preferred_handler_id", &self.preferred_handler_id)
            .field("exclude_handler_ids", &self.exclude_handler_ids)
            .field("use_fallback", &self.use_fallback)
            .field("use_cache", &self.use_cache)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
