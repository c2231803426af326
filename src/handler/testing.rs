use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{capability::Capabilities, provider::ProviderId};

use super::{ExecuteResult, Handler, HandlerError, HandlerRequest, HandlerResult, HandlerSource};

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed(Value),
    FailResult(String),
    Error(HandlerError),
    Delay(Duration),
}

/// Scripted handler for unit tests.
pub struct StubHandler {
    id: String,
    capabilities: Capabilities,
    priority: i32,
    provider: Option<ProviderId>,
    behavior: Behavior,
    calls: Arc<AtomicUsize>,
}

impl StubHandler {
    pub fn new(id: &str, capabilities: &[&str], priority: i32) -> Self {
        Self {
            id: id.to_string(),
            capabilities: Capabilities::from(capabilities),
            priority,
            provider: None,
            behavior: Behavior::Succeed(Value::String(id.to_string())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn provider(mut self, provider: ProviderId) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn arc(self) -> Arc<dyn Handler> {
        Arc::new(self)
    }
}

#[async_trait]
impl Handler for StubHandler {
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

    async fn execute(&self, request: HandlerRequest) -> HandlerResult<ExecuteResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Succeed(data) => Ok(ExecuteResult::success(data.clone())),
            Behavior::FailResult(message) => Ok(ExecuteResult {
                success: false,
                error: Some(message.clone()),
                ..Default::default()
            }),
            Behavior::Error(error) => Err(error.clone()),
            Behavior::Delay(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => Ok(ExecuteResult::success(Value::Null)),
                    _ = request.cancellation.cancelled() => Err(HandlerError::Cancelled),
                }
            }
        }
    }
}
