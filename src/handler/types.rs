use std::{collections::BTreeMap, collections::HashMap, time::Duration};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::provider::ProviderId;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HandlerError {
    #[error("No API key available for provider: {0}")]
    MissingApiKey(ProviderId),

    #[error("Handler not executable: {0}")]
    NotExecutable(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Maps an HTTP status from a provider API to the matching error kind.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => HandlerError::Authentication(body),
            429 => HandlerError::RateLimited(body),
            400..=499 => HandlerError::InvalidRequest(body),
            _ => HandlerError::Api(format!("HTTP {}: {}", status, body)),
        }
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;

/// Classification of where a handler's result comes from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum HandlerSource {
    AiProvider,
    Integration,
    Local,
    /// Result merged from several handlers.
    Aggregate,
    /// No handler ran.
    #[default]
    None,
}

/// Per-call inputs beyond the prompt. The engine fills `api_key`.
#[derive(Debug, Clone, Default)]
pub struct HandlerContext {
    pub api_key: Option<SecretString>,
    pub params: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct HandlerRequest {
    pub capability: String,
    pub prompt: String,
    pub model: Option<String>,
    pub context: HandlerContext,
    pub cancellation: CancellationToken,
}

impl HandlerRequest {
    pub fn new(capability: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.params.insert(key.into(), value);
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.context.params.get(key).and_then(Value::as_str)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.context.params.get(key).and_then(Value::as_u64)
    }
}

/// Outcome of one handler in an aggregated execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub sources: BTreeMap<String, SourceOutcome>,
    pub total_handlers: usize,
    pub successful_handlers: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub handler_used: String,
    pub source: HandlerSource,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallbacks_attempted: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
}

impl ExecuteResult {
    /// Successful result; the engine stamps handler, source and latency.
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Default::default()
        }
    }

    /// Failed result that never reached a handler.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            handler_used: "none".to_string(),
            ..Default::default()
        }
    }

    pub fn with_handler(mut self, handler_id: impl Into<String>, source: HandlerSource) -> Self {
        self.handler_used = handler_id.into();
        self.source = source;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis() as u64;
        self
    }

    /// Number of items the payload contributes when results are merged:
    /// array length, zero for null or absent, one otherwise.
    pub fn item_count(&self) -> usize {
        match &self.data {
            Some(Value::Array(items)) => items.len(),
            Some(Value::Null) | None => 0,
            Some(_) => 1,
        }
    }
}
