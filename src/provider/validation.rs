//! Key validation endpoint and provider health checks.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::timestamp::Timestamp;

use super::ProviderId;

/// Health checks slower than this are reported as degraded.
const DEGRADED_LATENCY: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Validation endpoint returned HTTP {0}")]
    Http(u16),
    #[error("Invalid validation response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
}

/// Body returned by the validation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ValidationResponse {
    pub valid: bool,
    #[serde(default)]
    pub models: Option<Vec<ModelInfo>>,
    #[serde(default)]
    pub error: Option<String>,
}

#[automock]
#[async_trait]
pub trait KeyValidator: Send + Sync {
    async fn validate(
        &self,
        provider: &ProviderId,
        api_key: &str,
    ) -> Result<ValidationResponse, ValidationError>;
}

/// Validator calling `{action: "validate", provider, apiKey}` on an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpKeyValidator {
    client: Client,
    endpoint: String,
}

impl HttpKeyValidator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl KeyValidator for HttpKeyValidator {
    #[instrument(level = "debug", skip(self, api_key))]
    async fn validate(
        &self,
        provider: &ProviderId,
        api_key: &str,
    ) -> Result<ValidationResponse, ValidationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "action": "validate",
                "provider": provider.as_str(),
                "apiKey": api_key,
            }))
            .send()
            .await
            .map_err(|e| ValidationError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ValidationError::Network(e.to_string()))?;
        debug!(status = status.as_u16(), "validation endpoint responded");

        match serde_json::from_str::<ValidationResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(ValidationError::Http(status.as_u16())),
            Err(e) => Err(ValidationError::InvalidResponse(e.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
    Unconfigured,
    Unknown,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServiceHealth {
    pub provider: ProviderId,
    pub status: HealthStatus,
    pub latency_ms: Option<u64>,
    pub message: Option<String>,
    pub checked_at: Timestamp,
}

impl ServiceHealth {
    pub fn unconfigured(provider: &ProviderId) -> Self {
        Self {
            provider: provider.clone(),
            status: HealthStatus::Unconfigured,
            latency_ms: None,
            message: Some("No API key configured".to_string()),
            checked_at: Timestamp::now(),
        }
    }
}

#[automock]
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, provider: &ProviderId, api_key: &str) -> ServiceHealth;
}

/// Health derived from a validation round trip.
pub struct ValidatorHealthCheck {
    validator: Arc<dyn KeyValidator>,
}

impl ValidatorHealthCheck {
    pub fn new(validator: Arc<dyn KeyValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl HealthCheck for ValidatorHealthCheck {
    async fn check(&self, provider: &ProviderId, api_key: &str) -> ServiceHealth {
        let started = Instant::now();
        let result = self.validator.validate(provider, api_key).await;
        let elapsed = started.elapsed();
        let (status, message) = match result {
            Ok(response) if response.valid && elapsed > DEGRADED_LATENCY => (
                HealthStatus::Degraded,
                Some(format!("slow response: {}ms", elapsed.as_millis())),
            ),
            Ok(response) if response.valid => (HealthStatus::Healthy, None),
            Ok(response) => (
                HealthStatus::Down,
                Some(response.error.unwrap_or_else(|| "key rejected".to_string())),
            ),
            Err(e) => (HealthStatus::Down, Some(e.to_string())),
        };
        ServiceHealth {
            provider: provider.clone(),
            status,
            latency_ms: Some(elapsed.as_millis() as u64),
            message,
            checked_at: Timestamp::now(),
        }
    }
}
