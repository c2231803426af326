use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::{
    capability::{Capabilities, EXTRACT_KEYWORDS, RESEARCH},
    handler::{ExecuteResult, Handler, HandlerError, HandlerRequest, HandlerResult, HandlerSource},
    initializer::{HandlerEnv, RegistrationError},
    provider::ProviderId,
};

use super::{endpoint_url, instructions, lines_payload, TEXT_CAPABILITIES};

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

/// Google Gemini through the `generateContent` REST API.
pub struct GeminiHandler {
    client: Client,
    base_url: String,
    default_model: String,
    capabilities: Capabilities,
}

impl GeminiHandler {
    pub fn new(client: Client, base_url: impl Into<String>, default_model: impl Into<String>) -> Self {
        let mut capabilities = Capabilities::from(TEXT_CAPABILITIES);
        capabilities.push(RESEARCH);
        Self {
            client,
            base_url: base_url.into(),
            default_model: default_model.into(),
            capabilities,
        }
    }

    fn body(request: &HandlerRequest) -> Value {
        json!({
            "systemInstruction": { "parts": [{ "text": instructions(request) }] },
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        })
    }
}

#[async_trait]
impl Handler for GeminiHandler {
    fn id(&self) -> &str {
        "gemini"
    }

    fn name(&self) -> &str {
        "Google Gemini"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn priority(&self) -> i32 {
        100
    }

    fn provider_id(&self) -> Option<ProviderId> {
        Some(ProviderId::Gemini)
    }

    fn source(&self) -> HandlerSource {
        HandlerSource::AiProvider
    }

    #[instrument(level = "debug", skip(self, request))]
    async fn execute(&self, request: HandlerRequest) -> HandlerResult<ExecuteResult> {
        let api_key = request
            .context
            .api_key
            .as_ref()
            .ok_or(HandlerError::MissingApiKey(ProviderId::Gemini))?;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key.expose_secret())
            .json(&Self::body(&request))
            .send()
            .await
            .map_err(|e| HandlerError::Api(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HandlerError::from_status(status.as_u16(), body));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| HandlerError::InvalidResponse(e.to_string()))?;
        let text = parsed
            .text()
            .ok_or_else(|| HandlerError::InvalidResponse("No candidates returned".into()))?;
        debug!(model = %model, chars = text.len(), "gemini response received");

        let data = if request.capability == EXTRACT_KEYWORDS {
            lines_payload(&text)
        } else {
            json!({ "text": text, "model": model })
        };
        Ok(ExecuteResult::success(data))
    }
}

pub fn build(env: &HandlerEnv) -> Result<Arc<dyn Handler>, RegistrationError> {
    let base_url = endpoint_url("gemini", &env.endpoints.gemini.url)?;
    let model = env
        .endpoints
        .gemini
        .model
        .clone()
        .ok_or_else(|| RegistrationError::MissingConfiguration("gemini model".to_string()))?;
    Ok(Arc::new(GeminiHandler::new(env.http.clone(), base_url, model)))
}
