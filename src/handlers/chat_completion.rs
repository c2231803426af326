use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
    },
    Client,
};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::debug;

use crate::{
    capability::{Capabilities, DISCOVER_TRENDS, EXTRACT_KEYWORDS, RESEARCH},
    config::EndpointConfig,
    handler::{ExecuteResult, Handler, HandlerError, HandlerRequest, HandlerResult, HandlerSource},
    initializer::{HandlerEnv, RegistrationError},
    provider::ProviderId,
};

use super::{endpoint_url, instructions, lines_payload, TEXT_CAPABILITIES};

const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 4096;

/// Handler for any OpenAI-compatible chat completion API.
pub struct ChatCompletionHandler {
    id: String,
    name: String,
    provider: ProviderId,
    base_url: String,
    default_model: String,
    capabilities: Capabilities,
    priority: i32,
}

impl ChatCompletionHandler {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider: ProviderId,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            provider,
            base_url: base_url.into(),
            default_model: default_model.into(),
            capabilities: Capabilities::from(TEXT_CAPABILITIES),
            priority: 0,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn messages(request: &HandlerRequest) -> Vec<ChatCompletionRequestMessage> {
        vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(instructions(request)),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(request.prompt.clone()),
                name: None,
            }),
        ]
    }

    fn client(&self, request: &HandlerRequest) -> HandlerResult<Client<OpenAIConfig>> {
        let api_key = request
            .context
            .api_key
            .as_ref()
            .ok_or_else(|| HandlerError::MissingApiKey(self.provider.clone()))?;
        let config = OpenAIConfig::new()
            .with_api_key(api_key.expose_secret())
            .with_api_base(&self.base_url);
        Ok(Client::with_config(config))
    }
}

fn map_error(error: OpenAIError) -> HandlerError {
    match error {
        OpenAIError::ApiError(api) => {
            let message = api.message.to_lowercase();
            if message.contains("rate limit") || message.contains("quota") {
                HandlerError::RateLimited(api.message)
            } else if message.contains("api key") || message.contains("authentication") {
                HandlerError::Authentication(api.message)
            } else {
                HandlerError::Api(api.message)
            }
        }
        OpenAIError::JSONDeserialize(e) => HandlerError::InvalidResponse(e.to_string()),
        other => HandlerError::Api(other.to_string()),
    }
}

#[async_trait]
impl Handler for ChatCompletionHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn provider_id(&self) -> Option<ProviderId> {
        Some(self.provider.clone())
    }

    fn source(&self) -> HandlerSource {
        HandlerSource::AiProvider
    }

    #[tracing::instrument(level = "debug", skip(self, request), fields(handler = %self.id))]
    async fn execute(&self, request: HandlerRequest) -> HandlerResult<ExecuteResult> {
        let client = self.client(&request)?;
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let completion = CreateChatCompletionRequest {
            model: model.clone(),
            messages: Self::messages(&request),
            max_completion_tokens: Some(DEFAULT_MAX_COMPLETION_TOKENS),
            ..Default::default()
        };
        let response = client
            .chat()
            .create(completion)
            .await
            .map_err(map_error)?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| HandlerError::InvalidResponse("No response content".into()))?;
        debug!(model = %model, chars = content.len(), "chat completion received");

        let data = if request.capability == EXTRACT_KEYWORDS {
            lines_payload(&content)
        } else {
            json!({ "text": content, "model": model })
        };
        Ok(ExecuteResult::success(data))
    }
}

fn build_variant(
    id: &str,
    name: &str,
    provider: ProviderId,
    endpoint: &EndpointConfig,
    fallback_model: &str,
) -> Result<ChatCompletionHandler, RegistrationError> {
    let base_url = endpoint_url(id, &endpoint.url)?;
    let model = endpoint
        .model
        .clone()
        .unwrap_or_else(|| fallback_model.to_string());
    debug!(handler = id, model = %model, "building chat handler");
    Ok(ChatCompletionHandler::new(id, name, provider, base_url, model))
}

pub fn build_openai(env: &HandlerEnv) -> Result<Arc<dyn Handler>, RegistrationError> {
    let handler = build_variant(
        "openai-chat",
        "OpenAI",
        ProviderId::OpenAI,
        &env.endpoints.openai,
        "gpt-4o-mini",
    )?
    .with_priority(80);
    Ok(Arc::new(handler))
}

pub fn build_deepseek(env: &HandlerEnv) -> Result<Arc<dyn Handler>, RegistrationError> {
    let handler = build_variant(
        "deepseek-chat",
        "DeepSeek",
        ProviderId::DeepSeek,
        &env.endpoints.deepseek,
        "deepseek-chat",
    )?
    .with_priority(70);
    Ok(Arc::new(handler))
}

pub fn build_openrouter(env: &HandlerEnv) -> Result<Arc<dyn Handler>, RegistrationError> {
    let handler = build_variant(
        "openrouter-chat",
        "OpenRouter",
        ProviderId::OpenRouter,
        &env.endpoints.openrouter,
        "meta-llama/llama-3.1-8b-instruct:free",
    )?
    .with_priority(50);
    Ok(Arc::new(handler))
}

pub fn build_perplexity(env: &HandlerEnv) -> Result<Arc<dyn Handler>, RegistrationError> {
    let handler = build_variant(
        "perplexity-research",
        "Perplexity",
        ProviderId::Perplexity,
        &env.endpoints.perplexity,
        "sonar",
    )?
    .with_capabilities(Capabilities::from(&[RESEARCH, DISCOVER_TRENDS][..]))
    .with_priority(90);
    Ok(Arc::new(handler))
}
