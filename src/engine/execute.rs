use std::{sync::Arc, time::Duration};

use secrecy::SecretString;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    capability::{Capability, CapabilitySettings},
    event_bus::EngineEvent,
    handler::{
        handler_registry::HandlerQuery, ExecuteResult, Handler, HandlerContext, HandlerError,
        HandlerRequest, HandlerResult,
    },
    provider::{
        config_provider::{ConfigProvider, ServerConfigProvider},
        ProviderId,
    },
};

use super::{Engine, ExecuteOptions, ProgressEvent};

/// Where keys come from for one request.
pub(super) struct KeySource {
    pub(super) config_provider: Arc<dyn ConfigProvider>,
    /// Request-scoped overrides bypass the key manager.
    pub(super) use_key_manager: bool,
}

/// Settings shared by every handler call of one request.
pub(super) struct CallSettings {
    pub(super) keys: KeySource,
    pub(super) timeout: Duration,
    pub(super) cancellation: CancellationToken,
}

impl Engine {
    pub(super) fn key_source(&self, options: &ExecuteOptions) -> KeySource {
        if let Some(provider) = &options.config_provider {
            return KeySource {
                config_provider: provider.clone(),
                use_key_manager: false,
            };
        }
        if let Some(keys) = &options.server_keys {
            return KeySource {
                config_provider: Arc::new(ServerConfigProvider::new(keys.clone())),
                use_key_manager: false,
            };
        }
        KeySource {
            config_provider: self.config_provider.clone(),
            use_key_manager: true,
        }
    }

    pub(super) fn call_settings(&self, options: &ExecuteOptions) -> CallSettings {
        CallSettings {
            keys: self.key_source(options),
            timeout: options.timeout.unwrap_or(self.config.handler_timeout),
            cancellation: options.cancellation.clone(),
        }
    }

    /// Resolves the capability and its settings, or the failure to return.
    pub(super) fn resolve_capability(
        &self,
        options: &ExecuteOptions,
        keys: &KeySource,
    ) -> Result<(Capability, CapabilitySettings), ExecuteResult> {
        self.initialize();
        let Some(capability) = self.capability(&options.capability) else {
            warn!(capability = %options.capability, "unknown capability");
            return Err(ExecuteResult::failure(format!(
                "Unknown capability: {}",
                options.capability
            )));
        };
        let settings = keys
            .config_provider
            .capability_settings(&capability.id)
            .unwrap_or_default();
        if !capability.enabled || !settings.is_enabled {
            return Err(ExecuteResult::failure(format!(
                "Capability is disabled: {}",
                capability.id
            )));
        }
        Ok((capability, settings))
    }

    pub(super) fn handler_request(&self, options: &ExecuteOptions) -> HandlerRequest {
        HandlerRequest {
            capability: options.capability.clone(),
            prompt: options.prompt.clone(),
            model: options.model.clone(),
            context: HandlerContext {
                api_key: None,
                params: options.params.clone(),
            },
            cancellation: options.cancellation.child_token(),
        }
    }

    /// Runs a capability request through its handler chain.
    #[instrument(level = "debug", skip(self, options), fields(capability = %options.capability))]
    pub async fn execute(&self, options: ExecuteOptions) -> ExecuteResult {
        let started = Instant::now();
        let settings = self.call_settings(&options);
        let (capability, capability_settings) =
            match self.resolve_capability(&options, &settings.keys) {
                Ok(resolved) => resolved,
                Err(failure) => return failure.with_latency(started.elapsed()),
            };

        let query = HandlerQuery {
            capability_id: capability.id.clone(),
            preferred_handler_id: options
                .preferred_handler_id
                .clone()
                .or(capability_settings.default_handler_id),
            fallback_handler_ids: capability_settings.fallback_handler_ids.unwrap_or_default(),
            exclude_handler_ids: options.exclude_handler_ids.clone(),
        };
        let chain = self.registry.handler_chain(&query);
        if chain.is_empty() {
            warn!(capability = %capability.id, "no handlers available");
            return ExecuteResult::failure(format!(
                "No handlers available for capability: {}",
                capability.id
            ))
            .with_latency(started.elapsed());
        }

        let model = options.model.as_deref();
        let cache = self.cache.as_ref().filter(|_| options.use_cache);
        if let Some(cache) = cache {
            if let Some(hit) = cache.get(&capability.id, &options.prompt, model).await {
                let result = hit.with_latency(started.elapsed());
                debug!(capability = %capability.id, handler = %result.handler_used, "cache hit");
                self.publish_complete(&capability.id, &result, true).await;
                return result;
            }
        }

        let mut attempted: Vec<String> = Vec::new();
        for handler in &chain {
            options.report(ProgressEvent::HandlerStarted {
                handler_id: handler.id().to_string(),
            });
            let mut result = self
                .run_handler(handler, self.handler_request(&options), &settings)
                .await;
            options.report(ProgressEvent::HandlerCompleted {
                handler_id: handler.id().to_string(),
                success: result.success,
                count: result.item_count(),
            });

            if result.success {
                if !attempted.is_empty() {
                    result.fallbacks_attempted = Some(attempted);
                }
                if let Some(cache) = cache {
                    cache
                        .set(&capability.id, &options.prompt, model, result.clone())
                        .await;
                }
                self.publish_complete(&capability.id, &result, false).await;
                return result;
            }

            attempted.push(handler.id().to_string());
            if !options.use_fallback {
                debug!(handler = handler.id(), "fallback disabled, stopping");
                break;
            }
            if settings.cancellation.is_cancelled() {
                debug!("request cancelled, stopping");
                break;
            }
        }

        warn!(capability = %capability.id, attempted = ?attempted, "all handlers failed");
        ExecuteResult {
            fallbacks_attempted: Some(attempted),
            ..ExecuteResult::failure(format!(
                "All handlers failed for capability: {}",
                capability.id
            ))
        }
        .with_latency(started.elapsed())
    }

    /// Runs one handler outside any chain with the engine's own key sources.
    pub async fn execute_handler(
        &self,
        handler: &Arc<dyn Handler>,
        request: HandlerRequest,
    ) -> ExecuteResult {
        let settings = CallSettings {
            keys: KeySource {
                config_provider: self.config_provider.clone(),
                use_key_manager: true,
            },
            timeout: self.config.handler_timeout,
            cancellation: request.cancellation.clone(),
        };
        self.run_handler(handler, request, &settings).await
    }

    /// Calls a handler and turns every outcome into a stamped result.
    pub(super) async fn run_handler(
        &self,
        handler: &Arc<dyn Handler>,
        request: HandlerRequest,
        settings: &CallSettings,
    ) -> ExecuteResult {
        let started = Instant::now();
        let managed = self.managed_provider(handler.as_ref(), &settings.keys);
        let outcome = self.invoke(handler.as_ref(), request, settings).await;
        if let Some(provider) = managed {
            self.record_key_outcome(&provider, &outcome);
        }

        let result = match outcome {
            Ok(result) => {
                if !result.success {
                    warn!(
                        handler = handler.id(),
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "handler reported failure"
                    );
                }
                result
            }
            Err(e) => {
                warn!(handler = handler.id(), error = %e, "handler failed");
                ExecuteResult {
                    success: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        };
        result
            .with_handler(handler.id(), handler.source())
            .with_latency(started.elapsed())
    }

    async fn invoke(
        &self,
        handler: &dyn Handler,
        mut request: HandlerRequest,
        settings: &CallSettings,
    ) -> HandlerResult<ExecuteResult> {
        if handler.requires_api_key() {
            if let Some(provider) = handler.provider_id() {
                let key = self
                    .resolve_key(&provider, &settings.keys)
                    .ok_or(HandlerError::MissingApiKey(provider))?;
                request.context.api_key = Some(key);
            }
        }
        if settings.cancellation.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }

        let cancellation = settings.cancellation.clone();
        tokio::select! {
            _ = cancellation.cancelled() => Err(HandlerError::Cancelled),
            outcome = tokio::time::timeout(settings.timeout, handler.execute(request)) => {
                outcome.unwrap_or(Err(HandlerError::Timeout(settings.timeout)))
            }
        }
    }

    fn resolve_key(&self, provider: &ProviderId, keys: &KeySource) -> Option<SecretString> {
        match (&self.key_manager, keys.use_key_manager) {
            (Some(key_manager), true) => key_manager.get_available_key(provider),
            _ => keys.config_provider.first_key(provider),
        }
    }

    /// Provider whose key health should follow this call, if any.
    fn managed_provider(&self, handler: &dyn Handler, keys: &KeySource) -> Option<ProviderId> {
        if self.key_manager.is_none() || !keys.use_key_manager || !handler.requires_api_key() {
            return None;
        }
        handler.provider_id()
    }

    fn record_key_outcome(&self, provider: &ProviderId, outcome: &HandlerResult<ExecuteResult>) {
        let Some(key_manager) = &self.key_manager else {
            return;
        };
        match outcome {
            Ok(result) if result.success => key_manager.mark_success(provider),
            Err(HandlerError::RateLimited(_)) => {
                key_manager.mark_rate_limited(provider);
            }
            Err(HandlerError::MissingApiKey(_)) | Err(HandlerError::Cancelled) => {}
            _ => {
                key_manager.mark_failure(provider);
            }
        }
    }

    pub(super) async fn publish_complete(
        &self,
        capability: &str,
        result: &ExecuteResult,
        cached: bool,
    ) {
        self.publish(EngineEvent::ExecutionComplete {
            execution_id: Uuid::new_v4(),
            capability: capability.to_string(),
            handler_used: result.handler_used.clone(),
            cached,
            latency_ms: result.latency_ms,
        })
        .await;
    }
}
