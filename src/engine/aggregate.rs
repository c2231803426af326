use std::collections::BTreeMap;

use futures::future::join_all;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::handler::{ExecuteResult, HandlerSource, ResultMetadata, SourceOutcome};

use super::{Engine, ExecuteOptions, ProgressEvent};

impl Engine {
    /// Runs every available handler for the capability concurrently and
    /// merges what the successful ones return.
    ///
    /// The aggregate succeeds when at least one handler succeeds. Array
    /// payloads are concatenated, other non-null payloads contribute one
    /// element. The cache is never consulted.
    #[instrument(level = "debug", skip(self, options), fields(capability = %options.capability))]
    pub async fn execute_aggregate(&self, options: ExecuteOptions) -> ExecuteResult {
        let started = Instant::now();
        let settings = self.call_settings(&options);
        let capability = match self.resolve_capability(&options, &settings.keys) {
            Ok((capability, _)) => capability,
            Err(failure) => return failure.with_latency(started.elapsed()),
        };

        let handlers: Vec<_> = self
            .registry
            .handlers_for(&capability.id)
            .into_iter()
            .filter(|handler| {
                !options
                    .exclude_handler_ids
                    .iter()
                    .any(|excluded| excluded == handler.id())
            })
            .collect();
        if handlers.is_empty() {
            warn!(capability = %capability.id, "no handlers available");
            return ExecuteResult::failure(format!(
                "No handlers available for capability: {}",
                capability.id
            ))
            .with_latency(started.elapsed());
        }

        options.report(ProgressEvent::Started {
            total: handlers.len(),
        });
        let runs = handlers.iter().map(|handler| {
            let request = self.handler_request(&options);
            let settings = &settings;
            let options = &options;
            async move {
                options.report(ProgressEvent::HandlerStarted {
                    handler_id: handler.id().to_string(),
                });
                let result = self.run_handler(handler, request, settings).await;
                options.report(ProgressEvent::HandlerCompleted {
                    handler_id: handler.id().to_string(),
                    success: result.success,
                    count: result.item_count(),
                });
                result
            }
        });
        let results = join_all(runs).await;

        let mut data: Vec<Value> = Vec::new();
        let mut sources = BTreeMap::new();
        for result in results {
            if result.success {
                match &result.data {
                    Some(Value::Array(items)) => data.extend(items.iter().cloned()),
                    Some(Value::Null) | None => {}
                    Some(item) => data.push(item.clone()),
                }
            }
            sources.insert(
                result.handler_used.clone(),
                SourceOutcome {
                    success: result.success,
                    count: if result.success { result.item_count() } else { 0 },
                    error: result.error,
                    data: result.data,
                },
            );
        }

        let successful = sources.values().filter(|source| source.success).count();
        let failed = sources.len() - successful;
        options.report(ProgressEvent::Completed { successful, failed });
        info!(
            capability = %capability.id,
            successful,
            failed,
            items = data.len(),
            "aggregation complete"
        );

        let success = successful > 0;
        let result = ExecuteResult {
            success,
            data: Some(Value::Array(data)),
            error: (!success).then(|| {
                format!("All handlers failed for capability: {}", capability.id)
            }),
            handler_used: "aggregate".to_string(),
            source: HandlerSource::Aggregate,
            latency_ms: 0,
            fallbacks_attempted: None,
            metadata: Some(ResultMetadata {
                total_handlers: sources.len(),
                successful_handlers: successful,
                sources,
            }),
        }
        .with_latency(started.elapsed());

        if success {
            self.publish_complete(&capability.id, &result, false).await;
        }
        result
    }
}
