//! # Capability Handlers
//!
//! A [`Handler`] fulfils one or more capabilities, usually by calling an
//! external provider. The engine never talks to providers directly: it asks
//! the [`handler_registry::HandlerRegistry`] for a chain of handlers and
//! tries them in order.
//!
//! ## Contract
//!
//! * `id` is unique within a registry.
//! * `priority`: higher is tried first.
//! * `requires_api_key`: the engine resolves a key for `provider_id` and
//!   places it in [`HandlerContext::api_key`] before calling `execute`; a
//!   handler is never called without one.
//! * `execute` returns `Ok` with `success: true` on success. A failed
//!   result, an `Err` or a timeout all count as failure and move the engine
//!   to the next handler.
//! * `execute` should observe `request.cancellation` for long calls.

pub mod handler_registry;
pub mod types;

use async_trait::async_trait;

use crate::{capability::Capabilities, provider::ProviderId};

pub use types::{
    ExecuteResult, HandlerContext, HandlerError, HandlerRequest, HandlerResult, HandlerSource,
    ResultMetadata, SourceOutcome,
};

#[async_trait]
pub trait Handler: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn capabilities(&self) -> &Capabilities;

    fn priority(&self) -> i32 {
        0
    }

    /// Static availability, e.g. a compiled-out integration.
    fn is_available(&self) -> bool {
        true
    }

    fn provider_id(&self) -> Option<ProviderId> {
        None
    }

    fn requires_api_key(&self) -> bool {
        self.provider_id().is_some()
    }

    fn source(&self) -> HandlerSource;

    async fn execute(&self, request: HandlerRequest) -> HandlerResult<ExecuteResult>;
}

#[cfg(test)]
pub(crate) mod testing;
