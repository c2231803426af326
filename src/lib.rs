//! # Ifrit: Capability Execution Engine
//!
//! Ifrit runs named units of work ("capabilities" such as `summarize` or
//! `search-images`) against a pool of interchangeable handlers: AI model
//! APIs, third-party integrations and local fallbacks.
//!
//! ## Layers
//!
//! - Catalog: [`capability`] defines what can be asked for
//! - Handlers: the [`handler`] contract, the [`handler::handler_registry`]
//!   and the built-in [`handlers`]
//! - Credentials: [`provider`] owns key stores, config providers and the
//!   key manager with its rotation and health tracking
//! - Orchestration: [`engine`] resolves a capability to a handler chain and
//!   runs it sequentially with fallback, or concurrently in aggregate mode
//! - Start-up: [`initializer`] registers the built-in handlers once
//!
//! ## Flow
//!
//! ```text
//! ExecuteOptions → Engine → HandlerRegistry (chain) → Handler → ExecuteResult
//!                    │
//!                    ├── ConfigProvider / KeyManager (API keys)
//!                    ├── ResponseCache
//!                    └── EventBus (execution-complete, handler-registered)
//! ```
//!
//! Engine operations never return `Err`: every failure, including an unknown
//! capability, is an [`ExecuteResult`] with `success: false` and an error
//! message.

pub mod cache;
pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod handler;
pub mod handlers;
pub mod initializer;
pub mod provider;
pub mod timestamp;

// Re-exports
pub use capability::{Capabilities, Capability, CapabilitySettings};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder, ExecuteOptions, ProgressEvent};
pub use error::*;
pub use handler::{ExecuteResult, Handler, HandlerError, HandlerRequest, HandlerSource};
pub use initializer::{initialize_system_handlers, SystemInitializer};
pub use provider::{config_provider::ExecutionContext, ProviderId};

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}
