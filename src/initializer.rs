//! Start-up registration of the built-in handlers.
//!
//! Every handler is produced by a [`HandlerFactory`] from a static list. A
//! failing factory is logged and recorded; the others still register.

use std::{sync::Arc, time::Duration};

use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    config::EndpointsConfig,
    engine::Engine,
    handler::Handler,
    handlers::builtin_factories,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Invalid endpoint for {handler}: {url}")]
    InvalidEndpoint { handler: String, url: String },
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),
    #[error("Failed to build handler: {0}")]
    Build(String),
}

/// What factories get to build handlers from.
#[derive(Clone)]
pub struct HandlerEnv {
    pub endpoints: EndpointsConfig,
    pub http: Client,
}

impl HandlerEnv {
    pub fn from_engine(engine: &Engine) -> Self {
        let http = Client::builder()
            .timeout(engine.config().handler_timeout + Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            endpoints: engine.config().endpoints.clone(),
            http,
        }
    }
}

pub type FactoryFn = fn(&HandlerEnv) -> Result<Arc<dyn Handler>, RegistrationError>;

#[derive(Clone, Copy)]
pub struct HandlerFactory {
    pub name: &'static str,
    pub build: FactoryFn,
}

impl HandlerFactory {
    pub const fn new(name: &'static str, build: FactoryFn) -> Self {
        Self { name, build }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationFailure {
    pub factory: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitReport {
    /// Ids of the registered handlers, in registration order.
    pub registered: Vec<String>,
    pub failures: Vec<RegistrationFailure>,
}

pub struct SystemInitializer {
    factories: Vec<HandlerFactory>,
}

impl SystemInitializer {
    pub fn new(factories: Vec<HandlerFactory>) -> Self {
        Self { factories }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_factories())
    }

    pub fn factories(&self) -> &[HandlerFactory] {
        &self.factories
    }

    /// Initializes the engine and registers every factory's handler.
    ///
    /// Runs once per engine: later calls return the first report and
    /// register nothing.
    pub async fn initialize(&self, engine: &Engine) -> InitReport {
        engine
            .system_init()
            .get_or_init(|| self.register_all(engine))
            .await
            .clone()
    }

    async fn register_all(&self, engine: &Engine) -> InitReport {
        engine.initialize();
        let env = HandlerEnv::from_engine(engine);
        let mut report = InitReport::default();
        for factory in &self.factories {
            match (factory.build)(&env) {
                Ok(handler) => {
                    report.registered.push(handler.id().to_string());
                    engine.register_handler(handler).await;
                }
                Err(e) => {
                    warn!(factory = factory.name, error = %e, "handler registration failed");
                    report.failures.push(RegistrationFailure {
                        factory: factory.name.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            registered = report.registered.len(),
            failed = report.failures.len(),
            "system handlers initialized"
        );
        report
    }
}

/// Registers the built-in handlers on `engine`.
pub async fn initialize_system_handlers(engine: &Engine) -> InitReport {
    SystemInitializer::builtin().initialize(engine).await
}
