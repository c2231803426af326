use std::collections::HashMap;

use ifrit::{
    config::EngineConfig, handlers::builtin_factories, initialize_system_handlers, Engine,
    ExecuteOptions, ProviderId,
};

#[tokio::test]
async fn test_initialization_registers_each_handler_once() {
    let engine = Engine::for_server(HashMap::new(), EngineConfig::default());
    let first = initialize_system_handlers(&engine).await;
    let count = engine.handlers().len();
    assert_eq!(count, builtin_factories().len());

    let second = initialize_system_handlers(&engine).await;
    assert_eq!(first, second);
    assert_eq!(engine.handlers().len(), count);
}

#[tokio::test]
async fn test_server_engines_do_not_share_handlers() {
    let first = Engine::for_server(HashMap::new(), EngineConfig::default());
    let second = Engine::for_server(HashMap::new(), EngineConfig::default());
    initialize_system_handlers(&first).await;

    assert!(!first.handlers().is_empty());
    assert!(second.handlers().is_empty());
}

#[tokio::test]
async fn test_local_handler_serves_keyless_server_requests() {
    let keys = HashMap::from([(ProviderId::Gemini, Vec::new())]);
    let engine = Engine::for_server(keys, EngineConfig::default());
    initialize_system_handlers(&engine).await;

    let result = engine
        .execute(
            ExecuteOptions::new("extract-keywords")
                .prompt("Rust ownership makes memory safety checkable. Ownership rules matter."),
        )
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.handler_used, "local-text");
    let attempted = result.fallbacks_attempted.unwrap_or_default();
    assert!(attempted.contains(&"gemini".to_string()));
    assert_eq!(
        result.data.and_then(|data| data.get(0).cloned()),
        Some(serde_json::json!("ownership"))
    );
}
