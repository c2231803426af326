use std::sync::{atomic::Ordering, Arc, Mutex};

use ifrit::{cache::ResponseCache, event_bus::EngineEvent, ExecuteOptions, ProviderId};
use pretty_assertions::assert_eq;
use serde_json::json;

use super::common::{FixedHandler, Fixture, Outcome, CAPABILITY};

#[tokio::test]
async fn test_sequential_fallback_reports_attempted_handlers() {
    let fixture = Fixture::new();
    fixture
        .register(FixedHandler::new("A", 30, Outcome::Fail("a down")))
        .await;
    fixture
        .register(FixedHandler::new("B", 20, Outcome::Fail("b down")))
        .await;
    fixture
        .register(FixedHandler::new("C", 10, Outcome::Data(json!("from c"))))
        .await;

    let result = fixture
        .engine
        .execute(ExecuteOptions::new(CAPABILITY).prompt("text"))
        .await;

    assert!(result.success);
    assert_eq!(result.handler_used, "C");
    assert_eq!(result.data, Some(json!("from c")));
    assert_eq!(
        result.fallbacks_attempted,
        Some(vec!["A".to_string(), "B".to_string()])
    );
}

#[tokio::test]
async fn test_disabled_fallback_never_invokes_second_handler() {
    let fixture = Fixture::new();
    fixture
        .register(FixedHandler::new("A", 2, Outcome::Fail("a down")))
        .await;
    let b_calls = fixture
        .register(FixedHandler::new("B", 1, Outcome::Data(json!(1))))
        .await;

    let result = fixture
        .engine
        .execute(ExecuteOptions::new(CAPABILITY).use_fallback(false))
        .await;

    assert!(!result.success);
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_handler_without_key_is_skipped() {
    let fixture = Fixture::new();
    let keyed_calls = fixture
        .register(
            FixedHandler::new("keyed", 10, Outcome::Data(json!("keyed")))
                .with_provider(ProviderId::Gemini),
        )
        .await;
    fixture
        .register(FixedHandler::new("local", 1, Outcome::Data(json!("local"))))
        .await;

    let result = fixture.engine.execute(ExecuteOptions::new(CAPABILITY)).await;
    assert_eq!(result.handler_used, "local");
    assert_eq!(keyed_calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.fallbacks_attempted, Some(vec!["keyed".to_string()]));

    fixture.add_keys(ProviderId::Gemini, &["AIza-integration-key"]);
    let result = fixture
        .engine
        .execute(ExecuteOptions::new(CAPABILITY).use_cache(false))
        .await;
    assert_eq!(result.handler_used, "keyed");
    assert_eq!(keyed_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cache_hit_short_circuits_handlers() {
    let fixture = Fixture::new();
    let calls = fixture
        .register(FixedHandler::new("only", 1, Outcome::Data(json!("fresh"))))
        .await;

    let first = fixture
        .engine
        .execute(ExecuteOptions::new(CAPABILITY).prompt("same prompt"))
        .await;
    assert!(first.success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(fixture
        .cache
        .get(CAPABILITY, "same prompt", None)
        .await
        .is_some());

    let second = fixture
        .engine
        .execute(ExecuteOptions::new(CAPABILITY).prompt("same prompt"))
        .await;
    assert!(second.success);
    assert_eq!(second.data, first.data);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_capability_fails_without_error_propagation() {
    let fixture = Fixture::new();
    let result = fixture
        .engine
        .execute(ExecuteOptions::new("compose-haiku"))
        .await;
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Unknown capability: compose-haiku")
    );
}

#[tokio::test]
async fn test_all_failures_surface_once() {
    let fixture = Fixture::new();
    fixture
        .register(FixedHandler::new("A", 2, Outcome::Fail("a down")))
        .await;
    fixture
        .register(FixedHandler::new("B", 1, Outcome::Fail("b down")))
        .await;

    let mut events = fixture.engine.subscribe();
    let result = fixture.engine.execute(ExecuteOptions::new(CAPABILITY)).await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("All handlers failed for capability: summarize")
    );
    assert_eq!(
        result.fallbacks_attempted,
        Some(vec!["A".to_string(), "B".to_string()])
    );
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn test_success_publishes_execution_complete() {
    let fixture = Fixture::new();
    fixture
        .register(FixedHandler::new("only", 1, Outcome::Data(json!([1]))))
        .await;
    let mut events = fixture.engine.subscribe();

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    let result = fixture
        .engine
        .execute(
            ExecuteOptions::new(CAPABILITY)
                .prompt("x")
                .on_progress(move |event| sink.lock().unwrap().push(event)),
        )
        .await;
    assert!(result.success);

    match events.recv().await.unwrap() {
        EngineEvent::ExecutionComplete {
            capability,
            handler_used,
            cached,
            ..
        } => {
            assert_eq!(capability, CAPABILITY);
            assert_eq!(handler_used, "only");
            assert!(!cached);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(progress.lock().unwrap().len(), 2);
}
