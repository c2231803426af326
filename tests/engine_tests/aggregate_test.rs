use std::sync::{Arc, Mutex};

use ifrit::{ExecuteOptions, HandlerSource, ProgressEvent};
use pretty_assertions::assert_eq;
use serde_json::json;

use super::common::{FixedHandler, Fixture, Outcome, CAPABILITY};

#[tokio::test]
async fn test_aggregate_merges_successes_and_records_failures() {
    let fixture = Fixture::new();
    fixture
        .register(FixedHandler::new("X", 3, Outcome::Fail("x down")))
        .await;
    fixture
        .register(FixedHandler::new("Y", 2, Outcome::Data(json!([1, 2]))))
        .await;
    fixture
        .register(FixedHandler::new("Z", 1, Outcome::Data(json!([3]))))
        .await;

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    let result = fixture
        .engine
        .execute_aggregate(
            ExecuteOptions::new(CAPABILITY).on_progress(move |event| sink.lock().unwrap().push(event)),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.data, Some(json!([1, 2, 3])));
    assert_eq!(result.handler_used, "aggregate");
    assert_eq!(result.source, HandlerSource::Aggregate);

    let metadata = result.metadata.unwrap();
    assert_eq!(metadata.total_handlers, 3);
    assert_eq!(metadata.successful_handlers, 2);
    assert!(!metadata.sources["X"].success);
    assert_eq!(metadata.sources["Y"].count, 2);

    let progress = progress.lock().unwrap();
    assert_eq!(progress.first(), Some(&ProgressEvent::Started { total: 3 }));
    assert_eq!(
        progress.last(),
        Some(&ProgressEvent::Completed {
            successful: 2,
            failed: 1
        })
    );
}

#[tokio::test]
async fn test_aggregate_fails_only_when_every_handler_fails() {
    let fixture = Fixture::new();
    fixture
        .register(FixedHandler::new("X", 2, Outcome::Fail("x down")))
        .await;
    fixture
        .register(FixedHandler::new("Y", 1, Outcome::Fail("y down")))
        .await;

    let result = fixture
        .engine
        .execute_aggregate(ExecuteOptions::new(CAPABILITY))
        .await;
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("All handlers failed for capability: summarize")
    );
    assert_eq!(result.metadata.map(|m| m.successful_handlers), Some(0));
}
