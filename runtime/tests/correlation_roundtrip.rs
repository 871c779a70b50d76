//! Integration tests composing the dispatcher with the registry.
//!
//! A caller creates an operation, publishes its id inside an event, and a
//! reaction later completes the operation by id. Errors cross the boundary as
//! portable records.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use rendezvous_core::{CorrelationId, ErrorRecorder, PortableError, ReactionResult, Value};
use rendezvous_runtime::{DispatchError, EventDispatcher, OperationError, PendingRegistry};
use rendezvous_testing::mocks::{FailingReaction, InvocationLog, RecordingReaction};
use rendezvous_testing::{init_test_tracing, portable_error};
use serde_json::json;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

/// Subscribe a reaction that completes operations named in `reply` events.
///
/// Replies carry `{ id, ok }` or `{ id, error }`, where `error` is a portable
/// error record.
fn wire_replies(dispatcher: &EventDispatcher, registry: &PendingRegistry<Value>) {
    let registry = registry.clone();
    dispatcher.subscribe_projected("reply", ["id", "ok", "error"], move |args: Vec<Value>| {
        let registry = registry.clone();
        async move {
            let id = CorrelationId::from(args[1].as_str().unwrap_or_default());
            if args[3].is_null() {
                registry.resolve(&id, args[2].clone())?;
            } else {
                let record: PortableError = serde_json::from_value(args[3].clone())?;
                registry.reject(&id, ErrorRecorder::from_portable(record))?;
            }
            ReactionResult::Ok(None)
        }
    });
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_reaction_resolves_operation_by_id() {
    let _guard = init_test_tracing();
    let registry: PendingRegistry<Value> = PendingRegistry::new();
    let dispatcher = EventDispatcher::new();
    wire_replies(&dispatcher, &registry);

    let operation = registry.create_with_timeout(Duration::from_secs(5)).unwrap();
    let reply = json!({ "id": operation.id().as_str(), "ok": { "rows": 3 } });

    dispatcher.dispatch_all("reply", vec![reply]).await.unwrap();

    assert_eq!(operation.await.unwrap(), json!({ "rows": 3 }));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_portable_error_round_trips_through_reply() {
    let registry: PendingRegistry<Value> = PendingRegistry::new();
    let dispatcher = EventDispatcher::new();
    wire_replies(&dispatcher, &registry);

    let operation = registry.create();
    let record = portable_error("QueryError", "relation does not exist", &["db::query", "db::run"]);
    let wire = record.to_json().unwrap();
    let reply = json!({
        "id": operation.id().as_str(),
        "error": serde_json::from_str::<Value>(&wire).unwrap(),
    });

    dispatcher.dispatch_all("reply", vec![reply]).await.unwrap();

    let Err(OperationError::Rejected(error)) = operation.await else {
        panic!("expected a rejection");
    };
    assert_eq!(error.name(), "QueryError");
    assert_eq!(error.message(), "relation does not exist");
    assert_eq!(error.trace().lines(), ["db::query", "db::run"]);
    assert_eq!(ErrorRecorder::to_portable(&error), record);
}

#[tokio::test]
async fn test_reply_for_completed_operation_fails_dispatch() {
    let registry: PendingRegistry<Value> = PendingRegistry::new();
    let dispatcher = EventDispatcher::new();
    wire_replies(&dispatcher, &registry);

    let operation = registry.create();
    let reply = json!({ "id": operation.id().as_str(), "ok": 1 });

    dispatcher.dispatch_all("reply", vec![reply.clone()]).await.unwrap();
    let err = dispatcher.dispatch_all("reply", vec![reply]).await.unwrap_err();

    let DispatchError::ReactionFailed { event, index, source } = err;
    assert_eq!(event, "reply");
    assert_eq!(index, 0);
    assert!(source.to_string().contains(operation.id().as_str()));
    assert_eq!(operation.await.unwrap(), json!(1));
}

#[tokio::test]
async fn test_reactions_run_strictly_in_sequence() {
    let log = InvocationLog::new();
    let dispatcher = EventDispatcher::new();
    dispatcher.subscribe("x", RecordingReaction::new("s1", &log).with_delay(Duration::from_millis(5)));
    dispatcher.subscribe("x", RecordingReaction::new("s2", &log).with_delay(Duration::from_millis(40)));
    dispatcher.subscribe("x", RecordingReaction::new("s3", &log));

    dispatcher.dispatch_all("x", vec![json!({})]).await.unwrap();

    // s2 is the slowest, yet s3 never starts before s2 ends.
    assert_eq!(
        log.timeline(),
        vec![
            "start:s1",
            "end:s1",
            "start:s2",
            "end:s2",
            "start:s3",
            "end:s3",
        ]
    );
}

#[tokio::test]
async fn test_dispatch_first_skips_later_reactions() {
    let log = InvocationLog::new();
    let dispatcher = EventDispatcher::new();
    dispatcher.subscribe("q", RecordingReaction::new("silent", &log));
    dispatcher.subscribe("q", RecordingReaction::new("answer", &log).answering(json!("v1")));
    dispatcher.subscribe("q", RecordingReaction::new("late", &log).answering(json!("v2")));

    let answer = dispatcher.dispatch_first("q", vec![]).await.unwrap();

    assert_eq!(answer, Some(json!("v1")));
    assert_eq!(log.labels(), vec!["silent", "answer"]);
}

#[tokio::test]
async fn test_dispatch_first_propagates_failure_before_answer() {
    let log = InvocationLog::new();
    let dispatcher = EventDispatcher::new();
    dispatcher.subscribe("q", FailingReaction::new("broken", &log, "lookup failed"));
    dispatcher.subscribe("q", RecordingReaction::new("answer", &log).answering(json!(1)));

    let err = dispatcher.dispatch_first("q", vec![]).await.unwrap_err();

    assert!(err.to_string().contains("lookup failed"));
    assert_eq!(log.labels(), vec!["broken"]);
}

#[tokio::test]
async fn test_projected_and_plain_reactions_share_an_event() {
    let log = InvocationLog::new();
    let dispatcher = EventDispatcher::new();
    dispatcher.subscribe("order", RecordingReaction::new("plain", &log));
    dispatcher.subscribe_projected("order", ["sku", "qty"], RecordingReaction::new("projected", &log));

    let event = json!({ "sku": "A-1", "price": 10 });
    dispatcher
        .dispatch_all("order", vec![event.clone(), json!("trailing")])
        .await
        .unwrap();

    let invocations = log.invocations();
    assert_eq!(invocations[0].args, vec![event.clone(), json!("trailing")]);
    assert_eq!(
        invocations[1].args,
        vec![event, json!("A-1"), Value::Null, json!("trailing")]
    );
}

#[tokio::test]
async fn test_subscription_during_dispatch_applies_to_next_dispatch() {
    let log = InvocationLog::new();
    let dispatcher = EventDispatcher::new();
    let late_log = log.clone();
    let handle = dispatcher.clone();
    dispatcher.subscribe("e", move |_args: Vec<Value>| {
        handle.subscribe("e", RecordingReaction::new("late", &late_log));
        async { ReactionResult::Ok(None) }
    });

    dispatcher.dispatch_all("e", vec![]).await.unwrap();
    assert!(log.is_empty());

    dispatcher.dispatch_all("e", vec![]).await.unwrap();
    assert_eq!(log.labels(), vec!["late"]);
}
